//! Isolation workers: one OS thread per container creation.
//!
//! A worker enters fresh namespaces, forks the container's init process,
//! and reports back to the daemon over the control socket. It then blocks
//! on the child until it exits and reports the death, so the registry only
//! ever changes from the daemon's accept loop.

use std::sync::Arc;

use nestbox_common::error::{NestboxError, Result};
use nestbox_common::types::NamespacePolicy;
use nestbox_core::namespace::enter_isolation;
use nestbox_core::process::{InitExit, ProcessControl};
use nix::unistd::{ForkResult, Pid, fork};

use crate::client::{Client, Registration};
use crate::init::PreparedInit;
use crate::spec::CreationSpec;

/// Starts an isolation worker for a staged creation.
pub trait WorkerLauncher: Send {
    /// Hands `spec` to a new worker. Returns once the worker is running;
    /// the outcome reaches the daemon later as a protocol message.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker could not be started at all.
    fn launch(&mut self, spec: CreationSpec) -> Result<()>;
}

/// Turns the forked child into the container's init process.
///
/// Runs in the child of a multi-threaded process, so implementations must
/// not allocate or take locks another thread could have held at fork time.
pub trait InitExecutor: Send + Sync {
    /// Sets up the container and execs its init command. Never returns;
    /// on failure the child exits with a non-zero status.
    fn exec_init(&self, init: &PreparedInit) -> !;
}

/// Ownership of a forked init process.
pub struct InitSupervisor {
    pid: Pid,
    processes: Arc<dyn ProcessControl>,
}

impl std::fmt::Debug for InitSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitSupervisor").field("pid", &self.pid).finish_non_exhaustive()
    }
}

impl InitSupervisor {
    /// Takes ownership of the child `pid`.
    #[must_use]
    pub fn new(pid: Pid, processes: Arc<dyn ProcessControl>) -> Self {
        Self { pid, processes }
    }

    /// Host PID of the supervised process.
    #[must_use]
    pub const fn pid(&self) -> Pid {
        self.pid
    }

    /// Sends `SIGKILL` to the supervised process.
    ///
    /// # Errors
    ///
    /// Returns an error if the signal cannot be delivered.
    pub fn request_stop(&self) -> Result<()> {
        self.processes.kill(self.pid)
    }

    /// Blocks until the supervised process exits.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be waited for.
    pub fn wait(&self) -> Result<InitExit> {
        self.processes.wait_exit(self.pid)
    }
}

/// Default launcher: a named thread per creation.
pub struct ThreadLauncher {
    client: Client,
    policy: NamespacePolicy,
    processes: Arc<dyn ProcessControl>,
    executor: Arc<dyn InitExecutor>,
}

impl std::fmt::Debug for ThreadLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadLauncher")
            .field("client", &self.client)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl ThreadLauncher {
    /// Creates a launcher whose workers report to the daemon via `client`.
    #[must_use]
    pub fn new(
        client: Client,
        policy: NamespacePolicy,
        processes: Arc<dyn ProcessControl>,
        executor: Arc<dyn InitExecutor>,
    ) -> Self {
        Self {
            client,
            policy,
            processes,
            executor,
        }
    }
}

impl WorkerLauncher for ThreadLauncher {
    fn launch(&mut self, spec: CreationSpec) -> Result<()> {
        let client = self.client.clone();
        let policy = self.policy;
        let processes = Arc::clone(&self.processes);
        let executor = Arc::clone(&self.executor);
        let path = spec.id.as_path().to_path_buf();

        let _handle = std::thread::Builder::new()
            .name(format!("worker:{}", spec.id))
            .spawn(move || run_worker(&client, policy, processes, executor.as_ref(), &spec))
            .map_err(|e| NestboxError::Io { path, source: e })?;
        Ok(())
    }
}

/// Body of one worker thread.
fn run_worker(
    client: &Client,
    policy: NamespacePolicy,
    processes: Arc<dyn ProcessControl>,
    executor: &dyn InitExecutor,
    spec: &CreationSpec,
) {
    let id = &spec.id;
    match enter_isolation(policy) {
        Ok(report) if !report.is_complete() => {
            tracing::warn!(%id, failed = report.failed.len(), "running with partial isolation");
        }
        Ok(_) => tracing::debug!(%id, "namespaces entered"),
        Err(e) => {
            tracing::error!(%id, error = %e, "namespace entry failed");
            abort(client, spec);
            return;
        }
    }

    if spec.container.seccomp_enabled {
        tracing::debug!(%id, "seccomp requested, no filter is installed");
    }

    let init = match PreparedInit::new(spec) {
        Ok(init) => init,
        Err(e) => {
            tracing::error!(%id, error = %e, "container setup could not be prepared");
            abort(client, spec);
            return;
        }
    };

    // SAFETY: the child only runs the executor, which execs or exits
    // without returning to Rust code shared with other threads.
    match unsafe { fork() } {
        Ok(ForkResult::Child) => executor.exec_init(&init),
        Ok(ForkResult::Parent { child }) => {
            supervise(client, &InitSupervisor::new(child, processes), spec);
        }
        Err(e) => {
            tracing::error!(%id, error = %e, "fork failed");
            abort(client, spec);
        }
    }
}

/// Registers the forked child and reports its death.
fn supervise(client: &Client, supervisor: &InitSupervisor, spec: &CreationSpec) {
    let id = &spec.id;
    let pid = supervisor.pid();
    match client.register(pid, id, &spec.container) {
        Ok(Registration::Accepted(_)) => {
            tracing::info!(%id, %pid, "container running");
            match supervisor.wait() {
                Ok(exit) => tracing::info!(%id, %pid, ?exit, "container init exited"),
                Err(e) => tracing::warn!(%id, %pid, error = %e, "lost track of container init"),
            }
            if let Err(e) = client.report_died(id, pid) {
                tracing::warn!(%id, %pid, error = %e, "could not report container exit");
            }
        }
        Ok(Registration::Rejected) => {
            tracing::warn!(%id, %pid, "daemon rejected registration, stopping duplicate");
            stop(supervisor);
        }
        Err(e) => {
            tracing::error!(%id, %pid, error = %e, "registration failed");
            stop(supervisor);
            abort(client, spec);
            // The daemon may have inserted the record before the reply was
            // lost; a death report for an unknown pid is ignored.
            if let Err(e) = client.report_died(id, pid) {
                tracing::warn!(%id, %pid, error = %e, "could not report container exit");
            }
        }
    }
}

fn stop(supervisor: &InitSupervisor) {
    if let Err(e) = supervisor.request_stop() {
        tracing::warn!(pid = %supervisor.pid(), error = %e, "could not stop init process");
    }
    let _ = supervisor.wait();
}

fn abort(client: &Client, spec: &CreationSpec) {
    if let Err(e) = client.report_abort(&spec.id) {
        tracing::warn!(id = %spec.id, error = %e, "could not report aborted creation");
    }
}
