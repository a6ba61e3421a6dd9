//! Daemon process: startup checks, socket setup, detaching, and the
//! sequential accept loop.

use std::ffi::OsString;
use std::os::unix::net::UnixListener;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use nestbox_common::config::DaemonConfig;
use nestbox_common::constants::{DAEMON_PROCESS_NAME, PRELOAD_ENV, SOCKET_BACKLOG};
use nestbox_common::error::{NestboxError, Result};
use nestbox_core::filesystem::mount::NixMounts;
use nestbox_core::process::{self, NixProcessControl, ProcessControl};
use nix::sys::socket::{Backlog, listen};
use nix::unistd::{ForkResult, Pid, fork, setsid};

use crate::client::Client;
use crate::init::ChrootExecutor;
use crate::orchestrator::{Flow, Orchestrator};
use crate::protocol::Session;
use crate::worker::ThreadLauncher;

/// Longest a peer may stay silent mid-session before it is dropped.
pub const SESSION_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Which side of [`detach`] the caller is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detach {
    /// The original process; the daemon runs as `Pid`.
    Parent(Pid),
    /// The detached daemon process.
    Daemon,
}

/// Rejects a non-empty preload variable.
///
/// # Errors
///
/// Returns [`NestboxError::Startup`] if `value` is set and non-empty.
pub fn check_preload(value: Option<OsString>) -> Result<()> {
    match value {
        Some(v) if !v.is_empty() => Err(NestboxError::Startup {
            message: format!("{PRELOAD_ENV} is set; refusing to run with injected libraries"),
        }),
        _ => Ok(()),
    }
}

/// Checks every fatal startup precondition. Nothing is bound or forked.
///
/// # Errors
///
/// Returns [`NestboxError::Startup`] when not running as root, when a
/// preload library is configured, or when a daemon already answers on the
/// configured socket.
pub fn check_preconditions(config: &DaemonConfig) -> Result<()> {
    if !process::is_superuser() {
        return Err(NestboxError::Startup {
            message: "the daemon must run as root".into(),
        });
    }
    check_preload(std::env::var_os(PRELOAD_ENV))?;
    if Client::from_config(config).is_daemon_running() {
        return Err(NestboxError::Startup {
            message: format!("a daemon is already running on {}", config.socket_path().display()),
        });
    }
    Ok(())
}

/// Binds the control socket at `path`, replacing any stale socket file.
///
/// # Errors
///
/// Returns an error if the socket cannot be created, bound, or listened on.
pub fn bind(path: &Path) -> Result<UnixListener> {
    let io_err = |source: std::io::Error| NestboxError::Io {
        path: path.to_path_buf(),
        source,
    };

    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "removed stale socket"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(io_err(e)),
    }

    let listener = UnixListener::bind(path).map_err(io_err)?;
    // Re-listening on a bound socket only resizes its accept queue.
    let backlog = Backlog::new(SOCKET_BACKLOG).map_err(|e| io_err(e.into()))?;
    listen(&listener, backlog).map_err(|e| io_err(e.into()))?;
    tracing::info!(path = %path.display(), backlog = SOCKET_BACKLOG, "control socket bound");
    Ok(listener)
}

/// Forks into the background and gives the child daemon identity.
///
/// # Errors
///
/// Returns an error if forking or session setup fails.
pub fn detach() -> Result<Detach> {
    // SAFETY: called before the daemon spawns any thread, so the child
    // inherits a consistent single-threaded address space.
    match unsafe { fork() } {
        Ok(ForkResult::Parent { child }) => Ok(Detach::Parent(child)),
        Ok(ForkResult::Child) => {
            let _ = setsid().map_err(|e| NestboxError::PermissionDenied {
                message: format!("setsid failed: {e}"),
            })?;
            process::set_process_name(DAEMON_PROCESS_NAME)?;
            process::block_terminal_input_signal()?;
            Ok(Detach::Daemon)
        }
        Err(e) => Err(NestboxError::PermissionDenied {
            message: format!("fork failed: {e}"),
        }),
    }
}

/// Builds an orchestrator wired to the real mount, process, and worker
/// implementations.
#[must_use]
pub fn default_orchestrator(config: &DaemonConfig) -> Orchestrator {
    let processes: Arc<dyn ProcessControl> = Arc::new(NixProcessControl);
    let launcher = ThreadLauncher::new(
        Client::from_config(config),
        config.namespace_policy,
        Arc::clone(&processes),
        Arc::new(ChrootExecutor),
    );
    Orchestrator::new(Box::new(launcher), processes, Arc::new(NixMounts), config.unmount_retries)
}

/// Runs the accept loop until a shutdown command arrives, then tears every
/// container down and removes the socket at `socket_path`.
///
/// Sessions are handled strictly one after another. A misbehaving peer
/// only loses its own session.
///
/// # Errors
///
/// Returns an error only if the socket file cannot be removed at shutdown.
pub fn serve(listener: &UnixListener, socket_path: &Path, orchestrator: &mut Orchestrator) -> Result<()> {
    tracing::info!("accepting sessions");
    for incoming in listener.incoming() {
        let stream = match incoming {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                continue;
            }
        };
        if let Err(e) = stream.set_read_timeout(Some(SESSION_READ_TIMEOUT)) {
            tracing::warn!(error = %e, "could not set session timeout");
        }

        match orchestrator.handle(&mut Session::new(stream)) {
            Ok(Flow::Continue) => {}
            Ok(Flow::Shutdown) => break,
            Err(e) => tracing::warn!(error = %e, "session dropped"),
        }
    }

    orchestrator.teardown();
    std::fs::remove_file(socket_path).map_err(|e| NestboxError::Io {
        path: socket_path.to_path_buf(),
        source: e,
    })?;
    tracing::info!("daemon stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_or_empty_preload_is_accepted() {
        assert!(check_preload(None).is_ok());
        assert!(check_preload(Some(OsString::new())).is_ok());
    }

    #[test]
    fn preload_library_is_fatal() {
        let err = check_preload(Some(OsString::from("/tmp/evil.so"))).unwrap_err();
        assert!(matches!(err, NestboxError::Startup { .. }));
    }

    #[test]
    fn bind_replaces_stale_socket_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stale.sock");
        std::fs::write(&path, b"leftover").unwrap();

        let listener = bind(&path).unwrap();
        assert!(listener.local_addr().unwrap().as_pathname().is_some());
        assert!(std::os::unix::net::UnixStream::connect(&path).is_ok());
    }
}
