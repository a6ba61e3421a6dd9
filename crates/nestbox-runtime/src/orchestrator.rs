//! Lifecycle orchestration: one command per session, dispatched against
//! the registry.
//!
//! The orchestrator is driven exclusively by the daemon's accept loop.
//! Isolation workers never touch it directly; they report back over the
//! socket like any other client, so every registry mutation happens here
//! in socket arrival order.

use std::collections::HashSet;
use std::io::{Read, Write};
use std::sync::Arc;

use nestbox_common::types::ContainerId;
use nestbox_core::filesystem::mount::{MountOps, unmount_container};
use nestbox_core::process::ProcessControl;
use nix::unistd::Pid;

use crate::protocol::messages::{
    read_container_spec, read_creation_body, read_id, read_pid, send_container_spec, send_id, send_mount_list,
    send_pid,
};
use crate::protocol::{ProtocolError, Session, Tag};
use crate::registry::{ContainerRecord, Registry};
use crate::worker::WorkerLauncher;

/// What the accept loop should do after a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Accept the next session.
    Continue,
    /// Tear everything down and exit.
    Shutdown,
}

/// Owner of the registry and dispatcher of protocol commands.
pub struct Orchestrator {
    registry: Registry,
    pending: HashSet<ContainerId>,
    launcher: Box<dyn WorkerLauncher>,
    processes: Arc<dyn ProcessControl>,
    mounts: Arc<dyn MountOps>,
    unmount_retries: u32,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("registry", &self.registry)
            .field("pending", &self.pending)
            .field("unmount_retries", &self.unmount_retries)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Creates an orchestrator with an empty registry.
    #[must_use]
    pub fn new(
        launcher: Box<dyn WorkerLauncher>,
        processes: Arc<dyn ProcessControl>,
        mounts: Arc<dyn MountOps>,
        unmount_retries: u32,
    ) -> Self {
        Self {
            registry: Registry::new(),
            pending: HashSet::new(),
            launcher,
            processes,
            mounts,
            unmount_retries,
        }
    }

    /// Read access to the live registry.
    #[must_use]
    pub const fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Returns whether a creation for `id` is in flight.
    #[must_use]
    pub fn is_pending(&self, id: &ContainerId) -> bool {
        self.pending.contains(id)
    }

    /// Handles one session to completion.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] if the peer misbehaves. The registry is
    /// only mutated after a command's arguments have been fully decoded, so
    /// a failed session leaves it untouched.
    pub fn handle<S: Read + Write>(&mut self, session: &mut Session<S>) -> Result<Flow, ProtocolError> {
        let command = session.read_command()?;
        tracing::debug!(%command, "session opened");
        match command {
            Tag::Test => session.send_tag(Tag::TestAck)?,
            Tag::Create => self.create(session)?,
            Tag::Kill => self.kill(session)?,
            Tag::Ps => self.ps(session)?,
            Tag::IsActive => {
                let id = read_id(session)?;
                let reply = if self.registry.is_active(&id) {
                    Tag::Active
                } else {
                    Tag::Inactive
                };
                session.send_tag(reply)?;
            }
            Tag::WorkerRegister => self.register(session)?,
            Tag::WorkerDied => {
                let id = read_id(session)?;
                let pid = read_pid(session)?;
                self.worker_died(&id, pid);
            }
            Tag::WorkerAbort => {
                let id = read_id(session)?;
                if self.pending.remove(&id) {
                    tracing::warn!(%id, "container creation aborted");
                }
            }
            Tag::KillDaemon => {
                tracing::info!("shutdown requested");
                return Ok(Flow::Shutdown);
            }
            other => {
                return Err(ProtocolError::Unexpected {
                    expected: "a command".into(),
                    got: format!("tag {other}"),
                });
            }
        }
        Ok(Flow::Continue)
    }

    fn create<S: Read + Write>(&mut self, session: &mut Session<S>) -> Result<(), ProtocolError> {
        let id = read_id(session)?;
        if let Some(record) = self.registry.find(&id) {
            session.send_tag(Tag::Active)?;
            send_container_spec(session, &record.spec)?;
            session.send_tag(Tag::Pid)?;
            return send_pid(session, record.init_pid);
        }
        if self.pending.contains(&id) {
            tracing::debug!(%id, "creation already in flight");
            return session.send_tag(Tag::Pending);
        }

        // The body is the last message of a create session, so a launch
        // failure can only reach the client as a container that never
        // registers.
        session.send_tag(Tag::NotRunning)?;
        let spec = read_creation_body(session, id)?;
        let id = spec.id.clone();
        match self.launcher.launch(spec) {
            Ok(()) => {
                tracing::info!(%id, "isolation worker launched");
                let _ = self.pending.insert(id);
            }
            Err(e) => tracing::error!(%id, error = %e, "failed to launch isolation worker"),
        }
        Ok(())
    }

    fn kill<S: Read + Write>(&mut self, session: &mut Session<S>) -> Result<(), ProtocolError> {
        let id = read_id(session)?;
        let Some(record) = self.registry.remove(&id) else {
            return session.send_tag(Tag::NotRunning);
        };
        if let Err(e) = self.processes.kill(record.init_pid) {
            tracing::warn!(%id, pid = %record.init_pid, error = %e, "init process could not be killed");
        }
        tracing::info!(%id, pid = %record.init_pid, "container killed");
        session.send_tag(Tag::Killed)?;
        send_mount_list(session, &record.spec.extra_mounts)
    }

    fn ps<S: Read + Write>(&self, session: &mut Session<S>) -> Result<(), ProtocolError> {
        for record in self.registry.iter() {
            send_id(session, &record.id)?;
            send_pid(session, record.init_pid)?;
        }
        session.send_tag(Tag::EndPs)
    }

    fn register<S: Read + Write>(&mut self, session: &mut Session<S>) -> Result<(), ProtocolError> {
        session.expect_tag(Tag::Pid)?;
        let init_pid = read_pid(session)?;
        let id = read_id(session)?;
        let spec = read_container_spec(session)?;

        let _ = self.pending.remove(&id);
        match self.registry.insert(ContainerRecord {
            id: id.clone(),
            init_pid,
            spec,
        }) {
            Ok(()) => {
                tracing::info!(%id, pid = %init_pid, "container registered");
                session.send_tag(Tag::Pid)?;
                send_pid(session, init_pid)
            }
            Err(dup) => {
                tracing::warn!(id = %dup.id, pid = %init_pid, "registration rejected, id already active");
                session.send_tag(Tag::Rejected)
            }
        }
    }

    fn worker_died(&mut self, id: &ContainerId, pid: Pid) {
        // Registration already cleared this worker's pending mark; any mark
        // left for `id` belongs to a newer creation.
        let matches = self
            .registry
            .find(id)
            .is_some_and(|record| record.init_pid == pid);
        if matches {
            let _ = self.registry.remove(id);
            tracing::info!(%id, %pid, "container init exited, record removed");
        } else {
            tracing::debug!(%id, %pid, "exit report for a record that is gone or was replaced");
        }
    }

    /// Kills every tracked init process and force-unmounts every
    /// container's filesystem, then empties the registry.
    pub fn teardown(&mut self) {
        let processes = Arc::clone(&self.processes);
        let mounts = Arc::clone(&self.mounts);
        let retries = self.unmount_retries;
        self.registry.for_each(|record| {
            if let Err(e) = processes.kill(record.init_pid) {
                tracing::warn!(id = %record.id, pid = %record.init_pid, error = %e, "kill during shutdown failed");
            }
            unmount_container(
                mounts.as_ref(),
                &record.id,
                record.spec.extra_mounts.iter().map(|m| m.target.as_str()),
                retries,
            );
        });
        tracing::info!(containers = self.registry.len(), "all containers torn down");
        self.registry.clear();
        self.pending.clear();
    }
}
