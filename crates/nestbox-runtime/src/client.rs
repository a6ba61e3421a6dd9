//! Client side of the control protocol.
//!
//! Used by the CLI to drive the daemon and by isolation workers to report
//! back to it. Every call opens a fresh connection, since the daemon
//! handles exactly one command per session.

use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use nestbox_common::config::DaemonConfig;
use nestbox_common::error::{NestboxError, Result};
use nestbox_common::types::{ContainerId, MountRequest};
use nix::unistd::Pid;

use crate::protocol::messages::{
    read_container_spec, read_mount_list, read_pid, send_container_spec, send_creation_body, send_id,
    send_pid,
};
use crate::protocol::{Message, ProtocolError, Session, Tag};
use crate::spec::{ContainerSpec, CreationSpec};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Result of a `create` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The container was already running.
    Running(RunningContainer),
    /// The creation body was accepted and a worker is starting.
    Submitted,
    /// Another creation for the same id is in flight.
    Pending,
}

/// A live container as reported by the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningContainer {
    /// Host PID of the container's namespace root process.
    pub pid: Pid,
    /// Spec the container was created with.
    pub spec: ContainerSpec,
}

/// Result of a `kill` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KillOutcome {
    /// The init process was killed; the extra mounts are still to be
    /// cleaned up by the caller.
    Killed(Vec<MountRequest>),
    /// No such container.
    NotRunning,
}

/// Result of a worker registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// The record was inserted.
    Accepted(Pid),
    /// The id was already live.
    Rejected,
}

/// One line of a `ps` listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PsEntry {
    /// Container root directory.
    pub id: ContainerId,
    /// Host PID of the init process.
    pub pid: Pid,
}

/// Connection factory for the daemon's control socket.
#[derive(Debug, Clone)]
pub struct Client {
    socket_path: PathBuf,
}

impl Client {
    /// Creates a client for the socket at `socket_path`.
    #[must_use]
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    /// Creates a client for the socket named by `config`.
    #[must_use]
    pub fn from_config(config: &DaemonConfig) -> Self {
        Self::new(config.socket_path())
    }

    /// Path of the control socket.
    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    fn connect(&self) -> Result<Session<UnixStream>> {
        let stream = UnixStream::connect(&self.socket_path).map_err(|e| NestboxError::Io {
            path: self.socket_path.clone(),
            source: e,
        })?;
        Ok(Session::new(stream))
    }

    fn open(&self, command: Tag) -> Result<Session<UnixStream>> {
        let mut session = self.connect()?;
        session.send_tag(command)?;
        Ok(session)
    }

    /// Sends `test` and waits for the acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns an error if nothing listens on the socket or the peer
    /// answers with anything else.
    pub fn probe(&self) -> Result<()> {
        let mut session = self.open(Tag::Test)?;
        session.expect_tag(Tag::TestAck)?;
        Ok(())
    }

    /// Returns whether a daemon answers on the socket.
    #[must_use]
    pub fn is_daemon_running(&self) -> bool {
        self.probe().is_ok()
    }

    /// Asks the daemon to run a container.
    ///
    /// # Errors
    ///
    /// Returns an error on connection or protocol failure.
    pub fn create(&self, spec: &CreationSpec) -> Result<CreateOutcome> {
        let mut session = self.open(Tag::Create)?;
        send_id(&mut session, &spec.id)?;
        match session.read_tag()? {
            Tag::Active => {
                let container = read_container_spec(&mut session)?;
                session.expect_tag(Tag::Pid)?;
                let pid = read_pid(&mut session)?;
                Ok(CreateOutcome::Running(RunningContainer { pid, spec: container }))
            }
            Tag::Pending => Ok(CreateOutcome::Pending),
            Tag::NotRunning => {
                send_creation_body(&mut session, spec)?;
                Ok(CreateOutcome::Submitted)
            }
            other => Err(unexpected("active, pending, or not-running", other).into()),
        }
    }

    /// Polls `ps` until `id` shows up or `timeout` expires.
    ///
    /// # Errors
    ///
    /// Returns [`NestboxError::NotFound`] on timeout, which also covers a
    /// worker that aborted before registering.
    pub fn wait_until_running(&self, id: &ContainerId, timeout: Duration) -> Result<Pid> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(entry) = self.ps()?.into_iter().find(|entry| &entry.id == id) {
                return Ok(entry.pid);
            }
            if Instant::now() >= deadline {
                return Err(NestboxError::NotFound {
                    kind: "running container",
                    id: id.to_string(),
                });
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    /// Kills a container's init process.
    ///
    /// # Errors
    ///
    /// Returns an error on connection or protocol failure.
    pub fn kill(&self, id: &ContainerId) -> Result<KillOutcome> {
        let mut session = self.open(Tag::Kill)?;
        send_id(&mut session, id)?;
        match session.read_tag()? {
            Tag::Killed => Ok(KillOutcome::Killed(read_mount_list(&mut session)?)),
            Tag::NotRunning => Ok(KillOutcome::NotRunning),
            other => Err(unexpected("killed or not-running", other).into()),
        }
    }

    /// Lists live containers in registration order.
    ///
    /// # Errors
    ///
    /// Returns an error on connection or protocol failure.
    pub fn ps(&self) -> Result<Vec<PsEntry>> {
        let mut session = self.open(Tag::Ps)?;
        let mut entries = Vec::new();
        loop {
            match session.read_message()? {
                Message::Tag(Tag::EndPs) => return Ok(entries),
                Message::Argument(raw) => {
                    let id = ContainerId::parse(raw).map_err(|e| ProtocolError::InvalidArgument {
                        field: "container id",
                        reason: e.to_string(),
                    })?;
                    let pid = read_pid(&mut session)?;
                    entries.push(PsEntry { id, pid });
                }
                Message::Tag(other) => return Err(unexpected("a ps entry or end-ps", other).into()),
            }
        }
    }

    /// Asks whether a container is running.
    ///
    /// # Errors
    ///
    /// Returns an error on connection or protocol failure.
    pub fn is_active(&self, id: &ContainerId) -> Result<bool> {
        let mut session = self.open(Tag::IsActive)?;
        send_id(&mut session, id)?;
        match session.read_tag()? {
            Tag::Active => Ok(true),
            Tag::Inactive => Ok(false),
            other => Err(unexpected("active or inactive", other).into()),
        }
    }

    /// Tells the daemon to kill every container and exit.
    ///
    /// # Errors
    ///
    /// Returns an error if the daemon cannot be reached.
    pub fn kill_daemon(&self) -> Result<()> {
        let _ = self.open(Tag::KillDaemon)?;
        Ok(())
    }

    /// Registers a created container. Called by isolation workers.
    ///
    /// # Errors
    ///
    /// Returns an error on connection or protocol failure.
    pub fn register(&self, pid: Pid, id: &ContainerId, spec: &ContainerSpec) -> Result<Registration> {
        let mut session = self.open(Tag::WorkerRegister)?;
        session.send_tag(Tag::Pid)?;
        send_pid(&mut session, pid)?;
        send_id(&mut session, id)?;
        send_container_spec(&mut session, spec)?;
        match session.read_tag()? {
            Tag::Pid => Ok(Registration::Accepted(read_pid(&mut session)?)),
            Tag::Rejected => Ok(Registration::Rejected),
            other => Err(unexpected("pid or rejected", other).into()),
        }
    }

    /// Reports that a container's init process exited.
    ///
    /// # Errors
    ///
    /// Returns an error if the daemon cannot be reached.
    pub fn report_died(&self, id: &ContainerId, pid: Pid) -> Result<()> {
        let mut session = self.open(Tag::WorkerDied)?;
        send_id(&mut session, id)?;
        send_pid(&mut session, pid)?;
        Ok(())
    }

    /// Reports that a creation failed before registration.
    ///
    /// # Errors
    ///
    /// Returns an error if the daemon cannot be reached.
    pub fn report_abort(&self, id: &ContainerId) -> Result<()> {
        let mut session = self.open(Tag::WorkerAbort)?;
        send_id(&mut session, id)?;
        Ok(())
    }
}

fn unexpected(expected: &str, got: Tag) -> ProtocolError {
    ProtocolError::Unexpected {
        expected: expected.into(),
        got: format!("tag {got}"),
    }
}
