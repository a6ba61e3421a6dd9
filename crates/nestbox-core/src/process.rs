//! Process control primitives for container init processes and the
//! daemon itself.

use nestbox_common::error::{NestboxError, Result};
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::Pid;

/// How a container's init process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitExit {
    /// The process exited with the given status code.
    Exited(i32),
    /// The process was terminated by a signal.
    Signaled(Signal),
}

/// Signal and wait operations on container init processes.
pub trait ProcessControl: Send + Sync {
    /// Sends `SIGKILL` to `pid`.
    ///
    /// # Errors
    ///
    /// Returns an error if the signal cannot be delivered.
    fn kill(&self, pid: Pid) -> Result<()>;

    /// Blocks until the child `pid` terminates.
    ///
    /// # Errors
    ///
    /// Returns an error if `pid` is not a waitable child.
    fn wait_exit(&self, pid: Pid) -> Result<InitExit>;
}

/// Default [`ProcessControl`] built on `kill(2)` and `waitpid(2)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NixProcessControl;

impl ProcessControl for NixProcessControl {
    fn kill(&self, pid: Pid) -> Result<()> {
        kill(pid, Signal::SIGKILL).map_err(|e| NestboxError::PermissionDenied {
            message: format!("SIGKILL to {pid} failed: {e}"),
        })?;
        tracing::info!(%pid, "sent SIGKILL");
        Ok(())
    }

    fn wait_exit(&self, pid: Pid) -> Result<InitExit> {
        loop {
            match waitpid(pid, None) {
                Ok(WaitStatus::Exited(_, code)) => return Ok(InitExit::Exited(code)),
                Ok(WaitStatus::Signaled(_, signal, _)) => return Ok(InitExit::Signaled(signal)),
                Ok(_) | Err(Errno::EINTR) => {}
                Err(e) => {
                    return Err(NestboxError::NotFound {
                        kind: "child process",
                        id: format!("{pid} ({e})"),
                    });
                }
            }
        }
    }
}

/// Returns whether the process runs with superuser privileges.
#[must_use]
pub fn is_superuser() -> bool {
    nix::unistd::geteuid().is_root()
}

/// Renames the calling thread, and the process when called from the main
/// thread, as shown by `ps` and `/proc/<pid>/comm`.
///
/// # Errors
///
/// Returns an error if the name contains a NUL byte or `prctl` fails.
#[cfg(target_os = "linux")]
pub fn set_process_name(name: &str) -> Result<()> {
    use std::ffi::CString;

    let cname = CString::new(name).map_err(|_| NestboxError::Config {
        message: format!("process name contains NUL: {name:?}"),
    })?;
    nix::sys::prctl::set_name(&cname).map_err(|e| NestboxError::PermissionDenied {
        message: format!("renaming process failed: {e}"),
    })
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error, `PR_SET_NAME` requires Linux.
#[cfg(not(target_os = "linux"))]
pub fn set_process_name(_name: &str) -> Result<()> {
    Err(NestboxError::Config {
        message: "Linux required for native container operations".into(),
    })
}

/// Blocks `SIGTTIN` so a backgrounded daemon is not stopped when it
/// touches its former terminal.
///
/// # Errors
///
/// Returns an error if `sigprocmask(2)` fails.
pub fn block_terminal_input_signal() -> Result<()> {
    use nix::sys::signal::{SigSet, SigmaskHow, sigprocmask};

    let mut set = SigSet::empty();
    set.add(Signal::SIGTTIN);
    sigprocmask(SigmaskHow::SIG_BLOCK, Some(&set), None).map_err(|e| NestboxError::PermissionDenied {
        message: format!("blocking SIGTTIN failed: {e}"),
    })
}

/// Sets `PR_SET_NO_NEW_PRIVS` on the calling thread, preventing it and
/// anything it executes from gaining privileges through set-user-ID or
/// file capabilities.
///
/// Safe to call in a forked child: the error is the bare errno.
///
/// # Errors
///
/// Returns the errno if `prctl` fails.
#[cfg(target_os = "linux")]
pub fn set_no_new_privs() -> std::result::Result<(), Errno> {
    nix::sys::prctl::set_no_new_privs()
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always fails with `ENOSYS`, `PR_SET_NO_NEW_PRIVS` requires Linux.
#[cfg(not(target_os = "linux"))]
pub fn set_no_new_privs() -> std::result::Result<(), Errno> {
    Err(Errno::ENOSYS)
}
