//! In-namespace exec path of a container's init process.
//!
//! Everything the child needs is resolved into a [`PreparedInit`] by the
//! worker thread before it forks. After the fork the child only issues
//! syscalls: it never allocates, logs, or takes a lock another daemon
//! thread could have been holding.

use std::convert::Infallible;
use std::ffi::{CStr, CString, c_char};
use std::os::unix::ffi::OsStrExt;

use nestbox_common::error::{NestboxError, Result};
use nestbox_core::capability::{Capability, drop_bounding};
use nestbox_core::filesystem::mount::{MsFlags, PreparedMount};
use nestbox_core::process::set_no_new_privs;
use nix::errno::Errno;
use nix::mount::mount;
use nix::unistd::{chdir, chroot};

use crate::spec::CreationSpec;
use crate::worker::InitExecutor;

/// Exit status of a child whose container setup or exec failed.
pub const EXEC_FAILURE_STATUS: i32 = 127;

/// A creation resolved down to syscall arguments.
///
/// `/proc`, `/sys`, and `/dev` are included only when the container
/// directory has a mount point for them. Extra mounts follow in request
/// order, with their target directories already created.
#[derive(Debug)]
pub struct PreparedInit {
    root: CString,
    base_mounts: Vec<PreparedMount>,
    extra_mounts: Vec<PreparedMount>,
    dropped_capabilities: Vec<Capability>,
    no_new_privs: bool,
    argv: Vec<CString>,
    env: Vec<CString>,
    // NULL-terminated views into `argv` and `env`. The heap buffers of a
    // `CString` never move, so these stay valid as long as `self` lives.
    argv_ptrs: Vec<*const c_char>,
    env_ptrs: Vec<*const c_char>,
}

impl PreparedInit {
    /// Resolves `spec` for the forked child.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty command, a NUL byte in any argument,
    /// an unsupported mount source, or a mount target that cannot be
    /// created.
    pub fn new(spec: &CreationSpec) -> Result<Self> {
        let argv = to_cstrings(&spec.command, "init command")?;
        if argv.is_empty() {
            return Err(NestboxError::Config {
                message: "empty init command".into(),
            });
        }
        let env = to_cstrings(&spec.container.environment, "environment")?;

        let hardened = MsFlags::MS_NOSUID | MsFlags::MS_NODEV | MsFlags::MS_NOEXEC;
        let mut base_mounts = Vec::new();
        for (name, source, fstype, flags) in [
            ("proc", "proc", Some("proc"), hardened),
            ("sys", "sysfs", Some("sysfs"), hardened | MsFlags::MS_RDONLY),
            ("dev", "/dev", None, MsFlags::MS_BIND | MsFlags::MS_REC),
        ] {
            let target = spec.id.join_relative(name);
            if target.is_dir() {
                base_mounts.push(PreparedMount::new(source, &target, fstype, flags)?);
            }
        }
        let extra_mounts = spec
            .container
            .extra_mounts
            .iter()
            .map(|m| PreparedMount::extra(&m.source, &spec.id.join_relative(&m.target)))
            .collect::<Result<Vec<_>>>()?;

        let root = CString::new(spec.id.as_path().as_os_str().as_bytes()).map_err(|_| NestboxError::Config {
            message: format!("container path contains NUL: {}", spec.id),
        })?;

        let argv_ptrs = null_terminated(&argv);
        let env_ptrs = null_terminated(&env);
        Ok(Self {
            root,
            base_mounts,
            extra_mounts,
            dropped_capabilities: spec.container.dropped_capabilities.clone(),
            no_new_privs: spec.container.no_new_privs,
            argv,
            env,
            argv_ptrs,
            env_ptrs,
        })
    }

    /// Runs the in-child setup and execs. Returns only on failure.
    fn enter(&self) -> std::result::Result<Infallible, Errno> {
        mount(
            None::<&CStr>,
            c"/",
            None::<&CStr>,
            MsFlags::MS_REC | MsFlags::MS_PRIVATE,
            None::<&CStr>,
        )?;
        for base in &self.base_mounts {
            let _ = base.apply();
        }
        for extra in &self.extra_mounts {
            extra.apply()?;
        }

        chroot(self.root.as_c_str())?;
        chdir(c"/")?;

        drop_bounding(&self.dropped_capabilities)?;
        if self.no_new_privs {
            set_no_new_privs()?;
        }

        // SAFETY: `argv` is non-empty and both pointer arrays are
        // NULL-terminated views into strings owned by `self`.
        unsafe {
            libc::execvpe(self.argv[0].as_ptr(), self.argv_ptrs.as_ptr(), self.env_ptrs.as_ptr());
        }
        Err(Errno::last())
    }
}

/// Default [`InitExecutor`]: chroot into the container directory and exec.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChrootExecutor;

impl InitExecutor for ChrootExecutor {
    fn exec_init(&self, init: &PreparedInit) -> ! {
        let _ = init.enter();
        // SAFETY: `_exit` terminates the forked child without running
        // destructors or atexit handlers inherited from the daemon.
        unsafe { libc::_exit(EXEC_FAILURE_STATUS) }
    }
}

fn to_cstrings(items: &[String], what: &str) -> Result<Vec<CString>> {
    items
        .iter()
        .map(|item| {
            CString::new(item.as_str()).map_err(|_| NestboxError::Config {
                message: format!("{what} entry contains NUL: {item:?}"),
            })
        })
        .collect()
}

fn null_terminated(items: &[CString]) -> Vec<*const c_char> {
    items
        .iter()
        .map(|item| item.as_ptr())
        .chain(std::iter::once(std::ptr::null()))
        .collect()
}
