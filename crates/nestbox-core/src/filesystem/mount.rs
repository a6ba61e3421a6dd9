//! Mount utilities for container filesystem setup and teardown.
//!
//! Setup happens in a forked child of a multi-threaded daemon, so every
//! mount is resolved into a [`PreparedMount`] beforehand and the child only
//! issues the syscall. Teardown goes through the [`MountOps`] seam, whose
//! default implementation [`NixMounts`] is built on `umount2(2)`.

use std::ffi::{CStr, CString};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use nestbox_common::error::{NestboxError, Result};
use nestbox_common::types::ContainerId;
use nix::errno::Errno;

pub use nix::mount::MsFlags;

/// Keyword source that mounts a fresh tmpfs instead of a host path.
pub const TMPFS_SOURCE: &str = "tmpfs";

/// Operations the daemon needs from the mount subsystem at teardown.
pub trait MountOps: Send + Sync {
    /// Makes one forced attempt to unmount `target`, ignoring failures.
    fn force_unmount(&self, target: &Path);
}

/// Default mount subsystem backed by raw unmount syscalls.
#[derive(Debug, Clone, Copy, Default)]
pub struct NixMounts;

impl MountOps for NixMounts {
    fn force_unmount(&self, target: &Path) {
        use nix::mount::{MntFlags, umount, umount2};

        let _ = umount2(target, MntFlags::MNT_DETACH | MntFlags::MNT_FORCE);
        let _ = umount(target);
    }
}

/// A mount whose arguments are already converted for the syscall.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedMount {
    source: CString,
    target: CString,
    fstype: Option<CString>,
    flags: MsFlags,
}

impl PreparedMount {
    /// Prepares a mount of `source` at `target` with the given filesystem
    /// type and flags.
    ///
    /// # Errors
    ///
    /// Returns an error if an argument contains a NUL byte.
    pub fn new(source: &str, target: &Path, fstype: Option<&str>, flags: MsFlags) -> Result<Self> {
        Ok(Self {
            source: c_string(source.as_bytes())?,
            target: c_string(target.as_os_str().as_bytes())?,
            fstype: fstype.map(|t| c_string(t.as_bytes())).transpose()?,
            flags,
        })
    }

    /// Prepares a user-requested extra mount: a bind of a host directory
    /// or the [`TMPFS_SOURCE`] keyword. The target directory is created.
    ///
    /// Image files and block devices need loop-device setup, which is not
    /// provided.
    ///
    /// # Errors
    ///
    /// Returns an error if the source kind is unsupported or the target
    /// cannot be created.
    pub fn extra(source: &str, target: &Path) -> Result<Self> {
        let prepared = if source == TMPFS_SOURCE {
            Self::new(TMPFS_SOURCE, target, Some(TMPFS_SOURCE), MsFlags::empty())?
        } else if Path::new(source).is_dir() {
            Self::new(source, target, None, MsFlags::MS_BIND | MsFlags::MS_REC)?
        } else {
            return Err(NestboxError::Config {
                message: format!("unsupported mount source {source:?}: only directories and {TMPFS_SOURCE} are handled"),
            });
        };
        std::fs::create_dir_all(target).map_err(|e| NestboxError::Io {
            path: target.to_path_buf(),
            source: e,
        })?;
        Ok(prepared)
    }

    /// Target path as passed to the kernel.
    #[must_use]
    pub fn target(&self) -> &CStr {
        &self.target
    }

    /// Issues the `mount(2)` call. Performs no allocation.
    ///
    /// # Errors
    ///
    /// Returns the errno of the failed syscall.
    pub fn apply(&self) -> std::result::Result<(), Errno> {
        nix::mount::mount(
            Some(self.source.as_c_str()),
            self.target.as_c_str(),
            self.fstype.as_deref(),
            self.flags,
            None::<&CStr>,
        )
    }
}

fn c_string(bytes: &[u8]) -> Result<CString> {
    CString::new(bytes).map_err(|_| NestboxError::Config {
        message: format!("mount argument contains NUL: {:?}", String::from_utf8_lossy(bytes)),
    })
}

/// Repeatedly force-unmounts `target`.
///
/// Stacked mounts need one attempt per layer, and a busy mount may only
/// detach on a later try, so failures are swallowed and the loop always
/// runs `retries` times.
pub fn unmount_with_retries(ops: &dyn MountOps, target: &Path, retries: u32) {
    for _ in 0..retries {
        ops.force_unmount(target);
    }
    tracing::debug!(target = %target.display(), retries, "forced unmount finished");
}

/// Tears down everything mounted for one container: its extra mounts
/// (given as container-relative targets), then `/sys`, `/dev`, `/proc`,
/// and finally the root itself.
pub fn unmount_container<'a, I>(ops: &dyn MountOps, root: &ContainerId, extra_targets: I, retries: u32)
where
    I: IntoIterator<Item = &'a str>,
{
    for target in extra_targets {
        unmount_with_retries(ops, &root.join_relative(target), retries);
    }
    for base in nestbox_common::constants::BASE_MOUNTS {
        unmount_with_retries(ops, &root.join_relative(base), retries);
    }
    unmount_with_retries(ops, root.as_path(), retries);
    tracing::info!(root = %root, "container filesystem unmounted");
}
