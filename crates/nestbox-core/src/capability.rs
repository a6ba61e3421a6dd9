//! Linux capability management for least-privilege execution.
//!
//! Maps capability names to their kernel numbers and drops capabilities
//! from the bounding set of the calling process before exec.

use std::fmt;
use std::str::FromStr;

use nestbox_common::error::{NestboxError, Result};
use nix::errno::Errno;

macro_rules! capabilities {
    ($($(#[$doc:meta])* $variant:ident = $id:literal => $name:literal,)+) => {
        /// Linux capability identifiers, numbered as in `linux/capability.h`.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u8)]
        pub enum Capability {
            $($(#[$doc])* $variant = $id,)+
        }

        impl Capability {
            /// Every capability known to this build, in kernel order.
            pub const ALL: &'static [Self] = &[$(Self::$variant,)+];

            /// Returns the canonical upper-case name, e.g. `CAP_SYS_ADMIN`.
            #[must_use]
            pub const fn name(self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)+
                }
            }
        }
    };
}

capabilities! {
    /// Change file ownership.
    Chown = 0 => "CAP_CHOWN",
    /// Bypass file read, write, and execute permission checks.
    DacOverride = 1 => "CAP_DAC_OVERRIDE",
    /// Bypass file read and directory search permission checks.
    DacReadSearch = 2 => "CAP_DAC_READ_SEARCH",
    /// Bypass permission checks on operations requiring file ownership.
    Fowner = 3 => "CAP_FOWNER",
    /// Keep set-user-ID and set-group-ID bits on modified files.
    Fsetid = 4 => "CAP_FSETID",
    /// Send signals to arbitrary processes.
    Kill = 5 => "CAP_KILL",
    /// Manipulate group IDs.
    Setgid = 6 => "CAP_SETGID",
    /// Manipulate user IDs.
    Setuid = 7 => "CAP_SETUID",
    /// Transfer capabilities between processes.
    Setpcap = 8 => "CAP_SETPCAP",
    /// Set immutable and append-only file attributes.
    LinuxImmutable = 9 => "CAP_LINUX_IMMUTABLE",
    /// Bind to ports below 1024.
    NetBindService = 10 => "CAP_NET_BIND_SERVICE",
    /// Broadcast and listen to multicast.
    NetBroadcast = 11 => "CAP_NET_BROADCAST",
    /// Network administration.
    NetAdmin = 12 => "CAP_NET_ADMIN",
    /// Use raw and packet sockets.
    NetRaw = 13 => "CAP_NET_RAW",
    /// Lock memory.
    IpcLock = 14 => "CAP_IPC_LOCK",
    /// Bypass System V IPC permission checks.
    IpcOwner = 15 => "CAP_IPC_OWNER",
    /// Load and unload kernel modules.
    SysModule = 16 => "CAP_SYS_MODULE",
    /// Raw I/O port access.
    SysRawio = 17 => "CAP_SYS_RAWIO",
    /// Use `chroot(2)`.
    SysChroot = 18 => "CAP_SYS_CHROOT",
    /// Trace arbitrary processes.
    SysPtrace = 19 => "CAP_SYS_PTRACE",
    /// Configure process accounting.
    SysPacct = 20 => "CAP_SYS_PACCT",
    /// Broad system administration, including `mount(2)`.
    SysAdmin = 21 => "CAP_SYS_ADMIN",
    /// Reboot the host.
    SysBoot = 22 => "CAP_SYS_BOOT",
    /// Raise scheduling priority.
    SysNice = 23 => "CAP_SYS_NICE",
    /// Override resource limits.
    SysResource = 24 => "CAP_SYS_RESOURCE",
    /// Set the system clock.
    SysTime = 25 => "CAP_SYS_TIME",
    /// Configure terminal devices.
    SysTtyConfig = 26 => "CAP_SYS_TTY_CONFIG",
    /// Create special files with `mknod(2)`.
    Mknod = 27 => "CAP_MKNOD",
    /// Establish file leases.
    Lease = 28 => "CAP_LEASE",
    /// Write the audit log.
    AuditWrite = 29 => "CAP_AUDIT_WRITE",
    /// Configure auditing.
    AuditControl = 30 => "CAP_AUDIT_CONTROL",
    /// Set file capabilities.
    Setfcap = 31 => "CAP_SETFCAP",
    /// Override mandatory access control.
    MacOverride = 32 => "CAP_MAC_OVERRIDE",
    /// Configure mandatory access control.
    MacAdmin = 33 => "CAP_MAC_ADMIN",
    /// Configure kernel `syslog(2)` behavior.
    Syslog = 34 => "CAP_SYSLOG",
    /// Trigger wake-up alarms.
    WakeAlarm = 35 => "CAP_WAKE_ALARM",
    /// Block system suspend.
    BlockSuspend = 36 => "CAP_BLOCK_SUSPEND",
    /// Read the audit log.
    AuditRead = 37 => "CAP_AUDIT_READ",
    /// Performance monitoring.
    Perfmon = 38 => "CAP_PERFMON",
    /// Privileged BPF operations.
    Bpf = 39 => "CAP_BPF",
    /// Checkpoint and restore.
    CheckpointRestore = 40 => "CAP_CHECKPOINT_RESTORE",
}

impl Capability {
    /// Returns the kernel capability number.
    #[must_use]
    pub const fn id(self) -> u8 {
        self as u8
    }

    /// Looks up a capability by its kernel number.
    #[must_use]
    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.get(usize::from(id)).copied()
    }

    /// Looks up a capability by name.
    ///
    /// Accepts `CAP_SYS_ADMIN`, `cap_sys_admin`, and `sys_admin` alike.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        let upper = name.trim().to_ascii_uppercase();
        let bare = upper.strip_prefix("CAP_").unwrap_or(&upper);
        Self::ALL
            .iter()
            .copied()
            .find(|cap| &cap.name()["CAP_".len()..] == bare)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Capability {
    type Err = NestboxError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_name(s).ok_or_else(|| NestboxError::Config {
            message: format!("unknown capability: {s:?}"),
        })
    }
}

/// Removes the given capabilities from the calling process's bounding set.
///
/// Once dropped, a capability can never be regained by this process or
/// anything it executes. Neither allocates nor logs, so it may run in the
/// child of a multi-threaded fork.
///
/// # Errors
///
/// Returns the errno of the first `prctl(PR_CAPBSET_DROP)` that fails.
#[cfg(target_os = "linux")]
pub fn drop_bounding(caps: &[Capability]) -> std::result::Result<(), Errno> {
    for &cap in caps {
        // SAFETY: PR_CAPBSET_DROP takes a capability number and touches no
        // caller memory.
        let rc = unsafe { libc::prctl(libc::PR_CAPBSET_DROP, libc::c_ulong::from(cap.id()), 0, 0, 0) };
        if rc != 0 {
            return Err(Errno::last());
        }
    }
    Ok(())
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always fails with `ENOSYS`, capability bounding sets require Linux.
#[cfg(not(target_os = "linux"))]
pub fn drop_bounding(_caps: &[Capability]) -> std::result::Result<(), Errno> {
    Err(Errno::ENOSYS)
}
