//! The namespaces and per-thread views a container worker detaches from.

use std::fmt;

/// One `unshare(2)` flag entered by an isolation worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamespaceKind {
    /// Private mount table.
    Mount,
    /// Own hostname and domain name.
    Uts,
    /// System V IPC objects and POSIX message queues.
    Ipc,
    /// Own PID space; applies to the next forked child.
    Pid,
    /// Own cgroup root view.
    Cgroup,
    /// Own `CLOCK_MONOTONIC`/`CLOCK_BOOTTIME` offsets; applies to children.
    Time,
    /// Detach System V semaphore adjustment lists.
    SysVSem,
    /// Private copy of the file descriptor table.
    Files,
    /// Private root, cwd, and umask.
    Fs,
}

impl NamespaceKind {
    /// Every namespace, in the order a worker enters them.
    pub const ALL: [Self; 9] = [
        Self::Mount,
        Self::Uts,
        Self::Ipc,
        Self::Pid,
        Self::Cgroup,
        Self::Time,
        Self::SysVSem,
        Self::Files,
        Self::Fs,
    ];

    /// Returns the `unshare(2)` flag for this namespace.
    #[cfg(target_os = "linux")]
    #[must_use]
    pub const fn clone_flags(self) -> nix::sched::CloneFlags {
        use nix::sched::CloneFlags;

        match self {
            Self::Mount => CloneFlags::CLONE_NEWNS,
            Self::Uts => CloneFlags::CLONE_NEWUTS,
            Self::Ipc => CloneFlags::CLONE_NEWIPC,
            Self::Pid => CloneFlags::CLONE_NEWPID,
            Self::Cgroup => CloneFlags::CLONE_NEWCGROUP,
            Self::Time => CloneFlags::from_bits_retain(libc::CLONE_NEWTIME),
            Self::SysVSem => CloneFlags::CLONE_SYSVSEM,
            Self::Files => CloneFlags::CLONE_FILES,
            Self::Fs => CloneFlags::CLONE_FS,
        }
    }
}

impl fmt::Display for NamespaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Mount => "mount",
            Self::Uts => "uts",
            Self::Ipc => "ipc",
            Self::Pid => "pid",
            Self::Cgroup => "cgroup",
            Self::Time => "time",
            Self::SysVSem => "sysvsem",
            Self::Files => "files",
            Self::Fs => "fs",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mount_namespace_is_entered_first() {
        assert_eq!(NamespaceKind::ALL[0], NamespaceKind::Mount);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn flags_are_distinct() {
        let mut seen = nix::sched::CloneFlags::empty();
        for kind in NamespaceKind::ALL {
            let flag = kind.clone_flags();
            assert!(!seen.intersects(flag), "{kind} overlaps");
            seen |= flag;
        }
    }
}
