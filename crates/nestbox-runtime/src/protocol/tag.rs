//! Reserved sentinel strings of the control protocol.
//!
//! Every sentinel starts with a NUL byte. Arguments travel on to
//! `execve(2)`, `mount(2)`, and friends as C strings, so no legitimate
//! argument can start with NUL and the two never collide.

use std::fmt;

/// Prefix shared by every sentinel.
pub const SENTINEL_PREFIX: char = '\0';

macro_rules! tags {
    ($($(#[$doc:meta])* $variant:ident => $wire:literal,)+) => {
        /// A command, reply, list delimiter, or flag sentinel.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Tag {
            $($(#[$doc])* $variant,)+
        }

        impl Tag {
            /// Returns the on-wire spelling.
            #[must_use]
            pub const fn as_wire(self) -> &'static str {
                match self {
                    $(Self::$variant => concat!("\0", $wire),)+
                }
            }

            /// Decodes a sentinel, returning `None` for anything unknown.
            #[must_use]
            pub fn from_wire(message: &str) -> Option<Self> {
                let name = message.strip_prefix(SENTINEL_PREFIX)?;
                match name {
                    $($wire => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

tags! {
    // Commands.
    /// Liveness probe.
    Test => "test",
    /// Look up a container, or create it when not running.
    Create => "create",
    /// Kill a container's init process.
    Kill => "kill",
    /// List live containers.
    Ps => "ps",
    /// Ask whether a container is running.
    IsActive => "is-active",
    /// Worker reports a created container.
    WorkerRegister => "worker-register",
    /// Worker reports that a container's init process exited.
    WorkerDied => "worker-died",
    /// Worker reports that creation failed before registration.
    WorkerAbort => "worker-abort",
    /// Kill every container and stop the daemon.
    KillDaemon => "kill-daemon",

    // Replies.
    /// Answer to [`Tag::Test`].
    TestAck => "test-ack",
    /// The container has no record.
    NotRunning => "not-running",
    /// A creation for the container is in flight.
    Pending => "pending",
    /// The container's init process was killed.
    Killed => "killed",
    /// The container is running.
    Active => "active",
    /// The container is not running.
    Inactive => "inactive",
    /// A registration was refused because the id is already live.
    Rejected => "rejected",

    // Delimiters.
    /// Precedes a PID argument.
    Pid => "pid",
    /// Opens the init command argv.
    InitCommand => "init-command",
    /// Closes the init command argv.
    EndInitCommand => "end-init-command",
    /// Opens the dropped capability list.
    Capabilities => "caps",
    /// Closes the dropped capability list.
    EndCapabilities => "end-caps",
    /// Opens the flattened (source, target) mount list.
    Mounts => "mounts",
    /// Closes the mount list.
    EndMounts => "end-mounts",
    /// Opens the environment list.
    Environment => "env",
    /// Closes the environment list.
    EndEnvironment => "end-env",
    /// Terminates a `ps` listing.
    EndPs => "end-ps",

    // Flags.
    /// `no_new_privs` is set.
    NoNewPrivsOn => "no-new-privs-on",
    /// `no_new_privs` is clear.
    NoNewPrivsOff => "no-new-privs-off",
    /// Seccomp is enabled.
    SeccompOn => "seccomp-on",
    /// Seccomp is disabled.
    SeccompOff => "seccomp-off",
}

impl Tag {
    /// Returns whether this tag may open a session.
    #[must_use]
    pub const fn is_command(self) -> bool {
        matches!(
            self,
            Self::Test
                | Self::Create
                | Self::Kill
                | Self::Ps
                | Self::IsActive
                | Self::WorkerRegister
                | Self::WorkerDied
                | Self::WorkerAbort
                | Self::KillDaemon
        )
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_wire()[1..])
    }
}

/// Returns whether `message` uses the reserved sentinel prefix.
#[must_use]
pub fn is_reserved(message: &str) -> bool {
    message.starts_with(SENTINEL_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_spelling_decodes_back() {
        for tag in [Tag::Test, Tag::Create, Tag::EndPs, Tag::SeccompOff, Tag::WorkerAbort] {
            assert_eq!(Tag::from_wire(tag.as_wire()), Some(tag));
        }
    }

    #[test]
    fn plain_strings_are_not_tags() {
        assert_eq!(Tag::from_wire("test"), None);
        assert!(!is_reserved("/bin/sh"));
    }

    #[test]
    fn unknown_sentinel_is_reserved_but_undecodable() {
        assert!(is_reserved("\0frobnicate"));
        assert_eq!(Tag::from_wire("\0frobnicate"), None);
    }

    #[test]
    fn only_commands_open_sessions() {
        assert!(Tag::Create.is_command());
        assert!(Tag::WorkerDied.is_command());
        assert!(!Tag::TestAck.is_command());
        assert!(!Tag::EndMounts.is_command());
    }

    #[test]
    fn display_omits_prefix() {
        assert_eq!(Tag::IsActive.to_string(), "is-active");
    }
}
