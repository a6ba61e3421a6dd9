//! Container specifications: what a client asks for and what a worker
//! reports back once the container exists.

use nestbox_common::constants::DEFAULT_INIT_COMMAND;
use nestbox_common::types::{ContainerId, MountRequest};
use nestbox_core::capability::Capability;

/// Isolation policy and environment of a container.
///
/// Every list is order-significant: mounts are applied and reported in
/// order, and environment entries keep their position for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Capabilities removed from the bounding set before exec.
    pub dropped_capabilities: Vec<Capability>,
    /// Mounts applied on top of the base filesystem.
    pub extra_mounts: Vec<MountRequest>,
    /// `KEY=VALUE` entries injected into the init process.
    pub environment: Vec<String>,
    /// Whether `PR_SET_NO_NEW_PRIVS` is set before exec.
    pub no_new_privs: bool,
    /// Whether a seccomp filter is requested.
    pub seccomp_enabled: bool,
}

impl Default for ContainerSpec {
    fn default() -> Self {
        Self {
            dropped_capabilities: Vec::new(),
            extra_mounts: Vec::new(),
            environment: Vec::new(),
            no_new_privs: true,
            seccomp_enabled: true,
        }
    }
}

/// A staged creation request, consumed exactly once by an isolation worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreationSpec {
    /// Container being created.
    pub id: ContainerId,
    /// Init command argv.
    pub command: Vec<String>,
    /// Isolation policy and environment.
    pub container: ContainerSpec,
}

impl CreationSpec {
    /// Creates a creation spec, substituting the keep-alive shell loop for
    /// an empty argv.
    #[must_use]
    pub fn new(id: ContainerId, command: Vec<String>, container: ContainerSpec) -> Self {
        let command = if command.is_empty() {
            DEFAULT_INIT_COMMAND.iter().map(ToString::to_string).collect()
        } else {
            command
        };
        Self { id, command, container }
    }
}
