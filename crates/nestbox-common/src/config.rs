//! Global configuration model for the Nestbox daemon.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::Result;
use crate::types::NamespacePolicy;

/// Root configuration shared by the daemon and its clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Directory holding the control socket.
    pub socket_dir: PathBuf,
    /// File name of the control socket.
    pub socket_name: String,
    /// Reaction of isolation workers to namespace-entry failures.
    pub namespace_policy: NamespacePolicy,
    /// Forced unmount attempts per mount point during teardown.
    pub unmount_retries: u32,
    /// Log destination of the detached daemon. `None` selects
    /// `nestboxd.log` inside the socket directory.
    pub log_file: Option<PathBuf>,
}

impl DaemonConfig {
    /// Builds the configuration from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            socket_dir: constants::socket_dir(),
            ..Self::default()
        }
    }

    /// Returns the full path of the control socket.
    #[must_use]
    pub fn socket_path(&self) -> PathBuf {
        self.socket_dir.join(&self.socket_name)
    }

    /// Returns the path the detached daemon logs to.
    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.log_file
            .clone()
            .unwrap_or_else(|| self.socket_dir.join(constants::LOG_FILE))
    }

    /// Renders the configuration as JSON, indented unless `compact`.
    ///
    /// # Errors
    ///
    /// Returns [`NestboxError::Serialization`](crate::error::NestboxError::Serialization)
    /// if serialization fails.
    pub fn to_json(&self, compact: bool) -> Result<String> {
        let rendered = if compact {
            serde_json::to_string(self)?
        } else {
            serde_json::to_string_pretty(self)?
        };
        Ok(rendered)
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_dir: PathBuf::from(constants::DEFAULT_SOCKET_DIR),
            socket_name: constants::SOCKET_FILE.to_string(),
            namespace_policy: NamespacePolicy::default(),
            unmount_retries: constants::DEFAULT_UNMOUNT_RETRIES,
            log_file: None,
        }
    }
}
