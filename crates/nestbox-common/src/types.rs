//! Domain primitive types used across the Nestbox workspace.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{NestboxError, Result};

/// Unique identifier for a container instance: the absolute path of its
/// root directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContainerId(String);

impl ContainerId {
    /// Creates a container ID from an absolute directory path.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is empty or relative.
    pub fn parse(path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        if !Path::new(&path).is_absolute() {
            return Err(NestboxError::Config {
                message: format!("container directory must be an absolute path: {path:?}"),
            });
        }
        Ok(Self(path))
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the container root directory.
    #[must_use]
    pub fn as_path(&self) -> &Path {
        Path::new(&self.0)
    }

    /// Resolves a container-relative target (such as `/mnt/data`) to the
    /// corresponding absolute host path under this container's root.
    #[must_use]
    pub fn join_relative(&self, target: &str) -> PathBuf {
        self.as_path().join(target.trim_start_matches('/'))
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An extra mount applied on top of the container's base filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountRequest {
    /// Mount source as understood by the mount subsystem (a host
    /// directory, an image, or a filesystem keyword).
    pub source: String,
    /// Target path relative to the container root.
    pub target: String,
}

impl MountRequest {
    /// Creates a mount request.
    #[must_use]
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }

    /// Rejects a target with a `..` component, which could resolve outside
    /// the container root once joined to it.
    ///
    /// # Errors
    ///
    /// Returns a description of the offending target.
    pub fn check_target(target: &str) -> std::result::Result<(), String> {
        if Path::new(target).components().any(|c| c == Component::ParentDir) {
            return Err(format!("mount target {target:?} escapes the container root"));
        }
        Ok(())
    }
}

impl FromStr for MountRequest {
    type Err = String;

    /// Parses the `SOURCE:TARGET` form used on the command line.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.rsplit_once(':') {
            Some((source, target)) if !source.is_empty() && target.starts_with('/') => {
                Self::check_target(target)?;
                Ok(Self::new(source, target))
            }
            _ => Err(format!(
                "expected SOURCE:TARGET with an absolute container target, got {s:?}"
            )),
        }
    }
}

/// How an isolation worker reacts when a namespace cannot be entered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NamespacePolicy {
    /// Abort the creation on the first namespace that cannot be entered.
    #[default]
    FailFast,
    /// Log each failure and continue with whatever isolation was obtained.
    BestEffort,
}

impl fmt::Display for NamespacePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FailFast => write!(f, "fail-fast"),
            Self::BestEffort => write!(f, "best-effort"),
        }
    }
}

impl FromStr for NamespacePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "fail-fast" => Ok(Self::FailFast),
            "best-effort" => Ok(Self::BestEffort),
            other => Err(format!(
                "unknown namespace policy {other:?} (expected fail-fast or best-effort)"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_id_requires_absolute_path() {
        assert!(ContainerId::parse("/var/lib/c1").is_ok());
        assert!(ContainerId::parse("c1").is_err());
        assert!(ContainerId::parse("").is_err());
    }

    #[test]
    fn join_relative_stays_under_root() {
        let id = ContainerId::parse("/srv/c1").unwrap();
        assert_eq!(id.join_relative("/mnt/data"), PathBuf::from("/srv/c1/mnt/data"));
        assert_eq!(id.join_relative("proc"), PathBuf::from("/srv/c1/proc"));
    }

    #[test]
    fn mount_request_parses_source_and_target() {
        let m: MountRequest = "/home/user/src:/mnt/src".parse().unwrap();
        assert_eq!(m.source, "/home/user/src");
        assert_eq!(m.target, "/mnt/src");
    }

    #[test]
    fn mount_request_rejects_relative_target() {
        assert!("/home:mnt".parse::<MountRequest>().is_err());
        assert!("/home".parse::<MountRequest>().is_err());
    }

    #[test]
    fn mount_request_rejects_parent_components() {
        assert!("tmpfs:/../../etc".parse::<MountRequest>().is_err());
        assert!("/srv/a:/mnt/../../x".parse::<MountRequest>().is_err());
        assert!(MountRequest::check_target("/mnt/a..b").is_ok());
        assert!(MountRequest::check_target("/mnt/./data").is_ok());
    }

    #[test]
    fn namespace_policy_roundtrips_through_display() {
        for policy in [NamespacePolicy::FailFast, NamespacePolicy::BestEffort] {
            assert_eq!(policy.to_string().parse::<NamespacePolicy>(), Ok(policy));
        }
        assert!("lenient".parse::<NamespacePolicy>().is_err());
    }
}
