//! Linux namespace management for container isolation.
//!
//! Namespace entry via `unshare(2)` is scoped to the calling thread: the
//! new PID namespace, for instance, only applies to children forked by
//! that same thread afterwards. Callers must therefore enter and fork
//! from one thread without yielding to another.

pub mod kind;

use nestbox_common::error::{NestboxError, Result};
use nestbox_common::types::NamespacePolicy;

pub use kind::NamespaceKind;

/// Outcome of a namespace entry attempt under [`NamespacePolicy::BestEffort`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IsolationReport {
    /// Namespaces the calling thread now owns.
    pub entered: Vec<NamespaceKind>,
    /// Namespaces that could not be entered, with the failure reason.
    pub failed: Vec<(NamespaceKind, String)>,
}

impl IsolationReport {
    /// Returns whether every requested namespace was entered.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Enters every namespace in [`NamespaceKind::ALL`] from the calling thread.
///
/// Each namespace is unshared independently so a kernel lacking one of
/// them (older kernels have no time namespace) only loses that one.
///
/// # Errors
///
/// Under [`NamespacePolicy::FailFast`], returns the first failure. Under
/// [`NamespacePolicy::BestEffort`] failures are logged and recorded in
/// the returned report instead.
pub fn enter_isolation(policy: NamespacePolicy) -> Result<IsolationReport> {
    enter_with(policy, &NamespaceKind::ALL, unshare_one)
}

/// Policy driver, separated from the syscall so it can be tested without
/// privileges.
fn enter_with<F>(policy: NamespacePolicy, kinds: &[NamespaceKind], mut unshare: F) -> Result<IsolationReport>
where
    F: FnMut(NamespaceKind) -> Result<()>,
{
    let mut report = IsolationReport::default();
    for &kind in kinds {
        match unshare(kind) {
            Ok(()) => report.entered.push(kind),
            Err(e) if policy == NamespacePolicy::FailFast => return Err(e),
            Err(e) => {
                tracing::warn!(namespace = %kind, error = %e, "namespace unavailable, continuing with degraded isolation");
                report.failed.push((kind, e.to_string()));
            }
        }
    }
    tracing::debug!(entered = report.entered.len(), failed = report.failed.len(), "namespace entry finished");
    Ok(report)
}

#[cfg(target_os = "linux")]
fn unshare_one(kind: NamespaceKind) -> Result<()> {
    nix::sched::unshare(kind.clone_flags()).map_err(|e| NestboxError::PermissionDenied {
        message: format!("{kind} namespace creation failed: {e}"),
    })
}

#[cfg(not(target_os = "linux"))]
fn unshare_one(_kind: NamespaceKind) -> Result<()> {
    Err(NestboxError::Config {
        message: "Linux required for native container operations".into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failing_on(bad: NamespaceKind) -> impl FnMut(NamespaceKind) -> Result<()> {
        move |kind| {
            if kind == bad {
                Err(NestboxError::PermissionDenied {
                    message: format!("{kind} refused"),
                })
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn fail_fast_stops_at_first_failure() {
        let mut attempted = Vec::new();
        let result = enter_with(NamespacePolicy::FailFast, &NamespaceKind::ALL, |kind| {
            attempted.push(kind);
            failing_on(NamespaceKind::Pid)(kind)
        });
        assert!(result.is_err());
        assert_eq!(attempted.last(), Some(&NamespaceKind::Pid));
        assert!(!attempted.contains(&NamespaceKind::Cgroup));
    }

    #[test]
    fn best_effort_attempts_every_namespace() {
        let report = enter_with(
            NamespacePolicy::BestEffort,
            &NamespaceKind::ALL,
            failing_on(NamespaceKind::Time),
        )
        .expect("best effort never fails");
        assert!(!report.is_complete());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, NamespaceKind::Time);
        assert_eq!(report.entered.len(), NamespaceKind::ALL.len() - 1);
    }

    #[test]
    fn clean_entry_reports_complete() {
        let report = enter_with(NamespacePolicy::FailFast, &NamespaceKind::ALL, |_| Ok(()))
            .expect("no failures");
        assert!(report.is_complete());
        assert_eq!(report.entered, NamespaceKind::ALL.to_vec());
    }
}
