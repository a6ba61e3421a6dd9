//! Formatted output helpers for CLI commands.

use nestbox_common::types::MountRequest;
use nestbox_runtime::client::PsEntry;

/// Renders the `ps` table, or a placeholder line when nothing runs.
#[must_use]
pub fn ps_table(entries: &[PsEntry]) -> String {
    if entries.is_empty() {
        return "No containers running.".to_string();
    }
    let width = entries
        .iter()
        .map(|e| e.id.as_str().len())
        .max()
        .unwrap_or(0)
        .max("CONTAINER".len());
    let mut out = format!("{:<width$}  {}", "CONTAINER", "PID");
    for entry in entries {
        out.push('\n');
        out.push_str(&format!("{:<width$}  {}", entry.id.as_str(), entry.pid));
    }
    out
}

/// Renders mounts as `SOURCE -> TARGET` lines.
#[must_use]
pub fn mount_lines(mounts: &[MountRequest]) -> Vec<String> {
    mounts
        .iter()
        .map(|m| format!("{} -> {}", m.source, m.target))
        .collect()
}
