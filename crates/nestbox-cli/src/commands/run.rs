//! `nestbox run`: Run a container rooted at a directory.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Args;
use nestbox_common::config::DaemonConfig;
use nestbox_common::types::MountRequest;
use nestbox_core::capability::Capability;
use nestbox_runtime::client::{Client, CreateOutcome};
use nestbox_runtime::spec::{ContainerSpec, CreationSpec};

use crate::output;

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Container root directory.
    pub dir: PathBuf,

    /// Capability to drop from the bounding set (repeatable).
    #[arg(long = "cap-drop", value_name = "CAP")]
    pub cap_drop: Vec<Capability>,

    /// Extra mount as SOURCE:TARGET (repeatable).
    #[arg(long = "mount", value_name = "SRC:TARGET")]
    pub mounts: Vec<MountRequest>,

    /// Environment entry as KEY=VALUE (repeatable).
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_env)]
    pub env: Vec<String>,

    /// Leave `no_new_privs` unset.
    #[arg(long)]
    pub allow_new_privs: bool,

    /// Do not request a seccomp filter.
    #[arg(long)]
    pub no_seccomp: bool,

    /// Seconds to wait for the container to start. The daemon does not
    /// report failed creations, so running out of time is how a failure
    /// shows up; its log has the cause.
    #[arg(long, default_value_t = 10)]
    pub timeout: u64,

    /// Init command and its arguments (defaults to a keep-alive shell loop).
    #[arg(last = true)]
    pub command: Vec<String>,
}

fn parse_env(s: &str) -> Result<String, String> {
    match s.split_once('=') {
        Some((key, _)) if !key.is_empty() => Ok(s.to_string()),
        _ => Err(format!("expected KEY=VALUE, got {s:?}")),
    }
}

/// Executes the `run` command.
///
/// # Errors
///
/// Returns an error if the daemon is unreachable or the container does not
/// come up within the timeout.
pub fn execute(args: RunArgs, config: &DaemonConfig) -> anyhow::Result<()> {
    let id = super::container_id(&args.dir)?;
    let container = ContainerSpec {
        dropped_capabilities: args.cap_drop,
        extra_mounts: args.mounts,
        environment: args.env,
        no_new_privs: !args.allow_new_privs,
        seccomp_enabled: !args.no_seccomp,
    };
    let spec = CreationSpec::new(id.clone(), args.command, container);
    let client = Client::from_config(config);

    match client.create(&spec)? {
        CreateOutcome::Running(running) => {
            println!("{id} is already running (pid {})", running.pid);
            for line in output::mount_lines(&running.spec.extra_mounts) {
                println!("  mount {line}");
            }
        }
        CreateOutcome::Pending => {
            println!("{id} is already being created");
        }
        CreateOutcome::Submitted => {
            let pid = client
                .wait_until_running(&id, Duration::from_secs(args.timeout))
                .with_context(|| {
                    format!(
                        "{id} did not start within {}s; the daemon log has the cause",
                        args.timeout
                    )
                })?;
            tracing::info!(%id, %pid, "container started");
            println!("{pid}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_requires_key() {
        assert!(parse_env("A=1").is_ok());
        assert!(parse_env("A=").is_ok());
        assert!(parse_env("=1").is_err());
        assert!(parse_env("novalue").is_err());
    }
}
