//! CLI command definitions and dispatch.

pub mod config;
pub mod daemon;
pub mod kill;
pub mod ps;
pub mod run;
pub mod shutdown;
pub mod status;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use nestbox_common::config::DaemonConfig;
use nestbox_common::types::{ContainerId, NamespacePolicy};

/// Nestbox: lightweight container supervisor.
#[derive(Parser, Debug)]
#[command(name = "nestbox", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Directory holding the control socket (defaults to `$TMPDIR` or `/tmp`).
    #[arg(long, global = true, env = "NESTBOX_SOCKET_DIR")]
    pub socket_dir: Option<PathBuf>,

    /// How workers react when a namespace cannot be entered.
    #[arg(long, global = true, env = "NESTBOX_NAMESPACE_POLICY")]
    pub namespace_policy: Option<NamespacePolicy>,

    /// Log file of the detached daemon.
    #[arg(long, global = true, env = "NESTBOX_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Forced unmount attempts per mount point.
    #[arg(long, global = true)]
    pub unmount_retries: Option<u32>,
}

impl Cli {
    /// Builds the effective configuration: environment first, then flags.
    #[must_use]
    pub fn config(&self) -> DaemonConfig {
        let mut config = DaemonConfig::from_env();
        if let Some(dir) = &self.socket_dir {
            config.socket_dir.clone_from(dir);
        }
        if let Some(policy) = self.namespace_policy {
            config.namespace_policy = policy;
        }
        if let Some(file) = &self.log_file {
            config.log_file = Some(file.clone());
        }
        if let Some(retries) = self.unmount_retries {
            config.unmount_retries = retries;
        }
        config
    }
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the supervisor daemon.
    Daemon(daemon::DaemonArgs),
    /// Run a container rooted at a directory.
    Run(run::RunArgs),
    /// Kill a container and unmount its extra mounts.
    Kill(kill::KillArgs),
    /// List running containers.
    Ps(ps::PsArgs),
    /// Show whether a container is running.
    Status(status::StatusArgs),
    /// Kill every container and stop the daemon.
    Shutdown(shutdown::ShutdownArgs),
    /// Print the effective configuration as JSON.
    Config(config::ConfigArgs),
}

impl Command {
    /// Returns whether the command installs its own log subscriber.
    #[must_use]
    pub const fn manages_logging(&self) -> bool {
        matches!(self, Self::Daemon(_))
    }
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    let config = cli.config();
    match cli.command {
        Command::Daemon(args) => daemon::execute(args, &config),
        Command::Run(args) => run::execute(args, &config),
        Command::Kill(args) => kill::execute(args, &config),
        Command::Ps(args) => ps::execute(args, &config),
        Command::Status(args) => status::execute(args, &config),
        Command::Shutdown(args) => shutdown::execute(args, &config),
        Command::Config(args) => config::execute(args, &config),
    }
}

/// Resolves a user-supplied container directory to its absolute id.
///
/// # Errors
///
/// Returns an error if the directory does not exist.
pub fn container_id(dir: &Path) -> anyhow::Result<ContainerId> {
    let absolute = std::fs::canonicalize(dir)
        .map_err(|e| anyhow::anyhow!("container directory {}: {e}", dir.display()))?;
    Ok(ContainerId::parse(absolute.to_string_lossy().into_owned())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_environment_defaults() {
        let cli = Cli::parse_from([
            "nestbox",
            "--socket-dir",
            "/run/nestbox",
            "--namespace-policy",
            "best-effort",
            "--unmount-retries",
            "3",
            "ps",
        ]);
        let config = cli.config();
        assert_eq!(config.socket_path(), PathBuf::from("/run/nestbox/nestbox.sock"));
        assert_eq!(config.namespace_policy, NamespacePolicy::BestEffort);
        assert_eq!(config.unmount_retries, 3);
    }

    #[test]
    fn run_collects_trailing_command() {
        let cli = Cli::parse_from([
            "nestbox",
            "run",
            "/srv/c1",
            "--cap-drop",
            "sys_admin",
            "--mount",
            "tmpfs:/tmp",
            "--",
            "/bin/echo",
            "hi",
        ]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.command, vec!["/bin/echo", "hi"]);
        assert_eq!(args.cap_drop.len(), 1);
        assert_eq!(args.mounts[0].target, "/tmp");
    }

    #[test]
    fn only_daemon_manages_its_logging() {
        let cli = Cli::parse_from(["nestbox", "daemon", "--foreground"]);
        assert!(cli.command.manages_logging());
        let cli = Cli::parse_from(["nestbox", "ps"]);
        assert!(!cli.command.manages_logging());
    }

    #[test]
    fn container_id_is_canonical() {
        let dir = std::env::temp_dir();
        let id = container_id(&dir).unwrap();
        assert!(id.as_path().is_absolute());
    }
}
