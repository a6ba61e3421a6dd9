//! `nestbox config`: Print the effective configuration.

use clap::Args;
use nestbox_common::config::DaemonConfig;

/// Arguments for the `config` command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Print on a single line.
    #[arg(long)]
    pub compact: bool,
}

/// Executes the `config` command.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn execute(args: ConfigArgs, config: &DaemonConfig) -> anyhow::Result<()> {
    println!("{}", config.to_json(args.compact)?);
    Ok(())
}
