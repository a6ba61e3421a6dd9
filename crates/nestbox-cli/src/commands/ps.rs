//! `nestbox ps`: List running containers.

use clap::Args;
use nestbox_common::config::DaemonConfig;
use nestbox_runtime::client::Client;

use crate::output;

/// Arguments for the `ps` command.
#[derive(Args, Debug)]
pub struct PsArgs {}

/// Executes the `ps` command.
///
/// # Errors
///
/// Returns an error if the daemon is unreachable.
pub fn execute(_args: PsArgs, config: &DaemonConfig) -> anyhow::Result<()> {
    let entries = Client::from_config(config).ps()?;
    println!("{}", output::ps_table(&entries));
    Ok(())
}
