//! `nestbox shutdown`: Kill every container and stop the daemon.

use clap::Args;
use nestbox_common::config::DaemonConfig;
use nestbox_runtime::client::Client;

/// Arguments for the `shutdown` command.
#[derive(Args, Debug)]
pub struct ShutdownArgs {}

/// Executes the `shutdown` command.
///
/// # Errors
///
/// Returns an error if no daemon answers on the socket.
pub fn execute(_args: ShutdownArgs, config: &DaemonConfig) -> anyhow::Result<()> {
    let client = Client::from_config(config);
    client.probe()?;
    client.kill_daemon()?;
    tracing::info!(socket = %client.socket_path().display(), "shutdown requested");
    Ok(())
}
