//! `nestbox status`: Show whether a container is running.

use std::path::PathBuf;

use clap::Args;
use nestbox_common::config::DaemonConfig;
use nestbox_runtime::client::Client;

/// Arguments for the `status` command.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Container root directory.
    pub dir: PathBuf,
}

/// Executes the `status` command.
///
/// # Errors
///
/// Returns an error if the daemon is unreachable.
pub fn execute(args: StatusArgs, config: &DaemonConfig) -> anyhow::Result<()> {
    let id = super::container_id(&args.dir)?;
    let state = if Client::from_config(config).is_active(&id)? {
        "active"
    } else {
        "inactive"
    };
    println!("{id}: {state}");
    Ok(())
}
