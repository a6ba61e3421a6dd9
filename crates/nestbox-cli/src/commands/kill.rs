//! `nestbox kill`: Kill a container and clean up its mounts.

use std::path::PathBuf;

use clap::Args;
use nestbox_common::config::DaemonConfig;
use nestbox_core::filesystem::mount::{NixMounts, unmount_with_retries};
use nestbox_runtime::client::{Client, KillOutcome};

/// Arguments for the `kill` command.
#[derive(Args, Debug)]
pub struct KillArgs {
    /// Container root directory.
    pub dir: PathBuf,
}

/// Executes the `kill` command.
///
/// The daemon kills the init process and hands back the extra mounts,
/// which are then force-unmounted from here.
///
/// # Errors
///
/// Returns an error if the daemon is unreachable.
pub fn execute(args: KillArgs, config: &DaemonConfig) -> anyhow::Result<()> {
    let id = super::container_id(&args.dir)?;
    match Client::from_config(config).kill(&id)? {
        KillOutcome::Killed(mounts) => {
            for mount in &mounts {
                unmount_with_retries(&NixMounts, &id.join_relative(&mount.target), config.unmount_retries);
            }
            tracing::info!(%id, unmounted = mounts.len(), "container killed");
            println!("killed {id}");
        }
        KillOutcome::NotRunning => println!("{id} is not running"),
    }
    Ok(())
}
