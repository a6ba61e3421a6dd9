//! `nestbox daemon`: Start the supervisor daemon.

use std::fs::OpenOptions;
use std::sync::Mutex;

use clap::Args;
use nestbox_common::config::DaemonConfig;
use nestbox_runtime::daemon::{self, Detach};
use tracing_subscriber::EnvFilter;

/// Arguments for the `daemon` command.
#[derive(Args, Debug)]
pub struct DaemonArgs {
    /// Stay attached to the terminal and log to stderr.
    #[arg(long)]
    pub foreground: bool,

    /// Write log lines as JSON.
    #[arg(long)]
    pub log_json: bool,
}

/// Executes the `daemon` command.
///
/// Preconditions are checked and the socket is bound before detaching, so
/// startup failures are reported on the invoking terminal.
///
/// # Errors
///
/// Returns an error if a startup precondition fails, the socket cannot be
/// bound, or the log file cannot be opened.
pub fn execute(args: DaemonArgs, config: &DaemonConfig) -> anyhow::Result<()> {
    daemon::check_preconditions(config)?;
    let socket = config.socket_path();
    let listener = daemon::bind(&socket)?;

    if args.foreground {
        init_logging(args.log_json, std::io::stderr);
    } else {
        match daemon::detach()? {
            Detach::Parent(pid) => {
                println!("nestboxd started (pid {pid}), logging to {}", config.log_path().display());
                return Ok(());
            }
            Detach::Daemon => {
                let log_path = config.log_path();
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&log_path)
                    .map_err(|e| anyhow::anyhow!("opening log file {}: {e}", log_path.display()))?;
                init_logging(args.log_json, Mutex::new(file));
            }
        }
    }

    tracing::info!(
        socket = %socket.display(),
        policy = %config.namespace_policy,
        "nestboxd running"
    );
    let mut orchestrator = daemon::default_orchestrator(config);
    daemon::serve(&listener, &socket, &mut orchestrator)?;
    Ok(())
}

fn init_logging<W>(json: bool, writer: W)
where
    W: for<'w> tracing_subscriber::fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .with_thread_names(true);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
