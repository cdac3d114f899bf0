//! toolport Runner
//!
//! Agent for runner machines: claims queued runs from the portal, executes
//! them locally and reports the outcome.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use toolport_core::tracing_init::init_tracing;
use toolport_runner::config::load_runner_config;
use toolport_runner::{Agent, PortalClient, ProcessExecutor, StopReason};

#[derive(Parser, Debug)]
#[command(name = "toolport-runner")]
#[command(version, about = "toolport runner agent - executes queued tool runs")]
struct Args {
    /// Config file (TOML). Defaults to `~/.toolport/runner.toml` when present.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Portal base URL.
    #[arg(long)]
    portal_url: Option<String>,

    /// Machine key issued by `toolport-server machine add`.
    #[arg(long)]
    machine_key: Option<String>,

    /// Hostname reported with heartbeats.
    #[arg(long)]
    hostname: Option<String>,

    /// Seconds to wait between claims when the queue is empty.
    #[arg(long)]
    poll_interval: Option<u64>,

    /// Directory for per-run output logs.
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(env!("CARGO_CRATE_NAME"), args.log_json);

    let mut config = load_runner_config(args.config.as_deref())?;
    if let Some(url) = args.portal_url {
        config.portal_url = url;
    }
    if let Some(key) = args.machine_key {
        config.machine_key = key;
    }
    if args.hostname.is_some() {
        config.hostname = args.hostname;
    }
    if let Some(secs) = args.poll_interval {
        config.poll_interval = Duration::from_secs(secs);
    }
    if args.log_dir.is_some() {
        config.log_dir = args.log_dir;
    }
    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        portal = %config.portal_url,
        hostname = ?config.hostname,
        "Starting toolport-runner"
    );

    let client = PortalClient::new(&config.portal_url, &config.machine_key, config.request_timeout)?;
    let executor = ProcessExecutor::from_config(&config);
    let agent = Agent::new(client, executor, config);

    let stop = agent.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            stop.stop(StopReason::Shutdown);
        }
    });

    let reason = agent.run().await?;
    info!(reason = ?reason, "Runner stopped");
    Ok(())
}
