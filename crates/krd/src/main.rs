//! kr workstation daemon
//!
//! Pairs with a phone over an untrusted queue relay and serves the local
//! control, ssh-agent and host-auth sockets under `$HOME/.kr`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use kr_core::KrPaths;
use kr_core::config::load_config;
use kr_core::paths::default_kr_dir;
use krd::daemon::Daemon;
use krd::server::Listeners;
use krd::transport::HttpRelay;

#[derive(Parser, Debug)]
#[command(name = "krd")]
#[command(version, about = "kr daemon - forwards SSH and Git signing requests to a paired phone")]
struct Args {
    /// Directory holding sockets, the pairing file and krd.json (default: $HOME/.kr)
    #[arg(long, env = "KR_DIR")]
    kr_dir: Option<PathBuf>,

    /// Relay base URL
    #[arg(long, env = "KR_RELAY_URL")]
    relay_url: Option<String>,

    /// Log level filter for the daemon (e.g. "info", "debug", "warn").
    #[arg(long, env = "KR_LOG_LEVEL")]
    log_level: Option<String>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "KR_LOG_JSON")]
    log_json: bool,

    /// Milliseconds to drain outbound envelopes on shutdown.
    #[arg(long, env = "KR_SHUTDOWN_GRACE_MS")]
    shutdown_grace_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let kr_dir = match args.kr_dir {
        Some(dir) => dir,
        None => default_kr_dir().context("Cannot determine home directory")?,
    };
    let mut config = load_config(&kr_dir).context("Failed to load configuration")?;

    if let Some(url) = args.relay_url {
        config.relay.url = Some(url);
    }
    if let Some(level) = args.log_level {
        config.daemon.log_level = level;
    }
    if let Some(grace) = args.shutdown_grace_ms {
        config.daemon.shutdown_grace_ms = grace;
    }
    config.daemon.log_json |= args.log_json;
    config.daemon.kr_dir = Some(kr_dir.clone());

    let log_filter = format!("krd={}", config.daemon.log_level);
    kr_core::tracing_init::init_tracing(&log_filter, config.daemon.log_json);

    info!(
        version = krd::VERSION,
        kr_dir = %kr_dir.display(),
        "Starting krd"
    );

    let relay_url = config
        .relay
        .url
        .clone()
        .context("No relay URL configured (--relay-url, KR_RELAY_URL or relay.url in krd.json)")?;
    let transport = HttpRelay::new(&relay_url, &config.relay).context("Invalid relay URL")?;

    let paths = KrPaths::new(kr_dir);
    let listeners = Listeners::bind(&paths).context("Failed to open local sockets")?;

    let mut daemon = Daemon::start(&config, paths, Arc::new(transport));
    daemon.serve(listeners);
    info!(relay = %relay_url, "krd ready");

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("Failed to install SIGTERM handler")?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C shutdown signal");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM shutdown signal");
        }
    }

    daemon.shutdown().await;
    Ok(())
}
