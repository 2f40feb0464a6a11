//! # scale-relay
//!
//! Scale relay binary: loads settings, starts the HTTP/WebSocket server and
//! shuts it down on SIGINT/SIGTERM.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use relay_server::{RelayServer, ServerConfig};
use relay_settings::RelaySettings;
use tracing::{error, info, warn};

/// Real-time relay for scale readings.
#[derive(Parser, Debug)]
#[command(name = "scale-relay", about = "Real-time WebSocket relay for scale readings")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings and `PORT`).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (default `~/.scale-relay/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `relay_server=trace` (overrides settings).
    #[arg(long)]
    log_level: Option<String>,
}

/// Load settings from file and env, then apply command-line overrides.
fn resolve_settings(args: &Cli) -> Result<RelaySettings> {
    let mut settings = match &args.settings {
        Some(path) => relay_settings::load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => relay_settings::load_settings().context("Failed to load settings")?,
    };
    if let Some(host) = &args.host {
        settings.server.host.clone_from(host);
    }
    if let Some(port) = args.port {
        settings.server.port = port;
    }
    if let Some(level) = &args.log_level {
        settings.logging.level.clone_from(level);
    }
    Ok(settings)
}

/// Resolve once SIGINT or SIGTERM arrives.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                let _ = sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received SIGINT"),
        () = terminate => info!("received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = resolve_settings(&args)?;
    relay_core::logging::init_subscriber(&settings.logging.level);

    let metrics = relay_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;
    let server = RelayServer::new(ServerConfig::from(&settings), metrics);
    let (addr, handle) = server.listen().await.context("Failed to bind server")?;

    info!(
        %addr,
        history_capacity = settings.relay.history_capacity,
        history_replay = settings.relay.history_replay,
        "scale relay ready: ws://{addr}/ws, health http://{addr}/health"
    );

    shutdown_signal().await;
    info!("Shutting down...");

    let tracker = server.sessions().clone();
    let _ = tracker.close();
    let sessions = tokio::spawn(async move { tracker.wait().await });
    let deadline = Duration::from_secs(settings.shutdown.timeout_secs);
    let finished = server
        .shutdown()
        .graceful_shutdown(vec![handle, sessions], Some(deadline))
        .await;
    if !finished {
        error!(timeout_secs = deadline.as_secs(), "forced shutdown after timeout");
        std::process::exit(1);
    }

    let _ = server.relay().drain();
    info!("shutdown complete");
    Ok(())
}
