//! tacrelay daemon - Cursor-on-Target relay server
//!
//! Accepts persistent TCP or TLS connections from situational-awareness
//! clients, reassembles their newline-delimited CoT XML traffic, and fans
//! each message out to every other connected peer. Runs until SIGINT.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use tacrelay_broadcaster::{BroadcastRouter, ClientRegistry};
use tacrelay_daemon::{RelayConfig, RelayServer};

#[derive(Parser, Debug)]
#[command(name = "tacrelay-daemon", version, about = "Cursor-on-Target relay server")]
struct Cli {
    /// Path to the TOML configuration file (created with defaults if absent)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the configured bind host
    #[arg(long)]
    host: Option<String>,

    /// Override the configured stream port
    #[arg(long)]
    port: Option<u16>,

    /// Override the configured maximum client count
    #[arg(long)]
    max_clients: Option<usize>,

    /// Override the configured idle timeout (seconds)
    #[arg(long)]
    idle_timeout: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    let mut config = match cli.config {
        Some(path) => RelayConfig::load_from(path),
        None => RelayConfig::load(),
    }
    .context("Failed to load configuration")?;

    if let Some(host) = cli.host {
        config.bind_host = host;
    }
    if let Some(port) = cli.port {
        config.tcp_port = port;
    }
    if let Some(max_clients) = cli.max_clients {
        config.max_clients = max_clients;
    }
    if let Some(idle_timeout) = cli.idle_timeout {
        config.idle_timeout_secs = idle_timeout;
    }

    info!("Starting tacrelay daemon v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded from {}", config.config_path.display());

    let registry = Arc::new(ClientRegistry::new());
    let (router, inbound_tx, stats) = BroadcastRouter::new(Arc::clone(&registry));
    let mut router_handle = tokio::spawn(router.run());

    let server = RelayServer::bind(config, Arc::clone(&registry), inbound_tx.clone())
        .await
        .context("Failed to start relay server")?;
    let server_handle = tokio::spawn(server.run());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown requested");

    // Stop admitting, close the inbound queue, give the router a moment to
    // drain what sessions already produced.
    server_handle.abort();
    drop(inbound_tx);
    tokio::select! {
        _ = &mut router_handle => {}
        _ = tokio::time::sleep(Duration::from_secs(2)) => {
            warn!("Router still draining, aborting");
            router_handle.abort();
        }
    }

    info!(
        messages = stats.messages(),
        deliveries = stats.deliveries(),
        evictions = stats.evictions(),
        "tacrelay daemon stopped"
    );
    Ok(())
}
