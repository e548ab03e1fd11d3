//! Gantry Server - Entry Point
//!
//! Serves the training and inference job REST API.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use gantry_core::Config;
use gantry_core::config::BackendKind;
use gantry_server::shutdown::install_shutdown_handler;
use gantry_server::{AppState, router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "gantry_core=debug,gantry_server=debug,info";

/// Gantry - hybrid training and inference job orchestrator
#[derive(Parser, Debug)]
#[command(name = "gantry-server", author, version, about)]
struct Args {
    /// Configuration file (defaults to ./gantry.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on, overriding the configuration
    #[arg(short, long)]
    address: Option<SocketAddr>,

    /// Log filter, overriding RUST_LOG (e.g. "debug" or "gantry_core=trace")
    #[arg(short, long)]
    log_level: Option<String>,

    /// Use in-process mock backends instead of docker and TWCC
    #[arg(long)]
    mock: bool,
}

fn init_tracing(log_level: Option<&str>) {
    let filter = match log_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
    };
    tracing_subscriber::registry().with(filter).with(tracing_subscriber::fmt::layer()).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_level.as_deref());

    let mut config =
        Config::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(address) = args.address {
        config.server.address = address;
    }
    if args.mock {
        config.backend.kind = BackendKind::Mock;
    }

    let shutdown = CancellationToken::new();
    install_shutdown_handler(shutdown.clone());

    let state = AppState::from_config(&config, shutdown.clone())?;
    let app = router(state.clone());

    let listener = TcpListener::bind(config.server.address)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.address))?;
    info!(address = %config.server.address, backend = ?config.backend.kind, "Gantry server listening");

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { signal.cancelled().await })
        .await
        .context("Server error")?;

    state.training.shutdown().await;
    info!("Gantry server stopped");
    Ok(())
}
