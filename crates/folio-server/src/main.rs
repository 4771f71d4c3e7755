//! Folio server binary
//!
//! ## Usage
//!
//! ```bash
//! # Defaults: 127.0.0.1:7410, ./folio.db
//! folio-server
//!
//! # From a config file, with overrides
//! folio-server --config folio.toml --bind 0.0.0.0:8080
//!
//! # Throwaway in-memory store
//! folio-server --database :memory:
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use folio_server::{AppState, ServerConfig};

/// HTTP + SSE server for shared pages.
#[derive(Parser, Debug)]
#[command(name = "folio-server")]
#[command(about = "Shared page server with optimistic concurrency and live updates")]
struct Args {
    /// TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on (overrides config)
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// SQLite database path, or ":memory:" (overrides config)
    #[arg(long)]
    database: Option<PathBuf>,

    /// Seconds of idle before an event stream heartbeat (overrides config)
    #[arg(long)]
    heartbeat_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    if let Some(database) = args.database {
        config.database = database;
    }
    if let Some(heartbeat_secs) = args.heartbeat_secs {
        config.heartbeat_secs = heartbeat_secs;
    }
    config.validate()?;

    tracing::info!(
        database = %config.database.display(),
        heartbeat_secs = config.heartbeat_secs,
        bus_capacity = config.bus_capacity,
        "starting folio server"
    );

    let state = AppState::from_config(&config).context("failed to open page store")?;
    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;

    folio_server::serve(listener, state, shutdown_signal()).await?;
    tracing::info!("folio server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
}
