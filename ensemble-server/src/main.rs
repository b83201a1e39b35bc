//! Ensemble server - main entry point
//!
//! Queue-driven audio orchestration: per-player playback queues, dynamic
//! radio fill, and continuous flow streaming with crossfaded track
//! boundaries, exposed over a REST/SSE API.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use ensemble_common::events::EventBus;
use ensemble_common::PcmFormat;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ensemble_server::api;
use ensemble_server::config::{QueueSettings, TomlConfig};
use ensemble_server::db::StateStore;
use ensemble_server::providers::fs::{FsCatalog, FsStreamResolver, PullTransport};
use ensemble_server::queue::QueueController;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "ensemble-server")]
#[command(about = "Queue-driven audio orchestration server")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "8927", env = "ENSEMBLE_PORT")]
    port: u16,

    /// Root folder containing music files
    #[arg(short, long, env = "ENSEMBLE_MUSIC_ROOT")]
    music_root: PathBuf,

    /// Path to the state database
    #[arg(short, long, default_value = "ensemble.db", env = "ENSEMBLE_DATABASE")]
    database: PathBuf,

    /// Optional TOML config file; overrides the defaults above
    #[arg(short, long, env = "ENSEMBLE_CONFIG")]
    config: Option<PathBuf>,

    /// Base url renderers use to reach this server
    #[arg(long, env = "ENSEMBLE_BASE_URL")]
    base_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ensemble_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let (port, database_path, queue_settings) = match &args.config {
        Some(path) => {
            let config = TomlConfig::load(path)
                .with_context(|| format!("failed to load config {}", path.display()))?;
            (config.port, config.database_path, config.queue)
        }
        None => (args.port, args.database.clone(), QueueSettings::default()),
    };

    info!("starting ensemble-server on port {port}");
    info!("music root: {}", args.music_root.display());

    let state_store = StateStore::open(&database_path)
        .await
        .context("failed to open state database")?;

    let base_url = args
        .base_url
        .clone()
        .unwrap_or_else(|| format!("http://localhost:{port}"));
    let pcm_format = PcmFormat::default();
    let controller = QueueController::new(
        Arc::new(FsCatalog::new(args.music_root.clone(), pcm_format)),
        Arc::new(FsStreamResolver::new(args.music_root.clone())),
        Arc::new(PullTransport),
        state_store,
        Arc::new(EventBus::default()),
        queue_settings,
        base_url,
    );
    info!("queue controller initialized");

    let app = api::create_router(api::AppState {
        controller,
        port,
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("starting HTTP server on {addr}");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received Ctrl+C, shutting down");
        }
        _ = terminate => {
            info!("received SIGTERM, shutting down");
        }
    }
}
