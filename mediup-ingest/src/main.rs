//! mediup-ingest - Media Upload Service
//!
//! Accepts one to three video files per session, tracks transfer progress
//! in real time, and streams progress to clients over SSE.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mediup_common::config::{
    load_or_default, CompiledDefaults, RootFolderInitializer, RootFolderResolver,
};
use mediup_ingest::AppState;

/// Command-line arguments for mediup-ingest
#[derive(Parser, Debug)]
#[command(name = "mediup-ingest")]
#[command(about = "Media upload and progress tracking service")]
#[command(version)]
struct Args {
    /// Port to listen on (overrides config file)
    #[arg(short, long, env = "MEDIUP_PORT")]
    port: Option<u16>,

    /// Address to bind (overrides config file)
    #[arg(short, long, env = "MEDIUP_BIND")]
    bind: Option<String>,

    /// Root folder for uploaded files
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// Path to the TOML config file
    #[arg(short, long, env = "MEDIUP_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let toml_config = load_or_default(args.config.as_deref());
    let defaults = CompiledDefaults::for_current_platform();

    // Initialize tracing
    let default_filter = toml_config
        .logging
        .filter
        .clone()
        .unwrap_or_else(|| format!("mediup_ingest={0},mediup_common={0},tower_http=debug", toml_config.logging.level));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting mediup-ingest (Media Upload) service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Resolve root folder: CLI > environment > TOML > default
    let root_folder = RootFolderResolver::new("ingest")
        .with_cli_arg(args.root_folder.clone())
        .with_toml(&toml_config)
        .resolve();
    let folders = RootFolderInitializer::new(root_folder);
    folders
        .ensure_directory_exists()
        .context("Failed to initialize root folder")?;
    info!("Root folder: {}", folders.root_folder().display());

    let upload = toml_config.upload.clone();
    upload.validate().context("Invalid upload configuration")?;

    let state = AppState::new(upload, folders.upload_dir(), folders.temp_dir());
    let tasks = state.start_background_tasks();
    info!("Event publisher and session sweeper started");

    let app = mediup_ingest::build_router(state);

    let bind = args
        .bind
        .or(toml_config.bind_address.clone())
        .unwrap_or(defaults.bind_address);
    let port = args.port.or(toml_config.port).unwrap_or(defaults.port);
    let addr: SocketAddr = format!("{}:{}", bind, port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", bind, port))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    for task in tasks {
        task.abort();
    }
    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
