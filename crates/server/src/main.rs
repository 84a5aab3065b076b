use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mixtape_core::{
    load_config, load_config_from_env, validate_config, AcquisitionService, Config, ConfigError,
    Janitor,
};
use mixtape_server::{api::create_router, state::AppState};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Determine config path
    let config_path = std::env::var("MIXTAPE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    let config = read_config(&config_path)?;
    validate_config(&config).context("Configuration validation failed")?;

    info!("Configuration loaded successfully");
    info!("Temp directory: {:?}", config.acquisition.temp_dir);
    info!(
        "Concurrency: batch={} single={}",
        config.acquisition.batch_concurrency, config.acquisition.single_concurrency
    );

    tokio::fs::create_dir_all(&config.acquisition.temp_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create temp directory {:?}",
                config.acquisition.temp_dir
            )
        })?;

    let service = AcquisitionService::new(config.clone());

    // A missing tool is not fatal; every request will report it
    match service.extractor().validate().await {
        Ok(()) => info!("Extractor '{}' is available", service.extractor().name()),
        Err(e) => warn!("Extractor check failed: {}", e),
    }

    // Start the janitor
    let janitor = Janitor::new(
        config.janitor.clone(),
        config.acquisition.temp_dir.clone(),
        service.progress_store().clone(),
        service.live_batches().clone(),
    );
    janitor.start();

    let state = Arc::new(AppState::new(service));
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutting down...");
    janitor.stop().await;
    info!("Janitor stopped");

    Ok(())
}

/// Load the config file, falling back to defaults plus environment when it
/// does not exist.
fn read_config(path: &Path) -> Result<Config> {
    info!("Loading configuration from {:?}", path);
    match load_config(path) {
        Ok(config) => Ok(config),
        Err(ConfigError::FileNotFound(_)) => {
            info!("No config file at {:?}, using defaults and environment", path);
            load_config_from_env().context("Failed to load config from environment")
        }
        Err(e) => Err(e).with_context(|| format!("Failed to load config from {:?}", path)),
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
