//! Species Server
//!
//! Loads the classifier and species registry once, then serves predictions
//! over HTTP until interrupted.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use species_classifier::backend::backend_name;
use species_classifier::utils::logging::{init_logging, LogConfig, LogLevel};
use species_server::{build_router, AppState, ServerConfig};

/// Species classification server
#[derive(Parser, Debug)]
#[command(name = "species-server")]
#[command(version)]
#[command(about = "HTTP API for species prediction from photographs")]
struct Cli {
    /// Port to listen on
    #[arg(short, long, default_value = "8082", env = "PORT")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "0.0.0.0", env = "SPECIES_HOST")]
    host: String,

    /// Model artifact directory
    #[arg(long, default_value = "models/species", env = "SPECIES_MODEL_DIR")]
    model_dir: PathBuf,

    /// Training directory used when the model ships no labels.json
    #[arg(long, env = "SPECIES_TRAIN_DIR")]
    train_dir: Option<PathBuf>,

    /// Directory for temporary upload files
    #[arg(long, env = "SPECIES_TEMP_DIR")]
    temp_dir: Option<PathBuf>,

    /// Classifier output holding the probabilities
    #[arg(long, env = "SPECIES_OUTPUT_KEY")]
    output_key: Option<String>,

    /// Maximum upload size in MiB
    #[arg(long, default_value = "16", env = "SPECIES_MAX_UPLOAD_MB")]
    max_upload_mb: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "SPECIES_LOG_LEVEL")]
    log_level: String,
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(&LogConfig::server(LogLevel::parse(&cli.log_level)))
        .map_err(anyhow::Error::msg)?;

    // Build configuration
    let mut config = ServerConfig {
        host: cli.host,
        port: cli.port,
        model_dir: cli.model_dir,
        output_key: cli.output_key,
        max_upload_bytes: cli.max_upload_mb * 1024 * 1024,
        ..ServerConfig::default()
    };
    if let Some(train_dir) = cli.train_dir {
        config.train_dir = Some(train_dir);
    }
    if let Some(temp_dir) = cli.temp_dir {
        config.temp_dir = temp_dir;
    }

    info!("Species Server v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration:");
    info!("  Model dir:  {:?}", config.model_dir);
    info!("  Train dir:  {:?}", config.train_dir);
    info!("  Temp dir:   {:?}", config.temp_dir);
    info!("  Output key: {:?}", config.output_key);
    info!("  Max upload: {} MiB", cli.max_upload_mb);
    info!("  Backend:    {}", backend_name());

    std::fs::create_dir_all(&config.temp_dir)?;

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    // Loading the model is blocking work
    let state = tokio::task::spawn_blocking(move || AppState::initialize(config)).await?;
    let app = build_router(Arc::new(state));

    info!("Starting server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
