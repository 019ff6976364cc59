use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use eligos_server::load_config;
use eligos_store::Database;
use eligos_telemetry::{init_telemetry, parse_level, TelemetryConfig};

/// Real-time space relay: HTTP API plus the WebSocket hub.
#[derive(Debug, Parser)]
#[command(name = "eligos", version, about)]
struct Args {
    /// JSON config file, deep-merged over the defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    /// SQLite database file.
    #[arg(long)]
    db: Option<PathBuf>,

    /// Default log level; RUST_LOG takes precedence.
    #[arg(long, default_value = "info")]
    log_level: String,

    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = parse_level(&args.log_level)
        .with_context(|| format!("unknown log level {:?}", args.log_level))?;
    let _ = init_telemetry(&TelemetryConfig {
        log_level,
        json: args.json_logs,
        ..TelemetryConfig::default()
    });

    let mut config = load_config(args.config.as_deref()).context("loading configuration")?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(db) = args.db {
        config.db_path = db;
    }

    if let Some(dir) = config.db_path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating database directory {}", dir.display()))?;
    }
    let db = Database::open(&config.db_path)
        .with_context(|| format!("opening database {}", config.db_path.display()))?;
    tracing::info!(path = %config.db_path.display(), "database opened");

    let handle = eligos_server::start(config, db).await.context("starting server")?;
    tracing::info!(port = handle.port, "eligos ready");

    tokio::signal::ctrl_c().await.context("listening for ctrl+c")?;

    tracing::info!("shutting down");
    handle.shutdown().await;
    Ok(())
}
