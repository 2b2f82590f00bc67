//! fprank - force-plate percentile and composite engine
//!
//! Runs as an HTTP service (`serve`) or as one-shot commands for the
//! scheduled rebuild, reference import, batch ingestion and queries. One-shot
//! commands print their result as JSON on stdout.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use fprank::{build_router, AppState};
use fprank_common::config::{load_toml_config, resolve_database_path, LoggingConfig};
use fprank_common::db::{init_database, HistoryMetric};
use fprank_common::model::{ReferenceRecord, TestSession};
use fprank_common::{Cohort, Metric};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::info;

#[derive(Parser, Debug)]
#[command(version, about = "Force-plate percentile and composite engine")]
struct Args {
    /// TOML config file (overrides FPRANK_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// SQLite database file (overrides FPRANK_DATABASE and the config file)
    #[arg(short, long)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API
    Serve {
        /// Port to listen on (defaults to the config file's port)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Rebuild every threshold table
    Rebuild,
    /// Load reference records from a JSON array
    ImportReference { file: PathBuf },
    /// Ingest test sessions from a JSON array
    Ingest { file: PathBuf },
    /// Look up a value against the active threshold tables
    Lookup {
        #[arg(long)]
        metric: Metric,
        #[arg(long)]
        value: f64,
        #[arg(long)]
        cohort: Option<Cohort>,
    },
    /// Overall composite of an athlete
    Composite {
        athlete_id: String,
        /// RFC 3339 timestamp, defaults to now
        #[arg(long)]
        as_of: Option<DateTime<Utc>>,
    },
    /// Percentile history of one metric (or `composite`)
    History {
        athlete_id: String,
        metric: HistoryMetric,
        /// Most recent N records only, newest first
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_toml_config(args.config.as_deref()).context("Failed to load config")?;

    init_tracing(&config.logging)?;

    info!(
        "Starting fprank v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let db_path = resolve_database_path(args.database.as_deref(), &config);
    info!("Database path: {}", db_path.display());
    let pool = init_database(&db_path)
        .await
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;

    let state = AppState::load(pool).await.context("Failed to load runtime settings")?;
    info!(settings = ?state.settings, "Runtime settings loaded");

    match args.command {
        Command::Serve { port } => serve(state, port.unwrap_or(config.port)).await,
        Command::Rebuild => print_json(&state.builder.rebuild_all().await),
        Command::ImportReference { file } => {
            let records: Vec<ReferenceRecord> = read_json(&file)?;
            let inserted = fprank::db::reference::insert_reference_records(&state.db, &records).await?;
            info!(total = records.len(), inserted, "Reference import finished");
            print_json(&serde_json::json!({ "total": records.len(), "inserted": inserted }))
        }
        Command::Ingest { file } => {
            let sessions: Vec<TestSession> = read_json(&file)?;
            print_json(&state.ingestor.ingest_batch(sessions).await)
        }
        Command::Lookup { metric, value, cohort } => {
            print_json(&state.query.lookup_pair(value, metric, cohort).await?)
        }
        Command::Composite { athlete_id, as_of } => {
            let as_of = as_of.unwrap_or_else(Utc::now);
            print_json(&state.composite.compose_overall(&athlete_id, as_of).await?)
        }
        Command::History { athlete_id, metric, limit } => {
            let entries = match limit {
                Some(n) => state.history.latest_n(&athlete_id, metric, n).await?,
                None => state.history.all_for_metric(&athlete_id, metric).await?,
            };
            print_json(&entries)
        }
    }
}

/// `RUST_LOG` wins over the configured level; with a log file configured
/// output goes there instead of stderr
fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("fprank={0},fprank_common={0},tower_http=info", logging.level)));

    match &logging.file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
    Ok(())
}

async fn serve(state: AppState, port: u16) -> Result<()> {
    let app = build_router(state);

    let addr = format!("127.0.0.1:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("fprank listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    info!("fprank stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
