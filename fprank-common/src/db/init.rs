//! Database initialization
//!
//! Creates the schema on first run and ensures every runtime setting has a
//! value. Every statement is idempotent, so initialization is safe to repeat
//! against an existing database.

use crate::model::{Cohort, CATALOG};
use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// SQLite busy_timeout applied to every pooled connection
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

/// Open (creating if needed) the database file and initialize the schema
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        // WAL lets lookups keep reading while a rebuild transaction commits
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .min_connections(1)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    init_schema(&pool).await?;

    Ok(pool)
}

/// Single-connection in-memory database with the full schema.
///
/// One connection only: every `sqlite::memory:` connection is a separate
/// database.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;
    init_schema(&pool).await?;
    Ok(pool)
}

/// Create all tables and indexes, then fill in default settings
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA foreign_keys = ON").execute(pool).await?;

    create_settings_table(pool).await?;
    create_reference_records_table(pool).await?;
    create_test_sessions_table(pool).await?;
    create_contribution_records_table(pool).await?;
    create_threshold_tables(pool).await?;
    create_percentile_events_table(pool).await?;
    create_composite_events_table(pool).await?;

    init_default_settings(pool).await?;

    Ok(())
}

/// Create the settings table
///
/// Stores runtime configuration key-value pairs.
pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// One nullable REAL column per catalog metric
fn metric_columns_sql() -> String {
    CATALOG
        .iter()
        .map(|def| format!("{} REAL", def.key))
        .collect::<Vec<_>>()
        .join(",\n            ")
}

fn tier_check_sql(column: &str) -> String {
    let tiers = Cohort::TIERS
        .iter()
        .map(|c| format!("'{}'", c.as_str()))
        .collect::<Vec<_>>()
        .join(", ");
    format!("CHECK ({} IN ({}))", column, tiers)
}

async fn create_reference_records_table(pool: &SqlitePool) -> Result<()> {
    let sql = format!(
        r#"
        CREATE TABLE IF NOT EXISTS reference_records (
            guid TEXT PRIMARY KEY,
            external_id TEXT NOT NULL UNIQUE,
            cohort TEXT NOT NULL {},
            {},
            loaded_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
        tier_check_sql("cohort"),
        metric_columns_sql()
    );
    sqlx::query(&sql).execute(pool).await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_reference_records_cohort ON reference_records(cohort)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Ledger of every session seen, used to rank qualifying sessions
async fn create_test_sessions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS test_sessions (
            session_id TEXT PRIMARY KEY,
            athlete_id TEXT NOT NULL,
            test_type TEXT NOT NULL,
            cohort TEXT,
            recorded_at TEXT NOT NULL,
            qualifying INTEGER NOT NULL CHECK (qualifying IN (0, 1)),
            received_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_test_sessions_athlete ON test_sessions(athlete_id, test_type, qualifying, recorded_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_contribution_records_table(pool: &SqlitePool) -> Result<()> {
    let sql = format!(
        r#"
        CREATE TABLE IF NOT EXISTS contribution_records (
            guid TEXT PRIMARY KEY,
            athlete_id TEXT NOT NULL,
            test_type TEXT NOT NULL,
            cohort TEXT NOT NULL {},
            session_id TEXT NOT NULL UNIQUE,
            recorded_at TEXT NOT NULL,
            {},
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (athlete_id, test_type)
        )
        "#,
        tier_check_sql("cohort"),
        metric_columns_sql()
    );
    sqlx::query(&sql).execute(pool).await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_contribution_records_cohort ON contribution_records(cohort)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Versioned threshold storage.
///
/// Readers resolve a (metric, cohort) pair through `active_thresholds`,
/// which a rebuild repoints in the same transaction that writes the new
/// version's rows.
async fn create_threshold_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS threshold_versions (
            version_id INTEGER PRIMARY KEY AUTOINCREMENT,
            metric TEXT NOT NULL,
            cohort TEXT NOT NULL,
            sample_count INTEGER NOT NULL CHECK (sample_count >= 0),
            built_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS percentile_thresholds (
            version_id INTEGER NOT NULL REFERENCES threshold_versions(version_id) ON DELETE CASCADE,
            percentile INTEGER NOT NULL CHECK (percentile BETWEEN 0 AND 100),
            threshold REAL,
            sample_count INTEGER NOT NULL,
            PRIMARY KEY (version_id, percentile)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS active_thresholds (
            metric TEXT NOT NULL,
            cohort TEXT NOT NULL,
            version_id INTEGER NOT NULL REFERENCES threshold_versions(version_id),
            activated_at TEXT NOT NULL,
            PRIMARY KEY (metric, cohort)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_percentile_events_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS percentile_events (
            guid TEXT PRIMARY KEY,
            athlete_id TEXT NOT NULL,
            session_id TEXT NOT NULL,
            test_type TEXT NOT NULL,
            metric TEXT NOT NULL,
            recorded_at TEXT NOT NULL,
            raw_value REAL NOT NULL,
            cohort TEXT,
            cohort_percentile INTEGER CHECK (cohort_percentile BETWEEN 0 AND 100),
            aggregate_percentile INTEGER CHECK (aggregate_percentile BETWEEN 0 AND 100),
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (session_id, metric)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_percentile_events_athlete ON percentile_events(athlete_id, metric, recorded_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_composite_events_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS composite_events (
            guid TEXT PRIMARY KEY,
            athlete_id TEXT NOT NULL,
            cohort TEXT NOT NULL,
            bucket TEXT NOT NULL,
            recorded_at TEXT NOT NULL,
            cohort_percentile REAL NOT NULL,
            aggregate_percentile REAL,
            components TEXT NOT NULL,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (athlete_id, cohort, bucket)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_composite_events_athlete ON composite_events(athlete_id, recorded_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Initialize or update default settings
///
/// This function ensures all required settings exist with default values.
/// It also handles NULL values by resetting them to defaults.
async fn init_default_settings(pool: &SqlitePool) -> Result<()> {
    // Batch ingestion
    ensure_setting(pool, "athlete_timeout_ms", "30000").await?;

    // Total retry budget for SQLite lock contention
    ensure_setting(pool, "max_lock_wait_ms", "5000").await?;

    // Composite persistence
    ensure_setting(pool, "composite_bucket", "day").await?;

    Ok(())
}

/// Ensure a setting exists with the specified default value
///
/// If the setting doesn't exist, it will be created with the default.
/// If the setting exists but has a NULL value, it will be reset to the default.
async fn ensure_setting(pool: &SqlitePool, key: &str, default_value: &str) -> Result<()> {
    let value: Option<Option<String>> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;

    match value {
        None => {
            // INSERT OR IGNORE: concurrent initializers may race past the lookup
            sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
                .bind(key)
                .bind(default_value)
                .execute(pool)
                .await?;

            info!("Initialized setting '{}' with default value: {}", key, default_value);
        }
        Some(None) => {
            sqlx::query("UPDATE settings SET value = ? WHERE key = ?")
                .bind(default_value)
                .bind(key)
                .execute(pool)
                .await?;

            warn!("Setting '{}' was NULL, reset to default: {}", key, default_value);
        }
        Some(Some(_)) => {}
    }

    Ok(())
}
