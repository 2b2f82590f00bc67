//! Tests for database initialization
//!
//! Covers first-run creation, reopening an existing file, default settings
//! and the table constraints the engine relies on.

use fprank_common::db::init::{init_database, init_memory_database, init_schema};
use tempfile::TempDir;

#[tokio::test]
async fn test_database_creation_when_missing() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("nested").join("fprank.db");

    let result = init_database(&db_path).await;

    assert!(result.is_ok(), "Database initialization failed: {:?}", result.err());
    assert!(db_path.exists(), "Database file was not created");
}

#[tokio::test]
async fn test_database_opens_existing() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("fprank.db");

    let pool1 = init_database(&db_path).await.unwrap();
    sqlx::query("UPDATE settings SET value = '120' WHERE key = 'athlete_timeout_ms'")
        .execute(&pool1)
        .await
        .unwrap();
    pool1.close().await;

    let pool2 = init_database(&db_path).await;
    assert!(pool2.is_ok(), "Failed to open existing database: {:?}", pool2.err());

    // Reinitialization must not clobber an existing value
    let value: String = sqlx::query_scalar("SELECT value FROM settings WHERE key = 'athlete_timeout_ms'")
        .fetch_one(&pool2.unwrap())
        .await
        .unwrap();
    assert_eq!(value, "120");
}

#[tokio::test]
async fn test_default_settings_initialized() {
    let pool = init_memory_database().await.unwrap();

    for (key, expected) in [
        ("athlete_timeout_ms", "30000"),
        ("max_lock_wait_ms", "5000"),
        ("composite_bucket", "day"),
    ] {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(value.as_deref(), Some(expected), "setting {}", key);
    }
}

#[tokio::test]
async fn test_null_setting_reset_to_default() {
    let pool = init_memory_database().await.unwrap();

    sqlx::query("UPDATE settings SET value = NULL WHERE key = 'composite_bucket'")
        .execute(&pool)
        .await
        .unwrap();

    init_schema(&pool).await.unwrap();

    let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = 'composite_bucket'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(value.as_deref(), Some("day"));
}

#[tokio::test]
async fn test_schema_has_metric_columns() {
    let pool = init_memory_database().await.unwrap();

    let columns: Vec<String> = sqlx::query_scalar("SELECT name FROM pragma_table_info('reference_records')")
        .fetch_all(&pool)
        .await
        .unwrap();

    for def in fprank_common::model::CATALOG.iter() {
        assert!(columns.iter().any(|c| c == def.key), "missing column {}", def.key);
    }
}

#[tokio::test]
async fn test_reference_records_reject_aggregate_cohort() {
    let pool = init_memory_database().await.unwrap();

    let ok = sqlx::query("INSERT INTO reference_records (guid, external_id, cohort) VALUES ('g1', 'r1', 'College')")
        .execute(&pool)
        .await;
    assert!(ok.is_ok());

    let rejected = sqlx::query("INSERT INTO reference_records (guid, external_id, cohort) VALUES ('g2', 'r2', 'Overall')")
        .execute(&pool)
        .await;
    assert!(rejected.is_err(), "aggregate cohort must not be storable");
}

#[tokio::test]
async fn test_one_contribution_per_athlete_and_test_type() {
    let pool = init_memory_database().await.unwrap();

    let insert = |guid: &'static str, session: &'static str| {
        sqlx::query(
            "INSERT INTO contribution_records (guid, athlete_id, test_type, cohort, session_id, recorded_at)
             VALUES (?, 'a1', 'HJ', 'Pro', ?, '2025-01-01T00:00:00.000000Z')",
        )
        .bind(guid)
        .bind(session)
    };

    assert!(insert("g1", "s1").execute(&pool).await.is_ok());
    assert!(insert("g2", "s2").execute(&pool).await.is_err());
}

#[tokio::test]
async fn test_threshold_rows_cascade_with_version() {
    let pool = init_memory_database().await.unwrap();

    sqlx::query(
        "INSERT INTO threshold_versions (metric, cohort, sample_count, built_at)
         VALUES ('hop_mean_rsi_trial_value', 'Pro', 0, '2025-01-01T00:00:00.000000Z')",
    )
    .execute(&pool)
    .await
    .unwrap();
    sqlx::query("INSERT INTO percentile_thresholds (version_id, percentile, threshold, sample_count) VALUES (1, 0, NULL, 0)")
        .execute(&pool)
        .await
        .unwrap();

    sqlx::query("DELETE FROM threshold_versions WHERE version_id = 1")
        .execute(&pool)
        .await
        .unwrap();

    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM percentile_thresholds")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(remaining, 0);
}
