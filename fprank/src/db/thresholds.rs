//! Versioned threshold tables
//!
//! A rebuild writes a complete new version and repoints the pair's active
//! pointer inside one transaction. Readers always join through the
//! pointer, so they see either the previous table or the new one in full.

use fprank_common::db::ThresholdRow;
use fprank_common::time::{now, to_db};
use fprank_common::{Cohort, Metric, Result};
use sqlx::{Pool, Sqlite};

/// Write `rows` as the new active version for (metric, cohort).
///
/// Superseded versions are deleted in the same transaction. Returns the new
/// version id.
pub async fn write_version(
    db: &Pool<Sqlite>,
    metric: Metric,
    cohort: Cohort,
    rows: &[ThresholdRow],
    sample_count: i64,
) -> Result<i64> {
    let built_at = to_db(now());
    let mut tx = db.begin().await?;

    let version_id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO threshold_versions (metric, cohort, sample_count, built_at)
        VALUES (?, ?, ?, ?)
        RETURNING version_id
        "#,
    )
    .bind(metric.key())
    .bind(cohort.as_str())
    .bind(sample_count)
    .bind(&built_at)
    .fetch_one(&mut *tx)
    .await?;

    for row in rows {
        sqlx::query(
            "INSERT INTO percentile_thresholds (version_id, percentile, threshold, sample_count) VALUES (?, ?, ?, ?)",
        )
        .bind(version_id)
        .bind(i64::from(row.percentile))
        .bind(row.threshold)
        .bind(row.sample_count)
        .execute(&mut *tx)
        .await?;
    }

    sqlx::query(
        r#"
        INSERT INTO active_thresholds (metric, cohort, version_id, activated_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(metric, cohort) DO UPDATE SET
            version_id = excluded.version_id,
            activated_at = excluded.activated_at
        "#,
    )
    .bind(metric.key())
    .bind(cohort.as_str())
    .bind(version_id)
    .bind(&built_at)
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM threshold_versions WHERE metric = ? AND cohort = ? AND version_id <> ?")
        .bind(metric.key())
        .bind(cohort.as_str())
        .bind(version_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(version_id)
}

/// Rows of the active version, ascending by percentile; empty if the pair
/// was never built
pub async fn active_rows(db: &Pool<Sqlite>, metric: Metric, cohort: Cohort) -> Result<Vec<ThresholdRow>> {
    let rows: Vec<(i64, Option<f64>, i64)> = sqlx::query_as(
        r#"
        SELECT t.percentile, t.threshold, t.sample_count
        FROM active_thresholds a
        JOIN percentile_thresholds t ON t.version_id = a.version_id
        WHERE a.metric = ? AND a.cohort = ?
        ORDER BY t.percentile
        "#,
    )
    .bind(metric.key())
    .bind(cohort.as_str())
    .fetch_all(db)
    .await?;

    Ok(rows
        .into_iter()
        .filter_map(|(percentile, threshold, sample_count)| {
            u8::try_from(percentile).ok().map(|percentile| ThresholdRow {
                percentile,
                threshold,
                sample_count,
            })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fprank_common::db::init_memory_database;

    fn rows(threshold: Option<f64>, n: i64) -> Vec<ThresholdRow> {
        (0..=100u8)
            .map(|percentile| ThresholdRow {
                percentile,
                threshold,
                sample_count: n,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_new_version_replaces_active_rows() {
        let db = init_memory_database().await.unwrap();
        let (metric, cohort) = (Metric::HjReactiveStrengthIndex, Cohort::Pro);

        assert!(active_rows(&db, metric, cohort).await.unwrap().is_empty());

        let v1 = write_version(&db, metric, cohort, &rows(None, 0), 0).await.unwrap();
        let v2 = write_version(&db, metric, cohort, &rows(Some(2.5), 1), 1).await.unwrap();
        assert!(v2 > v1);
        let active_id: i64 = sqlx::query_scalar("SELECT version_id FROM active_thresholds")
            .fetch_one(&db)
            .await
            .unwrap();
        assert_eq!(active_id, v2);

        let active = active_rows(&db, metric, cohort).await.unwrap();
        assert_eq!(active.len(), 101);
        assert!(active.iter().all(|r| r.threshold == Some(2.5) && r.sample_count == 1));

        // Superseded rows are gone
        let stored: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM percentile_thresholds")
            .fetch_one(&db)
            .await
            .unwrap();
        assert_eq!(stored, 101);
    }

    #[tokio::test]
    async fn test_pairs_are_independent() {
        let db = init_memory_database().await.unwrap();

        write_version(&db, Metric::CmjPeakPower, Cohort::Youth, &rows(Some(3000.0), 4), 4).await.unwrap();
        write_version(&db, Metric::CmjPeakPower, Cohort::Overall, &rows(Some(4000.0), 9), 9).await.unwrap();

        let youth = active_rows(&db, Metric::CmjPeakPower, Cohort::Youth).await.unwrap();
        assert_eq!(youth[50].threshold, Some(3000.0));
        let overall = active_rows(&db, Metric::CmjPeakPower, Cohort::Overall).await.unwrap();
        assert_eq!(overall[50].threshold, Some(4000.0));
    }
}
