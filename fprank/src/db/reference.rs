//! Reference pool store
//!
//! Externally sourced baseline records. Loading is keyed on the source
//! identifier and never updates a record that is already present.

use fprank_common::model::{ReferenceRecord, CATALOG};
use fprank_common::{Error, Result};
use sqlx::{Pool, Sqlite};
use uuid::Uuid;

use super::{metric_column_list, metric_placeholders};

/// Insert records not yet loaded; returns how many were new.
///
/// The whole batch is rejected before anything is written if any record
/// is tagged with the aggregate cohort or has no identifier.
pub async fn insert_reference_records(db: &Pool<Sqlite>, records: &[ReferenceRecord]) -> Result<u64> {
    for record in records {
        if record.external_id.trim().is_empty() {
            return Err(Error::InvalidInput("reference record has an empty external_id".to_string()));
        }
        if record.cohort.is_aggregate() {
            return Err(Error::InvalidInput(format!(
                "reference record {} is tagged with the aggregate cohort",
                record.external_id
            )));
        }
    }

    let sql = format!(
        "INSERT OR IGNORE INTO reference_records (guid, external_id, cohort, {}) VALUES (?, ?, ?, {})",
        metric_column_list(),
        metric_placeholders()
    );

    let mut tx = db.begin().await?;
    let mut inserted = 0u64;

    for record in records {
        let values = record.values();
        let mut query = sqlx::query(&sql)
            .bind(Uuid::new_v4().to_string())
            .bind(&record.external_id)
            .bind(record.cohort.as_str());
        for def in CATALOG.iter() {
            let value = values.iter().find(|(m, _)| *m == def.metric).map(|(_, v)| *v);
            query = query.bind(value);
        }
        inserted += query.execute(&mut *tx).await?.rows_affected();
    }

    tx.commit().await?;

    tracing::debug!(submitted = records.len(), inserted, "Reference records loaded");

    Ok(inserted)
}

pub async fn count_reference_records(db: &Pool<Sqlite>) -> Result<i64> {
    let count = sqlx::query_scalar("SELECT COUNT(*) FROM reference_records")
        .fetch_one(db)
        .await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fprank_common::db::init_memory_database;
    use fprank_common::model::RawMetrics;
    use fprank_common::Cohort;

    fn record(id: &str, cohort: Cohort, rsi: f64) -> ReferenceRecord {
        let mut metrics = RawMetrics::new();
        metrics.insert("hop_mean_rsi_trial_value".to_string(), Some(rsi));
        ReferenceRecord {
            external_id: id.to_string(),
            cohort,
            metrics,
        }
    }

    #[tokio::test]
    async fn test_existing_records_are_never_updated() {
        let db = init_memory_database().await.unwrap();

        let first = insert_reference_records(&db, &[record("r1", Cohort::Pro, 2.1)]).await.unwrap();
        assert_eq!(first, 1);

        let second = insert_reference_records(&db, &[record("r1", Cohort::Pro, 9.9), record("r2", Cohort::Youth, 1.2)])
            .await
            .unwrap();
        assert_eq!(second, 1);

        let rsi: f64 = sqlx::query_scalar("SELECT hop_mean_rsi_trial_value FROM reference_records WHERE external_id = 'r1'")
            .fetch_one(&db)
            .await
            .unwrap();
        assert_eq!(rsi, 2.1);
        assert_eq!(count_reference_records(&db).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_aggregate_cohort_rejected() {
        let db = init_memory_database().await.unwrap();

        let result = insert_reference_records(&db, &[record("r1", Cohort::College, 2.0), record("r2", Cohort::Overall, 2.0)]).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert_eq!(count_reference_records(&db).await.unwrap(), 0);
    }
}
