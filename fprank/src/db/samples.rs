//! Pooled sample collection
//!
//! The pool for a (metric, cohort) pair is the union of reference records
//! and admitted contributions. The aggregate cohort goes through the same
//! query with every tier in its filter.

use fprank_common::{Cohort, Metric, Result};
use sqlx::{Pool, Sqlite};

/// All non-null values of `metric` for `cohort`, unordered.
///
/// Sorting and dropping non-finite values is left to
/// `compute_thresholds`.
pub async fn collect_values(db: &Pool<Sqlite>, metric: Metric, cohort: Cohort) -> Result<Vec<f64>> {
    let tiers = cohort.member_tiers();
    let placeholders = vec!["?"; tiers.len()].join(", ");
    let column = metric.key();

    let sql = format!(
        r#"
        SELECT {col} AS value FROM reference_records
        WHERE {col} IS NOT NULL AND cohort IN ({tiers})
        UNION ALL
        SELECT {col} AS value FROM contribution_records
        WHERE {col} IS NOT NULL AND test_type = ? AND cohort IN ({tiers})
        "#,
        col = column,
        tiers = placeholders
    );

    let mut query = sqlx::query_scalar::<_, f64>(&sql);
    for tier in tiers {
        query = query.bind(tier.as_str());
    }
    query = query.bind(metric.test_type().as_str());
    for tier in tiers {
        query = query.bind(tier.as_str());
    }

    Ok(query.fetch_all(db).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::reference::insert_reference_records;
    use fprank_common::db::init_memory_database;
    use fprank_common::model::{RawMetrics, ReferenceRecord};

    fn record(id: &str, cohort: Cohort, key: &str, value: f64) -> ReferenceRecord {
        let mut metrics = RawMetrics::new();
        metrics.insert(key.to_string(), Some(value));
        ReferenceRecord {
            external_id: id.to_string(),
            cohort,
            metrics,
        }
    }

    #[tokio::test]
    async fn test_cohort_filter_and_aggregate_union() {
        let db = init_memory_database().await.unwrap();
        let key = Metric::PpuPeakTakeoffForce.key();
        insert_reference_records(
            &db,
            &[
                record("a", Cohort::College, key, 900.0),
                record("b", Cohort::Pro, key, 1200.0),
                record("c", Cohort::College, key, 800.0),
                record("d", Cohort::College, "hop_mean_rsi_trial_value", 2.0),
            ],
        )
        .await
        .unwrap();

        let mut college = collect_values(&db, Metric::PpuPeakTakeoffForce, Cohort::College).await.unwrap();
        college.sort_by(f64::total_cmp);
        assert_eq!(college, vec![800.0, 900.0]);

        let mut overall = collect_values(&db, Metric::PpuPeakTakeoffForce, Cohort::Overall).await.unwrap();
        overall.sort_by(f64::total_cmp);
        assert_eq!(overall, vec![800.0, 900.0, 1200.0]);

        let youth = collect_values(&db, Metric::PpuPeakTakeoffForce, Cohort::Youth).await.unwrap();
        assert!(youth.is_empty());
    }
}
