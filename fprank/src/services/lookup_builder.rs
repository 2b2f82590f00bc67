//! Percentile Lookup Builder
//!
//! Rebuilds the dense percentile → threshold table of each
//! (metric, cohort) pair from the pooled samples.
//!
//! **Threshold rule:** with the pool sorted ascending (size N), the
//! threshold at percentile p is the value at 1-indexed rank
//! `clamp(ceil(p/100 * N), 1, N)`. Every pair always gets 101 rows; an
//! empty pool yields rows with a null threshold.
//!
//! Writers to a pair serialize on a per-pair lock, and the new version is
//! written and activated in one transaction.

use fprank_common::db::ThresholdRow;
use fprank_common::{Cohort, Metric, Result, TestType};
use serde::Serialize;
use sqlx::{Pool, Sqlite};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::RuntimeSettings;
use crate::db::{contributions, reference, samples, thresholds};
use crate::utils::retry_on_lock;

/// Rows written per pair on every rebuild
pub const ROWS_PER_PAIR: usize = 101;

/// 1-indexed rank of the sample at percentile `p` in a pool of `n`
pub fn threshold_rank(p: u8, n: usize) -> usize {
    let p = usize::from(p.min(100));
    // ceil(p * n / 100) in integer arithmetic
    ((p * n + 99) / 100).clamp(1, n.max(1))
}

/// Compute the 101 threshold rows for a pool of samples.
///
/// Takes the raw pool in any order; sorting and dropping non-finite
/// values happen here. The result is non-decreasing in percentile.
pub fn compute_thresholds(mut values: Vec<f64>) -> Vec<ThresholdRow> {
    values.retain(|v| v.is_finite());
    values.sort_by(f64::total_cmp);
    let n = values.len();

    (0..=100u8)
        .map(|percentile| ThresholdRow {
            percentile,
            threshold: if n == 0 {
                None
            } else {
                Some(values[threshold_rank(percentile, n) - 1])
            },
            sample_count: n as i64,
        })
        .collect()
}

/// Outcome of rebuilding one pair
#[derive(Debug, Clone, Serialize)]
pub struct PairRebuild {
    pub metric: Metric,
    pub cohort: Cohort,
    /// Rows written, absent when the rebuild failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_written: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RebuildStatus {
    Complete,
    /// At least one pair failed; every other pair was rebuilt
    PartialFailure,
}

/// Result of a full rebuild
#[derive(Debug, Clone, Serialize)]
pub struct RebuildReport {
    pub status: RebuildStatus,
    pub pairs: Vec<PairRebuild>,
    pub total_rows: usize,
    pub failed_pairs: usize,
    pub elapsed_ms: u64,
}

type PairLocks = Arc<Mutex<HashMap<(Metric, Cohort), Arc<Mutex<()>>>>>;

/// Percentile Lookup Builder
#[derive(Clone)]
pub struct LookupBuilder {
    db: Pool<Sqlite>,
    settings: RuntimeSettings,
    locks: PairLocks,
}

impl LookupBuilder {
    pub fn new(db: Pool<Sqlite>, settings: RuntimeSettings) -> Self {
        Self {
            db,
            settings,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn pair_lock(&self, metric: Metric, cohort: Cohort) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry((metric, cohort)).or_default().clone()
    }

    /// Rebuild one pair's table; returns the number of rows written
    pub async fn rebuild(&self, metric: Metric, cohort: Cohort) -> Result<usize> {
        let lock = self.pair_lock(metric, cohort).await;
        let _guard = lock.lock().await;

        let wait = self.settings.max_lock_wait_ms;
        let values = retry_on_lock("collect pool values", wait, || {
            samples::collect_values(&self.db, metric, cohort)
        })
        .await?;

        let rows = compute_thresholds(values);
        let sample_count = rows.first().map_or(0, |row| row.sample_count);

        let version_id = retry_on_lock("write threshold version", wait, || {
            thresholds::write_version(&self.db, metric, cohort, &rows, sample_count)
        })
        .await?;

        if sample_count == 0 {
            warn!(metric = %metric, cohort = %cohort, "No samples in pool, thresholds are null");
        }
        debug!(
            metric = %metric,
            cohort = %cohort,
            samples = sample_count,
            version_id,
            rows = rows.len(),
            "Threshold table rebuilt"
        );

        Ok(rows.len())
    }

    /// Rebuild every (metric, cohort) pair, aggregate included.
    ///
    /// A failing pair is logged and reported; the remaining pairs still run
    /// and the failed pair keeps serving its previous table.
    pub async fn rebuild_all(&self) -> RebuildReport {
        let started = Instant::now();
        self.log_pool_sizes().await;

        let mut pairs = Vec::new();
        let mut total_rows = 0;
        let mut failed_pairs = 0;

        for metric in Metric::all() {
            for cohort in Cohort::ALL {
                match self.rebuild(metric, cohort).await {
                    Ok(rows) => {
                        total_rows += rows;
                        pairs.push(PairRebuild {
                            metric,
                            cohort,
                            rows_written: Some(rows),
                            error: None,
                        });
                    }
                    Err(e) => {
                        failed_pairs += 1;
                        warn!(metric = %metric, cohort = %cohort, error = %e, "Threshold rebuild failed for pair");
                        pairs.push(PairRebuild {
                            metric,
                            cohort,
                            rows_written: None,
                            error: Some(e.to_string()),
                        });
                    }
                }
            }
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let status = if failed_pairs == 0 {
            RebuildStatus::Complete
        } else {
            RebuildStatus::PartialFailure
        };

        info!(
            pairs = pairs.len(),
            failed_pairs,
            rows = total_rows,
            elapsed_ms,
            "Threshold rebuild finished"
        );

        RebuildReport {
            status,
            pairs,
            total_rows,
            failed_pairs,
            elapsed_ms,
        }
    }

    async fn log_pool_sizes(&self) {
        match self.pool_sizes().await {
            Ok((reference, admitted)) => info!(reference, contributions = admitted, "Rebuilding threshold tables"),
            Err(e) => warn!(error = %e, "Could not count pooled samples"),
        }
    }

    /// Reference records and admitted contributions across every test type
    async fn pool_sizes(&self) -> Result<(i64, i64)> {
        let reference = reference::count_reference_records(&self.db).await?;
        let mut admitted = 0;
        for test_type in TestType::ALL {
            admitted += contributions::count_contributions(&self.db, test_type).await?;
        }
        Ok((reference, admitted))
    }
}
