//! Percentile Query Service
//!
//! Maps an observed value onto the active threshold table of a
//! (metric, cohort) pair. Once the table is loaded the mapping is pure.

use fprank_common::db::{PercentileLookup, ThresholdRow};
use fprank_common::{Cohort, Metric, Result};
use serde::Serialize;
use sqlx::{Pool, Sqlite};

use crate::db::thresholds;

/// Materialized threshold table for one (metric, cohort) pair
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdTable {
    rows: Vec<ThresholdRow>,
}

impl ThresholdTable {
    /// Rows must be ascending by percentile
    pub fn new(rows: Vec<ThresholdRow>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[ThresholdRow] {
        &self.rows
    }

    /// Number of pooled samples the table was built from
    pub fn sample_count(&self) -> i64 {
        self.rows.first().map_or(0, |r| r.sample_count)
    }

    /// Highest percentile whose threshold is at or below `value`.
    ///
    /// A value below every threshold ranks at 0. A table with no rows, or
    /// with only null thresholds, is `Unavailable`, as is a non-finite value.
    pub fn percentile_for(&self, value: f64) -> PercentileLookup {
        if !value.is_finite() || self.rows.iter().all(|r| r.threshold.is_none()) {
            return PercentileLookup::Unavailable;
        }

        let percentile = self
            .rows
            .iter()
            .filter(|r| r.threshold.is_some_and(|t| t <= value))
            .map(|r| r.percentile)
            .max()
            .unwrap_or(0);

        PercentileLookup::Percentile(percentile)
    }
}

/// Cohort-scoped and aggregate results for one value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PercentileLookups {
    pub cohort: PercentileLookup,
    pub aggregate: PercentileLookup,
}

/// Percentile Query Service
#[derive(Clone)]
pub struct PercentileQuery {
    db: Pool<Sqlite>,
}

impl PercentileQuery {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    /// Active table for the pair; empty if it was never built
    pub async fn table(&self, metric: Metric, cohort: Cohort) -> Result<ThresholdTable> {
        Ok(ThresholdTable::new(thresholds::active_rows(&self.db, metric, cohort).await?))
    }

    pub async fn lookup(&self, value: f64, metric: Metric, cohort: Cohort) -> Result<PercentileLookup> {
        Ok(self.table(metric, cohort).await?.percentile_for(value))
    }

    /// Lookup against the athlete's cohort and against the aggregate.
    ///
    /// The two are independent: an athlete without a cohort still gets an
    /// aggregate percentile.
    pub async fn lookup_pair(&self, value: f64, metric: Metric, cohort: Option<Cohort>) -> Result<PercentileLookups> {
        let cohort_lookup = match cohort {
            Some(cohort) => self.lookup(value, metric, cohort).await?,
            None => PercentileLookup::Unavailable,
        };
        let aggregate = self.lookup(value, metric, Cohort::Overall).await?;

        tracing::debug!(
            metric = %metric,
            cohort = ?cohort,
            value,
            cohort_percentile = ?cohort_lookup.value(),
            aggregate_percentile = ?aggregate.value(),
            "Percentile lookup"
        );

        Ok(PercentileLookups {
            cohort: cohort_lookup,
            aggregate,
        })
    }
}
