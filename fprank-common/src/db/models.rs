//! Database models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::model::{Cohort, Metric, SessionMetrics, TestType};
use crate::Error;

/// Outcome of mapping a value onto a threshold table.
///
/// `Unavailable` means there is nothing to compare against; it is never
/// the same thing as the 0th percentile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "percentile", rename_all = "snake_case")]
pub enum PercentileLookup {
    Percentile(u8),
    Unavailable,
}

impl PercentileLookup {
    pub fn value(self) -> Option<u8> {
        match self {
            PercentileLookup::Percentile(p) => Some(p),
            PercentileLookup::Unavailable => None,
        }
    }
}

impl From<Option<u8>> for PercentileLookup {
    fn from(value: Option<u8>) -> Self {
        value.map_or(PercentileLookup::Unavailable, PercentileLookup::Percentile)
    }
}

/// One row of an active threshold table
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRow {
    pub percentile: u8,
    /// Minimum value reaching this percentile; `None` while the pool is empty
    pub threshold: Option<f64>,
    pub sample_count: i64,
}

/// Internally sourced sample admitted into the pool
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContributionRecord {
    pub guid: Uuid,
    pub athlete_id: String,
    pub cohort: Cohort,
    pub session_id: String,
    pub recorded_at: DateTime<Utc>,
    pub metrics: SessionMetrics,
}

impl ContributionRecord {
    pub fn test_type(&self) -> TestType {
        self.metrics.test_type()
    }
}

/// Percentiles for one metric of one synced session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PercentileEvent {
    pub guid: Uuid,
    pub athlete_id: String,
    pub session_id: String,
    pub test_type: TestType,
    pub metric: Metric,
    pub recorded_at: DateTime<Utc>,
    pub raw_value: f64,
    /// Athlete's tier at the time of the session
    pub cohort: Option<Cohort>,
    pub cohort_percentile: Option<u8>,
    pub aggregate_percentile: Option<u8>,
}

/// Per-test-type percentile that fed a composite
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestTypeScore {
    pub test_type: TestType,
    pub session_id: String,
    pub recorded_at: DateTime<Utc>,
    pub cohort_percentile: f64,
    pub aggregate_percentile: Option<f64>,
}

/// Mean percentile across the composite test types as of `recorded_at`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeEvent {
    pub athlete_id: String,
    pub cohort: Cohort,
    /// First day of the date bucket the score is stored under
    pub bucket: String,
    /// Timestamp of the most recent contributing test
    pub recorded_at: DateTime<Utc>,
    pub cohort_percentile: f64,
    pub aggregate_percentile: Option<f64>,
    pub components: Vec<TestTypeScore>,
}

/// Key of a history stream: a catalog metric or the synthetic composite
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HistoryMetric {
    Metric(Metric),
    Composite,
}

impl HistoryMetric {
    pub const COMPOSITE_KEY: &'static str = "composite";
}

impl From<Metric> for HistoryMetric {
    fn from(metric: Metric) -> Self {
        HistoryMetric::Metric(metric)
    }
}

impl fmt::Display for HistoryMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HistoryMetric::Metric(metric) => f.write_str(metric.key()),
            HistoryMetric::Composite => f.write_str(Self::COMPOSITE_KEY),
        }
    }
}

impl FromStr for HistoryMetric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == Self::COMPOSITE_KEY {
            Ok(HistoryMetric::Composite)
        } else {
            s.parse::<Metric>().map(HistoryMetric::Metric)
        }
    }
}

impl Serialize for HistoryMetric {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for HistoryMetric {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// One point of a per-metric history stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub metric: HistoryMetric,
    pub recorded_at: DateTime<Utc>,
    /// Session the point came from; composites have none
    pub session_id: Option<String>,
    /// Measured value; composites have none
    pub raw_value: Option<f64>,
    pub cohort: Option<Cohort>,
    pub cohort_percentile: Option<f64>,
    pub aggregate_percentile: Option<f64>,
}
