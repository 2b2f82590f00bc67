//! Session and reference payloads
//!
//! Ingestion hands over a loosely typed column→value map. It is narrowed
//! here into [`SessionMetrics`], which can only be built when every metric
//! the test type requires is present and finite.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{Cohort, Metric, TestType};
use crate::{Error, Result};

/// Column name → value as delivered by the force-plate export. Nulls allowed.
pub type RawMetrics = BTreeMap<String, Option<f64>>;

/// One completed test session as supplied by ingestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSession {
    pub athlete_id: String,
    pub test_type: TestType,
    /// Athlete's tier when tested; absent when the athlete has none assigned
    #[serde(default)]
    pub cohort: Option<Cohort>,
    pub recorded_at: DateTime<Utc>,
    pub session_id: String,
    #[serde(default)]
    pub metrics: RawMetrics,
}

impl TestSession {
    /// Reject payloads the engine cannot attribute
    pub fn validate(&self) -> Result<()> {
        if self.athlete_id.trim().is_empty() {
            return Err(Error::InvalidInput("athlete_id is empty".to_string()));
        }
        if self.session_id.trim().is_empty() {
            return Err(Error::InvalidInput("session_id is empty".to_string()));
        }
        if self.cohort.is_some_and(Cohort::is_aggregate) {
            return Err(Error::InvalidInput(format!(
                "athlete {} cannot be assigned to the aggregate cohort",
                self.athlete_id
            )));
        }
        Ok(())
    }

    /// Catalog metrics of this test type that carry a finite value
    pub fn present_metrics(&self) -> Vec<(Metric, f64)> {
        present_metrics(self.test_type, &self.metrics)
    }

    pub fn complete_metrics(&self) -> std::result::Result<SessionMetrics, IncompleteMetrics> {
        SessionMetrics::from_raw(self.test_type, &self.metrics)
    }
}

/// Catalog metrics of `test_type` found in `raw` with finite values, in priority order
pub fn present_metrics(test_type: TestType, raw: &RawMetrics) -> Vec<(Metric, f64)> {
    let mut found: BTreeMap<Metric, f64> = BTreeMap::new();

    for (column, value) in raw {
        let Some(metric) = Metric::from_column(test_type, column) else {
            continue;
        };
        let Some(value) = (*value).filter(|v| v.is_finite()) else {
            continue;
        };
        // The pool key takes precedence over the vendor column
        if column.as_str() == metric.key() || !found.contains_key(&metric) {
            found.insert(metric, value);
        }
    }

    test_type
        .metrics()
        .filter_map(|def| found.get(&def.metric).map(|v| (def.metric, *v)))
        .collect()
}

/// A session is missing required metrics
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{test_type} session missing required metrics: {missing:?}")]
pub struct IncompleteMetrics {
    pub test_type: TestType,
    pub missing: Vec<Metric>,
}

/// Fully populated metric set for one session, one variant per test type
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "test_type")]
pub enum SessionMetrics {
    #[serde(rename = "CMJ")]
    Cmj { peak_power: f64, relative_power: f64 },
    #[serde(rename = "SJ")]
    Sj { peak_power: f64, relative_power: f64 },
    #[serde(rename = "HJ")]
    Hj { reactive_strength_index: f64 },
    #[serde(rename = "PPU")]
    Ppu { peak_takeoff_force: f64 },
    #[serde(rename = "IMTP")]
    Imtp { net_peak_force: f64, relative_strength: f64 },
}

impl SessionMetrics {
    pub fn from_raw(test_type: TestType, raw: &RawMetrics) -> std::result::Result<Self, IncompleteMetrics> {
        let present = present_metrics(test_type, raw);
        let get = |metric: Metric| present.iter().find(|(m, _)| *m == metric).map(|(_, v)| *v);

        let complete = match test_type {
            TestType::Cmj => match (get(Metric::CmjPeakPower), get(Metric::CmjRelativePower)) {
                (Some(peak_power), Some(relative_power)) => Some(SessionMetrics::Cmj { peak_power, relative_power }),
                _ => None,
            },
            TestType::Sj => match (get(Metric::SjPeakPower), get(Metric::SjRelativePower)) {
                (Some(peak_power), Some(relative_power)) => Some(SessionMetrics::Sj { peak_power, relative_power }),
                _ => None,
            },
            TestType::Hj => get(Metric::HjReactiveStrengthIndex)
                .map(|reactive_strength_index| SessionMetrics::Hj { reactive_strength_index }),
            TestType::Ppu => get(Metric::PpuPeakTakeoffForce)
                .map(|peak_takeoff_force| SessionMetrics::Ppu { peak_takeoff_force }),
            TestType::Imtp => match (get(Metric::ImtpNetPeakForce), get(Metric::ImtpRelativeStrength)) {
                (Some(net_peak_force), Some(relative_strength)) => {
                    Some(SessionMetrics::Imtp { net_peak_force, relative_strength })
                }
                _ => None,
            },
        };

        complete.ok_or_else(|| IncompleteMetrics {
            test_type,
            missing: test_type
                .metrics()
                .map(|def| def.metric)
                .filter(|metric| get(*metric).is_none())
                .collect(),
        })
    }

    pub fn test_type(&self) -> TestType {
        match self {
            SessionMetrics::Cmj { .. } => TestType::Cmj,
            SessionMetrics::Sj { .. } => TestType::Sj,
            SessionMetrics::Hj { .. } => TestType::Hj,
            SessionMetrics::Ppu { .. } => TestType::Ppu,
            SessionMetrics::Imtp { .. } => TestType::Imtp,
        }
    }

    /// Metric values in catalog priority order
    pub fn values(&self) -> Vec<(Metric, f64)> {
        match *self {
            SessionMetrics::Cmj { peak_power, relative_power } => {
                vec![(Metric::CmjPeakPower, peak_power), (Metric::CmjRelativePower, relative_power)]
            }
            SessionMetrics::Sj { peak_power, relative_power } => {
                vec![(Metric::SjPeakPower, peak_power), (Metric::SjRelativePower, relative_power)]
            }
            SessionMetrics::Hj { reactive_strength_index } => {
                vec![(Metric::HjReactiveStrengthIndex, reactive_strength_index)]
            }
            SessionMetrics::Ppu { peak_takeoff_force } => vec![(Metric::PpuPeakTakeoffForce, peak_takeoff_force)],
            SessionMetrics::Imtp { net_peak_force, relative_strength } => vec![
                (Metric::ImtpNetPeakForce, net_peak_force),
                (Metric::ImtpRelativeStrength, relative_strength),
            ],
        }
    }

    pub fn value(&self, metric: Metric) -> Option<f64> {
        self.values().into_iter().find(|(m, _)| *m == metric).map(|(_, v)| v)
    }
}

/// One externally sourced baseline athlete
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceRecord {
    /// Identifier in the source dataset; loading is keyed on it
    pub external_id: String,
    pub cohort: Cohort,
    /// Pool key → value; unknown keys are ignored
    #[serde(default)]
    pub metrics: RawMetrics,
}

impl ReferenceRecord {
    /// Catalog metrics with finite values, in priority order
    pub fn values(&self) -> Vec<(Metric, f64)> {
        Metric::all()
            .filter_map(|metric| {
                self.metrics
                    .get(metric.key())
                    .copied()
                    .flatten()
                    .filter(|v| v.is_finite())
                    .map(|v| (metric, v))
            })
            .collect()
    }
}
