//! Composite Score Aggregator
//!
//! A test-type percentile is the mean of the cohort percentiles of that
//! test type's metrics within one session. The overall composite is the
//! mean of the athlete's most recent test-type percentile for each
//! composite test type; if any of them is missing the composite is
//! undefined. Partial averages are never produced.

use chrono::{DateTime, Utc};
use fprank_common::db::{CompositeEvent, PercentileEvent, TestTypeScore};
use fprank_common::{Result, TestType};
use serde::Serialize;
use sqlx::{Pool, Sqlite};
use std::collections::BTreeSet;
use tracing::{debug, info};

use crate::config::RuntimeSettings;
use crate::db::events;
use crate::utils::retry_on_lock;

/// Overall composite as of a point in time
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CompositeOutcome {
    Defined(CompositeEvent),
    /// Composite test types with no usable percentile as of the query time
    Undefined { missing: Vec<TestType> },
}

impl CompositeOutcome {
    pub fn defined(&self) -> Option<&CompositeEvent> {
        match self {
            CompositeOutcome::Defined(event) => Some(event),
            CompositeOutcome::Undefined { .. } => None,
        }
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Test-type percentile for one session's events.
///
/// `None` unless the events all belong to one session and every metric of
/// its test type has a cohort percentile. The aggregate mean is only set
/// when every metric also has an aggregate percentile.
pub fn compose_test_type(session_events: &[PercentileEvent]) -> Option<TestTypeScore> {
    let first = session_events.first()?;
    if session_events
        .iter()
        .any(|e| e.session_id != first.session_id || e.test_type != first.test_type)
    {
        return None;
    }

    let mut cohort_values = Vec::new();
    let mut aggregate_values = Vec::new();
    for def in first.test_type.metrics() {
        let event = session_events.iter().find(|e| e.metric == def.metric)?;
        cohort_values.push(f64::from(event.cohort_percentile?));
        if let Some(aggregate) = event.aggregate_percentile {
            aggregate_values.push(f64::from(aggregate));
        }
    }

    let aggregate_percentile = if aggregate_values.len() == cohort_values.len() {
        mean(&aggregate_values)
    } else {
        None
    };

    Some(TestTypeScore {
        test_type: first.test_type,
        session_id: first.session_id.clone(),
        recorded_at: first.recorded_at,
        cohort_percentile: mean(&cohort_values)?,
        aggregate_percentile,
    })
}

/// Composite Score Aggregator
#[derive(Clone)]
pub struct CompositeAggregator {
    db: Pool<Sqlite>,
    settings: RuntimeSettings,
}

impl CompositeAggregator {
    pub fn new(db: Pool<Sqlite>, settings: RuntimeSettings) -> Self {
        Self { db, settings }
    }

    /// Composite of the athlete's most recent test-type percentiles at or
    /// before `as_of`.
    ///
    /// The composite is filed under the cohort of the athlete's most recent
    /// event that has one, and stamped with the time of the most recent
    /// contributing test.
    pub async fn compose_overall(&self, athlete_id: &str, as_of: DateTime<Utc>) -> Result<CompositeOutcome> {
        // Newest first
        let history = events::events_up_to(&self.db, athlete_id, as_of).await?;

        let mut components = Vec::new();
        let mut missing = Vec::new();
        for test_type in TestType::COMPOSITE {
            match latest_score(&history, test_type) {
                Some(score) => components.push(score),
                None => missing.push(test_type),
            }
        }

        if !missing.is_empty() {
            debug!(athlete_id, as_of = %as_of, missing = ?missing, "Composite undefined");
            return Ok(CompositeOutcome::Undefined { missing });
        }

        // A defined test-type score implies a cohort percentile, so a cohort
        // is always found here
        let Some(cohort) = history.iter().find_map(|e| e.cohort) else {
            return Ok(CompositeOutcome::Undefined { missing });
        };

        let cohort_values: Vec<f64> = components.iter().map(|c| c.cohort_percentile).collect();
        let aggregate_values: Vec<f64> = components.iter().filter_map(|c| c.aggregate_percentile).collect();
        let recorded_at = components.iter().map(|c| c.recorded_at).max().unwrap_or(as_of);

        let Some(cohort_percentile) = mean(&cohort_values) else {
            return Ok(CompositeOutcome::Undefined { missing });
        };

        Ok(CompositeOutcome::Defined(CompositeEvent {
            athlete_id: athlete_id.to_string(),
            cohort,
            bucket: self.settings.composite_bucket.key(recorded_at),
            recorded_at,
            cohort_percentile,
            aggregate_percentile: if aggregate_values.len() == components.len() {
                mean(&aggregate_values)
            } else {
                None
            },
            components,
        }))
    }

    /// Store a composite under its (athlete, cohort, bucket) key
    pub async fn persist(&self, composite: &CompositeEvent) -> Result<bool> {
        retry_on_lock("upsert composite", self.settings.max_lock_wait_ms, || {
            events::upsert_composite(&self.db, composite)
        })
        .await
    }

    /// Recompute and store the composite at the end of every date bucket
    /// in which the athlete has events. Returns how many were stored.
    pub async fn backfill_composites(&self, athlete_id: &str) -> Result<usize> {
        let stored = self.store_buckets(athlete_id, None).await?;
        info!(
            athlete_id,
            bucket = self.settings.composite_bucket.as_str(),
            stored,
            "Composite backfill finished"
        );
        Ok(stored)
    }

    /// Recompute and store the composite of the bucket holding `from` and
    /// of every later bucket in which the athlete has events.
    ///
    /// A session that arrives after later data changes its own bucket and
    /// can feed any bucket after it.
    pub async fn refresh_from(&self, athlete_id: &str, from: DateTime<Utc>) -> Result<usize> {
        self.store_buckets(athlete_id, Some(self.settings.composite_bucket.end(from))).await
    }

    async fn store_buckets(&self, athlete_id: &str, first_end: Option<DateTime<Utc>>) -> Result<usize> {
        let bucket = self.settings.composite_bucket;
        let bucket_ends: BTreeSet<DateTime<Utc>> = events::event_timestamps(&self.db, athlete_id)
            .await?
            .into_iter()
            .map(|ts| bucket.end(ts))
            .filter(|end| first_end.map_or(true, |first| *end >= first))
            .collect();

        let mut stored = 0;
        for as_of in bucket_ends {
            if let CompositeOutcome::Defined(composite) = self.compose_overall(athlete_id, as_of).await? {
                if self.persist(&composite).await? {
                    stored += 1;
                }
            }
        }
        Ok(stored)
    }
}

/// Most recent defined test-type score in newest-first `history`
fn latest_score(history: &[PercentileEvent], test_type: TestType) -> Option<TestTypeScore> {
    let mut seen = Vec::<&str>::new();
    for event in history.iter().filter(|e| e.test_type == test_type) {
        if seen.contains(&event.session_id.as_str()) {
            continue;
        }
        seen.push(&event.session_id);

        let session_events: Vec<PercentileEvent> = history
            .iter()
            .filter(|e| e.session_id == event.session_id)
            .cloned()
            .collect();
        if let Some(score) = compose_test_type(&session_events) {
            return Some(score);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use fprank_common::{Cohort, Metric};
    use uuid::Uuid;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, day, 9, 0, 0).unwrap()
    }

    fn event(session: &str, metric: Metric, day: u32, cohort_pct: Option<u8>, aggregate_pct: Option<u8>) -> PercentileEvent {
        PercentileEvent {
            guid: Uuid::new_v4(),
            athlete_id: "a1".to_string(),
            session_id: session.to_string(),
            test_type: metric.test_type(),
            metric,
            recorded_at: at(day),
            raw_value: 1.0,
            cohort: Some(Cohort::Pro),
            cohort_percentile: cohort_pct,
            aggregate_percentile: aggregate_pct,
        }
    }

    #[test]
    fn test_compose_test_type_means_cohort_percentiles() {
        let events = vec![
            event("s1", Metric::SjPeakPower, 1, Some(60), Some(70)),
            event("s1", Metric::SjRelativePower, 1, Some(81), Some(90)),
        ];
        let score = compose_test_type(&events).unwrap();
        assert_eq!(score.test_type, TestType::Sj);
        assert_eq!(score.cohort_percentile, 70.5);
        assert_eq!(score.aggregate_percentile, Some(80.0));
    }

    #[test]
    fn test_compose_test_type_requires_every_metric() {
        let events = vec![event("s1", Metric::ImtpNetPeakForce, 1, Some(50), Some(50))];
        assert!(compose_test_type(&events).is_none());

        let events = vec![
            event("s1", Metric::ImtpNetPeakForce, 1, Some(50), Some(50)),
            event("s1", Metric::ImtpRelativeStrength, 1, None, Some(50)),
        ];
        assert!(compose_test_type(&events).is_none());
        assert!(compose_test_type(&[]).is_none());
    }

    #[test]
    fn test_compose_test_type_partial_aggregate() {
        let events = vec![
            event("s1", Metric::ImtpNetPeakForce, 1, Some(40), Some(45)),
            event("s1", Metric::ImtpRelativeStrength, 1, Some(60), None),
        ];
        let score = compose_test_type(&events).unwrap();
        assert_eq!(score.cohort_percentile, 50.0);
        assert_eq!(score.aggregate_percentile, None);
    }

    #[test]
    fn test_compose_test_type_rejects_mixed_sessions() {
        let events = vec![
            event("s1", Metric::SjPeakPower, 1, Some(60), Some(70)),
            event("s2", Metric::SjRelativePower, 2, Some(81), Some(90)),
        ];
        assert!(compose_test_type(&events).is_none());
    }

    #[test]
    fn test_latest_score_skips_undefined_sessions() {
        // Newest first: s3 lacks a cohort percentile, s2 is complete
        let history = vec![
            event("s3", Metric::HjReactiveStrengthIndex, 3, None, Some(10)),
            event("s2", Metric::HjReactiveStrengthIndex, 2, Some(55), Some(60)),
            event("s1", Metric::HjReactiveStrengthIndex, 1, Some(20), Some(25)),
        ];
        let score = latest_score(&history, TestType::Hj).unwrap();
        assert_eq!(score.session_id, "s2");
        assert_eq!(score.cohort_percentile, 55.0);
        assert!(latest_score(&history, TestType::Ppu).is_none());
    }
}
