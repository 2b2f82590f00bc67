//! Session ingestion
//!
//! A synced session flows through admission, percentile scoring against
//! the currently active threshold tables, history, and the overall
//! composite. Admission and scoring are independent: an incomplete or
//! skipped session is still scored on every metric it carries.
//!
//! Batches are processed one athlete at a time. Each athlete runs under a
//! time budget; an athlete that fails or times out is reported and the
//! batch moves on.

use fprank_common::db::{PercentileEvent, PercentileLookup};
use fprank_common::model::TestSession;
use fprank_common::time::millis_to_duration;
use fprank_common::{Metric, Result, TestType};
use serde::Serialize;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::RuntimeSettings;
use crate::services::composite::{CompositeAggregator, CompositeOutcome};
use crate::services::contribution_pool::{Admission, ContributionPool};
use crate::services::history::HistoryStore;
use crate::services::percentile_query::PercentileQuery;

/// Percentiles of one metric of an ingested session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricPercentile {
    pub metric: Metric,
    pub raw_value: f64,
    pub cohort: PercentileLookup,
    pub aggregate: PercentileLookup,
}

impl From<&PercentileEvent> for MetricPercentile {
    fn from(event: &PercentileEvent) -> Self {
        Self {
            metric: event.metric,
            raw_value: event.raw_value,
            cohort: event.cohort_percentile.into(),
            aggregate: event.aggregate_percentile.into(),
        }
    }
}

/// Everything that happened to one session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionOutcome {
    pub session_id: String,
    pub athlete_id: String,
    pub test_type: TestType,
    pub admission: Admission,
    pub percentiles: Vec<MetricPercentile>,
    pub composite: CompositeOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AthleteStatus {
    Succeeded,
    Failed,
    TimedOut,
}

/// Per-athlete section of a batch report
#[derive(Debug, Clone, Serialize)]
pub struct AthleteResult {
    pub athlete_id: String,
    pub status: AthleteStatus,
    /// Sessions fully ingested before the athlete finished or stopped
    pub sessions_processed: usize,
    pub outcomes: Vec<SessionOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of a batch sync
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub total_athletes: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub total_sessions: usize,
    pub elapsed_ms: u64,
    pub results: Vec<AthleteResult>,
}

/// Sessions grouped per athlete in order of first appearance, each group
/// sorted chronologically (session id breaks ties)
pub fn group_by_athlete(sessions: Vec<TestSession>) -> Vec<(String, Vec<TestSession>)> {
    let mut groups: Vec<(String, Vec<TestSession>)> = Vec::new();
    for session in sessions {
        match groups.iter_mut().find(|(athlete, _)| *athlete == session.athlete_id) {
            Some((_, group)) => group.push(session),
            None => groups.push((session.athlete_id.clone(), vec![session])),
        }
    }
    for (_, group) in &mut groups {
        group.sort_by(|a, b| {
            a.recorded_at
                .cmp(&b.recorded_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
    }
    groups
}

/// Session ingestion pipeline
#[derive(Clone)]
pub struct SessionIngestor {
    pool: ContributionPool,
    query: PercentileQuery,
    composite: CompositeAggregator,
    history: HistoryStore,
    settings: RuntimeSettings,
}

impl SessionIngestor {
    pub fn new(
        pool: ContributionPool,
        query: PercentileQuery,
        composite: CompositeAggregator,
        history: HistoryStore,
        settings: RuntimeSettings,
    ) -> Self {
        Self {
            pool,
            query,
            composite,
            history,
            settings,
        }
    }

    /// Admit, score, record and compose one session.
    ///
    /// A replayed session keeps the percentiles it was first scored with.
    pub async fn ingest_session(&self, session: &TestSession) -> Result<SessionOutcome> {
        session.validate()?;

        let admission = self.pool.consider_contribution(session).await?;
        let percentiles = self.score(session).await?;

        let composite = self.composite.compose_overall(&session.athlete_id, session.recorded_at).await?;
        // Stored composites are per bucket; the session may land behind later data
        self.composite.refresh_from(&session.athlete_id, session.recorded_at).await?;

        debug!(
            athlete_id = %session.athlete_id,
            session_id = %session.session_id,
            test_type = %session.test_type,
            admission = ?admission,
            metrics = percentiles.len(),
            "Session ingested"
        );

        Ok(SessionOutcome {
            session_id: session.session_id.clone(),
            athlete_id: session.athlete_id.clone(),
            test_type: session.test_type,
            admission,
            percentiles,
            composite,
        })
    }

    async fn score(&self, session: &TestSession) -> Result<Vec<MetricPercentile>> {
        let stored = self.history.session_events(&session.session_id).await?;
        let mut percentiles: Vec<MetricPercentile> = stored.iter().map(MetricPercentile::from).collect();

        for (metric, raw_value) in session.present_metrics() {
            if percentiles.iter().any(|p| p.metric == metric) {
                continue;
            }
            let lookups = self.query.lookup_pair(raw_value, metric, session.cohort).await?;
            let event = PercentileEvent {
                guid: Uuid::new_v4(),
                athlete_id: session.athlete_id.clone(),
                session_id: session.session_id.clone(),
                test_type: session.test_type,
                metric,
                recorded_at: session.recorded_at,
                raw_value,
                cohort: session.cohort,
                cohort_percentile: lookups.cohort.value(),
                aggregate_percentile: lookups.aggregate.value(),
            };
            self.history.append(&event).await?;
            percentiles.push(MetricPercentile {
                metric,
                raw_value,
                cohort: lookups.cohort,
                aggregate: lookups.aggregate,
            });
        }

        percentiles.sort_by_key(|p| p.metric.definition().priority);
        Ok(percentiles)
    }

    /// Ingest a batch, athlete by athlete
    pub async fn ingest_batch(&self, sessions: Vec<TestSession>) -> BatchReport {
        let started = Instant::now();
        let total_sessions = sessions.len();
        let groups = group_by_athlete(sessions);
        let budget = millis_to_duration(self.settings.athlete_timeout_ms);

        info!(athletes = groups.len(), sessions = total_sessions, "Starting batch ingestion");

        let mut results = Vec::with_capacity(groups.len());
        for (athlete_id, group) in groups {
            let mut outcomes = Vec::new();
            let run = tokio::time::timeout(budget, self.ingest_athlete(&group, &mut outcomes)).await;

            let (status, error) = match run {
                Ok(Ok(())) => (AthleteStatus::Succeeded, None),
                Ok(Err(e)) => {
                    warn!(athlete_id = %athlete_id, error = %e, "Athlete ingestion failed");
                    (AthleteStatus::Failed, Some(e.to_string()))
                }
                Err(_) => {
                    warn!(
                        athlete_id = %athlete_id,
                        timeout_ms = self.settings.athlete_timeout_ms,
                        "Athlete ingestion timed out"
                    );
                    (
                        AthleteStatus::TimedOut,
                        Some(format!("timed out after {} ms", self.settings.athlete_timeout_ms)),
                    )
                }
            };

            results.push(AthleteResult {
                athlete_id,
                status,
                sessions_processed: outcomes.len(),
                outcomes,
                error,
            });
        }

        let succeeded = results.iter().filter(|r| r.status == AthleteStatus::Succeeded).count();
        let report = BatchReport {
            total_athletes: results.len(),
            succeeded,
            failed: results.len() - succeeded,
            total_sessions,
            elapsed_ms: started.elapsed().as_millis() as u64,
            results,
        };

        info!(
            athletes = report.total_athletes,
            succeeded = report.succeeded,
            failed = report.failed,
            elapsed_ms = report.elapsed_ms,
            "Batch ingestion finished"
        );
        report
    }

    /// Stops at the athlete's first failing session
    async fn ingest_athlete(&self, sessions: &[TestSession], outcomes: &mut Vec<SessionOutcome>) -> Result<()> {
        for session in sessions {
            outcomes.push(self.ingest_session(session).await?);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use fprank_common::model::RawMetrics;

    fn session(athlete: &str, id: &str, day: u32) -> TestSession {
        TestSession {
            athlete_id: athlete.to_string(),
            test_type: TestType::Ppu,
            cohort: None,
            recorded_at: Utc.with_ymd_and_hms(2025, 6, day, 12, 0, 0).unwrap(),
            session_id: id.to_string(),
            metrics: RawMetrics::new(),
        }
    }

    #[test]
    fn test_group_by_athlete_keeps_first_appearance_order() {
        let groups = group_by_athlete(vec![
            session("b", "b2", 5),
            session("a", "a1", 2),
            session("b", "b1", 3),
            session("a", "a0", 2),
        ]);

        let athletes: Vec<_> = groups.iter().map(|(a, _)| a.as_str()).collect();
        assert_eq!(athletes, vec!["b", "a"]);

        let b: Vec<_> = groups[0].1.iter().map(|s| s.session_id.as_str()).collect();
        assert_eq!(b, vec!["b1", "b2"]);
        // Same timestamp: session id decides
        let a: Vec<_> = groups[1].1.iter().map(|s| s.session_id.as_str()).collect();
        assert_eq!(a, vec!["a0", "a1"]);
    }

    #[test]
    fn test_group_by_athlete_empty() {
        assert!(group_by_athlete(Vec::new()).is_empty());
    }
}
