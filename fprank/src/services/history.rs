//! History Store
//!
//! Append-only per-athlete ledger of percentile events, plus the stored
//! composites exposed through the synthetic `composite` metric. Nothing is
//! ever pruned.

use fprank_common::db::{CompositeEvent, HistoryEntry, HistoryMetric, PercentileEvent};
use fprank_common::Result;
use serde::Serialize;
use sqlx::{Pool, Sqlite};

use crate::config::RuntimeSettings;
use crate::db::events;
use crate::utils::retry_on_lock;

/// Current vs previous record of one history stream
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trend {
    pub metric: HistoryMetric,
    pub current: HistoryEntry,
    pub previous: Option<HistoryEntry>,
    /// Cohort percentile change, when both records have one
    pub delta: Option<f64>,
    /// Raw value change, when both records have one
    pub raw_delta: Option<f64>,
}

fn composite_entry(event: CompositeEvent) -> HistoryEntry {
    HistoryEntry {
        metric: HistoryMetric::Composite,
        recorded_at: event.recorded_at,
        session_id: None,
        raw_value: None,
        cohort: Some(event.cohort),
        cohort_percentile: Some(event.cohort_percentile),
        aggregate_percentile: event.aggregate_percentile,
    }
}

fn difference(current: Option<f64>, previous: Option<f64>) -> Option<f64> {
    Some(current? - previous?)
}

/// History Store
#[derive(Clone)]
pub struct HistoryStore {
    db: Pool<Sqlite>,
    settings: RuntimeSettings,
}

impl HistoryStore {
    pub fn new(db: Pool<Sqlite>, settings: RuntimeSettings) -> Self {
        Self { db, settings }
    }

    /// Append an event; false if the session already recorded this metric
    pub async fn append(&self, event: &PercentileEvent) -> Result<bool> {
        retry_on_lock("append percentile event", self.settings.max_lock_wait_ms, || {
            events::insert_percentile_event(&self.db, event)
        })
        .await
    }

    /// Events already recorded for a session, in priority order
    pub async fn session_events(&self, session_id: &str) -> Result<Vec<PercentileEvent>> {
        events::events_for_session(&self.db, session_id).await
    }

    /// The `n` most recent records, newest first
    pub async fn latest_n(&self, athlete_id: &str, metric: HistoryMetric, n: usize) -> Result<Vec<HistoryEntry>> {
        let limit = Some(i64::try_from(n).unwrap_or(i64::MAX));
        self.fetch(athlete_id, metric, true, limit).await
    }

    /// Every record of the stream, oldest first
    pub async fn all_for_metric(&self, athlete_id: &str, metric: HistoryMetric) -> Result<Vec<HistoryEntry>> {
        self.fetch(athlete_id, metric, false, None).await
    }

    /// Compare the two most recent records; `None` when there are none
    pub async fn trend(&self, athlete_id: &str, metric: HistoryMetric) -> Result<Option<Trend>> {
        let mut latest = self.latest_n(athlete_id, metric, 2).await?.into_iter();
        let Some(current) = latest.next() else {
            return Ok(None);
        };
        let previous = latest.next();

        let delta = previous
            .as_ref()
            .and_then(|p| difference(current.cohort_percentile, p.cohort_percentile));
        let raw_delta = previous.as_ref().and_then(|p| difference(current.raw_value, p.raw_value));

        Ok(Some(Trend {
            metric,
            current,
            previous,
            delta,
            raw_delta,
        }))
    }

    async fn fetch(
        &self,
        athlete_id: &str,
        metric: HistoryMetric,
        newest_first: bool,
        limit: Option<i64>,
    ) -> Result<Vec<HistoryEntry>> {
        match metric {
            HistoryMetric::Metric(metric) => {
                events::metric_history(&self.db, athlete_id, metric, newest_first, limit).await
            }
            HistoryMetric::Composite => Ok(events::composite_history(&self.db, athlete_id, newest_first, limit)
                .await?
                .into_iter()
                .map(composite_entry)
                .collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use fprank_common::db::init_memory_database;
    use fprank_common::{Cohort, Metric, TestType};
    use uuid::Uuid;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, day, 15, 0, 0).unwrap()
    }

    fn rsi_event(session: &str, day: u32, value: f64, pct: Option<u8>) -> PercentileEvent {
        PercentileEvent {
            guid: Uuid::new_v4(),
            athlete_id: "a9".to_string(),
            session_id: session.to_string(),
            test_type: TestType::Hj,
            metric: Metric::HjReactiveStrengthIndex,
            recorded_at: at(day),
            raw_value: value,
            cohort: Some(Cohort::Youth),
            cohort_percentile: pct,
            aggregate_percentile: pct,
        }
    }

    async fn store() -> HistoryStore {
        HistoryStore::new(init_memory_database().await.unwrap(), RuntimeSettings::default())
    }

    #[tokio::test]
    async fn test_append_is_idempotent_per_session() {
        let store = store().await;
        let event = rsi_event("s1", 1, 1.5, Some(40));
        assert!(store.append(&event).await.unwrap());
        assert!(!store.append(&rsi_event("s1", 1, 1.5, Some(40))).await.unwrap());

        let all = store.all_for_metric("a9", Metric::HjReactiveStrengthIndex.into()).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_latest_n_and_all_for_metric_ordering() {
        let store = store().await;
        for (i, day) in [3u32, 1, 2].iter().enumerate() {
            store
                .append(&rsi_event(&format!("s{}", i), *day, f64::from(*day), Some(10 * *day as u8)))
                .await
                .unwrap();
        }
        let metric = HistoryMetric::Metric(Metric::HjReactiveStrengthIndex);

        let latest = store.latest_n("a9", metric, 2).await.unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].recorded_at, at(3));
        assert_eq!(latest[1].recorded_at, at(2));

        let all = store.all_for_metric("a9", metric).await.unwrap();
        let days: Vec<_> = all.iter().map(|e| e.recorded_at).collect();
        assert_eq!(days, vec![at(1), at(2), at(3)]);

        assert!(store.latest_n("a9", metric, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_trend_compares_two_most_recent() {
        let store = store().await;
        let metric = HistoryMetric::Metric(Metric::HjReactiveStrengthIndex);
        assert!(store.trend("a9", metric).await.unwrap().is_none());

        store.append(&rsi_event("s1", 1, 1.2, Some(30))).await.unwrap();
        let single = store.trend("a9", metric).await.unwrap().unwrap();
        assert!(single.previous.is_none());
        assert_eq!(single.delta, None);

        store.append(&rsi_event("s2", 4, 1.7, Some(55))).await.unwrap();
        let trend = store.trend("a9", metric).await.unwrap().unwrap();
        assert_eq!(trend.current.session_id.as_deref(), Some("s2"));
        assert_eq!(trend.delta, Some(25.0));
        assert!((trend.raw_delta.unwrap() - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_trend_without_percentile_has_no_delta() {
        let store = store().await;
        let metric = HistoryMetric::Metric(Metric::HjReactiveStrengthIndex);
        store.append(&rsi_event("s1", 1, 1.2, None)).await.unwrap();
        store.append(&rsi_event("s2", 2, 1.4, Some(50))).await.unwrap();

        let trend = store.trend("a9", metric).await.unwrap().unwrap();
        assert_eq!(trend.delta, None);
        assert!(trend.raw_delta.is_some());
    }

    #[tokio::test]
    async fn test_composite_stream() {
        let store = store().await;
        let composite = CompositeEvent {
            athlete_id: "a9".to_string(),
            cohort: Cohort::Youth,
            bucket: "2025-09-01".to_string(),
            recorded_at: at(1),
            cohort_percentile: 62.5,
            aggregate_percentile: None,
            components: Vec::new(),
        };
        events::upsert_composite(&store.db, &composite).await.unwrap();

        let all = store.all_for_metric("a9", HistoryMetric::Composite).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].metric, HistoryMetric::Composite);
        assert_eq!(all[0].cohort_percentile, Some(62.5));
        assert_eq!(all[0].raw_value, None);
    }
}
