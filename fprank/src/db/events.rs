//! Percentile and composite event storage
//!
//! Percentile events are insert-only and unique per (session, metric).
//! Composite events are upserted per (athlete, cohort, date bucket); a
//! composite never overwrites one computed from later data.

use chrono::{DateTime, Utc};
use fprank_common::db::{CompositeEvent, HistoryEntry, HistoryMetric, PercentileEvent, TestTypeScore};
use fprank_common::time::{from_db, to_db};
use fprank_common::{Cohort, Error, Metric, Result, TestType};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};
use uuid::Uuid;

const EVENT_COLUMNS: &str = "guid, athlete_id, session_id, test_type, metric, recorded_at, raw_value, \
                             cohort, cohort_percentile, aggregate_percentile";

/// Append a percentile event; returns false if the session already has
/// an event for this metric
pub async fn insert_percentile_event(db: &Pool<Sqlite>, event: &PercentileEvent) -> Result<bool> {
    let sql = format!("INSERT OR IGNORE INTO percentile_events ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)", EVENT_COLUMNS);
    let result = sqlx::query(&sql)
        .bind(event.guid.to_string())
        .bind(&event.athlete_id)
        .bind(&event.session_id)
        .bind(event.test_type.as_str())
        .bind(event.metric.key())
        .bind(to_db(event.recorded_at))
        .bind(event.raw_value)
        .bind(event.cohort.map(Cohort::as_str))
        .bind(event.cohort_percentile.map(i64::from))
        .bind(event.aggregate_percentile.map(i64::from))
        .execute(db)
        .await?;

    Ok(result.rows_affected() == 1)
}

/// Events already stored for a session, in catalog priority order
pub async fn events_for_session(db: &Pool<Sqlite>, session_id: &str) -> Result<Vec<PercentileEvent>> {
    let sql = format!("SELECT {} FROM percentile_events WHERE session_id = ?", EVENT_COLUMNS);
    let rows = sqlx::query(&sql).bind(session_id).fetch_all(db).await?;

    let mut events = rows.iter().map(row_to_event).collect::<Result<Vec<_>>>()?;
    events.sort_by_key(|e| e.metric.definition().priority);
    Ok(events)
}

/// Every event of an athlete at or before `as_of`, newest first
pub async fn events_up_to(db: &Pool<Sqlite>, athlete_id: &str, as_of: DateTime<Utc>) -> Result<Vec<PercentileEvent>> {
    let sql = format!(
        "SELECT {} FROM percentile_events WHERE athlete_id = ? AND recorded_at <= ? \
         ORDER BY recorded_at DESC, session_id DESC",
        EVENT_COLUMNS
    );
    let rows = sqlx::query(&sql).bind(athlete_id).bind(to_db(as_of)).fetch_all(db).await?;
    rows.iter().map(row_to_event).collect()
}

/// Distinct event timestamps of an athlete, oldest first
pub async fn event_timestamps(db: &Pool<Sqlite>, athlete_id: &str) -> Result<Vec<DateTime<Utc>>> {
    let stamps: Vec<String> = sqlx::query_scalar(
        "SELECT DISTINCT recorded_at FROM percentile_events WHERE athlete_id = ? ORDER BY recorded_at",
    )
    .bind(athlete_id)
    .fetch_all(db)
    .await?;
    stamps.iter().map(|s| from_db(s)).collect()
}

/// History of one metric. `newest_first` with an optional `limit`.
pub async fn metric_history(
    db: &Pool<Sqlite>,
    athlete_id: &str,
    metric: Metric,
    newest_first: bool,
    limit: Option<i64>,
) -> Result<Vec<HistoryEntry>> {
    let order = if newest_first { "DESC" } else { "ASC" };
    let sql = format!(
        "SELECT {} FROM percentile_events WHERE athlete_id = ? AND metric = ? \
         ORDER BY recorded_at {order}, rowid {order} LIMIT ?",
        EVENT_COLUMNS,
        order = order
    );
    let rows = sqlx::query(&sql)
        .bind(athlete_id)
        .bind(metric.key())
        .bind(limit.unwrap_or(-1))
        .fetch_all(db)
        .await?;

    rows.iter()
        .map(|row| {
            let event = row_to_event(row)?;
            Ok(HistoryEntry {
                metric: HistoryMetric::Metric(event.metric),
                recorded_at: event.recorded_at,
                session_id: Some(event.session_id),
                raw_value: Some(event.raw_value),
                cohort: event.cohort,
                cohort_percentile: event.cohort_percentile.map(f64::from),
                aggregate_percentile: event.aggregate_percentile.map(f64::from),
            })
        })
        .collect()
}

/// Insert or refresh the composite for the event's bucket.
///
/// Returns false when the stored composite was computed from later data
/// and was left untouched.
pub async fn upsert_composite(db: &Pool<Sqlite>, event: &CompositeEvent) -> Result<bool> {
    let components = serde_json::to_string(&event.components)
        .map_err(|e| Error::Internal(format!("Serialize composite components failed: {}", e)))?;

    let result = sqlx::query(
        r#"
        INSERT INTO composite_events (
            guid, athlete_id, cohort, bucket, recorded_at,
            cohort_percentile, aggregate_percentile, components
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(athlete_id, cohort, bucket) DO UPDATE SET
            recorded_at = excluded.recorded_at,
            cohort_percentile = excluded.cohort_percentile,
            aggregate_percentile = excluded.aggregate_percentile,
            components = excluded.components,
            updated_at = CURRENT_TIMESTAMP
        WHERE excluded.recorded_at >= composite_events.recorded_at
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&event.athlete_id)
    .bind(event.cohort.as_str())
    .bind(&event.bucket)
    .bind(to_db(event.recorded_at))
    .bind(event.cohort_percentile)
    .bind(event.aggregate_percentile)
    .bind(components)
    .execute(db)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Stored composites of an athlete across all cohorts
pub async fn composite_history(
    db: &Pool<Sqlite>,
    athlete_id: &str,
    newest_first: bool,
    limit: Option<i64>,
) -> Result<Vec<CompositeEvent>> {
    let order = if newest_first { "DESC" } else { "ASC" };
    let sql = format!(
        "SELECT athlete_id, cohort, bucket, recorded_at, cohort_percentile, aggregate_percentile, components \
         FROM composite_events WHERE athlete_id = ? ORDER BY recorded_at {order}, bucket {order} LIMIT ?",
        order = order
    );
    let rows = sqlx::query(&sql)
        .bind(athlete_id)
        .bind(limit.unwrap_or(-1))
        .fetch_all(db)
        .await?;

    rows.iter().map(row_to_composite).collect()
}

fn row_to_event(row: &SqliteRow) -> Result<PercentileEvent> {
    let guid: String = row.try_get("guid")?;
    let cohort: Option<String> = row.try_get("cohort")?;

    Ok(PercentileEvent {
        guid: Uuid::parse_str(&guid).map_err(|e| Error::Internal(format!("Invalid event guid: {}", e)))?,
        athlete_id: row.try_get("athlete_id")?,
        session_id: row.try_get("session_id")?,
        test_type: row.try_get::<String, _>("test_type")?.parse::<TestType>()?,
        metric: row.try_get::<String, _>("metric")?.parse::<Metric>()?,
        recorded_at: from_db(&row.try_get::<String, _>("recorded_at")?)?,
        raw_value: row.try_get("raw_value")?,
        cohort: cohort.map(|c| c.parse::<Cohort>()).transpose()?,
        cohort_percentile: percentile_column(row, "cohort_percentile")?,
        aggregate_percentile: percentile_column(row, "aggregate_percentile")?,
    })
}

fn percentile_column(row: &SqliteRow, column: &str) -> Result<Option<u8>> {
    let value: Option<i64> = row.try_get(column)?;
    value
        .map(|v| u8::try_from(v).map_err(|_| Error::Internal(format!("{} out of range: {}", column, v))))
        .transpose()
}

fn row_to_composite(row: &SqliteRow) -> Result<CompositeEvent> {
    let components: String = row.try_get("components")?;
    let components: Vec<TestTypeScore> = serde_json::from_str(&components)
        .map_err(|e| Error::Internal(format!("Parse composite components failed: {}", e)))?;

    Ok(CompositeEvent {
        athlete_id: row.try_get("athlete_id")?,
        cohort: row.try_get::<String, _>("cohort")?.parse::<Cohort>()?,
        bucket: row.try_get("bucket")?,
        recorded_at: from_db(&row.try_get::<String, _>("recorded_at")?)?,
        cohort_percentile: row.try_get("cohort_percentile")?,
        aggregate_percentile: row.try_get("aggregate_percentile")?,
        components,
    })
}
