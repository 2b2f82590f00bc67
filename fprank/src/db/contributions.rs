//! Contribution records
//!
//! At most one record per (athlete, test type) and per session; both are
//! enforced by UNIQUE constraints so a racing second writer is ignored.

use fprank_common::db::ContributionRecord;
use fprank_common::model::{RawMetrics, SessionMetrics, CATALOG};
use fprank_common::time::{from_db, to_db};
use fprank_common::{Cohort, Error, Result, TestType};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};
use uuid::Uuid;

use super::{metric_column_list, metric_placeholders};

/// Insert a contribution; returns false if one already existed for the
/// athlete and test type, or for the session
pub async fn insert_contribution(db: &Pool<Sqlite>, record: &ContributionRecord) -> Result<bool> {
    let sql = format!(
        "INSERT OR IGNORE INTO contribution_records (guid, athlete_id, test_type, cohort, session_id, recorded_at, {}) \
         VALUES (?, ?, ?, ?, ?, ?, {})",
        metric_column_list(),
        metric_placeholders()
    );

    let mut query = sqlx::query(&sql)
        .bind(record.guid.to_string())
        .bind(&record.athlete_id)
        .bind(record.test_type().as_str())
        .bind(record.cohort.as_str())
        .bind(&record.session_id)
        .bind(to_db(record.recorded_at));
    for def in CATALOG.iter() {
        query = query.bind(record.metrics.value(def.metric));
    }

    let result = query.execute(db).await?;
    Ok(result.rows_affected() == 1)
}

pub async fn find_by_session(db: &Pool<Sqlite>, session_id: &str) -> Result<Option<ContributionRecord>> {
    let sql = format!(
        "SELECT guid, athlete_id, test_type, cohort, session_id, recorded_at, {} FROM contribution_records WHERE session_id = ?",
        metric_column_list()
    );
    let row = sqlx::query(&sql).bind(session_id).fetch_optional(db).await?;
    row.map(|r| row_to_record(&r)).transpose()
}

pub async fn exists_for(db: &Pool<Sqlite>, athlete_id: &str, test_type: TestType) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM contribution_records WHERE athlete_id = ? AND test_type = ?)",
    )
    .bind(athlete_id)
    .bind(test_type.as_str())
    .fetch_one(db)
    .await?;
    Ok(exists)
}

pub async fn count_contributions(db: &Pool<Sqlite>, test_type: TestType) -> Result<i64> {
    let count = sqlx::query_scalar("SELECT COUNT(*) FROM contribution_records WHERE test_type = ?")
        .bind(test_type.as_str())
        .fetch_one(db)
        .await?;
    Ok(count)
}

fn row_to_record(row: &SqliteRow) -> Result<ContributionRecord> {
    let guid: String = row.try_get("guid")?;
    let test_type = row.try_get::<String, _>("test_type")?.parse::<TestType>()?;
    let cohort = row.try_get::<String, _>("cohort")?.parse::<Cohort>()?;
    let recorded_at = from_db(&row.try_get::<String, _>("recorded_at")?)?;

    let mut raw = RawMetrics::new();
    for def in test_type.metrics() {
        raw.insert(def.key.to_string(), row.try_get::<Option<f64>, _>(def.key)?);
    }
    let metrics = SessionMetrics::from_raw(test_type, &raw)
        .map_err(|e| Error::Internal(format!("Stored contribution is incomplete: {}", e)))?;

    Ok(ContributionRecord {
        guid: Uuid::parse_str(&guid).map_err(|e| Error::Internal(format!("Invalid contribution guid: {}", e)))?,
        athlete_id: row.try_get("athlete_id")?,
        cohort,
        session_id: row.try_get("session_id")?,
        recorded_at,
        metrics,
    })
}
