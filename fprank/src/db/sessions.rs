//! Test session ledger
//!
//! Every session the engine receives is recorded once, keyed on its
//! session id, with a flag telling whether it carried the full metric set
//! of its test type. Admission ranks a session among the athlete's
//! qualifying sessions using this ledger.

use chrono::{DateTime, Utc};
use fprank_common::model::TestSession;
use fprank_common::time::to_db;
use fprank_common::{Cohort, Result, TestType};
use sqlx::{Pool, Sqlite};

/// Record a session; returns false when the session id was already present
pub async fn record_session(db: &Pool<Sqlite>, session: &TestSession, qualifying: bool) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT OR IGNORE INTO test_sessions (session_id, athlete_id, test_type, cohort, recorded_at, qualifying)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&session.session_id)
    .bind(&session.athlete_id)
    .bind(session.test_type.as_str())
    .bind(session.cohort.map(Cohort::as_str))
    .bind(to_db(session.recorded_at))
    .bind(qualifying)
    .execute(db)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// 1-based position of a session among the athlete's qualifying sessions
/// of one test type, ordered by time then session id.
pub async fn qualifying_ordinal(
    db: &Pool<Sqlite>,
    athlete_id: &str,
    test_type: TestType,
    recorded_at: DateTime<Utc>,
    session_id: &str,
) -> Result<i64> {
    let recorded_at = to_db(recorded_at);
    let ordinal = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM test_sessions
        WHERE athlete_id = ? AND test_type = ? AND qualifying = 1
          AND (recorded_at < ? OR (recorded_at = ? AND session_id <= ?))
        "#,
    )
    .bind(athlete_id)
    .bind(test_type.as_str())
    .bind(&recorded_at)
    .bind(&recorded_at)
    .bind(session_id)
    .fetch_one(db)
    .await?;

    Ok(ordinal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use fprank_common::db::init_memory_database;
    use fprank_common::model::RawMetrics;

    fn session(id: &str, day: u32) -> TestSession {
        TestSession {
            athlete_id: "a1".to_string(),
            test_type: TestType::Sj,
            cohort: Some(Cohort::College),
            recorded_at: Utc.with_ymd_and_hms(2025, 5, day, 12, 0, 0).unwrap(),
            session_id: id.to_string(),
            metrics: RawMetrics::new(),
        }
    }

    async fn ordinal_of(db: &Pool<Sqlite>, s: &TestSession) -> i64 {
        qualifying_ordinal(db, &s.athlete_id, s.test_type, s.recorded_at, &s.session_id)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_replay_is_ignored() {
        let db = init_memory_database().await.unwrap();
        let s = session("s1", 1);

        assert!(record_session(&db, &s, true).await.unwrap());
        assert!(!record_session(&db, &s, true).await.unwrap());
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM test_sessions")
            .fetch_one(&db)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_ordinal_counts_only_earlier_qualifying_sessions() {
        let db = init_memory_database().await.unwrap();
        let first = session("s1", 1);
        let partial = session("s2", 2);
        let second = session("s3", 3);

        record_session(&db, &first, true).await.unwrap();
        record_session(&db, &partial, false).await.unwrap();
        record_session(&db, &second, true).await.unwrap();

        assert_eq!(ordinal_of(&db, &first).await, 1);
        assert_eq!(ordinal_of(&db, &second).await, 2);

        // Same timestamp falls back to session id order
        let mut tie = session("s0", 3);
        tie.recorded_at = second.recorded_at;
        record_session(&db, &tie, true).await.unwrap();
        assert_eq!(ordinal_of(&db, &tie).await, 2);
        assert_eq!(ordinal_of(&db, &second).await, 3);

        let later = second.recorded_at + Duration::days(30);
        assert_eq!(
            qualifying_ordinal(&db, "a1", TestType::Hj, later, "zzz").await.unwrap(),
            0
        );
    }
}
