//! Contribution Pool Manager
//!
//! Decides whether a synced session is admitted into the shared sample
//! pool. An athlete contributes to a test type exactly once, with their
//! second qualifying session of that type: never the first (a practice
//! run) and never the third or later (one athlete must not dominate the
//! pool).
//!
//! A session qualifies when it carries every metric its test type
//! requires. Qualifying sessions are ranked by recorded time, then by
//! session id.

use fprank_common::db::ContributionRecord;
use fprank_common::model::TestSession;
use fprank_common::Result;
use serde::Serialize;
use sqlx::{Pool, Sqlite};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::RuntimeSettings;
use crate::db::{contributions, sessions};
use crate::utils::retry_on_lock;

/// Why a session was not admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// A metric required by the test type is absent, null or non-finite
    IncompleteMetrics,
    /// The athlete already contributed this test type
    AlreadyContributed,
    /// This is the athlete's first qualifying session of the test type
    NotYetSecondSession,
    /// The second qualifying session was passed over without contributing
    PastSecondSession,
    /// The athlete has no cohort to file the sample under
    MissingCohort,
}

/// Admission decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum Admission {
    Admitted,
    Skipped(SkipReason),
}

/// Contribution Pool Manager
#[derive(Clone)]
pub struct ContributionPool {
    db: Pool<Sqlite>,
    settings: RuntimeSettings,
}

impl ContributionPool {
    pub fn new(db: Pool<Sqlite>, settings: RuntimeSettings) -> Self {
        Self { db, settings }
    }

    /// Record the session and admit it if it is the athlete's second
    /// qualifying session of its test type.
    ///
    /// Replaying a session is harmless: the ledger and the contribution
    /// table are keyed on the session id, and a replayed admitted session
    /// reports `Admitted` again without writing.
    pub async fn consider_contribution(&self, session: &TestSession) -> Result<Admission> {
        session.validate()?;
        let wait = self.settings.max_lock_wait_ms;

        let complete = session.complete_metrics();
        retry_on_lock("record session", wait, || {
            sessions::record_session(&self.db, session, complete.is_ok())
        })
        .await?;

        if contributions::find_by_session(&self.db, &session.session_id).await?.is_some() {
            debug!(session_id = %session.session_id, "Session already admitted, replay ignored");
            return Ok(Admission::Admitted);
        }

        let metrics = match complete {
            Ok(metrics) => metrics,
            Err(incomplete) => {
                debug!(
                    athlete_id = %session.athlete_id,
                    session_id = %session.session_id,
                    missing = ?incomplete.missing,
                    "Session does not qualify"
                );
                return Ok(Admission::Skipped(SkipReason::IncompleteMetrics));
            }
        };

        let Some(cohort) = session.cohort else {
            return Ok(Admission::Skipped(SkipReason::MissingCohort));
        };

        if contributions::exists_for(&self.db, &session.athlete_id, session.test_type).await? {
            return Ok(Admission::Skipped(SkipReason::AlreadyContributed));
        }

        let ordinal = sessions::qualifying_ordinal(
            &self.db,
            &session.athlete_id,
            session.test_type,
            session.recorded_at,
            &session.session_id,
        )
        .await?;

        match ordinal {
            n if n < 2 => return Ok(Admission::Skipped(SkipReason::NotYetSecondSession)),
            2 => {}
            _ => return Ok(Admission::Skipped(SkipReason::PastSecondSession)),
        }

        let record = ContributionRecord {
            guid: Uuid::new_v4(),
            athlete_id: session.athlete_id.clone(),
            cohort,
            session_id: session.session_id.clone(),
            recorded_at: session.recorded_at,
            metrics,
        };

        let inserted = retry_on_lock("insert contribution", wait, || {
            contributions::insert_contribution(&self.db, &record)
        })
        .await?;

        if !inserted {
            // Lost a race with a concurrent admission for the same athlete
            return Ok(Admission::Skipped(SkipReason::AlreadyContributed));
        }

        info!(
            athlete_id = %session.athlete_id,
            test_type = %session.test_type,
            cohort = %cohort,
            session_id = %session.session_id,
            "Session admitted to contribution pool"
        );

        Ok(Admission::Admitted)
    }
}
