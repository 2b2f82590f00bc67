//! Runtime settings
//!
//! Tuning values stored in the database `settings` table. Defaults are
//! ensured at database initialization, so a missing key here only happens
//! against a database that was not initialized by this crate.

use fprank_common::time::CompositeBucket;
use fprank_common::Result;
use sqlx::{Pool, Sqlite};

use crate::db::settings::get_setting;

pub const DEFAULT_ATHLETE_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_MAX_LOCK_WAIT_MS: u64 = 5_000;

/// Settings read once at startup and handed to each service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeSettings {
    /// Time budget for one athlete's sessions in a batch
    pub athlete_timeout_ms: u64,
    /// Total retry budget for SQLite lock contention
    pub max_lock_wait_ms: u64,
    /// Granularity at which composite scores overwrite each other
    pub composite_bucket: CompositeBucket,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            athlete_timeout_ms: DEFAULT_ATHLETE_TIMEOUT_MS,
            max_lock_wait_ms: DEFAULT_MAX_LOCK_WAIT_MS,
            composite_bucket: CompositeBucket::default(),
        }
    }
}

impl RuntimeSettings {
    pub async fn load(db: &Pool<Sqlite>) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            athlete_timeout_ms: get_setting(db, "athlete_timeout_ms")
                .await?
                .unwrap_or(defaults.athlete_timeout_ms),
            max_lock_wait_ms: get_setting(db, "max_lock_wait_ms")
                .await?
                .unwrap_or(defaults.max_lock_wait_ms),
            composite_bucket: get_setting(db, "composite_bucket")
                .await?
                .unwrap_or(defaults.composite_bucket),
        })
    }
}
