//! fprank library - force-plate percentile and composite engine
//!
//! Ranks force-plate test metrics against a pooled sample set through
//! precomputed, versioned threshold tables, and averages the ranks into
//! per-test-type and overall composite scores.

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod services;
pub mod utils;

pub use config::RuntimeSettings;
pub use error::{ApiError, ApiResult};

use services::{
    CompositeAggregator, ContributionPool, HistoryStore, LookupBuilder, PercentileQuery, SessionIngestor,
};

/// Application state shared across HTTP handlers and CLI commands
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub settings: RuntimeSettings,
    pub builder: LookupBuilder,
    pub ingestor: SessionIngestor,
    pub query: PercentileQuery,
    pub composite: CompositeAggregator,
    pub history: HistoryStore,
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    /// Wire every service over one pool
    pub fn new(db: SqlitePool, settings: RuntimeSettings) -> Self {
        let query = PercentileQuery::new(db.clone());
        let composite = CompositeAggregator::new(db.clone(), settings);
        let history = HistoryStore::new(db.clone(), settings);
        let ingestor = SessionIngestor::new(
            ContributionPool::new(db.clone(), settings),
            query.clone(),
            composite.clone(),
            history.clone(),
            settings,
        );

        Self {
            builder: LookupBuilder::new(db.clone(), settings),
            db,
            settings,
            ingestor,
            query,
            composite,
            history,
            startup_time: Utc::now(),
        }
    }

    /// Load runtime settings from the database, then wire the services
    pub async fn load(db: SqlitePool) -> fprank_common::Result<Self> {
        let settings = RuntimeSettings::load(&db).await?;
        Ok(Self::new(db, settings))
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::rebuild_routes())
        .merge(api::session_routes())
        .merge(api::percentile_routes())
        .merge(api::athlete_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
