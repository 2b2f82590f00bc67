//! Per-athlete read endpoints: composite, history and trend
//!
//! The history and trend routes accept any catalog metric key or
//! `composite`.

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use fprank_common::db::{HistoryEntry, HistoryMetric};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::services::{CompositeOutcome, Trend};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CompositeParams {
    /// Defaults to now
    pub as_of: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    /// Most recent `limit` records, newest first. Without it the full
    /// history is returned oldest first.
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct CompositeResponse {
    pub athlete_id: String,
    pub as_of: DateTime<Utc>,
    pub composite: CompositeOutcome,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub athlete_id: String,
    pub metric: HistoryMetric,
    pub entries: Vec<HistoryEntry>,
}

#[derive(Debug, Serialize)]
pub struct TrendResponse {
    pub athlete_id: String,
    pub metric: HistoryMetric,
    /// Absent when the athlete has no history for the metric
    pub trend: Option<Trend>,
}

fn parse_metric(raw: &str) -> ApiResult<HistoryMetric> {
    raw.parse().map_err(|e: fprank_common::Error| ApiError::BadRequest(e.to_string()))
}

/// GET /api/athletes/:id/composite
pub async fn get_composite(
    State(state): State<AppState>,
    Path(athlete_id): Path<String>,
    Query(params): Query<CompositeParams>,
) -> ApiResult<Json<CompositeResponse>> {
    let as_of = params.as_of.unwrap_or_else(Utc::now);
    let composite = state.composite.compose_overall(&athlete_id, as_of).await?;

    Ok(Json(CompositeResponse {
        athlete_id,
        as_of,
        composite,
    }))
}

/// GET /api/athletes/:id/history/:metric
pub async fn get_history(
    State(state): State<AppState>,
    Path((athlete_id, metric)): Path<(String, String)>,
    Query(params): Query<HistoryParams>,
) -> ApiResult<Json<HistoryResponse>> {
    let metric = parse_metric(&metric)?;
    let entries = match params.limit {
        Some(n) => state.history.latest_n(&athlete_id, metric, n).await?,
        None => state.history.all_for_metric(&athlete_id, metric).await?,
    };

    Ok(Json(HistoryResponse {
        athlete_id,
        metric,
        entries,
    }))
}

/// GET /api/athletes/:id/trend/:metric
pub async fn get_trend(
    State(state): State<AppState>,
    Path((athlete_id, metric)): Path<(String, String)>,
) -> ApiResult<Json<TrendResponse>> {
    let metric = parse_metric(&metric)?;
    let trend = state.history.trend(&athlete_id, metric).await?;

    Ok(Json(TrendResponse {
        athlete_id,
        metric,
        trend,
    }))
}

pub fn athlete_routes() -> Router<AppState> {
    Router::new()
        .route("/api/athletes/:id/composite", get(get_composite))
        .route("/api/athletes/:id/history/:metric", get(get_history))
        .route("/api/athletes/:id/trend/:metric", get(get_trend))
}
