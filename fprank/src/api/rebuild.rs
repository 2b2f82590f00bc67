//! Threshold rebuild trigger
//!
//! POST /api/rebuild runs a full rebuild and answers with the per-pair
//! report. Safe to repeat; a partial failure still answers 200 with
//! `status: "partial_failure"`.

use axum::{extract::State, routing::post, Json, Router};

use crate::services::RebuildReport;
use crate::AppState;

/// POST /api/rebuild
pub async fn rebuild_all(State(state): State<AppState>) -> Json<RebuildReport> {
    tracing::info!("Threshold rebuild requested over HTTP");
    Json(state.builder.rebuild_all().await)
}

pub fn rebuild_routes() -> Router<AppState> {
    Router::new().route("/api/rebuild", post(rebuild_all))
}
