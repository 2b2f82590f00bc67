//! Session ingestion endpoints
//!
//! POST /api/sessions ingests one session. POST /api/sessions/batch takes
//! `{"sessions": [...]}` and always answers with a batch report; failed
//! athletes are listed in it rather than failing the request.

use axum::{extract::State, routing::post, Json, Router};
use fprank_common::model::TestSession;
use serde::Deserialize;

use crate::error::ApiResult;
use crate::services::{BatchReport, SessionOutcome};
use crate::AppState;

/// POST /api/sessions/batch request
#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub sessions: Vec<TestSession>,
}

/// POST /api/sessions
pub async fn ingest_session(
    State(state): State<AppState>,
    Json(session): Json<TestSession>,
) -> ApiResult<Json<SessionOutcome>> {
    let outcome = state.ingestor.ingest_session(&session).await?;
    Ok(Json(outcome))
}

/// POST /api/sessions/batch
pub async fn ingest_batch(State(state): State<AppState>, Json(request): Json<BatchRequest>) -> Json<BatchReport> {
    Json(state.ingestor.ingest_batch(request.sessions).await)
}

pub fn session_routes() -> Router<AppState> {
    Router::new()
        .route("/api/sessions", post(ingest_session))
        .route("/api/sessions/batch", post(ingest_batch))
}
