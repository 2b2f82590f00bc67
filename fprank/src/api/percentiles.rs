//! Percentile lookup endpoint

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use fprank_common::{Cohort, Metric};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::services::PercentileLookups;
use crate::AppState;

/// GET /api/percentiles query. Metric and cohort arrive as text so that an
/// unknown name is a 400 with a readable message.
#[derive(Debug, Deserialize)]
pub struct PercentileQueryParams {
    pub metric: String,
    pub value: f64,
    /// Omitted for an athlete without a cohort
    pub cohort: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PercentileResponse {
    pub metric: Metric,
    pub cohort: Option<Cohort>,
    pub value: f64,
    pub percentiles: PercentileLookups,
}

/// GET /api/percentiles?metric=..&cohort=..&value=..
pub async fn get_percentiles(
    State(state): State<AppState>,
    Query(params): Query<PercentileQueryParams>,
) -> ApiResult<Json<PercentileResponse>> {
    let metric: Metric = params
        .metric
        .parse()
        .map_err(|e: fprank_common::Error| ApiError::BadRequest(e.to_string()))?;
    let cohort = params
        .cohort
        .as_deref()
        .map(str::parse::<Cohort>)
        .transpose()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let percentiles = state.query.lookup_pair(params.value, metric, cohort).await?;

    Ok(Json(PercentileResponse {
        metric,
        cohort,
        value: params.value,
        percentiles,
    }))
}

pub fn percentile_routes() -> Router<AppState> {
    Router::new().route("/api/percentiles", get(get_percentiles))
}
