//! Live metrics endpoint.

use axum::Json;
use axum::extract::State;
use chrono::Utc;
use pulse_core::MetricsSnapshot;

use crate::error::ApiError;
use crate::state::AppState;

/// Metrics over events in the last five minutes.
pub async fn live_metrics(State(state): State<AppState>) -> Result<Json<MetricsSnapshot>, ApiError> {
    let snapshot = state
        .store
        .metrics_snapshot(Utc::now())
        .map_err(ApiError::Metrics)?;

    Ok(Json(snapshot))
}
