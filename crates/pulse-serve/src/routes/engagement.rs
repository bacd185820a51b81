//! Engagement view endpoint.

use axum::Json;
use axum::extract::State;
use pulse_ingest::EngagementView;

use crate::error::ApiError;
use crate::state::AppState;

/// Per-user aggregates as of the last refresh.
///
/// `refreshed_at` is `null` until the view has been built once.
pub async fn user_engagement(
    State(state): State<AppState>,
) -> Result<Json<EngagementView>, ApiError> {
    let view = state.store.engagement().map_err(ApiError::Engagement)?;
    Ok(Json(view))
}
