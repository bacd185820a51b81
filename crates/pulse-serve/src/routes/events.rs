//! Event intake endpoint.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;

use crate::error::ApiError;
use crate::state::AppState;

/// Accept one event.
///
/// The body is parsed from raw bytes, so a missing or different
/// `Content-Type` is not rejected. `202` means the event is queued, not yet
/// visible in `/metrics`.
pub async fn ingest_event(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, &'static str), ApiError> {
    state.intake.submit(&body)?;
    Ok((StatusCode::ACCEPTED, "Event processed"))
}
