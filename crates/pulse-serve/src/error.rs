//! API error types and response formatting.
//!
//! Errors are reported to clients as short plain-text bodies. Details are
//! logged server-side and never echoed back.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use pulse_ingest::IntakeError;

/// API error type that converts to appropriate HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request body is not a valid event.
    #[error("invalid event body: {0}")]
    InvalidEvent(#[source] pulse_core::Error),

    /// A valid event could not be queued.
    #[error("enqueue failed: {0}")]
    Enqueue(#[source] pulse_ingest::Error),

    /// The live metrics query failed.
    #[error("metrics query failed: {0}")]
    Metrics(#[source] pulse_ingest::Error),

    /// Reading the engagement view failed.
    #[error("engagement query failed: {0}")]
    Engagement(#[source] pulse_ingest::Error),
}

impl From<IntakeError> for ApiError {
    fn from(err: IntakeError) -> Self {
        match err {
            IntakeError::Validation(e) => Self::InvalidEvent(e),
            IntakeError::Enqueue(e) => Self::Enqueue(e),
        }
    }
}

impl ApiError {
    fn status_and_message(&self) -> (StatusCode, &'static str) {
        match self {
            Self::InvalidEvent(_) => (StatusCode::BAD_REQUEST, "Invalid JSON"),
            Self::Enqueue(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Failed to process event"),
            Self::Metrics(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Error querying metrics"),
            Self::Engagement(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Error querying engagement"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "rejected request");
        }

        (status, message).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_error() -> pulse_ingest::Error {
        pulse_ingest::Error::InvalidStreamKey(String::new())
    }

    #[test]
    fn test_validation_maps_to_bad_request() {
        let parse_err = serde_json::from_slice::<serde_json::Value>(b"{").unwrap_err();
        let err = ApiError::from(IntakeError::Validation(parse_err.into()));
        assert_eq!(err.status_and_message(), (StatusCode::BAD_REQUEST, "Invalid JSON"));
    }

    #[test]
    fn test_server_errors_hide_details() {
        let cases = [
            (ApiError::from(IntakeError::Enqueue(store_error())), "Failed to process event"),
            (ApiError::Metrics(store_error()), "Error querying metrics"),
            (ApiError::Engagement(store_error()), "Error querying engagement"),
        ];

        for (err, expected) in cases {
            assert_eq!(err.status_and_message().1, expected);

            let response = err.into_response();
            assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
            let content_type = response.headers().get("content-type").unwrap();
            assert!(content_type.to_str().unwrap().starts_with("text/plain"));
        }
    }
}
