//! API route definitions.

mod engagement;
mod events;
mod health;
mod metrics;

use axum::Router;
use axum::extract::Request;
use axum::http::{HeaderValue, Method, header};
use axum::routing::{get, get_service, post};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeFile;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::Level;

use crate::state::AppState;

const ALLOWED_METHODS: &str = "GET, POST, OPTIONS";
const ALLOWED_HEADERS: &str = "content-type";

/// Build the complete router.
///
/// # Route Structure
///
/// - `POST /event` - Accept one event into the ingestion stream
/// - `GET /metrics` - Live metrics over the last five minutes
/// - `GET /engagement` - Per-user engagement as of the last view refresh
/// - `GET /health` - Health check
/// - `GET /` - Static dashboard page
///
/// Every response carries the CORS headers for the configured origin. The CORS
/// layer only sends allowed methods and headers on preflight, so plain
/// responses get them from a fallback header layer. The CORS layer answers any
/// `OPTIONS` request itself with an empty 200, so it never reaches a handler.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(state.config.allowed_origin.clone())
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    let dashboard = ServeFile::new(&state.config.dashboard_path);

    Router::new()
        .route("/event", post(events::ingest_event))
        .route("/metrics", get(metrics::live_metrics))
        .route("/engagement", get(engagement::user_engagement))
        .route("/health", get(health::health_check))
        .route("/", get_service(dashboard))
        .with_state(state)
        .layer(SetResponseHeaderLayer::if_not_present(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOWED_METHODS),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(ALLOWED_HEADERS),
        ))
        .layer(cors)
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request| {
                tracing::span!(
                    Level::INFO,
                    "http_request",
                    method = %request.method(),
                    path = %request.uri().path(),
                )
            }),
        )
}
