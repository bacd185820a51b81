//! Pulse Serve - HTTP edge of the event pipeline.
//!
//! Accepts user interaction events over HTTP, hands them to the durable
//! queue, and answers live metrics queries from the event store.
//!
//! # Architecture
//!
//! - **AppState**: Intake service, event store handle, configuration
//! - **Routes**: One handler module per endpoint
//! - **ApiError**: Maps failures to plain-text status responses
//!
//! The binary also owns the background tasks (stream processor, view
//! refresher) and shuts them down together with the server.

mod error;
mod routes;
mod state;

pub use self::error::ApiError;
pub use self::routes::router;
pub use self::state::{AppState, Config};
