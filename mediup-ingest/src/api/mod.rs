//! HTTP API handlers for mediup-ingest
//!
//! REST endpoints for session management plus one SSE stream per session.

pub mod health;
pub mod sse;
pub mod upload;

pub use health::health_routes;
pub use sse::upload_event_stream;
pub use upload::upload_routes;
