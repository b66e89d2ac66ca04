//! Server-Sent Events for upload progress
//!
//! One stream per session. Each progress notification is sent as an
//! `upload-progress` event; the stream ends when the session leaves the
//! registry and its topic is closed.

use crate::{ApiError, ApiResult, AppState};
use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// GET /upload/events/:session_id - SSE stream for one session
///
/// Streams events:
/// - connected (once, on subscribe)
/// - upload-progress (every forwarded notification)
pub async fn upload_event_stream(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let registry = state.tracker.registry();
    let Some(mut rx) = state
        .publisher
        .subscribe_live(&session_id, || registry.contains(&session_id))
    else {
        return Err(ApiError::NotFound(format!("Upload session {}", session_id)));
    };
    info!(session_id = %session_id, "SSE client subscribed to upload progress");

    let stream = async_stream::stream! {
        yield Ok(Event::default()
            .event("connected")
            .data(json!({ "sessionId": session_id }).to_string()));

        loop {
            match rx.recv().await {
                Ok(notification) => match serde_json::to_string(&notification) {
                    Ok(data) => {
                        debug!(
                            session_id = %session_id,
                            progress = notification.total_progress,
                            "SSE: Forwarding upload progress"
                        );
                        yield Ok(Event::default().event("upload-progress").data(data));
                    }
                    Err(e) => {
                        warn!("SSE: Failed to serialize upload progress: {}", e);
                    }
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(session_id = %session_id, "SSE: Client lagged {} notifications", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!(session_id = %session_id, "SSE: Session channel closed");
                    break;
                }
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    ))
}
