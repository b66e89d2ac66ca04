//! Event types for the MEDIUP event system
//!
//! Provides shared event definitions and the EventBus used to move progress
//! notifications from the tracker to the publisher.

mod upload_types;

pub use upload_types::{
    CurrentFileProgress, FileStatus, OverallStatus, ProgressNotification, RemovalReason,
    UploadPhase,
};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// MEDIUP event types
///
/// Events are broadcast via EventBus and can be serialized for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum UploadEvent {
    /// Upload session allocated
    ///
    /// Triggers:
    /// - Logging only; no subscriber channel exists yet
    SessionCreated {
        session_id: String,
        category: String,
        expected_files: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Progress snapshot for one session
    ///
    /// Triggers:
    /// - Publisher: forward to `session:{id}` subscribers
    UploadProgress(ProgressNotification),

    /// Session removed from the registry (grace cleanup or sweep)
    ///
    /// Triggers:
    /// - Publisher: close the session channel so subscriber streams end
    SessionRemoved {
        session_id: String,
        reason: RemovalReason,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

/// Central event distribution bus
///
/// Wraps a tokio broadcast channel. Every subscriber sees every event emitted
/// after it subscribed, in emission order. Slow subscribers lag and lose the
/// oldest events rather than blocking emitters.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<UploadEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Examples
    ///
    /// ```
    /// use mediup_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(256);
    /// assert_eq!(event_bus.capacity(), 256);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<UploadEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: UploadEvent,
    ) -> Result<usize, broadcast::error::SendError<UploadEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    ///
    /// Progress notifications are fire-and-forget: with nobody listening they
    /// are simply dropped.
    pub fn emit_lossy(&self, event: UploadEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn notification(session_id: &str, progress: u8, status: OverallStatus) -> ProgressNotification {
        ProgressNotification {
            session_id: session_id.to_string(),
            timestamp: Utc::now(),
            overall_status: status,
            phase: UploadPhase::Receiving,
            total_progress: progress,
            completed_files: 0,
            failed_files: 0,
            total_files: 1,
            current_file: None,
            message: "Uploading".to_string(),
        }
    }

    #[test]
    fn test_notification_serializes_camel_case() {
        let mut n = notification("s-1", 42, OverallStatus::Uploading);
        n.current_file = Some(CurrentFileProgress {
            id: "f-1".to_string(),
            original_name: "clip.mp4".to_string(),
            progress: 84,
            status: FileStatus::Uploading,
            upload_speed: Some(2048),
            error: None,
        });

        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["sessionId"], "s-1");
        assert_eq!(json["overallStatus"], "uploading");
        assert_eq!(json["totalProgress"], 42);
        assert_eq!(json["currentFile"]["originalName"], "clip.mp4");
        assert_eq!(json["currentFile"]["uploadSpeed"], 2048);
        assert!(json["currentFile"].get("error").is_none());
    }

    #[test]
    fn test_upload_event_tagged_serialization() {
        let event = UploadEvent::UploadProgress(notification("s-2", 10, OverallStatus::Uploading));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "UploadProgress");
        assert_eq!(json["sessionId"], "s-2");
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(OverallStatus::Completed.is_terminal());
        assert!(OverallStatus::Partial.is_terminal());
        assert!(OverallStatus::Cancelled.is_terminal());
        assert!(!OverallStatus::Uploading.is_terminal());
        assert!(!OverallStatus::Pending.is_terminal());

        assert!(FileStatus::Failed.is_terminal());
        assert!(!FileStatus::Pending.is_terminal());
        assert!(!FileStatus::Uploading.is_terminal());
    }

    #[test]
    fn test_emit_without_subscribers_is_err() {
        let bus = EventBus::new(8);
        let result = bus.emit(UploadEvent::SessionRemoved {
            session_id: "gone".to_string(),
            reason: RemovalReason::Expired,
            timestamp: Utc::now(),
        });
        assert!(result.is_err());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscribers_receive_in_order() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        for progress in [0u8, 50, 100] {
            bus.emit_lossy(UploadEvent::UploadProgress(notification(
                "s-3",
                progress,
                OverallStatus::Uploading,
            )));
        }

        for expected in [0u8, 50, 100] {
            match rx.recv().await.unwrap() {
                UploadEvent::UploadProgress(n) => assert_eq!(n.total_progress, expected),
                other => panic!("unexpected event {:?}", other),
            }
        }
    }
}
