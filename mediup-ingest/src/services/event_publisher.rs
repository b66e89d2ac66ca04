//! Per-session event fan-out
//!
//! Subscribes once to the EventBus and forwards each progress notification to
//! the subscribers of that session's topic (`session:{id}`).
//!
//! **Delivery:** best effort. A topic with no subscribers drops the
//! notification; a slow subscriber lags and skips the oldest entries.
//! **Closing:** when a session leaves the registry its topic sender is
//! dropped, which ends every subscriber stream after the buffered
//! notifications have been read.

use mediup_common::events::{EventBus, ProgressNotification, UploadEvent};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Topic name for a session's notification channel
pub fn channel_name(session_id: &str) -> String {
    format!("session:{}", session_id)
}

/// Topic registry keyed by channel name
#[derive(Clone)]
pub struct EventPublisher {
    topics: Arc<Mutex<HashMap<String, broadcast::Sender<ProgressNotification>>>>,
    capacity: usize,
}

impl EventPublisher {
    /// `capacity` bounds each topic's buffer
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: Arc::new(Mutex::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, broadcast::Sender<ProgressNotification>>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Join a session's topic, creating it on first use
    pub fn subscribe(&self, session_id: &str) -> broadcast::Receiver<ProgressNotification> {
        let capacity = self.capacity;
        self.lock()
            .entry(channel_name(session_id))
            .or_insert_with(|| broadcast::channel(capacity).0)
            .subscribe()
    }

    /// Join a session's topic only if the session is still live
    ///
    /// `is_live` is checked after subscribing. A removal that lands between
    /// an earlier existence check and the subscribe would otherwise leave a
    /// topic nothing ever closes. On a dead session the topic is closed and
    /// None is returned.
    pub fn subscribe_live(
        &self,
        session_id: &str,
        is_live: impl FnOnce() -> bool,
    ) -> Option<broadcast::Receiver<ProgressNotification>> {
        let rx = self.subscribe(session_id);
        if is_live() {
            Some(rx)
        } else {
            self.close(session_id);
            None
        }
    }

    /// Forward one notification to its session's topic
    ///
    /// Returns the number of subscribers reached. Topics whose subscribers
    /// have all gone are dropped.
    pub fn publish(&self, notification: ProgressNotification) -> usize {
        let topic = channel_name(&notification.session_id);
        let mut topics = self.lock();
        let Some(tx) = topics.get(&topic) else {
            return 0;
        };
        match tx.send(notification) {
            Ok(count) => count,
            Err(_) => {
                topics.remove(&topic);
                debug!(topic = %topic, "Dropped topic with no subscribers");
                0
            }
        }
    }

    /// Close a session's topic; subscriber streams end once drained
    pub fn close(&self, session_id: &str) -> bool {
        self.lock().remove(&channel_name(session_id)).is_some()
    }

    pub fn subscriber_count(&self, session_id: &str) -> usize {
        self.lock()
            .get(&channel_name(session_id))
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    pub fn topic_count(&self) -> usize {
        self.lock().len()
    }

    /// Drop topics nobody listens to any more
    pub fn prune(&self) -> usize {
        let mut topics = self.lock();
        let before = topics.len();
        topics.retain(|_, tx| tx.receiver_count() > 0);
        before - topics.len()
    }

    /// Forward bus events until the bus closes
    pub async fn run(self, mut rx: broadcast::Receiver<UploadEvent>) {
        debug!("Event publisher started");

        loop {
            match rx.recv().await {
                Ok(UploadEvent::UploadProgress(notification)) => {
                    self.publish(notification);
                }
                Ok(UploadEvent::SessionRemoved { session_id, reason, .. }) => {
                    if self.close(&session_id) {
                        debug!(session_id = %session_id, ?reason, "Closed session topic");
                    }
                }
                Ok(UploadEvent::SessionCreated { .. }) => {
                    // No topic until someone subscribes
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        "Event publisher: Lagged {} events (increase event_channel_capacity)",
                        skipped
                    );
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event publisher: EventBus closed, shutting down");
                    break;
                }
            }
        }

        debug!("Event publisher stopped");
    }

    /// Subscribe to `event_bus` now and run the forwarding loop on a task
    pub fn spawn(&self, event_bus: &EventBus) -> JoinHandle<()> {
        let rx = event_bus.subscribe();
        tokio::spawn(self.clone().run(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mediup_common::events::{OverallStatus, RemovalReason, UploadPhase};
    use std::time::Duration;

    fn notification(session_id: &str, progress: u8) -> ProgressNotification {
        ProgressNotification {
            session_id: session_id.to_string(),
            timestamp: Utc::now(),
            overall_status: OverallStatus::Uploading,
            phase: UploadPhase::Receiving,
            total_progress: progress,
            completed_files: 0,
            failed_files: 0,
            total_files: 1,
            current_file: None,
            message: format!("{}%", progress),
        }
    }

    #[test]
    fn test_channel_name() {
        assert_eq!(channel_name("abc"), "session:abc");
    }

    #[tokio::test]
    async fn test_publish_reaches_only_matching_topic() {
        let publisher = EventPublisher::new(16);
        let mut a = publisher.subscribe("a");
        let mut b = publisher.subscribe("b");

        assert_eq!(publisher.publish(notification("a", 10)), 1);
        assert_eq!(a.recv().await.unwrap().total_progress, 10);
        assert!(b.try_recv().is_err());
    }

    #[test]
    fn test_publish_without_subscribers_is_dropped() {
        let publisher = EventPublisher::new(16);
        assert_eq!(publisher.publish(notification("nobody", 10)), 0);
        assert_eq!(publisher.topic_count(), 0);

        let rx = publisher.subscribe("gone");
        drop(rx);
        assert_eq!(publisher.publish(notification("gone", 10)), 0);
        assert_eq!(publisher.topic_count(), 0);
    }

    #[tokio::test]
    async fn test_close_ends_stream_after_buffered_items() {
        let publisher = EventPublisher::new(16);
        let mut rx = publisher.subscribe("s");
        publisher.publish(notification("s", 100));
        assert!(publisher.close("s"));

        assert_eq!(rx.recv().await.unwrap().total_progress, 100);
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_subscribe_live_leaves_no_topic_for_removed_session() {
        let publisher = EventPublisher::new(16);
        assert!(publisher.subscribe_live("gone", || false).is_none());
        assert_eq!(publisher.topic_count(), 0);

        // A client that joined before the removal is released too
        let mut early = publisher.subscribe("late");
        assert!(publisher.subscribe_live("late", || false).is_none());
        assert!(matches!(
            early.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));

        let mut rx = publisher.subscribe_live("live", || true).unwrap();
        publisher.publish(notification("live", 5));
        assert_eq!(rx.recv().await.unwrap().total_progress, 5);
    }

    #[test]
    fn test_prune_drops_abandoned_topics() {
        let publisher = EventPublisher::new(16);
        let _kept = publisher.subscribe("kept");
        drop(publisher.subscribe("abandoned"));

        assert_eq!(publisher.prune(), 1);
        assert_eq!(publisher.topic_count(), 1);
        assert_eq!(publisher.subscriber_count("kept"), 1);
    }

    #[tokio::test]
    async fn test_run_forwards_bus_events_in_order() {
        let bus = EventBus::new(16);
        let publisher = EventPublisher::new(16);
        let mut rx = publisher.subscribe("s");
        let task = publisher.spawn(&bus);

        for progress in [0, 40, 100] {
            bus.emit_lossy(UploadEvent::UploadProgress(notification("s", progress)));
        }
        bus.emit_lossy(UploadEvent::SessionRemoved {
            session_id: "s".to_string(),
            reason: RemovalReason::Finished,
            timestamp: Utc::now(),
        });

        let mut seen = Vec::new();
        while let Ok(Ok(n)) = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await {
            seen.push(n.total_progress);
        }
        assert_eq!(seen, vec![0, 40, 100]);
        assert_eq!(publisher.topic_count(), 0);

        task.abort();
    }
}
