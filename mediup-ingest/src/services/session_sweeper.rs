//! Periodic stale-session sweep
//!
//! Backstop for sessions whose delayed cleanup never ran (client vanished
//! mid-upload, handler aborted). Runs on a fixed interval and evicts every
//! session older than the configured horizon, whatever its status.

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::services::{EventPublisher, ProgressTracker};

/// Start the sweep loop; the first sweep runs one `interval` after start
pub fn spawn_sweeper(
    tracker: ProgressTracker,
    publisher: EventPublisher,
    interval: Duration,
    max_age: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let removed = tracker.sweep_stale(max_age);
            let pruned = publisher.prune();
            debug!(
                removed = removed.len(),
                pruned_topics = pruned,
                remaining = tracker.registry().len(),
                "Session sweep finished"
            );
        }
    })
}
