//! Minimum-interval emission gate
//!
//! Throttling rules:
//! - The first event through a fresh gate always passes
//! - Later events pass only once `interval` has elapsed since the last pass
//! - `force` lets a must-deliver event through and re-arms the gate
//!
//! Time comes from `tokio::time::Instant`, so paused-clock tests drive it.

use std::time::Duration;
use tokio::time::Instant;

/// Throttle gate with an explicit last-emission timestamp
#[derive(Debug, Clone)]
pub struct ThrottleGate {
    interval: Duration,
    last_emission: Option<Instant>,
}

impl ThrottleGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emission: None,
        }
    }

    /// Returns true and records `now` if an emission is allowed
    pub fn try_pass(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_emission {
            if now.saturating_duration_since(last) < self.interval {
                return false;
            }
        }
        self.last_emission = Some(now);
        true
    }

    /// Record an emission that bypassed the gate
    pub fn force(&mut self, now: Instant) {
        self.last_emission = Some(now);
    }

    /// Timestamp of the last emission, if any
    pub fn last_emission(&self) -> Option<Instant> {
        self.last_emission
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_first_emission_always_passes() {
        let mut gate = ThrottleGate::new(Duration::from_millis(100));
        assert!(gate.last_emission().is_none());
        assert!(gate.try_pass(Instant::now()));
        assert!(gate.last_emission().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_within_interval() {
        let mut gate = ThrottleGate::new(Duration::from_millis(100));
        assert!(gate.try_pass(Instant::now()));

        tokio::time::advance(Duration::from_millis(40)).await;
        assert!(!gate.try_pass(Instant::now()));

        tokio::time::advance(Duration::from_millis(60)).await;
        assert!(gate.try_pass(Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_attempt_does_not_rearm() {
        let mut gate = ThrottleGate::new(Duration::from_millis(100));
        assert!(gate.try_pass(Instant::now()));

        tokio::time::advance(Duration::from_millis(90)).await;
        assert!(!gate.try_pass(Instant::now()));

        // 100ms after the last *successful* pass, not the rejected one
        tokio::time::advance(Duration::from_millis(10)).await;
        assert!(gate.try_pass(Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_rearms_gate() {
        let mut gate = ThrottleGate::new(Duration::from_millis(100));
        gate.force(Instant::now());

        tokio::time::advance(Duration::from_millis(50)).await;
        assert!(!gate.try_pass(Instant::now()));
    }
}
