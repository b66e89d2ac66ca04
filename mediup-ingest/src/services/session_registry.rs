//! Session registry
//!
//! Process-wide map from session id to upload session state. Every mutation
//! happens under one lock and the lock is never held across an await, so
//! concurrent request handlers and background tasks observe each session
//! atomically.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info};

use crate::models::UploadSession;

/// Shared, cloneable handle to the session map
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<String, UploadSession>>>,
    throttle: Duration,
}

impl SessionRegistry {
    /// Registry whose freshly created sessions throttle at `throttle`
    pub fn new(throttle: Duration) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            throttle,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, UploadSession>> {
        // A panicking holder cannot leave a session half-written in a way
        // later callers can't tolerate, so keep serving.
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate a PENDING session with a fresh identifier
    pub fn create(&self, total_files: usize, total_size: u64) -> String {
        let session_id = mediup_common::uuid_utils::generate_id();
        let session = UploadSession::new(session_id.clone(), total_files, total_size, self.throttle);
        self.lock().insert(session_id.clone(), session);
        debug!(session_id = %session_id, total_files, total_size, "Session created");
        session_id
    }

    /// Clone of the current session state
    pub fn get(&self, session_id: &str) -> Option<UploadSession> {
        self.lock().get(session_id).cloned()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.lock().contains_key(session_id)
    }

    /// Read a session under the lock
    pub fn with_session<R>(&self, session_id: &str, f: impl FnOnce(&UploadSession) -> R) -> Option<R> {
        self.lock().get(session_id).map(f)
    }

    /// Mutate a session under the lock
    ///
    /// Returns None when the session does not exist.
    pub fn with_session_mut<R>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut UploadSession) -> R,
    ) -> Option<R> {
        self.lock().get_mut(session_id).map(f)
    }

    /// Run `f` with exclusive access to the whole map
    pub(crate) fn with_map<R>(&self, f: impl FnOnce(&mut HashMap<String, UploadSession>) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn remove(&self, session_id: &str) -> Option<UploadSession> {
        self.lock().remove(session_id)
    }

    /// Remove only if `predicate` holds for the current state
    pub fn remove_if(
        &self,
        session_id: &str,
        predicate: impl FnOnce(&UploadSession) -> bool,
    ) -> Option<UploadSession> {
        let mut sessions = self.lock();
        match sessions.get(session_id) {
            Some(session) if predicate(session) => sessions.remove(session_id),
            _ => None,
        }
    }

    /// Drop sessions started more than `max_age` ago
    pub fn sweep(&self, max_age: Duration) -> Vec<String> {
        self.sweep_at(Utc::now(), max_age)
    }

    /// Drop sessions whose start is strictly older than `now - max_age`
    pub fn sweep_at(&self, now: DateTime<Utc>, max_age: Duration) -> Vec<String> {
        let Ok(max_age) = chrono::Duration::from_std(max_age) else {
            return Vec::new();
        };
        let cutoff = now - max_age;

        let mut sessions = self.lock();
        let expired: Vec<String> = sessions
            .values()
            .filter(|s| s.started_at < cutoff)
            .map(|s| s.session_id.clone())
            .collect();
        for session_id in &expired {
            sessions.remove(session_id);
        }
        drop(sessions);

        if !expired.is_empty() {
            info!(count = expired.len(), "Swept stale upload sessions");
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediup_common::events::OverallStatus;

    fn registry() -> SessionRegistry {
        SessionRegistry::new(Duration::from_millis(100))
    }

    #[test]
    fn test_create_assigns_unique_pending_sessions() {
        let registry = registry();
        let a = registry.create(2, 200);
        let b = registry.create(1, 50);
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);

        let session = registry.get(&a).unwrap();
        assert_eq!(session.overall_status, OverallStatus::Pending);
        assert_eq!(session.total_files, 2);
        assert_eq!(session.total_size, 200);
    }

    #[test]
    fn test_remove_if_respects_predicate() {
        let registry = registry();
        let id = registry.create(1, 10);

        assert!(registry.remove_if(&id, |s| s.is_terminal()).is_none());
        assert!(registry.contains(&id));

        registry.with_session_mut(&id, |s| s.finish(OverallStatus::Completed));
        assert!(registry.remove_if(&id, |s| s.is_terminal()).is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_with_session_mut_on_unknown_id() {
        let registry = registry();
        assert!(registry.with_session_mut("missing", |s| s.uploaded_files += 1).is_none());
    }

    #[test]
    fn test_sweep_removes_only_stale_sessions() {
        let registry = registry();
        let stale = registry.create(1, 10);
        let fresh = registry.create(1, 10);
        registry.with_session_mut(&stale, |s| {
            s.started_at = Utc::now() - chrono::Duration::minutes(31);
        });

        let removed = registry.sweep(Duration::from_secs(30 * 60));
        assert_eq!(removed, vec![stale.clone()]);
        assert!(!registry.contains(&stale));
        assert!(registry.contains(&fresh));
    }

    #[test]
    fn test_sweep_at_boundary_is_exclusive() {
        let registry = registry();
        let id = registry.create(1, 10);
        let started = registry.get(&id).unwrap().started_at;
        let max_age = Duration::from_secs(60);

        let at_boundary = started + chrono::Duration::seconds(60);
        assert!(registry.sweep_at(at_boundary, max_age).is_empty());

        let past_boundary = at_boundary + chrono::Duration::milliseconds(1);
        assert_eq!(registry.sweep_at(past_boundary, max_age), vec![id]);
    }
}
