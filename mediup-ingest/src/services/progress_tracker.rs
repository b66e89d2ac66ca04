//! Progress tracker
//!
//! State-transition engine for upload sessions. Consumes byte counts and file
//! lifecycle events, keeps aggregate progress by delta accumulation, and
//! emits `UploadEvent::UploadProgress` onto the EventBus.
//!
//! **Ordering:** every notification is emitted while the registry lock is
//! held, so notifications for one session leave in the order their state
//! changes were applied.
//!
//! **Throttling:** byte-level updates pass through the session's
//! `ThrottleGate`; lifecycle notifications (start, file completed, failed,
//! cancelled, terminal) are never throttled.

use chrono::{DateTime, Utc};
use mediup_common::config::UploadConfig;
use mediup_common::events::{
    CurrentFileProgress, EventBus, FileStatus, OverallStatus, ProgressNotification,
    RemovalReason, UploadEvent, UploadPhase,
};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::models::{percent, FileDescriptor, FileTransfer, ProgressSnapshot, UploadSession};
use crate::services::SessionRegistry;

/// Timing knobs for the tracker
#[derive(Debug, Clone)]
pub struct TrackerSettings {
    /// Minimum interval between byte-level notifications per session
    pub throttle: Duration,
    /// Grace period before a completed or partial session is removed
    pub completion_cleanup_delay: Duration,
    /// Grace period before a cancelled session is removed
    pub cancel_cleanup_delay: Duration,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            throttle: Duration::from_millis(100),
            completion_cleanup_delay: Duration::from_secs(5),
            cancel_cleanup_delay: Duration::from_secs(2),
        }
    }
}

impl From<&UploadConfig> for TrackerSettings {
    fn from(config: &UploadConfig) -> Self {
        Self {
            throttle: config.progress_throttle(),
            completion_cleanup_delay: config.completion_cleanup_delay(),
            cancel_cleanup_delay: config.cancel_cleanup_delay(),
        }
    }
}

/// Upload progress state machine
#[derive(Clone)]
pub struct ProgressTracker {
    registry: SessionRegistry,
    event_bus: EventBus,
    settings: TrackerSettings,
}

impl ProgressTracker {
    pub fn new(registry: SessionRegistry, event_bus: EventBus, settings: TrackerSettings) -> Self {
        Self {
            registry,
            event_bus,
            settings,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn settings(&self) -> &TrackerSettings {
        &self.settings
    }

    /// Begin tracking `session_id`, creating it if absent
    ///
    /// An existing, non-terminal session has its totals and file list reset.
    /// A terminal session is left untouched and false is returned.
    pub fn start_tracking(&self, session_id: &str, total_files: usize, total_size: u64) -> bool {
        let throttle = self.settings.throttle;
        let started = self.registry.with_map(|sessions| {
            let session = sessions.entry(session_id.to_string()).or_insert_with(|| {
                UploadSession::new(session_id, total_files, total_size, throttle)
            });
            if session.is_terminal() {
                return false;
            }

            session.total_files = total_files;
            session.total_size = total_size;
            session.uploaded_files = 0;
            session.uploaded_size = 0;
            session.files.clear();
            session.overall_status = OverallStatus::Pending;
            session.phase = UploadPhase::Receiving;
            session.started_at = Utc::now();
            session.clock_start = Instant::now();
            session.progress_gate = crate::utils::ThrottleGate::new(throttle);

            self.emit(session, 0, None, "Starting upload...".to_string());
            true
        });

        if started {
            debug!(session_id = %session_id, total_files, total_size, "Started upload progress tracking");
        } else {
            warn!(session_id = %session_id, "Refusing to restart tracking of a finished session");
        }
        started
    }

    /// Reserve a PENDING session for its single batch of files
    ///
    /// Returns None for an unknown session and `Some(false)` when a batch was
    /// already accepted or the session has left PENDING.
    pub fn claim_upload(&self, session_id: &str) -> Option<bool> {
        self.registry.with_session_mut(session_id, |session| {
            if session.upload_claimed || session.overall_status != OverallStatus::Pending {
                return false;
            }
            session.upload_claimed = true;
            true
        })
    }

    /// Add a file in PENDING status
    ///
    /// The file's speed clock starts on its first progress update.
    pub fn register_file(&self, session_id: &str, file: &FileDescriptor) -> bool {
        self.add_file(session_id, file, FileStatus::Pending)
    }

    /// Add a file already in UPLOADING status
    ///
    /// A file that was registered earlier is promoted instead of duplicated.
    pub fn start_file(&self, session_id: &str, file: &FileDescriptor) -> bool {
        self.add_file(session_id, file, FileStatus::Uploading)
    }

    fn add_file(&self, session_id: &str, file: &FileDescriptor, status: FileStatus) -> bool {
        let added = self.registry.with_session_mut(session_id, |session| {
            if session.is_terminal() {
                return false;
            }
            if let Some(index) = session.file_index(&file.id) {
                if status == FileStatus::Uploading {
                    session.files[index].mark_uploading();
                    session.overall_status = OverallStatus::Uploading;
                }
                return true;
            }
            if session.files.len() >= session.total_files {
                return false;
            }
            session.files.push(FileTransfer::new(file, status));
            if status == FileStatus::Uploading {
                session.overall_status = OverallStatus::Uploading;
            }
            true
        });

        match added {
            Some(true) => {
                debug!(
                    session_id = %session_id,
                    file_id = %file.id,
                    file_name = %file.original_name,
                    file_size = file.size,
                    ?status,
                    "Tracking file"
                );
                true
            }
            Some(false) => {
                warn!(session_id = %session_id, file_id = %file.id, "Cannot add file to session");
                false
            }
            None => {
                error!(session_id = %session_id, "Upload tracking not found for session");
                false
            }
        }
    }

    /// Record that `uploaded_bytes` of a file have arrived
    ///
    /// `total_bytes` is the denominator for the file percentage. The session
    /// aggregate moves by the difference from the file's previous count.
    /// Returns true if a notification was emitted.
    pub fn update_file_progress(
        &self,
        session_id: &str,
        file_id: &str,
        uploaded_bytes: u64,
        total_bytes: u64,
    ) -> bool {
        self.registry
            .with_session_mut(session_id, |session| {
                if session.is_terminal() {
                    return false;
                }
                let Some(index) = session.file_index(file_id) else {
                    return false;
                };

                let file = &mut session.files[index];
                if file.status.is_terminal() {
                    return false;
                }
                file.mark_uploading();

                let uploaded = uploaded_bytes.min(file.declared_size);
                let previous = file.uploaded_size;
                if uploaded < previous {
                    warn!(
                        session_id = %session_id,
                        file_id = %file_id,
                        previous,
                        uploaded,
                        "File byte count decreased; applying correction"
                    );
                }
                file.uploaded_size = uploaded;
                session.uploaded_size = session
                    .uploaded_size
                    .saturating_sub(previous)
                    .saturating_add(uploaded);
                session.overall_status = OverallStatus::Uploading;

                let overall = session.total_progress();
                let now = Instant::now();
                if overall < 100 {
                    if !session.progress_gate.try_pass(now) {
                        return false;
                    }
                } else {
                    session.progress_gate.force(now);
                }

                let file = &session.files[index];
                let file_progress = percent(uploaded, total_bytes);
                let current = CurrentFileProgress {
                    id: file.id.clone(),
                    original_name: file.original_name.clone(),
                    progress: file_progress,
                    status: FileStatus::Uploading,
                    upload_speed: Some(file.upload_speed(uploaded, now)),
                    error: None,
                };
                let message = format!("Uploading {}... {}%", file.original_name, file_progress);
                self.emit(session, overall, Some(current), message);
                true
            })
            .unwrap_or(false)
    }

    /// Mark a file completed
    ///
    /// Forces the file's byte count to its declared size. Returns false if
    /// the file was already terminal, so repeated calls count once. When the
    /// last expected file completes the session completes too.
    pub fn complete_file(&self, session_id: &str, file_id: &str) -> bool {
        let outcome = self.registry.with_session_mut(session_id, |session| {
            if session.is_terminal() {
                return None;
            }
            let index = session.file_index(file_id)?;

            let file = &mut session.files[index];
            let previous = file.uploaded_size;
            if !file.finish(FileStatus::Completed) {
                return None;
            }
            file.uploaded_size = file.declared_size;
            let declared = file.declared_size;
            session.uploaded_size = session
                .uploaded_size
                .saturating_sub(previous)
                .saturating_add(declared);
            session.uploaded_files += 1;

            let file = &session.files[index];
            debug!(
                session_id = %session_id,
                file_id = %file_id,
                file_name = %file.original_name,
                uploaded_files = session.uploaded_files,
                total_files = session.total_files,
                "File upload completed"
            );
            let current = CurrentFileProgress {
                id: file.id.clone(),
                original_name: file.original_name.clone(),
                progress: 100,
                status: FileStatus::Completed,
                upload_speed: None,
                error: None,
            };
            let message = format!("{} uploaded", file.original_name);
            self.emit(session, session.total_progress(), Some(current), message);

            Some(self.try_complete(session))
        });

        match outcome {
            Some(Some(finished)) => {
                if finished {
                    self.schedule_removal(session_id, self.settings.completion_cleanup_delay);
                }
                true
            }
            _ => false,
        }
    }

    /// Complete the session if every expected file has completed
    pub fn complete_upload(&self, session_id: &str) -> bool {
        let finished = self
            .registry
            .with_session_mut(session_id, |session| {
                !session.is_terminal() && self.try_complete(session)
            })
            .unwrap_or(false);
        if finished {
            self.schedule_removal(session_id, self.settings.completion_cleanup_delay);
        }
        finished
    }

    fn try_complete(&self, session: &mut UploadSession) -> bool {
        if session.uploaded_files != session.total_files {
            return false;
        }
        session.finish(OverallStatus::Completed);
        self.emit(session, 100, None, "All files uploaded successfully".to_string());
        log_completion(session);
        true
    }

    /// Mark a file failed with `error`
    ///
    /// Never resolves the session; see `finalize_session`.
    pub fn fail_file(&self, session_id: &str, file_id: &str, error: &str) -> bool {
        self.registry
            .with_session_mut(session_id, |session| {
                if session.is_terminal() {
                    return false;
                }
                let Some(index) = session.file_index(file_id) else {
                    return false;
                };
                let file = &mut session.files[index];
                if !file.finish(FileStatus::Failed) {
                    return false;
                }
                file.error = Some(error.to_string());

                let file = &session.files[index];
                error!(
                    session_id = %session_id,
                    file_id = %file_id,
                    file_name = %file.original_name,
                    error = %error,
                    "File upload failed"
                );
                let current = CurrentFileProgress {
                    id: file.id.clone(),
                    original_name: file.original_name.clone(),
                    progress: file.progress(),
                    status: FileStatus::Failed,
                    upload_speed: None,
                    error: Some(error.to_string()),
                };
                let message = format!("{} upload failed: {}", file.original_name, error);
                self.emit(session, session.total_progress(), Some(current), message);
                true
            })
            .unwrap_or(false)
    }

    /// Cancel a session and every unresolved file
    ///
    /// Returns false for unknown or already terminal sessions.
    pub fn cancel_upload(&self, session_id: &str) -> bool {
        let cancelled = self
            .registry
            .with_session_mut(session_id, |session| {
                if session.is_terminal() {
                    return false;
                }
                for file in session.files.iter_mut() {
                    file.finish(FileStatus::Cancelled);
                }
                session.finish(OverallStatus::Cancelled);
                self.emit(session, session.total_progress(), None, "Upload cancelled".to_string());
                true
            })
            .unwrap_or(false);

        if cancelled {
            info!(session_id = %session_id, "Upload cancelled");
            self.schedule_removal(session_id, self.settings.cancel_cleanup_delay);
        }
        cancelled
    }

    /// Resolve a session whose files are all terminal
    ///
    /// Returns the status after the call, or None for an unknown session.
    /// Sessions that are already terminal or still have unresolved files are
    /// returned unchanged.
    pub fn finalize_session(&self, session_id: &str) -> Option<OverallStatus> {
        let (status, resolved_now) = self.registry.with_session_mut(session_id, |session| {
            if session.is_terminal() || !session.all_files_resolved() {
                return (session.overall_status, false);
            }
            if self.try_complete(session) {
                return (session.overall_status, true);
            }

            session.finish(OverallStatus::Partial);
            let failed = session.failed_files();
            let message = format!(
                "{} of {} files uploaded, {} failed",
                session.uploaded_files, session.total_files, failed
            );
            self.emit(session, session.total_progress(), None, message);
            warn!(
                session_id = %session.session_id,
                completed_files = session.uploaded_files,
                failed_files = failed,
                "Upload session finished with failures"
            );
            (session.overall_status, true)
        })?;

        if resolved_now {
            self.schedule_removal(session_id, self.settings.completion_cleanup_delay);
        }
        Some(status)
    }

    /// Emit one staged-progress checkpoint for the file being stored
    ///
    /// Total progress is `resolved * (100 / n) + checkpoint% * (100 / n)`
    /// where `n` is the session's file count.
    pub fn emit_stage_progress(&self, session_id: &str, file_id: &str, checkpoint: u8) -> bool {
        self.registry
            .with_session_mut(session_id, |session| {
                if session.is_terminal() || session.total_files == 0 {
                    return false;
                }
                let Some(file) = session.file(file_id) else {
                    return false;
                };

                let share = 100.0 / session.total_files as f64;
                let checkpoint = checkpoint.min(100);
                let total = session.resolved_files() as f64 * share
                    + f64::from(checkpoint) / 100.0 * share;
                let total = total.round().clamp(0.0, 100.0) as u8;

                let current = CurrentFileProgress {
                    id: file.id.clone(),
                    original_name: file.original_name.clone(),
                    progress: checkpoint,
                    status: FileStatus::Uploading,
                    upload_speed: None,
                    error: None,
                };
                let message = format!("Storing {}... {}%", file.original_name, checkpoint);

                session.phase = UploadPhase::Storing;
                session.overall_status = OverallStatus::Uploading;
                self.emit(session, total, Some(current), message);
                true
            })
            .unwrap_or(false)
    }

    /// Polling view of a session, or None if unknown
    pub fn get_progress(&self, session_id: &str) -> Option<ProgressSnapshot> {
        let now = Instant::now();
        self.registry
            .with_session(session_id, |session| session.snapshot(now))
    }

    /// Evict sessions older than `max_age` and announce each removal
    pub fn sweep_stale(&self, max_age: Duration) -> Vec<String> {
        self.sweep_stale_at(Utc::now(), max_age)
    }

    pub fn sweep_stale_at(&self, now: DateTime<Utc>, max_age: Duration) -> Vec<String> {
        let removed = self.registry.sweep_at(now, max_age);
        for session_id in &removed {
            debug!(session_id = %session_id, "Cleaned up expired upload tracking");
            self.event_bus.emit_lossy(UploadEvent::SessionRemoved {
                session_id: session_id.clone(),
                reason: RemovalReason::Expired,
                timestamp: Utc::now(),
            });
        }
        removed
    }

    /// Remove a terminal session after `delay`
    ///
    /// Sessions that are no longer terminal when the delay fires (restarted
    /// under the same id) are kept.
    fn schedule_removal(&self, session_id: &str, delay: Duration) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(session_id = %session_id, "No async runtime; session cleanup not scheduled");
            return;
        };

        let registry = self.registry.clone();
        let event_bus = self.event_bus.clone();
        let session_id = session_id.to_string();
        handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if registry.remove_if(&session_id, |s| s.is_terminal()).is_some() {
                debug!(session_id = %session_id, "Removed finished upload session");
                event_bus.emit_lossy(UploadEvent::SessionRemoved {
                    session_id,
                    reason: RemovalReason::Finished,
                    timestamp: Utc::now(),
                });
            }
        });
    }

    fn emit(
        &self,
        session: &UploadSession,
        total_progress: u8,
        current_file: Option<CurrentFileProgress>,
        message: String,
    ) {
        let notification = ProgressNotification {
            session_id: session.session_id.clone(),
            timestamp: Utc::now(),
            overall_status: session.overall_status,
            phase: session.phase,
            total_progress,
            completed_files: session.uploaded_files,
            failed_files: session.failed_files(),
            total_files: session.total_files,
            current_file,
            message,
        };
        self.event_bus.emit_lossy(UploadEvent::UploadProgress(notification));
    }
}

fn log_completion(session: &UploadSession) {
    let duration_ms = session.elapsed_ms(Instant::now());
    let average_speed = if duration_ms == 0 {
        0.0
    } else {
        session.total_size as f64 / duration_ms as f64 * 1000.0
    };
    info!(
        session_id = %session.session_id,
        total_files = session.total_files,
        total_size = session.total_size,
        duration = %format!("{}ms", duration_ms),
        average_speed = %format!("{:.2} bytes/s", average_speed),
        "Upload session completed"
    );
}
