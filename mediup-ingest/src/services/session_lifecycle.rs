//! Session lifecycle service
//!
//! The API request handlers talk to. Creates sessions, moves received
//! files into storage with staged progress, and cancels sessions.

use chrono::Utc;
use mediup_common::config::UploadConfig;
use mediup_common::events::{FileStatus, OverallStatus, UploadEvent};
use mediup_common::{Error, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::models::{
    FileDescriptor, FileUploadResult, ProgressSnapshot, SessionInfo, UploadBatchResult,
    ValidationReport,
};
use crate::services::file_validator::{self, DeclaredFileInfo};
use crate::services::{FileStore, ProgressTracker, StagedFile};

/// Checkpoints emitted while a file is moved into storage
#[derive(Debug, Clone, PartialEq)]
pub struct StagedProgressPolicy {
    /// File percentages, emitted in order
    pub checkpoints: Vec<u8>,
    /// Delay before each checkpoint
    pub step_delay: Duration,
}

impl Default for StagedProgressPolicy {
    fn default() -> Self {
        Self {
            checkpoints: vec![5, 15, 30, 45, 60, 75, 85, 95, 100],
            step_delay: Duration::from_millis(300),
        }
    }
}

impl From<&UploadConfig> for StagedProgressPolicy {
    fn from(config: &UploadConfig) -> Self {
        Self {
            checkpoints: config.staged_progress_steps.clone(),
            step_delay: config.staged_progress_step_delay(),
        }
    }
}

#[derive(Clone)]
pub struct SessionLifecycleService {
    tracker: ProgressTracker,
    store: Arc<dyn FileStore>,
    policy: StagedProgressPolicy,
    config: Arc<UploadConfig>,
    upload_dir: PathBuf,
}

impl SessionLifecycleService {
    pub fn new(
        tracker: ProgressTracker,
        store: Arc<dyn FileStore>,
        policy: StagedProgressPolicy,
        config: Arc<UploadConfig>,
        upload_dir: PathBuf,
    ) -> Self {
        Self {
            tracker,
            store,
            policy,
            config,
            upload_dir,
        }
    }

    pub fn tracker(&self) -> &ProgressTracker {
        &self.tracker
    }

    /// Allocate a PENDING session for `expected_files` files of `category`
    pub fn create_session(&self, category: &str, expected_files: usize) -> Result<SessionInfo> {
        if !self.config.is_valid_category(category) {
            return Err(Error::InvalidInput(format!(
                "Unknown category '{}' (expected one of: {})",
                category,
                self.config.categories.join(", ")
            )));
        }
        if expected_files == 0 || expected_files > self.config.max_files_per_session {
            return Err(Error::InvalidInput(format!(
                "expectedFiles must be between 1 and {}",
                self.config.max_files_per_session
            )));
        }

        let registry = self.tracker.registry();
        let session_id = registry.create(expected_files, 0);
        let created_at = registry
            .with_session_mut(&session_id, |session| {
                session.category = Some(category.to_string());
                session.created_at
            })
            .unwrap_or_else(Utc::now);

        self.tracker.event_bus().emit_lossy(UploadEvent::SessionCreated {
            session_id: session_id.clone(),
            category: category.to_string(),
            expected_files,
            timestamp: created_at,
        });
        info!(session_id = %session_id, category, expected_files, "Created upload session");

        Ok(SessionInfo {
            session_id,
            category: category.to_string(),
            expected_files,
            upload_path: self.upload_dir.join(category),
            max_files: self.config.max_files_per_session,
            allowed_types: self.config.allowed_extensions.clone(),
            max_file_size: self.config.max_file_size,
            created_at,
        })
    }

    /// Accept the single batch of files a session may receive
    ///
    /// Fails with `Conflict` once a batch was accepted or the session has
    /// left PENDING.
    pub fn claim_upload(&self, session_id: &str) -> Result<()> {
        match self.tracker.claim_upload(session_id) {
            Some(true) => Ok(()),
            Some(false) => Err(Error::Conflict(format!(
                "Upload session {} already received its files",
                session_id
            ))),
            None => Err(Error::NotFound(format!("Upload session {}", session_id))),
        }
    }

    /// Move received files into storage and resolve the session
    ///
    /// Files are handled in arrival order. A storage failure fails that file
    /// and processing continues. Cancellation is checked before each file and
    /// before each staged checkpoint. Returns None for an unknown session.
    ///
    /// Files already registered by the transfer belong to the batch claimed
    /// for them; any other files must claim the session first. Rejected
    /// files are discarded.
    pub async fn upload_files(
        &self,
        session_id: &str,
        category: &str,
        files: Vec<StagedFile>,
    ) -> Result<Option<UploadBatchResult>> {
        if files.is_empty() {
            return Err(Error::InvalidInput("No files to upload".to_string()));
        }
        if !self.config.is_valid_category(category) {
            return Err(Error::InvalidInput(format!("Unknown category '{}'", category)));
        }

        let registry = self.tracker.registry();
        let Some((all_known, terminal)) = registry.with_session(session_id, |session| {
            (
                files.iter().all(|f| session.file(&f.id).is_some()),
                session.is_terminal(),
            )
        }) else {
            return Ok(None);
        };
        if terminal {
            discard_all(&files).await;
            return Err(Error::Conflict(format!(
                "Upload session {} has already finished",
                session_id
            )));
        }

        let descriptors: Vec<FileDescriptor> = files
            .iter()
            .map(|f| FileDescriptor {
                id: f.id.clone(),
                original_name: f.original_name.clone(),
                size: f.size,
            })
            .collect();
        if !all_known {
            if let Err(e) = self.claim_upload(session_id) {
                discard_all(&files).await;
                return Err(e);
            }
            let total_size = descriptors.iter().map(|d| d.size).sum();
            self.tracker.start_tracking(session_id, files.len(), total_size);
        }
        for descriptor in &descriptors {
            self.tracker.start_file(session_id, descriptor);
        }

        let mut results = Vec::with_capacity(files.len());
        for file in &files {
            let result = self.store_file(session_id, category, file).await;
            results.push(result);
        }

        let overall_status = self
            .tracker
            .finalize_session(session_id)
            .unwrap_or(OverallStatus::Cancelled);

        let completed_files = results
            .iter()
            .filter(|r| r.status == FileStatus::Completed)
            .count();
        let failed_files = results
            .iter()
            .filter(|r| r.status == FileStatus::Failed)
            .count();
        let total_size = files.iter().map(|f| f.size).sum();

        info!(
            session_id = %session_id,
            ?overall_status,
            completed_files,
            failed_files,
            total_size,
            "Upload batch processed"
        );

        Ok(Some(UploadBatchResult {
            session_id: session_id.to_string(),
            overall_status,
            files: results,
            completed_files,
            failed_files,
            total_size,
        }))
    }

    async fn store_file(&self, session_id: &str, category: &str, file: &StagedFile) -> FileUploadResult {
        let mut result = FileUploadResult {
            id: file.id.clone(),
            original_name: file.original_name.clone(),
            file_size: file.size,
            file_type: file_validator::extension_of(&file.original_name)
                .map(|ext| ext.trim_start_matches('.').to_string())
                .unwrap_or_default(),
            status: FileStatus::Cancelled,
            file_name: None,
            file_path: None,
            error_message: None,
            error_code: None,
            upload_start_time: Utc::now(),
            upload_end_time: None,
        };

        if self.is_stopped(session_id) {
            discard_staged(file).await;
            return result;
        }

        match self.store.persist(session_id, category, file).await {
            Ok(stored) => {
                result.file_name = Some(stored.file_name);
                result.file_path = Some(stored.path);

                for checkpoint in &self.policy.checkpoints {
                    tokio::time::sleep(self.policy.step_delay).await;
                    if self.is_stopped(session_id) {
                        debug!(session_id = %session_id, file_id = %file.id, "Stopped staged progress");
                        return result;
                    }
                    self.tracker
                        .emit_stage_progress(session_id, &file.id, *checkpoint);
                }

                if self.tracker.complete_file(session_id, &file.id) {
                    result.status = FileStatus::Completed;
                    debug!(
                        session_id = %session_id,
                        file_id = %file.id,
                        file_name = %file.original_name,
                        size = file.size,
                        "File uploaded successfully"
                    );
                } else {
                    self.apply_tracked_outcome(session_id, &mut result);
                }
            }
            Err(e) => {
                self.tracker.fail_file(session_id, &file.id, &e.to_string());
                discard_staged(file).await;
                result.status = FileStatus::Failed;
                result.error_message = Some(e.to_string());
                result.error_code = Some(e.code().to_string());
            }
        }

        result.upload_end_time = Some(Utc::now());
        result
    }

    /// Status the tracker holds for a file it refused to complete
    ///
    /// A file the session no longer knows (tracking was restarted under the
    /// same id) is reported failed.
    fn apply_tracked_outcome(&self, session_id: &str, result: &mut FileUploadResult) {
        let status = self
            .tracker
            .registry()
            .with_session(session_id, |s| s.file(&result.id).map(|f| f.status))
            .flatten();
        match status {
            Some(status) if status.is_terminal() => result.status = status,
            _ => {
                warn!(session_id = %session_id, file_id = %result.id, "Stored file is no longer tracked");
                result.status = FileStatus::Failed;
                result.error_message = Some("File is no longer tracked by this session".to_string());
                result.error_code = Some("SESSION_RESET".to_string());
            }
        }
    }

    /// True once the session is terminal or gone
    fn is_stopped(&self, session_id: &str) -> bool {
        self.tracker
            .registry()
            .with_session(session_id, |s| s.is_terminal())
            .unwrap_or(true)
    }

    pub fn get_progress(&self, session_id: &str) -> Option<ProgressSnapshot> {
        self.tracker.get_progress(session_id)
    }

    pub fn cancel_session(&self, session_id: &str) -> bool {
        self.tracker.cancel_upload(session_id)
    }

    pub fn validate_files(&self, files: &[DeclaredFileInfo]) -> ValidationReport {
        file_validator::validate_files(files, &self.config)
    }
}

async fn discard_staged(file: &StagedFile) {
    if let Err(e) = tokio::fs::remove_file(&file.temp_path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %file.temp_path.display(), error = %e, "Failed to remove staged file");
        }
    }
}

async fn discard_all(files: &[StagedFile]) {
    for file in files {
        discard_staged(file).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{SessionRegistry, StorageError, StoredFile, TrackerSettings};
    use async_trait::async_trait;
    use mediup_common::events::{EventBus, ProgressNotification, UploadPhase};
    use tokio::sync::broadcast;

    /// Accepts every file except names starting with "bad"
    struct FakeStore;

    #[async_trait]
    impl FileStore for FakeStore {
        async fn persist(
            &self,
            session_id: &str,
            _category: &str,
            file: &StagedFile,
        ) -> std::result::Result<StoredFile, StorageError> {
            if file.original_name.starts_with("bad") {
                return Err(StorageError::Rejected("disk quota exceeded".to_string()));
            }
            Ok(StoredFile {
                file_name: format!("{}_{}", session_id, file.original_name),
                path: PathBuf::from("/stored").join(&file.original_name),
            })
        }
    }

    fn service(step_delay: Duration) -> (SessionLifecycleService, broadcast::Receiver<UploadEvent>) {
        let bus = EventBus::new(256);
        let rx = bus.subscribe();
        let tracker = ProgressTracker::new(
            SessionRegistry::new(Duration::from_millis(100)),
            bus,
            TrackerSettings::default(),
        );
        let policy = StagedProgressPolicy {
            checkpoints: vec![50, 100],
            step_delay,
        };
        let service = SessionLifecycleService::new(
            tracker,
            Arc::new(FakeStore),
            policy,
            Arc::new(UploadConfig::default()),
            PathBuf::from("/root/upload"),
        );
        (service, rx)
    }

    fn staged(name: &str, size: u64) -> StagedFile {
        StagedFile {
            id: mediup_common::uuid_utils::generate_id(),
            original_name: name.to_string(),
            size,
            temp_path: PathBuf::from("/nonexistent").join(name),
        }
    }

    fn progress(rx: &mut broadcast::Receiver<UploadEvent>) -> Vec<ProgressNotification> {
        std::iter::from_fn(|| rx.try_recv().ok())
            .filter_map(|e| match e {
                UploadEvent::UploadProgress(n) => Some(n),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_create_session_validates_input() {
        let (service, mut rx) = service(Duration::ZERO);

        let info = service.create_session("personal", 2).unwrap();
        assert_eq!(info.expected_files, 2);
        assert_eq!(info.max_files, 3);
        assert_eq!(info.upload_path, PathBuf::from("/root/upload/personal"));
        assert!(matches!(rx.try_recv(), Ok(UploadEvent::SessionCreated { .. })));

        let session = service.tracker().registry().get(&info.session_id).unwrap();
        assert_eq!(session.category.as_deref(), Some("personal"));
        assert_eq!(session.overall_status, OverallStatus::Pending);

        assert!(matches!(service.create_session("work", 1), Err(Error::InvalidInput(_))));
        assert!(matches!(service.create_session("scenic", 0), Err(Error::InvalidInput(_))));
        assert!(matches!(service.create_session("scenic", 4), Err(Error::InvalidInput(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_files_completes_with_staged_progress() {
        let (service, mut rx) = service(Duration::from_millis(300));
        let info = service.create_session("personal", 2).unwrap();

        let result = service
            .upload_files(&info.session_id, "personal", vec![staged("a.mp4", 100), staged("b.mp4", 100)])
            .await
            .unwrap()
            .unwrap();

        assert_eq!(result.overall_status, OverallStatus::Completed);
        assert_eq!(result.completed_files, 2);
        assert_eq!(result.failed_files, 0);
        assert_eq!(result.files[0].file_type, "mp4");
        assert!(result.files[0].file_name.is_some());

        let notifications = progress(&mut rx);
        let staged: Vec<u8> = notifications
            .iter()
            .filter(|n| n.phase == UploadPhase::Storing)
            .map(|n| n.total_progress)
            .collect();
        assert_eq!(staged, vec![25, 50, 75, 100]);

        let terminal: Vec<_> = notifications.iter().filter(|n| n.is_terminal()).collect();
        assert_eq!(terminal.len(), 1);
        assert_eq!(terminal[0].overall_status, OverallStatus::Completed);
    }

    #[tokio::test]
    async fn test_storage_failure_yields_partial() {
        let (service, mut rx) = service(Duration::ZERO);
        let info = service.create_session("scenic", 2).unwrap();

        let result = service
            .upload_files(&info.session_id, "scenic", vec![staged("bad.mp4", 10), staged("good.mp4", 10)])
            .await
            .unwrap()
            .unwrap();

        assert_eq!(result.overall_status, OverallStatus::Partial);
        assert_eq!(result.failed_files, 1);
        assert_eq!(result.completed_files, 1);
        assert_eq!(result.files[0].status, FileStatus::Failed);
        assert_eq!(result.files[0].error_code.as_deref(), Some("STORAGE_REJECTED"));

        let terminal: Vec<_> = progress(&mut rx).into_iter().filter(|n| n.is_terminal()).collect();
        assert_eq!(terminal.len(), 1);
        assert_eq!(terminal[0].failed_files, 1);
    }

    #[tokio::test]
    async fn test_unknown_session_returns_none() {
        let (service, _rx) = service(Duration::ZERO);
        let result = service
            .upload_files("missing", "personal", vec![staged("a.mp4", 1)])
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(service.get_progress("missing").is_none());
        assert!(!service.cancel_session("missing"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_at_next_checkpoint() {
        let (service, _rx) = service(Duration::from_millis(300));
        let info = service.create_session("personal", 2).unwrap();
        let session_id = info.session_id.clone();

        let worker = service.clone();
        let files = vec![staged("a.mp4", 10), staged("b.mp4", 10)];
        let handle = tokio::spawn(async move {
            worker.upload_files(&session_id, "personal", files).await
        });

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert!(service.cancel_session(&info.session_id));

        let result = handle.await.unwrap().unwrap().unwrap();
        assert_eq!(result.overall_status, OverallStatus::Cancelled);
        assert_eq!(result.completed_files, 0);
        assert!(result.files.iter().all(|f| f.status == FileStatus::Cancelled));
    }

    #[tokio::test]
    async fn test_session_accepts_a_single_batch() {
        let (service, _rx) = service(Duration::ZERO);
        let info = service.create_session("personal", 1).unwrap();

        let first = service
            .upload_files(&info.session_id, "personal", vec![staged("a.mp4", 10)])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.overall_status, OverallStatus::Completed);

        // Finished session inside its grace period
        let second = service
            .upload_files(&info.session_id, "personal", vec![staged("b.mp4", 10)])
            .await;
        assert!(matches!(second, Err(Error::Conflict(_))));

        let other = service.create_session("personal", 1).unwrap();
        service.claim_upload(&other.session_id).unwrap();
        assert!(matches!(service.claim_upload(&other.session_id), Err(Error::Conflict(_))));
        assert!(matches!(service.claim_upload("missing"), Err(Error::NotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restarted_tracking_mid_batch_is_not_reported_completed() {
        let (service, _rx) = service(Duration::from_millis(300));
        let info = service.create_session("personal", 2).unwrap();
        let session_id = info.session_id.clone();

        let worker = service.clone();
        let files = vec![staged("a.mp4", 10), staged("b.mp4", 10)];
        let handle = tokio::spawn(async move {
            worker.upload_files(&session_id, "personal", files).await
        });

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert!(service.tracker().start_tracking(&info.session_id, 1, 5));

        let result = handle.await.unwrap().unwrap().unwrap();
        let snapshot = service.get_progress(&info.session_id).unwrap();
        assert_eq!(result.completed_files, 0);
        assert_eq!(snapshot.completed_files, 0);
        assert_eq!(result.failed_files, 2);
        assert!(result
            .files
            .iter()
            .all(|f| f.status == FileStatus::Failed && f.error_code.as_deref() == Some("SESSION_RESET")));
        assert_eq!(result.overall_status, snapshot.overall_status);
        assert!(!result.overall_status.is_terminal());
    }
}
