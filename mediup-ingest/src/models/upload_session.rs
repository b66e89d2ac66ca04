//! Upload session state
//!
//! A session groups one to three files uploaded under a shared identifier.
//! Status transitions:
//! PENDING → UPLOADING → COMPLETED | PARTIAL | CANCELLED
//!
//! Files move PENDING → UPLOADING → COMPLETED | FAILED | CANCELLED and never
//! leave a terminal status.

use chrono::{DateTime, Utc};
use mediup_common::events::{FileStatus, OverallStatus, UploadPhase};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

use crate::utils::ThrottleGate;

/// Rounded percentage of `done` over `total`, clamped to 0-100
///
/// A zero denominator yields 0 rather than dividing.
pub fn percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let value = (done as f64 / total as f64 * 100.0).round();
    value.clamp(0.0, 100.0) as u8
}

/// A file as declared by the client before any byte arrives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub id: String,
    pub original_name: String,
    /// Declared size in bytes
    pub size: u64,
}

impl FileDescriptor {
    /// Descriptor with a freshly generated identifier
    pub fn new(original_name: impl Into<String>, size: u64) -> Self {
        Self {
            id: mediup_common::uuid_utils::generate_id(),
            original_name: original_name.into(),
            size,
        }
    }
}

/// One file within a session
#[derive(Debug, Clone)]
pub struct FileTransfer {
    pub id: String,
    pub original_name: String,
    pub declared_size: u64,
    /// Bytes observed so far (never above `declared_size`)
    pub uploaded_size: u64,
    pub status: FileStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Failure message (present iff failed)
    pub error: Option<String>,
    /// Speed anchor
    pub(crate) clock_start: Option<Instant>,
}

impl FileTransfer {
    pub fn new(descriptor: &FileDescriptor, status: FileStatus) -> Self {
        let mut file = Self {
            id: descriptor.id.clone(),
            original_name: descriptor.original_name.clone(),
            declared_size: descriptor.size,
            uploaded_size: 0,
            status: FileStatus::Pending,
            started_at: None,
            ended_at: None,
            error: None,
            clock_start: None,
        };
        if status == FileStatus::Uploading {
            file.mark_uploading();
        }
        file
    }

    /// PENDING → UPLOADING, anchoring the speed clock
    pub fn mark_uploading(&mut self) {
        if self.status == FileStatus::Pending {
            self.status = FileStatus::Uploading;
            self.started_at = Some(Utc::now());
            self.clock_start = Some(Instant::now());
        }
    }

    /// Move to a terminal status; no-op if already terminal
    ///
    /// Returns false when the file was already terminal.
    pub fn finish(&mut self, status: FileStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        self.ended_at = Some(Utc::now());
        true
    }

    /// Percentage of the declared size received
    pub fn progress(&self) -> u8 {
        if self.status == FileStatus::Completed {
            return 100;
        }
        percent(self.uploaded_size, self.declared_size)
    }

    /// Bytes per second for `uploaded_bytes` since the file started
    pub fn upload_speed(&self, uploaded_bytes: u64, now: Instant) -> u64 {
        let Some(start) = self.clock_start else {
            return 0;
        };
        let elapsed_ms = now.saturating_duration_since(start).as_millis();
        if elapsed_ms == 0 {
            return 0;
        }
        (uploaded_bytes as f64 / elapsed_ms as f64 * 1000.0).round() as u64
    }

    pub fn view(&self) -> FileProgressView {
        FileProgressView {
            id: self.id.clone(),
            original_name: self.original_name.clone(),
            size: self.declared_size,
            uploaded_size: self.uploaded_size,
            progress: self.progress(),
            status: self.status,
            error: self.error.clone(),
        }
    }
}

/// In-memory state of one upload session
#[derive(Debug, Clone)]
pub struct UploadSession {
    pub session_id: String,
    /// Category chosen at creation (None when tracking started directly)
    pub category: Option<String>,
    pub total_files: usize,
    /// Sum of declared sizes
    pub total_size: u64,
    /// Files completed
    pub uploaded_files: usize,
    /// Running byte sum across all files (delta-accumulated)
    pub uploaded_size: u64,
    pub overall_status: OverallStatus,
    pub phase: UploadPhase,
    /// Files in arrival order
    pub files: Vec<FileTransfer>,
    /// Set once a batch of files has been accepted for this session
    pub upload_claimed: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub(crate) clock_start: Instant,
    /// Session-wide notification throttle
    pub(crate) progress_gate: ThrottleGate,
}

impl UploadSession {
    pub fn new(
        session_id: impl Into<String>,
        total_files: usize,
        total_size: u64,
        throttle: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            category: None,
            total_files,
            total_size,
            uploaded_files: 0,
            uploaded_size: 0,
            overall_status: OverallStatus::Pending,
            phase: UploadPhase::Receiving,
            files: Vec::new(),
            upload_claimed: false,
            created_at: now,
            started_at: now,
            ended_at: None,
            clock_start: Instant::now(),
            progress_gate: ThrottleGate::new(throttle),
        }
    }

    pub fn file(&self, file_id: &str) -> Option<&FileTransfer> {
        self.files.iter().find(|f| f.id == file_id)
    }

    pub fn file_index(&self, file_id: &str) -> Option<usize> {
        self.files.iter().position(|f| f.id == file_id)
    }

    pub fn failed_files(&self) -> usize {
        self.files
            .iter()
            .filter(|f| f.status == FileStatus::Failed)
            .count()
    }

    /// Files in a terminal status
    pub fn resolved_files(&self) -> usize {
        self.files.iter().filter(|f| f.status.is_terminal()).count()
    }

    /// Every expected file is known and terminal
    pub fn all_files_resolved(&self) -> bool {
        self.files.len() >= self.total_files
            && self.files.iter().all(|f| f.status.is_terminal())
    }

    pub fn is_terminal(&self) -> bool {
        self.overall_status.is_terminal()
    }

    pub fn total_progress(&self) -> u8 {
        percent(self.uploaded_size, self.total_size)
    }

    /// Move to a terminal status and stamp the end time
    pub fn finish(&mut self, status: OverallStatus) {
        self.overall_status = status;
        self.phase = UploadPhase::Finished;
        self.ended_at = Some(Utc::now());
    }

    /// Milliseconds since tracking started
    pub fn elapsed_ms(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.clock_start).as_millis() as u64
    }

    /// Remaining seconds at the average throughput so far
    ///
    /// `remaining / (uploaded / elapsed)`; 0 when nothing has moved yet.
    pub fn estimated_remaining_seconds(&self, now: Instant) -> u64 {
        if self.uploaded_size == 0 {
            return 0;
        }
        let elapsed_ms = self.elapsed_ms(now);
        if elapsed_ms == 0 {
            return 0;
        }
        let bytes_per_ms = self.uploaded_size as f64 / elapsed_ms as f64;
        let remaining = self.total_size.saturating_sub(self.uploaded_size);
        (remaining as f64 / bytes_per_ms / 1000.0).round() as u64
    }

    /// Read-only projection for polling clients
    pub fn snapshot(&self, now: Instant) -> ProgressSnapshot {
        ProgressSnapshot {
            session_id: self.session_id.clone(),
            category: self.category.clone(),
            overall_status: self.overall_status,
            phase: self.phase,
            total_progress: self.total_progress(),
            completed_files: self.uploaded_files,
            failed_files: self.failed_files(),
            total_files: self.total_files,
            uploaded_size: self.uploaded_size,
            total_size: self.total_size,
            files: self.files.iter().map(FileTransfer::view).collect(),
            estimated_time_remaining_seconds: self.estimated_remaining_seconds(now),
            started_at: self.started_at,
            ended_at: self.ended_at,
            last_update: Utc::now(),
        }
    }
}

/// Per-file entry of a progress snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileProgressView {
    pub id: String,
    pub original_name: String,
    pub size: u64,
    pub uploaded_size: u64,
    pub progress: u8,
    pub status: FileStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Polling view of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub overall_status: OverallStatus,
    pub phase: UploadPhase,
    pub total_progress: u8,
    pub completed_files: usize,
    pub failed_files: usize,
    pub total_files: usize,
    pub uploaded_size: u64,
    pub total_size: u64,
    pub files: Vec<FileProgressView>,
    pub estimated_time_remaining_seconds: u64,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub last_update: DateTime<Utc>,
}
