//! Upload progress type definitions
//!
//! Supporting types for the upload session progress notifications pushed to
//! subscribers while files are in flight.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Aggregate status of an upload session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    /// Session allocated, no bytes observed yet
    Pending,
    /// Bytes are arriving or files are being stored
    Uploading,
    /// Every file completed
    Completed,
    /// Every file resolved, at least one failed
    Partial,
    /// Cancelled by the client
    Cancelled,
}

impl OverallStatus {
    /// Terminal statuses never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OverallStatus::Completed | OverallStatus::Partial | OverallStatus::Cancelled
        )
    }
}

/// Status of a single file within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Pending,
    Uploading,
    Completed,
    Failed,
    Cancelled,
}

impl FileStatus {
    /// Terminal statuses never revert
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FileStatus::Completed | FileStatus::Failed | FileStatus::Cancelled
        )
    }
}

/// Which part of the upload a notification describes
///
/// `Receiving` covers byte transfer from the client, `Storing` the staged
/// move into permanent storage, `Finished` the terminal notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadPhase {
    Receiving,
    Storing,
    Finished,
}

/// Progress of the file that triggered a notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentFileProgress {
    /// File identifier
    pub id: String,
    /// Name as supplied by the client
    pub original_name: String,
    /// Percentage of this file (0-100)
    pub progress: u8,
    /// File status at emission time
    pub status: FileStatus,
    /// Bytes per second since the file started, if measured
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_speed: Option<u64>,
    /// Failure message (present iff status is failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Snapshot pushed to every subscriber of a session channel
///
/// A projection of session and file state at emission time; never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressNotification {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub overall_status: OverallStatus,
    pub phase: UploadPhase,
    /// Aggregate percentage (0-100)
    pub total_progress: u8,
    pub completed_files: usize,
    pub failed_files: usize,
    pub total_files: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_file: Option<CurrentFileProgress>,
    /// Human-readable description of the state change
    pub message: String,
}

impl ProgressNotification {
    /// True for the last notification a session will ever emit
    pub fn is_terminal(&self) -> bool {
        self.overall_status.is_terminal()
    }
}

/// Why a session left the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemovalReason {
    /// Grace period after a terminal state elapsed
    Finished,
    /// Evicted by the stale-session sweep
    Expired,
}
