//! Upload operation results
//!
//! Summaries returned to request handlers once a batch has been processed.

use chrono::{DateTime, Utc};
use mediup_common::events::{FileStatus, OverallStatus};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Session allocated by the lifecycle service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: String,
    pub category: String,
    pub expected_files: usize,
    /// Directory completed files are stored under
    pub upload_path: PathBuf,
    pub max_files: usize,
    pub allowed_types: Vec<String>,
    pub max_file_size: u64,
    pub created_at: DateTime<Utc>,
}

/// Outcome of one file in a batch
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileUploadResult {
    pub id: String,
    pub original_name: String,
    pub file_size: u64,
    /// Extension without the dot (e.g. "mp4")
    pub file_type: String,
    pub status: FileStatus,
    /// Name in permanent storage (completed files only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    pub upload_start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_end_time: Option<DateTime<Utc>>,
}

/// Outcome of a whole batch
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadBatchResult {
    pub session_id: String,
    pub overall_status: OverallStatus,
    pub files: Vec<FileUploadResult>,
    pub completed_files: usize,
    pub failed_files: usize,
    pub total_size: u64,
}

/// Validation outcome for one declared file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileValidation {
    pub index: usize,
    pub valid: bool,
    pub errors: Vec<String>,
}

/// Validation outcome for a declared file list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub files: Vec<FileValidation>,
}

impl ValidationReport {
    /// All error messages, prefixed with the file index
    pub fn error_messages(&self) -> Vec<String> {
        self.files
            .iter()
            .flat_map(|f| f.errors.iter().map(move |e| format!("file {}: {}", f.index, e)))
            .collect()
    }
}
