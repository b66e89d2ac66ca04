//! Data models for mediup-ingest
//!
//! - Upload session and file transfer state
//! - Progress snapshots for polling clients
//! - Batch and validation results

pub mod upload_result;
pub mod upload_session;

pub use upload_result::{
    FileUploadResult, FileValidation, SessionInfo, UploadBatchResult, ValidationReport,
};
pub use upload_session::{
    percent, FileDescriptor, FileProgressView, FileTransfer, ProgressSnapshot, UploadSession,
};
