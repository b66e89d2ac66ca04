//! Permanent file storage
//!
//! Staged uploads live in a temp directory until the lifecycle service hands
//! them to a `FileStore`. The local implementation moves them under
//! `{upload_dir}/{category}` with collision-free names.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Storage failure for one file
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Staged file missing: {0}")]
    MissingSource(PathBuf),

    #[error("Storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage rejected file: {0}")]
    Rejected(String),
}

impl StorageError {
    /// Short machine-readable code carried in upload results
    pub fn code(&self) -> &'static str {
        match self {
            StorageError::MissingSource(_) => "STAGED_FILE_MISSING",
            StorageError::Io(_) => "UPLOAD_FAILED",
            StorageError::Rejected(_) => "STORAGE_REJECTED",
        }
    }
}

/// A fully received file waiting in the temp directory
#[derive(Debug, Clone)]
pub struct StagedFile {
    pub id: String,
    pub original_name: String,
    pub size: u64,
    pub temp_path: PathBuf,
}

/// Where a file ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub file_name: String,
    pub path: PathBuf,
}

/// Collaborator that moves a staged file into permanent storage
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn persist(
        &self,
        session_id: &str,
        category: &str,
        file: &StagedFile,
    ) -> Result<StoredFile, StorageError>;
}

/// Replace every character outside `[A-Za-z0-9._-]` with `_`
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// `{session_id}_{timestamp}_{sanitized name}`
pub fn generate_file_name(session_id: &str, original_name: &str, at: DateTime<Utc>) -> String {
    format!(
        "{}_{}_{}",
        session_id,
        mediup_common::time::file_name_timestamp(at),
        sanitize_file_name(original_name)
    )
}

/// Stores files on the local filesystem
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    base_dir: PathBuf,
}

impl LocalFileStore {
    /// `base_dir` is the upload root; categories become sub-directories
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn category_dir(&self, category: &str) -> PathBuf {
        self.base_dir.join(category)
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn persist(
        &self,
        session_id: &str,
        category: &str,
        file: &StagedFile,
    ) -> Result<StoredFile, StorageError> {
        if category.is_empty() || category.contains(['/', '\\']) || category.contains("..") {
            return Err(StorageError::Rejected(format!("invalid category '{}'", category)));
        }
        if !tokio::fs::try_exists(&file.temp_path).await? {
            return Err(StorageError::MissingSource(file.temp_path.clone()));
        }

        let target_dir = self.category_dir(category);
        tokio::fs::create_dir_all(&target_dir).await?;

        let file_name = generate_file_name(session_id, &file.original_name, Utc::now());
        let path = target_dir.join(&file_name);

        // Temp and upload dirs may sit on different filesystems
        if tokio::fs::rename(&file.temp_path, &path).await.is_err() {
            tokio::fs::copy(&file.temp_path, &path).await?;
            tokio::fs::remove_file(&file.temp_path).await?;
        }

        debug!(
            session_id = %session_id,
            file_id = %file.id,
            path = %path.display(),
            "Stored uploaded file"
        );
        Ok(StoredFile { file_name, path })
    }
}
