//! Declared file validation
//!
//! Checks a client's declared file list against the upload limits before
//! any byte is accepted: file count, size, extension, MIME type, and that all
//! files share one extension.

use mediup_common::config::UploadConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::models::{FileValidation, ValidationReport};

/// A file as described by the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclaredFileInfo {
    pub name: String,
    pub size: u64,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Lowercase extension with leading dot, if any
pub fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
}

/// Validate `files` against `config`
///
/// Count and consistency problems are reported against every file so the
/// report stays per-file.
pub fn validate_files(files: &[DeclaredFileInfo], config: &UploadConfig) -> ValidationReport {
    let mut report = ValidationReport {
        valid: true,
        files: Vec::with_capacity(files.len()),
    };

    if files.is_empty() || files.len() > config.max_files_per_session {
        report.valid = false;
        report.files.push(FileValidation {
            index: 0,
            valid: false,
            errors: vec![format!(
                "Invalid number of files: {} (expected 1-{})",
                files.len(),
                config.max_files_per_session
            )],
        });
        return report;
    }

    let first_extension = extension_of(&files[0].name);
    let consistent = files.iter().all(|f| extension_of(&f.name) == first_extension);

    for (index, file) in files.iter().enumerate() {
        let errors = validate_file(file, config);
        let mut entry = FileValidation {
            index,
            valid: errors.is_empty(),
            errors,
        };
        if !consistent {
            entry.valid = false;
            entry.errors.push("All files must be of the same type".to_string());
        }
        report.valid &= entry.valid;
        report.files.push(entry);
    }

    report
}

fn validate_file(file: &DeclaredFileInfo, config: &UploadConfig) -> Vec<String> {
    let mut errors = Vec::new();

    match extension_of(&file.name) {
        Some(ext) if config.allowed_extensions.iter().any(|a| a.eq_ignore_ascii_case(&ext)) => {}
        _ => errors.push(format!(
            "Unsupported file extension (allowed: {})",
            config.allowed_extensions.join(", ")
        )),
    }

    if let Some(mime) = file.mime_type.as_deref().filter(|m| !m.is_empty()) {
        if !config.allowed_mime_types.iter().any(|a| a == mime) {
            errors.push(format!("Unsupported MIME type: {}", mime));
        }
    }

    if file.size == 0 || file.size > config.max_file_size {
        errors.push(format!(
            "Invalid file size or exceeds limit ({}MB)",
            config.max_file_size / 1024 / 1024
        ));
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, size: u64, mime: Option<&str>) -> DeclaredFileInfo {
        DeclaredFileInfo {
            name: name.to_string(),
            size,
            mime_type: mime.map(str::to_string),
        }
    }

    #[test]
    fn test_valid_files_pass() {
        let config = UploadConfig::default();
        let report = validate_files(
            &[file("a.mp4", 10, Some("video/mp4")), file("B.MP4", 20, None)],
            &config,
        );
        assert!(report.valid);
        assert_eq!(report.files.len(), 2);
        assert!(report.error_messages().is_empty());
    }

    #[test]
    fn test_count_limits() {
        let config = UploadConfig::default();
        assert!(!validate_files(&[], &config).valid);

        let four: Vec<_> = (0..4).map(|i| file(&format!("{}.mp4", i), 1, None)).collect();
        let report = validate_files(&four, &config);
        assert!(!report.valid);
        assert!(report.files[0].errors[0].contains("Invalid number of files"));
    }

    #[test]
    fn test_per_file_errors() {
        let config = UploadConfig::default();
        let report = validate_files(
            &[file("a.mov", 10, Some("video/quicktime"))],
            &config,
        );
        assert!(!report.valid);
        assert_eq!(report.files[0].errors.len(), 2);

        let too_big = validate_files(&[file("a.mp4", config.max_file_size + 1, None)], &config);
        assert!(too_big.files[0].errors[0].contains("300MB"));

        let empty = validate_files(&[file("a.mp4", 0, None)], &config);
        assert!(!empty.valid);
    }

    #[test]
    fn test_mixed_extensions_rejected() {
        let config = UploadConfig::default();
        let report = validate_files(&[file("a.mp4", 1, None), file("b.avi", 1, None)], &config);
        assert!(!report.valid);
        assert!(report
            .files
            .iter()
            .all(|f| f.errors.iter().any(|e| e.contains("same type"))));
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("x.MP4").as_deref(), Some(".mp4"));
        assert_eq!(extension_of("noext"), None);
    }
}
