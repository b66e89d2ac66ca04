//! Unit tests for TOML atomic write utilities
//!
//! Covers:
//! - Atomic file operations (temp + rename)
//! - Round-trip of every section
//! - Permissions 0600 (Unix)

use mediup_common::config::{write_toml_config, LoggingConfig, TomlConfig, UploadConfig};
use std::path::PathBuf;
use tempfile::TempDir;

fn sample_config() -> TomlConfig {
    TomlConfig {
        root_folder: Some(PathBuf::from("/srv/media")),
        bind_address: Some("0.0.0.0".to_string()),
        port: Some(8105),
        logging: LoggingConfig {
            level: "debug".to_string(),
            filter: Some("mediup_ingest=trace".to_string()),
        },
        upload: UploadConfig {
            max_files_per_session: 2,
            staged_progress_steps: vec![25, 50, 100],
            ..UploadConfig::default()
        },
    }
}

#[test]
fn test_atomic_write_leaves_no_temp_file() {
    let temp_dir = TempDir::new().unwrap();
    let target = temp_dir.path().join("test.toml");

    write_toml_config(&sample_config(), &target).unwrap();

    assert!(target.exists());
    assert!(!temp_dir.path().join("test.toml.tmp").exists());
}

#[test]
fn test_atomic_write_creates_parent_directories() {
    let temp_dir = TempDir::new().unwrap();
    let target = temp_dir.path().join("a").join("b").join("config.toml");

    write_toml_config(&sample_config(), &target).unwrap();
    assert!(target.exists());
}

#[test]
fn test_roundtrip_serialization_preserves_data() {
    let temp_dir = TempDir::new().unwrap();
    let target = temp_dir.path().join("test.toml");
    let config = sample_config();

    write_toml_config(&config, &target).unwrap();

    let content = std::fs::read_to_string(&target).unwrap();
    let parsed: TomlConfig = toml::from_str(&content).unwrap();
    assert_eq!(parsed, config);
}

#[test]
fn test_overwrite_replaces_previous_content() {
    let temp_dir = TempDir::new().unwrap();
    let target = temp_dir.path().join("test.toml");

    write_toml_config(&sample_config(), &target).unwrap();
    write_toml_config(&TomlConfig::default(), &target).unwrap();

    let content = std::fs::read_to_string(&target).unwrap();
    let parsed: TomlConfig = toml::from_str(&content).unwrap();
    assert_eq!(parsed, TomlConfig::default());
}

#[test]
#[cfg(unix)]
fn test_atomic_write_sets_permissions_0600() {
    use std::os::unix::fs::PermissionsExt;

    let temp_dir = TempDir::new().unwrap();
    let target = temp_dir.path().join("test.toml");

    write_toml_config(&TomlConfig::default(), &target).unwrap();

    let mode = std::fs::metadata(&target).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
}
