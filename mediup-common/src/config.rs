//! Configuration loading and root folder resolution
//!
//! Resolution priority for every setting that can come from more than one
//! place:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! A missing or unreadable TOML file never prevents startup: a warning is
//! logged and compiled defaults are used.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming the root folder
pub const ROOT_FOLDER_ENV: &str = "MEDIUP_ROOT_FOLDER";

/// Legacy/short environment variable naming the root folder
pub const ROOT_ENV: &str = "MEDIUP_ROOT";

/// Environment variable naming an explicit TOML config file
pub const CONFIG_PATH_ENV: &str = "MEDIUP_CONFIG";

/// Logging section of the TOML file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Base level ("trace", "debug", "info", "warn", "error")
    pub level: String,
    /// Full `EnvFilter` directive, overrides `level` when present
    pub filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            filter: None,
        }
    }
}

/// Upload limits and progress-tracking policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Per-file size limit in bytes
    pub max_file_size: u64,
    /// Files accepted in a single session
    pub max_files_per_session: usize,
    /// Accepted extensions, lowercase with leading dot
    pub allowed_extensions: Vec<String>,
    /// Accepted MIME types
    pub allowed_mime_types: Vec<String>,
    /// Accepted upload categories (also the storage sub-directory names)
    pub categories: Vec<String>,
    /// Minimum interval between progress notifications for one session
    pub progress_throttle_ms: u64,
    /// Grace period before a completed session leaves the registry
    pub completion_cleanup_delay_ms: u64,
    /// Grace period before a cancelled session leaves the registry
    pub cancel_cleanup_delay_ms: u64,
    /// Interval of the stale-session sweep
    pub sweep_interval_secs: u64,
    /// Sessions older than this are evicted by the sweep regardless of status
    pub session_max_age_secs: u64,
    /// Percentage checkpoints emitted while a file is moved into storage
    pub staged_progress_steps: Vec<u8>,
    /// Delay before each staged checkpoint
    pub staged_progress_step_delay_ms: u64,
    /// Broadcast buffer for the tracker bus and each session channel
    pub event_channel_capacity: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size: 300 * 1024 * 1024,
            max_files_per_session: 3,
            allowed_extensions: vec![".mp4".to_string(), ".avi".to_string()],
            allowed_mime_types: vec![
                "video/mp4".to_string(),
                "video/avi".to_string(),
                "video/x-msvideo".to_string(),
            ],
            categories: vec!["personal".to_string(), "scenic".to_string()],
            progress_throttle_ms: 100,
            completion_cleanup_delay_ms: 5_000,
            cancel_cleanup_delay_ms: 2_000,
            sweep_interval_secs: 5 * 60,
            session_max_age_secs: 30 * 60,
            staged_progress_steps: vec![5, 15, 30, 45, 60, 75, 85, 95, 100],
            staged_progress_step_delay_ms: 300,
            event_channel_capacity: 256,
        }
    }
}

impl UploadConfig {
    pub fn progress_throttle(&self) -> Duration {
        Duration::from_millis(self.progress_throttle_ms)
    }

    pub fn completion_cleanup_delay(&self) -> Duration {
        Duration::from_millis(self.completion_cleanup_delay_ms)
    }

    pub fn cancel_cleanup_delay(&self) -> Duration {
        Duration::from_millis(self.cancel_cleanup_delay_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn session_max_age(&self) -> Duration {
        Duration::from_secs(self.session_max_age_secs)
    }

    pub fn staged_progress_step_delay(&self) -> Duration {
        Duration::from_millis(self.staged_progress_step_delay_ms)
    }

    /// Check internal consistency
    ///
    /// Rejects values that would make the engine misbehave rather than merely
    /// behave unusually (zero file limit, empty category list, checkpoints
    /// above 100 or out of order).
    pub fn validate(&self) -> Result<()> {
        if self.max_files_per_session == 0 {
            return Err(Error::Config(
                "max_files_per_session must be at least 1".to_string(),
            ));
        }
        if self.categories.is_empty() {
            return Err(Error::Config("at least one category is required".to_string()));
        }
        if self.event_channel_capacity == 0 {
            return Err(Error::Config(
                "event_channel_capacity must be at least 1".to_string(),
            ));
        }
        if self.staged_progress_steps.iter().any(|step| *step > 100) {
            return Err(Error::Config(
                "staged_progress_steps must be percentages (0-100)".to_string(),
            ));
        }
        if self
            .staged_progress_steps
            .windows(2)
            .any(|pair| pair[0] > pair[1])
        {
            return Err(Error::Config(
                "staged_progress_steps must be non-decreasing".to_string(),
            ));
        }
        Ok(())
    }

    /// True if `category` is one of the configured categories
    pub fn is_valid_category(&self, category: &str) -> bool {
        self.categories.iter().any(|c| c == category)
    }
}

/// Contents of the TOML configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub root_folder: Option<PathBuf>,
    pub bind_address: Option<String>,
    pub port: Option<u16>,
    pub logging: LoggingConfig,
    pub upload: UploadConfig,
}

/// Compiled defaults used when nothing else is configured
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub root_folder: PathBuf,
    pub bind_address: String,
    pub port: u16,
    pub log_level: String,
}

impl CompiledDefaults {
    /// Defaults for the platform this binary was compiled for
    pub fn for_current_platform() -> Self {
        Self {
            root_folder: default_root_folder(),
            bind_address: "127.0.0.1".to_string(),
            port: 8005,
            log_level: "info".to_string(),
        }
    }
}

/// Resolves the root folder following the module priority order
pub struct RootFolderResolver {
    module_name: String,
    cli_arg: Option<PathBuf>,
    toml_root: Option<PathBuf>,
}

impl RootFolderResolver {
    pub fn new(module_name: &str) -> Self {
        Self {
            module_name: module_name.to_string(),
            cli_arg: None,
            toml_root: None,
        }
    }

    /// Root folder given on the command line
    pub fn with_cli_arg(mut self, path: Option<PathBuf>) -> Self {
        self.cli_arg = path;
        self
    }

    /// Root folder from an already-loaded TOML config
    pub fn with_toml(mut self, config: &TomlConfig) -> Self {
        self.toml_root = config.root_folder.clone();
        self
    }

    /// Resolve the root folder (never fails; falls back to compiled default)
    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = &self.cli_arg {
            info!("{}: root folder from command line: {}", self.module_name, path.display());
            return path.clone();
        }

        for var in [ROOT_FOLDER_ENV, ROOT_ENV] {
            if let Ok(path) = std::env::var(var) {
                if !path.trim().is_empty() {
                    info!("{}: root folder from {}: {}", self.module_name, var, path);
                    return PathBuf::from(path);
                }
            }
        }

        if let Some(path) = &self.toml_root {
            info!("{}: root folder from TOML config: {}", self.module_name, path.display());
            return path.clone();
        }

        let fallback = CompiledDefaults::for_current_platform().root_folder;
        info!(
            "{}: root folder from compiled default: {}",
            self.module_name,
            fallback.display()
        );
        fallback
    }
}

/// Creates the directory layout under the root folder
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    pub fn root_folder(&self) -> &Path {
        &self.root_folder
    }

    /// `{root}/upload`
    pub fn upload_dir(&self) -> PathBuf {
        self.root_folder.join("upload")
    }

    /// `{root}/upload/temp` - staging area for bytes still being received
    pub fn temp_dir(&self) -> PathBuf {
        self.upload_dir().join("temp")
    }

    /// Create root, upload and temp directories if missing
    pub fn ensure_directory_exists(&self) -> Result<()> {
        std::fs::create_dir_all(self.temp_dir())?;
        Ok(())
    }
}

/// Candidate TOML paths, most specific first
///
/// An explicit path (CLI or `MEDIUP_CONFIG`) short-circuits the search.
pub fn config_file_candidates(explicit: Option<&Path>) -> Vec<PathBuf> {
    if let Some(path) = explicit {
        return vec![path.to_path_buf()];
    }
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        if !path.trim().is_empty() {
            return vec![PathBuf::from(path)];
        }
    }

    let mut candidates = Vec::new();
    if let Some(dir) = dirs::config_dir() {
        candidates.push(dir.join("mediup").join("config.toml"));
    }
    if cfg!(unix) {
        candidates.push(PathBuf::from("/etc/mediup/config.toml"));
    }
    candidates
}

/// Parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;
    config.upload.validate()?;
    Ok(config)
}

/// Load the first readable config file, or defaults
///
/// Graceful degradation: an existing but invalid file is reported and
/// skipped, never fatal.
pub fn load_or_default(explicit: Option<&Path>) -> TomlConfig {
    for candidate in config_file_candidates(explicit) {
        if !candidate.exists() {
            continue;
        }
        match load_toml_config(&candidate) {
            Ok(config) => {
                info!("Loaded config from {}", candidate.display());
                return config;
            }
            Err(e) => {
                warn!("Ignoring config file {}: {}", candidate.display(), e);
            }
        }
    }

    warn!("No usable config file found, using compiled defaults");
    TomlConfig::default()
}

/// Write a TOML config atomically (temp file + rename)
///
/// On Unix the file is created with mode 0600.
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);

    std::fs::write(&temp_path, content)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o600))?;
    }

    if let Err(e) = std::fs::rename(&temp_path, path) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(Error::Io(e));
    }

    Ok(())
}

/// OS-dependent default root folder
fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        dirs::data_local_dir()
            .map(|d| d.join("mediup"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/mediup"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("mediup"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/mediup"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("mediup"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\mediup"))
    } else {
        PathBuf::from("./mediup_data")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_defaults_match_service_limits() {
        let config = UploadConfig::default();
        assert_eq!(config.max_files_per_session, 3);
        assert_eq!(config.max_file_size, 300 * 1024 * 1024);
        assert_eq!(config.progress_throttle(), Duration::from_millis(100));
        assert_eq!(config.session_max_age(), Duration::from_secs(1800));
        assert_eq!(config.sweep_interval(), Duration::from_secs(300));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unordered_steps() {
        let config = UploadConfig {
            staged_progress_steps: vec![10, 50, 30],
            ..UploadConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_file_limit() {
        let config = UploadConfig {
            max_files_per_session: 0,
            ..UploadConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: TomlConfig = toml::from_str(
            r#"
            port = 9000

            [upload]
            max_files_per_session = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.port, Some(9000));
        assert_eq!(config.upload.max_files_per_session, 2);
        assert_eq!(config.upload.progress_throttle_ms, 100);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_category_lookup() {
        let config = UploadConfig::default();
        assert!(config.is_valid_category("personal"));
        assert!(config.is_valid_category("scenic"));
        assert!(!config.is_valid_category("other"));
    }
}
