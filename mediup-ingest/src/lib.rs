//! mediup-ingest library interface
//!
//! Upload session and progress tracking engine plus its HTTP surface.
//! Exposes public APIs for integration testing.

pub mod api;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use mediup_common::config::UploadConfig;
use mediup_common::events::EventBus;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

use crate::services::{
    spawn_sweeper, EventPublisher, LocalFileStore, ProgressTracker, SessionLifecycleService,
    SessionRegistry, StagedProgressPolicy, TrackerSettings,
};

/// Multipart overhead allowed on top of the file size limits
const MULTIPART_OVERHEAD_BYTES: usize = 1024 * 1024;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<UploadConfig>,
    /// Session state machine (owns the registry handle)
    pub tracker: ProgressTracker,
    pub lifecycle: SessionLifecycleService,
    /// Per-session notification topics for SSE clients
    pub publisher: EventPublisher,
    /// Tracker → publisher notification bus
    pub event_bus: EventBus,
    /// Staging area for bytes still being received
    pub temp_dir: PathBuf,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    /// Wire the engine together
    ///
    /// Completed files are stored under `upload_dir/{category}`; received
    /// bytes are staged in `temp_dir`.
    pub fn new(config: UploadConfig, upload_dir: PathBuf, temp_dir: PathBuf) -> Self {
        let config = Arc::new(config);
        let event_bus = EventBus::new(config.event_channel_capacity);
        let registry = SessionRegistry::new(config.progress_throttle());
        let tracker = ProgressTracker::new(
            registry,
            event_bus.clone(),
            TrackerSettings::from(config.as_ref()),
        );
        let lifecycle = SessionLifecycleService::new(
            tracker.clone(),
            Arc::new(LocalFileStore::new(upload_dir.clone())),
            StagedProgressPolicy::from(config.as_ref()),
            config.clone(),
            upload_dir,
        );
        let publisher = EventPublisher::new(config.event_channel_capacity);

        Self {
            config,
            tracker,
            lifecycle,
            publisher,
            event_bus,
            temp_dir,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    /// Start the event publisher and the stale-session sweeper
    pub fn start_background_tasks(&self) -> Vec<JoinHandle<()>> {
        vec![
            self.publisher.spawn(&self.event_bus),
            spawn_sweeper(
                self.tracker.clone(),
                self.publisher.clone(),
                self.config.sweep_interval(),
                self.config.session_max_age(),
            ),
        ]
    }

    /// Largest accepted upload request body
    pub fn upload_body_limit(&self) -> usize {
        let per_file = usize::try_from(self.config.max_file_size).unwrap_or(usize::MAX);
        per_file
            .saturating_mul(self.config.max_files_per_session)
            .saturating_add(MULTIPART_OVERHEAD_BYTES)
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    let body_limit = state.upload_body_limit();

    Router::new()
        .merge(api::upload_routes(body_limit))
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
