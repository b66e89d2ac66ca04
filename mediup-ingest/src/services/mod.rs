//! Upload engine services
//!
//! Leaf-first: the registry holds session state, the tracker applies
//! transitions and emits notifications, instrumentation feeds the tracker
//! from the byte stream, the publisher fans notifications out per session,
//! and the lifecycle service orchestrates whole uploads.

pub mod event_publisher;
pub mod file_validator;
pub mod progress_tracker;
pub mod session_lifecycle;
pub mod session_registry;
pub mod session_sweeper;
pub mod storage;
pub mod transfer_instrumentation;

pub use event_publisher::{channel_name, EventPublisher};
pub use file_validator::{validate_files, DeclaredFileInfo};
pub use progress_tracker::{ProgressTracker, TrackerSettings};
pub use session_lifecycle::{SessionLifecycleService, StagedProgressPolicy};
pub use session_registry::SessionRegistry;
pub use session_sweeper::spawn_sweeper;
pub use storage::{FileStore, LocalFileStore, StagedFile, StorageError, StoredFile};
pub use transfer_instrumentation::{TransferError, TransferInstrumentation};
