//! # MEDIUP Common Library
//!
//! Shared code for the MEDIUP upload services including:
//! - Event types (UploadEvent enum, ProgressNotification) and the EventBus
//! - Configuration loading and root folder resolution
//! - Error types
//! - Timestamp and identifier helpers

pub mod config;
pub mod error;
pub mod events;
pub mod time;
pub mod uuid_utils;

pub use error::{Error, Result};
