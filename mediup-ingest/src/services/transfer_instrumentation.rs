//! Transfer instrumentation
//!
//! Sits between the inbound byte stream and the tracker. Files arrive one
//! after another on a single stream, so every chunk belongs to the first
//! file whose declared bytes have not all arrived yet.
//!
//! Forwarding rules:
//! - A file whose declared bytes have all arrived is always forwarded
//! - Partial progress is forwarded at most once per throttle interval
//! - On a transfer error every outstanding file is failed before the error
//!   is returned

use futures::{Stream, StreamExt};
use std::fmt::Display;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::models::FileDescriptor;
use crate::services::ProgressTracker;
use crate::utils::ThrottleGate;

/// Failure while receiving file bytes
#[derive(Debug, Error)]
pub enum TransferError {
    /// The inbound stream broke
    #[error("Transfer interrupted: {0}")]
    Stream(String),

    /// Writing to the staging area failed
    #[error("Failed to stage upload: {0}")]
    Write(#[from] std::io::Error),

    /// Received byte count disagrees with the declared size
    #[error("File '{name}' declared {declared} bytes but {actual} arrived")]
    SizeMismatch {
        name: String,
        declared: u64,
        actual: u64,
    },

    /// Fewer files arrived than were declared
    #[error("Expected {expected} files but received {received}")]
    MissingFiles { expected: usize, received: usize },

    /// More files arrived than were declared
    #[error("Unexpected file: {0}")]
    UnexpectedFile(String),
}

#[derive(Debug)]
struct InstrumentedFile {
    descriptor: FileDescriptor,
    received: u64,
    /// Full-file update already sent
    forwarded: bool,
}

impl InstrumentedFile {
    fn is_full(&self) -> bool {
        self.received >= self.descriptor.size
    }
}

/// Byte-level observer for one upload request
pub struct TransferInstrumentation {
    tracker: ProgressTracker,
    session_id: String,
    files: Vec<InstrumentedFile>,
    total_size: u64,
    uploaded_size: u64,
    /// Bytes beyond the last declared file
    overflow: u64,
    gate: ThrottleGate,
}

impl TransferInstrumentation {
    /// Register `files` with the tracker before any byte arrives
    pub fn begin(
        tracker: ProgressTracker,
        session_id: impl Into<String>,
        files: Vec<FileDescriptor>,
        throttle: Duration,
    ) -> Self {
        let session_id = session_id.into();
        let total_size = files.iter().map(|f| f.size).sum();

        tracker.start_tracking(&session_id, files.len(), total_size);
        for file in &files {
            tracker.register_file(&session_id, file);
        }
        debug!(
            session_id = %session_id,
            total_files = files.len(),
            total_size,
            "Upload progress tracking initialized"
        );

        Self {
            tracker,
            session_id,
            files: files
                .into_iter()
                .map(|descriptor| InstrumentedFile {
                    descriptor,
                    received: 0,
                    forwarded: false,
                })
                .collect(),
            total_size,
            uploaded_size: 0,
            overflow: 0,
            gate: ThrottleGate::new(throttle),
        }
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Bytes observed across all files
    pub fn uploaded_size(&self) -> u64 {
        self.uploaded_size
    }

    /// Index of the file currently receiving bytes
    pub fn active_index(&self) -> Option<usize> {
        self.files.iter().position(|f| !f.is_full())
    }

    /// Attribute a chunk of `len` bytes and forward progress
    pub fn observe_chunk(&mut self, len: usize) {
        let mut remaining = len as u64;
        self.uploaded_size += remaining;

        let mut partial = None;
        while remaining > 0 {
            let Some(index) = self.active_index() else {
                self.overflow += remaining;
                break;
            };
            let file = &mut self.files[index];
            let take = remaining.min(file.descriptor.size - file.received);
            file.received += take;
            remaining -= take;
            if !file.is_full() {
                partial = Some(index);
            }
        }

        let now = Instant::now();
        // Everything before the cursor is full, empty files included
        let cursor = self.active_index().unwrap_or(self.files.len());
        for file in self.files[..cursor].iter_mut().filter(|f| !f.forwarded) {
            file.forwarded = true;
            self.tracker.update_file_progress(
                &self.session_id,
                &file.descriptor.id,
                file.descriptor.size,
                file.descriptor.size,
            );
        }

        if let Some(index) = partial {
            if self.gate.try_pass(now) {
                let file = &self.files[index];
                self.tracker.update_file_progress(
                    &self.session_id,
                    &file.descriptor.id,
                    file.received,
                    file.descriptor.size,
                );
            }
        }
    }

    /// Stream `source` into `writer`, observing every chunk
    ///
    /// Returns the byte count written. On failure every outstanding file is
    /// failed before the error is returned.
    pub async fn pipe<S, B, E, W>(&mut self, source: S, writer: &mut W) -> Result<u64, TransferError>
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: Display,
        W: AsyncWrite + Unpin,
    {
        match self.pipe_inner(source, writer).await {
            Ok(written) => Ok(written),
            Err(err) => {
                self.fail_outstanding(&err);
                Err(err)
            }
        }
    }

    async fn pipe_inner<S, B, E, W>(&mut self, source: S, writer: &mut W) -> Result<u64, TransferError>
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: Display,
        W: AsyncWrite + Unpin,
    {
        let mut source = std::pin::pin!(source);
        let mut written = 0u64;
        while let Some(chunk) = source.next().await {
            let chunk = chunk.map_err(|e| TransferError::Stream(e.to_string()))?;
            let bytes = chunk.as_ref();
            writer.write_all(bytes).await?;
            written += bytes.len() as u64;
            self.observe_chunk(bytes.len());
        }
        writer.flush().await?;
        Ok(written)
    }

    /// Check that file `index` received exactly its declared size
    pub fn verify_file(&self, index: usize, actual: u64) -> Result<(), TransferError> {
        let Some(file) = self.files.get(index) else {
            return Err(TransferError::UnexpectedFile(format!("#{}", index + 1)));
        };
        if actual != file.descriptor.size {
            return Err(TransferError::SizeMismatch {
                name: file.descriptor.original_name.clone(),
                declared: file.descriptor.size,
                actual,
            });
        }
        Ok(())
    }

    /// Check that every declared file arrived in full
    pub fn finish(&self, received_files: usize) -> Result<(), TransferError> {
        if received_files != self.files.len() {
            return Err(TransferError::MissingFiles {
                expected: self.files.len(),
                received: received_files,
            });
        }
        if self.overflow > 0 {
            return Err(TransferError::Stream(format!(
                "{} bytes beyond the declared files",
                self.overflow
            )));
        }
        Ok(())
    }

    /// Fail every file that has not resolved and settle the session
    pub fn fail_outstanding(&self, err: &TransferError) {
        let message = err.to_string();
        warn!(session_id = %self.session_id, error = %message, "Upload transfer failed");
        for file in &self.files {
            self.tracker
                .fail_file(&self.session_id, &file.descriptor.id, &message);
        }
        self.tracker.finalize_session(&self.session_id);
    }
}
