//! The unified error type for EntityDB (spec.md §7).
//!
//! Variant names track the error *kinds* the spec enumerates, not the
//! internal layer that raised them — a caller should be able to match on
//! `Error::NotFound` without knowing whether the miss came from the
//! deletion index or a missing entity-index entry.

use std::io;

use thiserror::Error;

/// Result alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified EntityDB error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Input violates schema, size, or charset constraints. Never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Entity id is absent, or present but filtered by the deletion index.
    #[error("entity not found: {0}")]
    NotFound(String),

    /// Entity exists but is in a deleted lifecycle state.
    #[error("entity deleted: {0}")]
    Deleted(String),

    /// Duplicate id on create.
    #[error("entity already exists: {0}")]
    Conflict(String),

    /// Disk-full-ish / fsync-retryable condition. The writer retries this
    /// up to 3x with backoff (§4.2 failure model) before surfacing it.
    #[error("transient storage error: {0}")]
    StorageTransient(String),

    /// Seek/stat mismatch, astronomical offset, or header CRC mismatch.
    /// Puts the integrity system into emergency mode (§4.3.1).
    #[error("fatal storage error: {0}")]
    StorageFatal(String),

    /// Pre-write cross-validation failed; the write was aborted with no
    /// state change (§4.2 `WriteEntity` step 1, §8 scenario 3).
    #[error("corruption detected, write aborted: {0}")]
    CorruptionDetected(String),

    /// Operation exceeded its deadline (§5 cancellation).
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// Metrics path only: the circuit breaker guarding this metrics
    /// component is open, the write was silently dropped by the caller's
    /// contract (§4.8.2).
    #[error("circuit open: {0}")]
    CircuitOpen(String),

    /// Logic violation that should never happen in a correct build.
    #[error("internal error: {0}")]
    Internal(String),

    /// Wrapped I/O error from the underlying filesystem.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// `STORAGE_TRANSIENT` and `TIMEOUT` are the only kinds the writer or a
    /// caller should retry (§7 propagation rules).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::StorageTransient(_) | Error::Timeout(_))
    }

    /// True for the two kinds that leave the engine in emergency/corrupt
    /// state and require a self-heal pass (§4.3.2).
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::StorageFatal(_) | Error::CorruptionDetected(_))
    }
}
