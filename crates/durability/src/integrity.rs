//! Pre-write validation and emergency mode (spec.md §4.3.1).
//!
//! The integrity system runs before every disk write and around every
//! checkpoint. It estimates the write's on-disk footprint before
//! allocating it, rejects anything that looks astronomically wrong
//! outright, and flips into emergency mode (deny all writes) rather than
//! letting a clearly-corrupt offset reach the data region.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use entitydb_core::{Error, Limits, Result};
use parking_lot::Mutex;
use tracing::{error, warn};

/// Tracks whether the current seek/stat position looks sane, and whether
/// the system has tripped into emergency mode.
pub struct IntegrityGuard {
    path: PathBuf,
    limits: Limits,
    emergency: AtomicBool,
    health: Mutex<HealthCache>,
}

#[derive(Default, Clone, Copy)]
struct HealthCache {
    last_known_good_size: u64,
}

impl IntegrityGuard {
    pub fn new(path: impl AsRef<Path>, limits: Limits) -> Self {
        IntegrityGuard {
            path: path.as_ref().to_path_buf(),
            limits,
            emergency: AtomicBool::new(false),
            health: Mutex::new(HealthCache::default()),
        }
    }

    pub fn is_emergency(&self) -> bool {
        self.emergency.load(Ordering::SeqCst)
    }

    /// Trip into emergency mode: every subsequent write is denied until
    /// `clear_emergency` is called by a successful self-heal (§4.3.2).
    pub fn enter_emergency(&self, reason: &str) {
        if !self.emergency.swap(true, Ordering::SeqCst) {
            error!(reason, "integrity system entering emergency mode");
        }
    }

    pub fn clear_emergency(&self) {
        self.emergency.store(false, Ordering::SeqCst);
    }

    /// Validate an about-to-be-written entity before any bytes reach disk
    /// (§4.2 `WriteEntity` step 1): size limits, astronomical guard, and a
    /// seek/stat cross-check against the file's actual size.
    pub fn validate_write(&self, raw_entity_size: usize, estimated_entry_len: u64) -> Result<()> {
        if self.is_emergency() {
            return Err(Error::CorruptionDetected(
                "integrity system is in emergency mode".into(),
            ));
        }

        if raw_entity_size as u64 > self.limits.max_entity_size {
            return Err(Error::Validation(format!(
                "entity size {} exceeds MAX_ENTITY_SIZE {}",
                raw_entity_size, self.limits.max_entity_size
            )));
        }

        if estimated_entry_len > self.limits.max_entry_length {
            return Err(Error::Validation(format!(
                "WAL entry length {} exceeds MAX_ENTRY_LENGTH {}",
                estimated_entry_len, self.limits.max_entry_length
            )));
        }

        if estimated_entry_len >= self.limits.astronomical_threshold {
            self.enter_emergency("astronomical entry length");
            return Err(Error::CorruptionDetected(format!(
                "estimated entry length {} at or beyond astronomical threshold {}",
                estimated_entry_len, self.limits.astronomical_threshold
            )));
        }

        self.cross_validate_offset()?;
        Ok(())
    }

    /// Cross-validates that the file's reported size matches the last
    /// known-good size this process has observed (§3.2 "file size is the
    /// single source of truth"; §4.2 `WriteEntity`, §8 scenario 3). A
    /// mismatch — the file shrank, or grew by more than this process
    /// itself wrote — means something outside this writer touched the
    /// file, or the OS handed back a corrupt seek/stat pair.
    pub fn cross_validate_offset(&self) -> Result<()> {
        let metadata = fs::metadata(&self.path).map_err(|e| {
            Error::StorageTransient(format!("stat failed for {}: {e}", self.path.display()))
        })?;
        let actual_size = metadata.len();

        if actual_size >= self.limits.astronomical_threshold {
            self.enter_emergency("astronomical file size");
            return Err(Error::StorageFatal(format!(
                "file size {actual_size} at or beyond astronomical threshold {}",
                self.limits.astronomical_threshold
            )));
        }

        let mut health = self.health.lock();
        if actual_size < health.last_known_good_size {
            warn!(
                actual_size,
                last_known_good_size = health.last_known_good_size,
                "file shrank since last observation"
            );
            return Err(Error::StorageFatal(format!(
                "file size went from {} to {}",
                health.last_known_good_size, actual_size
            )));
        }
        health.last_known_good_size = actual_size;
        Ok(())
    }

    pub fn record_known_good_size(&self, size: u64) {
        self.health.lock().last_known_good_size = size;
    }
}
