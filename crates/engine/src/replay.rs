//! WAL replay on open (spec.md §4.6, P-REPLAY): reapply every WAL entry
//! still sitting in the WAL region after the last checkpoint, in order,
//! against the in-memory indexes.
//!
//! The header's `data_size` is only ever updated at checkpoint time, so
//! right after `Writer::open` it reflects the *last checkpoint's* end of
//! the data region, not necessarily the file's true append position.
//! Everything appended since then has its record bytes durably on disk
//! (each write fsyncs the WAL entry, then the data-region bytes, in that
//! order) but the header doesn't know the data region grew — that's
//! exactly what the WAL region (reset to empty at every checkpoint) is
//! for: it lists, in order, the records appended since the last
//! checkpoint, which is enough to both re-derive their indexes and work
//! out where the data region's true end now sits.
//!
//! Replay never re-validates size limits the way a live write does — an
//! entry that made it into the WAL once already passed those checks, and
//! re-running them here would just make crash recovery depend on the same
//! `Limits` the original write used. It still stops at the first
//! corrupt/torn entry (`Writer::read_wal_entries` already does that) rather
//! than panicking.

use entitydb_core::{Error, Result};
use entitydb_storage::{StoredEntityRecord, WalEntry};

use crate::repository::EntityRepository;

/// Reapply every WAL entry from the last checkpoint forward against
/// `repo`'s live indexes, starting at `data_end` (the checkpointed data
/// region's end). Returns the number of entries applied and the data
/// region's true end once every entry's bytes are accounted for — the
/// caller fixes up the writer's append position with this before any new
/// write can happen.
pub fn replay(repo: &EntityRepository, entries: Vec<WalEntry>, data_end: u64) -> Result<(usize, u64)> {
    let mut offset = data_end;
    let mut applied = 0;
    for entry in entries {
        let (record, _) = StoredEntityRecord::decode(&entry.record_bytes, &[])
            .map_err(|e| Error::CorruptionDetected(format!("WAL replay: {e}")))?;
        let size = entry.record_bytes.len() as u32;
        repo.apply_wal_record(record.entity, offset, size)?;
        offset += size as u64;
        applied += 1;
    }
    Ok((applied, offset))
}
