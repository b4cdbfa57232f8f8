//! Low-level EUFF file mechanics (spec.md §4.1, §4.2, §4.3): the fixed WAL
//! + data region layout, append/checkpoint, and index-region rewriting.
//!
//! Everything here runs under a single writer lock (`repository.mu` ->
//! `writer.mu` in the locking hierarchy, §5); concurrent readers only ever
//! see the file through the [`entitydb_storage::ReaderPool`], never through
//! this struct directly.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write as IoWrite};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use entitydb_core::{Entity, Error, Limits, Result, Timestamp};
use entitydb_durability::IntegrityGuard;
use entitydb_storage::{
    DeletionIndexRegion, EntityIndexRegion, EuffHeader, ReaderPool, StoredEntityRecord,
    TagIndexRegion, WalEntry, WalOp,
};
use parking_lot::Mutex;
use tracing::{info, warn};

/// Where a just-appended record landed: needed by the caller to update the
/// in-memory entity-index (§4.1.5 `offset`/`size`).
pub struct AppendResult {
    pub data_offset: u64,
    pub data_size: u32,
}

/// The three rebuildable index regions, serialized wholesale at checkpoint
/// time (§4.1.4–4.1.6). The writer treats these as opaque bytes it is
/// handed; building them from the live in-memory indexes is the
/// repository's job.
pub struct IndexSnapshot {
    pub tag_index: TagIndexRegion,
    pub entity_index: EntityIndexRegion,
    pub deletion_index: DeletionIndexRegion,
}

/// Owns the open file handle and region bookkeeping for one EUFF file.
///
/// The WAL region has a fixed capacity (`limits.max_wal_size`) reserved
/// immediately after the header; the data region begins right after it, at
/// a fixed offset, and grows without bound until the next checkpoint
/// rewrites the index regions past its current end. This keeps "a bounded,
/// recyclable WAL" and "an ever-growing data region" both sequential and
/// non-overlapping within one file.
pub struct Writer {
    path: PathBuf,
    file: Mutex<File>,
    header: Mutex<EuffHeader>,
    limits: Limits,
    integrity: std::sync::Arc<IntegrityGuard>,
    reader_pool: ReaderPool,
    wal_used: AtomicU64,
    data_end: AtomicU64,
}

impl Writer {
    /// Open an existing EUFF file whose header has already been validated
    /// by the caller (self-heal runs before this, §4.3.2), or create a
    /// fresh one if `header` is `None`.
    pub fn open(
        path: impl AsRef<Path>,
        header: Option<EuffHeader>,
        limits: Limits,
        integrity: std::sync::Arc<IntegrityGuard>,
        reader_pool: ReaderPool,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let header = match header {
            Some(h) => h,
            None => {
                let h = new_header_for(&limits);
                file.set_len(h.data_offset)?;
                file.seek(SeekFrom::Start(0))?;
                file.write_all(&h.encode())?;
                file.sync_all()?;
                h
            }
        };

        let data_end = header.data_offset.max(header.data_offset + header.data_size);
        let meta_len = file.metadata()?.len();
        integrity.record_known_good_size(meta_len);

        Ok(Writer {
            path,
            file: Mutex::new(file),
            header: Mutex::new(header),
            limits,
            integrity,
            reader_pool,
            wal_used: AtomicU64::new(0),
            data_end: AtomicU64::new(data_end),
        })
    }

    pub fn header(&self) -> EuffHeader {
        *self.header.lock()
    }

    fn wal_capacity(&self) -> u64 {
        self.header.lock().wal_size.max(self.limits.max_wal_size)
    }

    /// Append one WAL entry plus its data-region record (§4.2 `WriteEntity`
    /// step 2-4: WAL first, then data, both fsynced before the call
    /// returns). Fails with [`Error::StorageTransient`] if the WAL region
    /// has no room left — the caller is expected to [`Writer::checkpoint`]
    /// and retry (§4.3 "WAL full forces a checkpoint").
    pub fn append_record(&self, op: WalOp, entity: &Entity) -> Result<AppendResult> {
        let record = StoredEntityRecord::new(entity.clone());
        let record_bytes = record.encode();

        let entry_len = WalEntry::estimated_encoded_len(record_bytes.len());
        self.integrity
            .validate_write(entity.raw_size(), entry_len)?;

        let wal_offset = self.header.lock().wal_offset;
        let used = self.wal_used.load(Ordering::SeqCst);
        if used + entry_len > self.wal_capacity() {
            return Err(Error::StorageTransient(
                "WAL region is full, checkpoint required before this write can proceed".into(),
            ));
        }

        let wal_entry = WalEntry::new(op, record_bytes.clone()).encode();

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(wal_offset + used))
            .map_err(|e| Error::StorageTransient(format!("seek into WAL region: {e}")))?;
        file.write_all(&wal_entry)
            .map_err(|e| Error::StorageTransient(format!("WAL append failed: {e}")))?;
        file.sync_data()
            .map_err(|e| Error::StorageTransient(format!("WAL fsync failed: {e}")))?;

        let data_offset = self.data_end.load(Ordering::SeqCst);
        file.seek(SeekFrom::Start(data_offset))
            .map_err(|e| Error::StorageTransient(format!("seek into data region: {e}")))?;
        file.write_all(&record_bytes)
            .map_err(|e| Error::StorageTransient(format!("data append failed: {e}")))?;
        file.sync_data()
            .map_err(|e| Error::StorageTransient(format!("data fsync failed: {e}")))?;

        self.wal_used.fetch_add(entry_len, Ordering::SeqCst);
        self.data_end
            .fetch_add(record_bytes.len() as u64, Ordering::SeqCst);

        let new_size = file.metadata()?.len();
        drop(file);
        self.integrity.record_known_good_size(new_size);

        Ok(AppendResult {
            data_offset,
            data_size: record_bytes.len() as u32,
        })
    }

    /// Read one entity record back from the data region (used by `Get` and
    /// by replay-free reassembly paths). Goes through the reader pool, not
    /// a fresh `File::open`, so it respects P-BOUNDS.
    pub fn read_record_at(&self, offset: u64, size: u32) -> Result<Entity> {
        let reader = self
            .reader_pool
            .checkout()
            .map_err(|e| Error::StorageTransient(e.to_string()))?;
        let bytes = reader.bytes();
        let end = offset as usize + size as usize;
        if bytes.len() < end {
            return Err(Error::CorruptionDetected(format!(
                "entity-index points past end of file: offset {offset}, size {size}, file len {}",
                bytes.len()
            )));
        }
        let (record, _) = StoredEntityRecord::decode(&bytes[offset as usize..end], &[])
            .map_err(|e| Error::CorruptionDetected(e.to_string()))?;
        Ok(record.entity)
    }

    /// Read every WAL entry currently in the WAL region, in order, stopping
    /// at the first torn or absent entry (§4.6 replay-on-open, P-REPLAY).
    pub fn read_wal_entries(&self) -> Result<Vec<WalEntry>> {
        let header = self.header();
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(header.wal_offset))?;
        let mut buf = vec![0u8; header.wal_size.max(self.limits.max_wal_size) as usize];
        use std::io::Read;
        let n = file.read(&mut buf)?;
        buf.truncate(n);
        drop(file);

        let mut entries = Vec::new();
        let mut off = 0usize;
        while off < buf.len() {
            match WalEntry::try_decode(&buf[off..]) {
                Ok(Some((entry, consumed))) => {
                    off += consumed;
                    entries.push(entry);
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "stopping WAL replay at corrupt entry");
                    break;
                }
            }
        }
        Ok(entries)
    }

    /// Rewrite the three index regions past the current end of the data
    /// region, reset the WAL to empty, and fsync the new header (§4.3
    /// checkpoint sequence). Invalidates the reader pool afterward so the
    /// next checkout picks up the new layout (§4.4 lazy invalidation).
    pub fn checkpoint(&self, snapshot: IndexSnapshot, now: Timestamp) -> Result<()> {
        let data_end = self.data_end.load(Ordering::SeqCst);

        let tag_bytes = snapshot.tag_index.encode();
        let entity_bytes = snapshot.entity_index.encode();
        let deletion_bytes = snapshot.deletion_index.encode();

        let tag_offset = data_end;
        let entity_offset = tag_offset + tag_bytes.len() as u64;
        let deletion_offset = entity_offset + entity_bytes.len() as u64;
        let new_end = deletion_offset + deletion_bytes.len() as u64;

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(tag_offset))?;
        file.write_all(&tag_bytes)?;
        file.write_all(&entity_bytes)?;
        file.write_all(&deletion_bytes)?;
        file.set_len(new_end)?;
        file.sync_all()?;

        let mut header = self.header.lock();
        header.data_size = data_end - header.data_offset;
        header.tag_index_offset = tag_offset;
        header.tag_index_size = tag_bytes.len() as u64;
        header.entity_index_offset = entity_offset;
        header.entity_index_size = entity_bytes.len() as u64;
        header.deletion_index_offset = deletion_offset;
        header.deletion_index_size = deletion_bytes.len() as u64;
        header.last_checkpoint_ns = now.as_nanos();
        header.set_flag(entitydb_storage::format::flags::CLEAN_SHUTDOWN, true);
        let encoded = header.encode();
        drop(header);

        file.seek(SeekFrom::Start(0))?;
        file.write_all(&encoded)?;
        file.sync_all()?;
        let file_len = file.metadata()?.len();
        drop(file);

        self.wal_used.store(0, Ordering::SeqCst);
        self.integrity.record_known_good_size(file_len);
        self.reader_pool.invalidate();

        info!(
            data_size = data_end,
            tag_index_size = tag_bytes.len(),
            entity_index_size = entity_bytes.len(),
            deletion_index_size = deletion_bytes.len(),
            "checkpoint complete"
        );
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The writer's current notion of where the data region ends. Right
    /// after [`Writer::open`] this reflects the *last checkpoint's*
    /// `data_size` (the header field is only updated at checkpoint time),
    /// not necessarily the file's true append position if entries were
    /// written since — the caller fixes that up with
    /// [`Writer::set_data_end`] once it has replayed the WAL.
    pub fn data_end(&self) -> u64 {
        self.data_end.load(Ordering::SeqCst)
    }

    /// Correct the writer's data-end bookkeeping after WAL replay has
    /// established where the data region's true append position is
    /// (§4.6 replay-on-open): entries recorded in the WAL since the last
    /// checkpoint already have their record bytes durably on disk past the
    /// checkpointed `data_size`, so this must run before any new write.
    pub fn set_data_end(&self, value: u64) {
        self.data_end.store(value, Ordering::SeqCst);
    }
}

fn new_header_for(limits: &Limits) -> EuffHeader {
    EuffHeader::for_limits(limits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use entitydb_core::{EntityId, TagValue};

    fn small_limits() -> Limits {
        let mut l = Limits::for_testing();
        l.max_wal_size = 64 * 1024;
        l
    }

    fn writer_for(dir: &tempfile::TempDir) -> Writer {
        let path = dir.path().join("db.euff");
        let limits = small_limits();
        let integrity = std::sync::Arc::new(IntegrityGuard::new(&path, limits));
        let pool = ReaderPool::new(&path, 4);
        Writer::open(&path, None, limits, integrity, pool).unwrap()
    }

    fn entity(id: &str) -> Entity {
        Entity {
            id: EntityId::new(id).unwrap(),
            tags: vec![TagValue::new(Timestamp::from_nanos(1), "type:doc").unwrap()],
            content: b"hello".to_vec(),
        }
    }

    #[test]
    fn append_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let writer = writer_for(&dir);
        let e = entity("a");
        let res = writer.append_record(WalOp::Put, &e).unwrap();
        let read = writer.read_record_at(res.data_offset, res.data_size).unwrap();
        assert_eq!(read, e);
    }

    #[test]
    fn wal_entries_are_visible_before_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let writer = writer_for(&dir);
        writer.append_record(WalOp::Put, &entity("a")).unwrap();
        writer.append_record(WalOp::Put, &entity("b")).unwrap();
        let entries = writer.read_wal_entries().unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn checkpoint_resets_wal_and_bumps_reader_generation() {
        let dir = tempfile::tempdir().unwrap();
        let writer = writer_for(&dir);
        writer.append_record(WalOp::Put, &entity("a")).unwrap();

        let snapshot = IndexSnapshot {
            tag_index: TagIndexRegion::default(),
            entity_index: EntityIndexRegion::default(),
            deletion_index: DeletionIndexRegion::default(),
        };
        writer.checkpoint(snapshot, Timestamp::from_nanos(99)).unwrap();

        assert_eq!(writer.wal_used.load(Ordering::SeqCst), 0);
        assert_eq!(writer.header().last_checkpoint_ns, 99);
    }
}
