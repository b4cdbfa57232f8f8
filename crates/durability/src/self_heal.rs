//! Quarantine and self-healing (spec.md §4.3.2).
//!
//! On open, if the header CRC, an index-region CRC, or any index offset
//! exceeds the data region's size, the file is not trustworthy. Rather
//! than fail to open, the engine renames it aside, starts a fresh file,
//! and rebuilds everything it can recover from the WAL and data regions
//! of the quarantined copy.

use std::fs;
use std::path::{Path, PathBuf};

use entitydb_core::{Error, Limits, Result, Timestamp};
use entitydb_storage::format::{EuffHeader, POST_HEADER_OFFSET};
use entitydb_storage::{StoredEntityRecord, WalEntry};
use tracing::{info, warn};

/// Why a file was judged unhealthy on open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthFailure {
    HeaderCrcMismatch,
    HeaderMagicMismatch,
    IndexOffsetBeyondDataRegion { offset: u64, data_region_size: u64 },
    Truncated,
}

/// Check a freshly-read header and file size for the conditions that
/// trigger self-heal. Does not touch the filesystem beyond what the
/// caller already read.
pub fn check_health(file_size: u64, header: Option<&EuffHeader>) -> Option<HealthFailure> {
    let header = match header {
        Some(h) => h,
        None => return Some(HealthFailure::HeaderCrcMismatch),
    };

    if header.tag_index_offset > file_size
        || header.entity_index_offset > file_size
        || header.deletion_index_offset > file_size
    {
        return Some(HealthFailure::IndexOffsetBeyondDataRegion {
            offset: header
                .tag_index_offset
                .max(header.entity_index_offset)
                .max(header.deletion_index_offset),
            data_region_size: file_size,
        });
    }

    if file_size < POST_HEADER_OFFSET {
        return Some(HealthFailure::Truncated);
    }

    None
}

/// Quarantine the unhealthy file at `path`: rename it to
/// `<name>.corrupt-<UTC>` and return the quarantine path so the caller
/// can attempt WAL/data-region replay from it.
pub fn quarantine(path: &Path) -> Result<PathBuf> {
    let stamp = Timestamp::now().to_compact_utc();
    let quarantine_path = {
        let mut p = path.to_path_buf();
        let file_name = p
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::Internal("database path has no file name".into()))?
            .to_string();
        p.set_file_name(format!("{file_name}.corrupt-{stamp}"));
        p
    };

    fs::rename(path, &quarantine_path)
        .map_err(|e| Error::StorageFatal(format!("failed to quarantine corrupt file: {e}")))?;

    warn!(
        original = %path.display(),
        quarantine = %quarantine_path.display(),
        "quarantined corrupt database file"
    );
    Ok(quarantine_path)
}

/// Create a brand-new, empty EUFF file at `path` with a fresh header
/// sized for `limits`, as step (b) of self-heal.
pub fn create_fresh(path: &Path, limits: &Limits) -> Result<()> {
    let header = EuffHeader::for_limits(limits);
    fs::write(path, header.encode())
        .map_err(|e| Error::StorageFatal(format!("failed to create fresh database file: {e}")))?;
    info!(path = %path.display(), "created fresh database file after quarantine");
    Ok(())
}

/// Seed a just-created fresh file's data region with `recovered` bytes
/// (the output of [`recover_data_region`]), treating them as already
/// checkpointed — the engine's ordinary rebuild-from-data-region pass
/// then reconstructs every live index from them on open exactly as it
/// would for any other checkpointed file. A no-op if `recovered` is empty.
pub fn seed_recovered_data(path: &Path, recovered: &[u8]) -> Result<()> {
    if recovered.is_empty() {
        return Ok(());
    }

    let raw = fs::read(path)
        .map_err(|e| Error::StorageFatal(format!("failed to read fresh database file: {e}")))?;
    let mut header = EuffHeader::decode(&raw)
        .ok_or_else(|| Error::Internal("freshly created database file has no valid header".into()))?;

    let data_end = header.data_offset + recovered.len() as u64;
    header.data_size = recovered.len() as u64;
    header.tag_index_offset = data_end;
    header.entity_index_offset = data_end;
    header.deletion_index_offset = data_end;

    use std::io::{Seek, SeekFrom, Write};
    let mut file = fs::OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|e| Error::StorageFatal(format!("failed to open fresh database file: {e}")))?;
    file.seek(SeekFrom::Start(header.data_offset))
        .map_err(|e| Error::StorageFatal(format!("failed to seek fresh database file: {e}")))?;
    file.write_all(recovered)
        .map_err(|e| Error::StorageFatal(format!("failed to write recovered data: {e}")))?;
    file.seek(SeekFrom::Start(0))
        .map_err(|e| Error::StorageFatal(format!("failed to seek fresh database file: {e}")))?;
    file.write_all(&header.encode())
        .map_err(|e| Error::StorageFatal(format!("failed to rewrite header: {e}")))?;
    file.sync_all()
        .map_err(|e| Error::StorageFatal(format!("failed to fsync recovered database file: {e}")))?;

    info!(path = %path.display(), recovered_bytes = recovered.len(), "seeded fresh database file with recovered data");
    Ok(())
}

/// Steps (c)/(d) of self-heal: best-effort recovery of the quarantined
/// file's checkpointed data region plus whatever the WAL region still
/// holds on top of it, returned as one data-region blob in on-disk record
/// order. A caller seeds a fresh file's data region with this so the
/// engine's normal rebuild-from-data-region pass recovers every record
/// that was still decodable.
///
/// Stops at the first corrupt or torn record in either region — the same
/// "recover what's readable, no further" rule `rebuild_from_data_region`
/// and WAL replay already apply on a healthy file. If the quarantined
/// header itself didn't decode, falls back to the region layout implied
/// by `limits` (the WAL/data split is a fixed function of `max_wal_size`,
/// never stored redundantly anywhere else). Returns an empty blob rather
/// than failing if the quarantined file isn't even readable.
pub fn recover_data_region(quarantine_path: &Path, limits: &Limits) -> Vec<u8> {
    let raw = match fs::read(quarantine_path) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, path = %quarantine_path.display(), "could not read quarantined file for recovery");
            return Vec::new();
        }
    };

    let header = EuffHeader::decode(&raw);
    let (wal_offset, wal_size, data_offset, data_size) = match &header {
        Some(h) => (h.wal_offset, h.wal_size, h.data_offset, h.data_size),
        None => {
            let wal_offset = POST_HEADER_OFFSET;
            (wal_offset, limits.max_wal_size, wal_offset + limits.max_wal_size, 0)
        }
    };

    let mut recovered = Vec::new();
    let mut recovered_records = 0usize;

    let data_end = (data_offset + data_size).min(raw.len() as u64);
    let mut offset = data_offset;
    while offset < data_end {
        match StoredEntityRecord::decode(&raw[offset as usize..data_end as usize], &[]) {
            Ok((record, consumed)) => {
                recovered.extend_from_slice(&raw[offset as usize..offset as usize + consumed]);
                offset += consumed as u64;
                recovered_records += 1;
            }
            Err(_) => break,
        }
    }

    let wal_end = (wal_offset + wal_size).min(raw.len() as u64);
    let mut wal_off = wal_offset.min(wal_end);
    let mut replayed_entries = 0usize;
    while wal_off < wal_end {
        match WalEntry::try_decode(&raw[wal_off as usize..wal_end as usize]) {
            Ok(Some((entry, consumed))) => {
                recovered.extend_from_slice(&entry.record_bytes);
                wal_off += consumed as u64;
                replayed_entries += 1;
            }
            _ => break,
        }
    }

    info!(
        path = %quarantine_path.display(),
        recovered_records,
        replayed_entries,
        recovered_bytes = recovered.len(),
        "recovered quarantined file's data and WAL regions"
    );
    recovered
}
