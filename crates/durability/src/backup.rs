//! Backup retention (spec.md §4.3.3).
//!
//! Routine backups land at `<data_path>/backups/<dbname>-<UTC>.edb`;
//! emergency backups (taken at corruption-detection time) at
//! `<data_path>/backups/<dbname>.corrupt-<UTC>.edb` and are exempt from
//! retention pruning for at least 24 hours.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Datelike, Timelike, Utc};
use entitydb_core::{Error, Result};
use tracing::info;

/// A backup retention policy: how many representative backups to keep
/// per bucket granularity, and an overall size cap.
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    pub hourly: usize,
    pub daily: usize,
    pub weekly: usize,
    pub max_total_mb: u64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        RetentionPolicy {
            hourly: 24,
            daily: 7,
            weekly: 4,
            max_total_mb: 10 * 1024,
        }
    }
}

/// A backup file as discovered on disk, with its creation time and
/// whether it is an emergency backup (exempt from pruning for 24h).
#[derive(Debug, Clone)]
pub struct BackupFile {
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
    pub emergency: bool,
}

fn bucket_hour(t: DateTime<Utc>) -> (i32, u32, u32, u32) {
    (t.year(), t.month(), t.day(), t.hour())
}

fn bucket_day(t: DateTime<Utc>) -> (i32, u32, u32) {
    (t.year(), t.month(), t.day())
}

fn bucket_week(t: DateTime<Utc>) -> (i32, u32) {
    let iso = t.iso_week();
    (iso.year(), iso.week())
}

/// Decide which backups to keep: the *latest* file in each of the most
/// recent `hourly` hour-buckets, `daily` day-buckets, and `weekly`
/// week-buckets, unioned together; everything else is a prune candidate.
/// Emergency backups younger than 24h are always kept regardless.
pub fn select_for_retention(
    mut backups: Vec<BackupFile>,
    policy: RetentionPolicy,
    now: DateTime<Utc>,
) -> (Vec<BackupFile>, Vec<BackupFile>) {
    backups.sort_by_key(|b| std::cmp::Reverse(b.created_at));

    let mut keep_paths = std::collections::HashSet::new();
    let mut seen_hours = std::collections::HashSet::new();
    let mut seen_days = std::collections::HashSet::new();
    let mut seen_weeks = std::collections::HashSet::new();

    for b in &backups {
        if b.emergency && now.signed_duration_since(b.created_at) < chrono::Duration::hours(24) {
            keep_paths.insert(b.path.clone());
            continue;
        }

        let hb = bucket_hour(b.created_at);
        if seen_hours.len() < policy.hourly && !seen_hours.contains(&hb) {
            seen_hours.insert(hb);
            keep_paths.insert(b.path.clone());
            continue;
        }

        let db = bucket_day(b.created_at);
        if seen_days.len() < policy.daily && !seen_days.contains(&db) {
            seen_days.insert(db);
            keep_paths.insert(b.path.clone());
            continue;
        }

        let wb = bucket_week(b.created_at);
        if seen_weeks.len() < policy.weekly && !seen_weeks.contains(&wb) {
            seen_weeks.insert(wb);
            keep_paths.insert(b.path.clone());
        }
    }

    let (mut keep, mut prune): (Vec<_>, Vec<_>) = backups
        .into_iter()
        .partition(|b| keep_paths.contains(&b.path));

    let cap_bytes = policy.max_total_mb * 1024 * 1024;
    let mut total: u64 = keep.iter().map(|b| b.size_bytes).sum();
    if total > cap_bytes {
        keep.sort_by_key(|b| b.created_at);
        while total > cap_bytes {
            let evictable_idx = keep.iter().position(|b| {
                !(b.emergency
                    && now.signed_duration_since(b.created_at) < chrono::Duration::hours(24))
            });
            match evictable_idx {
                Some(idx) => {
                    let evicted = keep.remove(idx);
                    total -= evicted.size_bytes;
                    prune.push(evicted);
                }
                None => break,
            }
        }
    }

    (keep, prune)
}

/// List every `.edb` backup file under `backups_dir` for `dbname`,
/// classifying routine vs. emergency by filename convention.
pub fn discover_backups(backups_dir: &Path, dbname: &str) -> Result<Vec<BackupFile>> {
    if !backups_dir.exists() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    let entries = fs::read_dir(backups_dir)
        .map_err(|e| Error::StorageTransient(format!("failed to list backups dir: {e}")))?;
    for entry in entries {
        let entry = entry.map_err(|e| Error::StorageTransient(e.to_string()))?;
        let path = entry.path();
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(n) => n,
            None => continue,
        };
        if !name.starts_with(dbname) || !name.ends_with(".edb") {
            continue;
        }
        let metadata = entry
            .metadata()
            .map_err(|e| Error::StorageTransient(e.to_string()))?;
        let created_at = metadata
            .modified()
            .unwrap_or(SystemTime::UNIX_EPOCH + Duration::from_secs(0))
            .into();
        out.push(BackupFile {
            path,
            created_at,
            size_bytes: metadata.len(),
            emergency: name.contains(".corrupt-"),
        });
    }
    Ok(out)
}

/// Take a routine backup of the live `.edb` file at `db_path`: the caller
/// must have already flushed/checkpointed so the bytes on disk are
/// consistent, then this copies the file to
/// `<backups_dir>/<dbname>-<UTC>.edb`. `emergency` names it
/// `<dbname>.corrupt-<UTC>.edb` instead, exempting it from pruning for 24h
/// (see [`select_for_retention`]).
pub fn take_backup(
    db_path: &Path,
    backups_dir: &Path,
    dbname: &str,
    emergency: bool,
    now: DateTime<Utc>,
) -> Result<BackupFile> {
    fs::create_dir_all(backups_dir)
        .map_err(|e| Error::StorageTransient(format!("failed to create backups dir: {e}")))?;

    let stamp = now.format("%Y%m%dT%H%M%S%.3fZ");
    let filename = if emergency {
        format!("{dbname}.corrupt-{stamp}.edb")
    } else {
        format!("{dbname}-{stamp}.edb")
    };
    let dest = backups_dir.join(&filename);

    fs::copy(db_path, &dest)
        .map_err(|e| Error::StorageTransient(format!("failed to copy backup: {e}")))?;
    let size_bytes = fs::metadata(&dest)
        .map_err(|e| Error::StorageTransient(format!("failed to stat backup: {e}")))?
        .len();

    info!(path = %dest.display(), size_bytes, emergency, "took backup");
    Ok(BackupFile { path: dest, created_at: now, size_bytes, emergency })
}

/// Apply a retention decision by deleting every file in `prune`.
pub fn prune_backups(prune: &[BackupFile]) -> Result<()> {
    for b in prune {
        fs::remove_file(&b.path)
            .map_err(|e| Error::StorageTransient(format!("failed to prune backup: {e}")))?;
        info!(path = %b.path.display(), "pruned backup");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hours_ago: i64) -> DateTime<Utc> {
        Utc::now() - chrono::Duration::hours(hours_ago)
    }

    fn file(path: &str, hours_ago: i64, emergency: bool) -> BackupFile {
        BackupFile {
            path: PathBuf::from(path),
            created_at: at(hours_ago),
            size_bytes: 1024,
            emergency,
        }
    }

    #[test]
    fn keeps_one_per_recent_hour() {
        let backups = vec![
            file("a", 1, false),
            file("b", 1, false),
            file("c", 2, false),
        ];
        let policy = RetentionPolicy {
            hourly: 24,
            daily: 0,
            weekly: 0,
            max_total_mb: u64::MAX,
        };
        let (keep, prune) = select_for_retention(backups, policy, Utc::now());
        assert_eq!(keep.len(), 2);
        assert_eq!(prune.len(), 1);
    }

    #[test]
    fn emergency_backup_survives_24h() {
        let backups = vec![file("emergency", 2, true)];
        let policy = RetentionPolicy {
            hourly: 0,
            daily: 0,
            weekly: 0,
            max_total_mb: u64::MAX,
        };
        let (keep, prune) = select_for_retention(backups, policy, Utc::now());
        assert_eq!(keep.len(), 1);
        assert!(prune.is_empty());
    }

    #[test]
    fn size_cap_prunes_oldest_first() {
        let backups = vec![
            file("old", 100, false),
            file("mid", 2, false),
            file("new", 1, false),
        ];
        let policy = RetentionPolicy {
            hourly: 24,
            daily: 7,
            weekly: 4,
            max_total_mb: 0,
        };
        let (keep, prune) = select_for_retention(backups, policy, Utc::now());
        assert!(keep.len() < 3);
        assert!(!prune.is_empty());
    }

    #[test]
    fn week_bucketing_is_iso_week() {
        let t1 = Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2026, 1, 6, 0, 0, 0).unwrap();
        assert_eq!(bucket_week(t1), bucket_week(t2));
    }

    #[test]
    fn take_backup_copies_file_into_backups_dir() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.euff");
        fs::write(&db_path, b"fake euff bytes").unwrap();
        let backups_dir = dir.path().join("backups");

        let backup = take_backup(&db_path, &backups_dir, "test", false, Utc::now()).unwrap();

        assert!(backup.path.exists());
        assert!(!backup.emergency);
        assert_eq!(fs::read(&backup.path).unwrap(), b"fake euff bytes");
        assert!(backup.path.file_name().unwrap().to_str().unwrap().starts_with("test-"));
    }

    #[test]
    fn take_backup_emergency_uses_corrupt_naming() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.euff");
        fs::write(&db_path, b"fake euff bytes").unwrap();
        let backups_dir = dir.path().join("backups");

        let backup = take_backup(&db_path, &backups_dir, "test", true, Utc::now()).unwrap();

        assert!(backup.emergency);
        let name = backup.path.file_name().unwrap().to_str().unwrap();
        assert!(name.contains(".corrupt-"));
        assert!(discover_backups(&backups_dir, "test").unwrap()[0].emergency);
    }
}
