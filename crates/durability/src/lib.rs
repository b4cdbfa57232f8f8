//! WAL integrity gating, quarantine/self-healing, and backup retention for
//! EntityDB (spec.md §4.3).
//!
//! This crate owns everything the spec calls "L3": the guard that runs
//! before every disk write and checkpoint, the recovery path that
//! quarantines an unhealthy file and rebuilds from what can still be
//! read, and the routine/emergency backup retention scheduler. WAL
//! replay itself (reapplying entries into the live indexes) is the
//! engine's job, since it needs the repository's write path; this crate
//! only decides *whether* a file is healthy enough to trust.

pub mod backup;
pub mod integrity;
pub mod self_heal;

pub use backup::{
    discover_backups, prune_backups, select_for_retention, take_backup, BackupFile, RetentionPolicy,
};
pub use integrity::IntegrityGuard;
pub use self_heal::{
    check_health, create_fresh, quarantine, recover_data_region, seed_recovered_data, HealthFailure,
};
