//! The embedded facade (spec.md §6.4): `Database`/`OpenOptions` wrap
//! `entitydb-engine::EntityRepository` behind the boundary-facing
//! `Create`/`Get`/`Update`/`Delete`/`Restore`/`List`/`Query`/temporal
//! surface, applying input validation before any call reaches the engine.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use entitydb_concurrency::{RetentionScheduleConfig, RetentionScheduler};
use entitydb_core::{AuditSink, Entity, EntityId, LifecycleState, NullAuditSink, Result, TagValue, Timestamp};
use entitydb_durability::{discover_backups, prune_backups, select_for_retention, take_backup, BackupFile, RetentionPolicy};
use entitydb_engine::EntityRepository;
use parking_lot::Mutex;

use crate::config::EngineConfig;
use crate::validation::validate_entity_input;

/// A `Create` request: a caller-chosen id, a set of tag strings (each
/// timestamped `now` unless the engine decides otherwise), content bytes,
/// and an optional content-type hint consulted by auto-chunking (§3.4).
#[derive(Debug, Clone)]
pub struct NewEntity {
    pub id: String,
    pub tags: Vec<String>,
    pub content: Vec<u8>,
    pub content_type: Option<String>,
}

/// Restricts `List` to entities currently carrying a tag whose value
/// starts with `tag_prefix`; `None` lists every live entity.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub tag_prefix: Option<String>,
}

/// A `Query` predicate: the AND-intersection of entities currently
/// carrying every tag value listed (§4.6 `Query`).
#[derive(Debug, Clone, Default)]
pub struct TagPredicate {
    pub tags: Vec<String>,
}

/// One tag event as returned by `History`, stripped of which namespace it
/// belonged to beyond what's encoded in `value` itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineEvent {
    pub timestamp: Timestamp,
    pub value: String,
}

impl From<TagValue> for TimelineEvent {
    fn from(tag: TagValue) -> Self {
        TimelineEvent { timestamp: tag.timestamp, value: tag.value }
    }
}

/// What changed between two points in an entity's timeline (§4.7 `Diff`).
pub use entitydb_engine::DiffResult as EntityDiff;

/// Builder for opening a [`Database`]: layers an optional admin-supplied
/// [`EngineConfig`] override and an optional [`AuditSink`] on top of the
/// three-tier config resolution in [`EngineConfig::resolve`].
#[derive(Default)]
pub struct OpenOptions {
    config_override: Option<EngineConfig>,
    audit: Option<Arc<dyn AuditSink>>,
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Supply a fully- or partially-assembled config that wins over any
    /// `ENTITYDB_*` environment variable (§2.3 precedence).
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config_override = Some(config);
        self
    }

    /// Install an audit sink the engine reports every operation to (§4.9).
    pub fn audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    /// Resolve configuration and open the database file it points at.
    pub fn open(self) -> Result<Database> {
        let config = EngineConfig::resolve(self.config_override);
        let path = config.database_path();
        let limits = config.limits();
        let audit = self.audit.unwrap_or_else(|| Arc::new(NullAuditSink));
        let repository = EntityRepository::open_with_audit(
            &path,
            limits,
            config.checkpoint_ops,
            std::time::Duration::from_secs(config.checkpoint_interval_secs),
            audit,
        )?;
        let retention = Mutex::new(RetentionScheduler::new(RetentionScheduleConfig::default()));
        let backup_policy = RetentionPolicy {
            hourly: config.backup_retention_hours as usize,
            daily: config.backup_retention_days as usize,
            weekly: config.backup_retention_weeks as usize,
            max_total_mb: config.backup_max_size_mb,
        };
        let backups_dir = std::path::Path::new(&config.data_path).join("backups");
        let dbname = std::path::Path::new(&config.database_filename)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| config.database_filename.clone());
        Ok(Database {
            repository,
            path,
            retention,
            backup_policy,
            backups_dir,
            dbname,
            backup_interval: Duration::from_secs(config.backup_interval_secs),
            last_backup: Mutex::new(None),
        })
    }
}

/// The embedded database handle. Every method maps directly onto one
/// `EntityRepository` operation; this layer's only job is validating
/// caller input and shaping it into the types the engine expects.
pub struct Database {
    repository: EntityRepository,
    path: PathBuf,
    retention: Mutex<RetentionScheduler>,
    backup_policy: RetentionPolicy,
    backups_dir: PathBuf,
    dbname: String,
    backup_interval: Duration,
    last_backup: Mutex<Option<Instant>>,
}

impl Database {
    /// Open (or create) the database file `config` points at, using the
    /// built-in default audit sink (§6.4 `Database::open`).
    pub fn open(config: EngineConfig) -> Result<Database> {
        OpenOptions::new().config(config).open()
    }

    /// The EUFF file path this handle was opened against.
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Create a new entity (§4.6 `Create`). Fails with
    /// [`Error::Conflict`] if `entity.id` is already live or deleted.
    pub fn create(&self, entity: NewEntity) -> Result<EntityId> {
        validate_entity_input(&entity.id, &entity.tags)?;
        let id = EntityId::new(entity.id)?;
        let now = Timestamp::now();
        let tags = entity
            .tags
            .into_iter()
            .map(|value| TagValue::new(now, value))
            .collect::<Result<Vec<_>>>()?;
        let created = self.repository.create(
            id,
            tags,
            entity.content,
            entity.content_type.as_deref(),
            now,
        )?;
        Ok(created.id)
    }

    /// Read an entity back (§4.6 `Get`, §9 resolution on tag timestamps).
    ///
    /// `include_timestamps = true` returns the full per-tag append
    /// history; `false` collapses it to the tag set active right now (one
    /// value per namespace, via [`Entity::tag_set_as_of`]), matching the
    /// boundary's default of hiding timestamps unless asked for.
    pub fn get(&self, id: &EntityId, include_timestamps: bool) -> Result<Entity> {
        let entity = self.repository.get(id)?;
        if include_timestamps {
            return Ok(entity);
        }
        let now = entity.tags.last().map(|t| t.timestamp).unwrap_or(Timestamp::now());
        let collapsed = entity
            .tag_set_as_of(now)
            .into_iter()
            .cloned()
            .collect();
        Ok(Entity { id: entity.id, tags: collapsed, content: entity.content })
    }

    /// Append tags and/or replace content on an existing, non-deleted
    /// entity (§4.6 `Update`).
    pub fn update(&self, id: &EntityId, tags: Vec<String>, content: Option<Vec<u8>>) -> Result<Entity> {
        validate_entity_input(id.as_str(), &tags)?;
        let now = Timestamp::now();
        let tags = tags
            .into_iter()
            .map(|value| TagValue::new(now, value))
            .collect::<Result<Vec<_>>>()?;
        self.repository.update(id, tags, content, None, now)
    }

    /// Soft/archive/purge an entity (§4.6 `Delete`).
    pub fn delete(&self, id: &EntityId, state: LifecycleState) -> Result<()> {
        self.repository.delete(id, state, Timestamp::now())
    }

    /// Reverse a soft/archived deletion (§4.6 `Restore`).
    pub fn restore(&self, id: &EntityId) -> Result<Entity> {
        self.repository.restore(id, Timestamp::now())
    }

    /// Every live entity, optionally narrowed to those carrying a tag
    /// matching `filter.tag_prefix`, capped at `limit` results (§4.6 `List`).
    pub fn list(&self, filter: ListFilter, limit: usize) -> Vec<EntityId> {
        let mut ids = self.repository.list();
        if let Some(prefix) = &filter.tag_prefix {
            ids.retain(|id| {
                self.repository
                    .get(id)
                    .map(|e| e.tags.iter().any(|t| t.value.starts_with(prefix.as_str())))
                    .unwrap_or(false)
            });
        }
        ids.truncate(limit);
        ids
    }

    /// Entities currently matching every tag in `predicate` (§4.6 `Query`).
    pub fn query(&self, predicate: TagPredicate, limit: usize) -> Vec<EntityId> {
        let mut ids = self.repository.query(&predicate.tags);
        ids.truncate(limit);
        ids
    }

    /// The tag set active at or before `t` (§4.7 `AsOf`).
    pub fn as_of(&self, id: &EntityId, t: Timestamp) -> Result<Vec<TagValue>> {
        self.repository.as_of(id, t)
    }

    /// Every tag event in `[from, to)`, defaulting to the full history
    /// when either bound is omitted (§4.7 `History`).
    pub fn history(
        &self,
        id: &EntityId,
        from: Option<Timestamp>,
        to: Option<Timestamp>,
    ) -> Result<Vec<TimelineEvent>> {
        let from = from.unwrap_or(Timestamp::EPOCH);
        let to = to.unwrap_or(Timestamp::MAX);
        let events = self.repository.history(id, from, to)?;
        Ok(events.into_iter().map(TimelineEvent::from).collect())
    }

    /// What changed between `t1` and `t2` (§4.7 `Diff`).
    pub fn diff(&self, id: &EntityId, t1: Timestamp, t2: Timestamp) -> Result<EntityDiff> {
        self.repository.diff(id, t1, t2)
    }

    /// Entities that changed at or after `since`, ordered by change time
    /// (§4.7 `ChangesSince`).
    pub fn changes_since(&self, since: Timestamp) -> Vec<(EntityId, Timestamp)> {
        self.repository.changes_since(since)
    }

    /// Force a checkpoint: snapshot every live index to disk and reset the
    /// WAL (§4.3 checkpoint sequence).
    pub fn checkpoint(&self) -> Result<()> {
        self.repository.checkpoint(Timestamp::now())
    }

    /// Checkpoint and drop the handle. A plain `drop` also leaves the
    /// database durable (every write already fsyncs before returning) —
    /// this just guarantees a fresh checkpoint on the way out.
    pub fn close(self) -> Result<()> {
        self.checkpoint()
    }

    /// Write one metric entity through the engine's own circuit breaker
    /// (§4.8.2); a tripped-open breaker drops the write silently instead
    /// of returning an error. `id` should carry the `metrics:` namespace
    /// prefix so the repository's recursion guard recognizes it.
    pub fn write_metric(&self, id: &str, tags: Vec<String>) -> Result<()> {
        let id = EntityId::new(id)?;
        let now = Timestamp::now();
        let tags = tags
            .into_iter()
            .map(|value| TagValue::new(now, value))
            .collect::<Result<Vec<_>>>()?;
        self.repository.write_metric(id, tags)
    }

    /// Run `sweep` as a background metrics-retention pass if the
    /// scheduler says one is due (past the startup grace period, past the
    /// interval since the last run, and not reentrant from inside a
    /// metrics write) — §4.8.3. Returns whether `sweep` actually ran.
    ///
    /// This only decides *whether* to run; a host embedding `Database`
    /// is responsible for calling it on its own background interval and
    /// supplying the sweep itself (e.g. `List` + prune metric entities
    /// past their retention window).
    pub fn maybe_run_metrics_retention(&self, sweep: impl FnOnce(&Database)) -> bool {
        let mut scheduler = self.retention.lock();
        if !scheduler.may_run(self.repository.metrics_guard()) {
            return false;
        }
        sweep(self);
        scheduler.record_run();
        true
    }

    /// Checkpoint, then copy the live `.edb` file into `backups/` as a
    /// routine (or, for self-heal call sites, `emergency`) backup,
    /// pruning anything [`select_for_retention`] no longer wants to keep
    /// (§4.3.3). Unconditional — call through [`Database::maybe_run_backup`]
    /// for interval-gated routine backups.
    pub fn take_backup(&self, emergency: bool) -> Result<BackupFile> {
        self.checkpoint()?;
        let backup = take_backup(&self.path, &self.backups_dir, &self.dbname, emergency, Utc::now())?;
        let discovered = discover_backups(&self.backups_dir, &self.dbname)?;
        let (_keep, prune) = select_for_retention(discovered, self.backup_policy, Utc::now());
        prune_backups(&prune)?;
        Ok(backup)
    }

    /// Run [`Database::take_backup`] as a routine backup if
    /// `backup_interval_secs` has elapsed since the last one. A host
    /// embedding `Database` is responsible for calling this on its own
    /// background interval, mirroring [`Database::maybe_run_metrics_retention`].
    pub fn maybe_run_backup(&self) -> Result<bool> {
        {
            let last = self.last_backup.lock();
            if let Some(last) = *last {
                if last.elapsed() < self.backup_interval {
                    return Ok(false);
                }
            }
        }
        self.take_backup(false)?;
        *self.last_backup.lock() = Some(Instant::now());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_config(dir: &std::path::Path) -> EngineConfig {
        let mut config = EngineConfig::default();
        config.data_path = dir.to_string_lossy().into_owned();
        config.database_filename = "test.euff".into();
        config
    }

    #[test]
    fn create_then_get_round_trips_content() {
        let dir = tempdir().unwrap();
        let db = Database::open(test_config(dir.path())).unwrap();
        let id = db
            .create(NewEntity {
                id: "doc-1".into(),
                tags: vec!["status:draft".into()],
                content: b"hello".to_vec(),
                content_type: None,
            })
            .unwrap();
        let entity = db.get(&id, false).unwrap();
        assert_eq!(entity.content, b"hello");
        assert_eq!(entity.tags.len(), 1);
        assert_eq!(entity.tags[0].value, "status:draft");
    }

    #[test]
    fn create_rejects_invalid_tag() {
        let dir = tempdir().unwrap();
        let db = Database::open(test_config(dir.path())).unwrap();
        let result = db.create(NewEntity {
            id: "doc-2".into(),
            tags: vec!["status:\u{7}bad".into()],
            content: Vec::new(),
            content_type: None,
        });
        assert!(result.is_err());
    }

    #[test]
    fn delete_hides_from_get_and_list() {
        let dir = tempdir().unwrap();
        let db = Database::open(test_config(dir.path())).unwrap();
        let id = db
            .create(NewEntity {
                id: "doc-3".into(),
                tags: vec!["status:draft".into()],
                content: Vec::new(),
                content_type: None,
            })
            .unwrap();
        db.delete(&id, LifecycleState::Soft).unwrap();
        assert!(db.get(&id, false).is_err());
        assert!(!db.list(ListFilter::default(), 100).contains(&id));
    }

    #[test]
    fn restore_brings_entity_back() {
        let dir = tempdir().unwrap();
        let db = Database::open(test_config(dir.path())).unwrap();
        let id = db
            .create(NewEntity {
                id: "doc-4".into(),
                tags: vec!["status:draft".into()],
                content: Vec::new(),
                content_type: None,
            })
            .unwrap();
        db.delete(&id, LifecycleState::Soft).unwrap();
        db.restore(&id).unwrap();
        assert!(db.get(&id, false).is_ok());
    }

    #[test]
    fn write_metric_round_trips() {
        let dir = tempdir().unwrap();
        let db = Database::open(test_config(dir.path())).unwrap();
        db.write_metric("metrics:checkpoint-count", vec!["value:1".into()])
            .unwrap();
    }

    #[test]
    fn take_backup_copies_file_and_prunes() {
        let dir = tempdir().unwrap();
        let db = Database::open(test_config(dir.path())).unwrap();
        db.create(NewEntity {
            id: "doc-5".into(),
            tags: vec!["status:draft".into()],
            content: b"hi".to_vec(),
            content_type: None,
        })
        .unwrap();

        let backup = db.take_backup(false).unwrap();
        assert!(backup.path.exists());
        assert!(!backup.emergency);
        assert_eq!(
            std::fs::read(&backup.path).unwrap(),
            std::fs::read(db.path()).unwrap()
        );
    }

    #[test]
    fn maybe_run_backup_is_gated_by_interval() {
        let dir = tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.backup_interval_secs = 3600;
        let db = Database::open(config).unwrap();

        assert!(db.maybe_run_backup().unwrap());
        // Interval hasn't elapsed yet — a second call must not back up again.
        assert!(!db.maybe_run_backup().unwrap());
    }

    #[test]
    fn metrics_retention_respects_startup_grace() {
        let dir = tempdir().unwrap();
        let db = Database::open(test_config(dir.path())).unwrap();
        // Default grace period is 30 minutes; a freshly opened database
        // must not run a sweep yet.
        let ran = db.maybe_run_metrics_retention(|_| panic!("sweep must not run"));
        assert!(!ran);
    }
}
