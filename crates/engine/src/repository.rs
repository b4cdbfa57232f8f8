//! The `EntityRepository` facade (spec.md §4.6): `Create`/`Get`/`Update`/
//! `Delete`/`Restore`/`List`/`Query`, wiring the writer, the live sharded
//! indexes, and the temporal query layer together behind one lock
//! discipline (§5: `repo.mu` -> `writer.mu` -> `tag_shard[i].mu` ->
//! `reader_pool.sem`).

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use entitydb_concurrency::{is_metrics_entity_id, CircuitBreaker, MetricsRecursionGuard};
use entitydb_core::{
    AuditEvent, AuditSink, Entity, EntityId, Error, LifecycleState, Limits, NullAuditSink, OpKind,
    OpStatus, Result, TagValue, Timestamp,
};
use entitydb_durability::{self_heal, IntegrityGuard};
use entitydb_storage::{
    DeletionIndex, DeletionIndexEntry, DeletionIndexRegion, EntityIndexEntry, EntityIndexRegion,
    EuffHeader, ReaderPool, ShardedTagIndex, TagIndexRegion, Timeline, VariantCache, WalOp,
};
use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Default number of writes between automatic checkpoints (§4.8.1,
/// overridable by the boundary layer's `checkpoint_ops` config field).
const DEFAULT_CHECKPOINT_OPS: u64 = 1000;

/// Default time between automatic checkpoints (§4.8.1 `checkpoint_interval`,
/// a peer trigger alongside `checkpoint_ops`).
const DEFAULT_CHECKPOINT_INTERVAL: Duration = Duration::from_secs(300);

use crate::changes_index::ChangesIndex;
use crate::chunking;
use crate::replay;
use crate::temporal::{self, DiffResult};
use crate::writer::{IndexSnapshot, Writer};

const DEFAULT_READER_POOL_SIZE: usize = 8;

fn lifecycle_tag(state: LifecycleState) -> &'static str {
    match state {
        LifecycleState::Soft => "lifecycle:soft",
        LifecycleState::Archived => "lifecycle:archived",
        LifecycleState::Purged => "lifecycle:purged",
    }
}

/// Per-entity bookkeeping the repository keeps beyond what the on-disk
/// entity-index region stores: where its latest record lives, and which
/// tag values it currently carries (so a later write/delete can diff
/// against the right set when updating [`ShardedTagIndex`]).
#[derive(Clone, Default)]
struct LiveEntry {
    offset: u64,
    size: u32,
    current_tags: Vec<String>,
}

pub struct EntityRepository {
    writer: Writer,
    limits: Limits,
    tag_index: ShardedTagIndex,
    timelines: RwLock<HashMap<EntityId, Timeline>>,
    live: RwLock<HashMap<EntityId, LiveEntry>>,
    deletion_index: DeletionIndex,
    variant_cache: VariantCache,
    changes_index: ChangesIndex,
    audit: Arc<dyn AuditSink>,
    write_lock: Mutex<()>,
    metrics: MetricsRecursionGuard,
    metrics_breaker: CircuitBreaker,
    checkpoint_ops: u64,
    ops_since_checkpoint: AtomicU64,
    checkpoint_interval: Duration,
    last_checkpoint: Mutex<Instant>,
}

impl EntityRepository {
    /// Open (or create) the EUFF file at `path`, running self-heal if the
    /// header looks untrustworthy, then rebuilding every live index in two
    /// passes: scanning the data region up to the last checkpoint
    /// (§4.3.2), then replaying whatever the WAL still holds from after
    /// that checkpoint (§4.6, P-REPLAY) to recover anything written since.
    pub fn open(path: impl AsRef<Path>, limits: Limits) -> Result<Self> {
        Self::open_with_audit(
            path,
            limits,
            DEFAULT_CHECKPOINT_OPS,
            DEFAULT_CHECKPOINT_INTERVAL,
            Arc::new(NullAuditSink),
        )
    }

    pub fn open_with_audit(
        path: impl AsRef<Path>,
        limits: Limits,
        checkpoint_ops: u64,
        checkpoint_interval: Duration,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self> {
        let path = path.as_ref();

        if path.exists() {
            let raw = std::fs::read(path)?;
            let header = EuffHeader::decode(&raw);
            if let Some(failure) = self_heal::check_health(raw.len() as u64, header.as_ref()) {
                warn!(?failure, path = %path.display(), "database file failed health check, quarantining");
                let quarantine_path = self_heal::quarantine(path)?;
                let recovered = self_heal::recover_data_region(&quarantine_path, &limits);
                self_heal::create_fresh(path, &limits)?;
                self_heal::seed_recovered_data(path, &recovered)?;
            }
        }

        let integrity = Arc::new(IntegrityGuard::new(path, limits));
        let reader_pool = ReaderPool::new(path, DEFAULT_READER_POOL_SIZE);
        let existing_header = if path.exists() {
            EuffHeader::decode(&std::fs::read(path)?)
        } else {
            None
        };
        let writer = Writer::open(path, existing_header, limits, integrity, reader_pool)?;

        let repo = EntityRepository {
            writer,
            limits,
            tag_index: ShardedTagIndex::new(),
            timelines: RwLock::new(HashMap::new()),
            live: RwLock::new(HashMap::new()),
            deletion_index: DeletionIndex::new(),
            variant_cache: VariantCache::new(),
            changes_index: ChangesIndex::new(),
            audit,
            write_lock: Mutex::new(()),
            metrics: MetricsRecursionGuard::new(),
            metrics_breaker: CircuitBreaker::new(Default::default()),
            checkpoint_ops,
            ops_since_checkpoint: AtomicU64::new(0),
            checkpoint_interval,
            last_checkpoint: Mutex::new(Instant::now()),
        };

        let (rebuilt, checkpointed_data_end) = repo.rebuild_from_data_region()?;
        let wal_entries = repo.writer.read_wal_entries()?;
        let (replayed, true_data_end) = replay::replay(&repo, wal_entries, checkpointed_data_end)?;
        repo.writer.set_data_end(true_data_end);
        info!(rebuilt, replayed, "repository opened");
        Ok(repo)
    }

    /// Re-derive every live index by decoding the data region front to
    /// back, applying each record as the tag/content delta it represents
    /// (§4.3.2 self-heal rebuild, P-REBUILD). Every record ever written —
    /// including ones already reflected by an earlier checkpoint's cached
    /// index regions — lives here, since the data region is never
    /// truncated; this is why rebuild never needs to trust the cached tag/
    /// entity/deletion index regions at all.
    fn rebuild_from_data_region(&self) -> Result<(usize, u64)> {
        let header = self.writer.header();
        let data_end = header.data_offset + header.data_size;
        if data_end <= header.data_offset {
            return Ok((0, header.data_offset));
        }
        let mut count = 0;
        let mut offset = header.data_offset;
        while offset < data_end {
            let remaining = (data_end - offset) as u32;
            let entity = match self.writer.read_record_at(offset, remaining) {
                Ok(e) => e,
                Err(_) => break,
            };
            let record_size = entitydb_storage::StoredEntityRecord::new(entity.clone())
                .encode()
                .len() as u32;
            self.apply_delta(entity, offset, record_size)?;
            offset += record_size as u64;
            count += 1;
        }
        Ok((count, data_end))
    }

    /// Apply one already-persisted delta record to the live indexes
    /// (shared by rebuild-on-open, WAL replay, and the write path itself
    /// right after a successful append).
    fn apply_delta(&self, entity: Entity, offset: u64, size: u32) -> Result<()> {
        let id = entity.id.clone();
        let mut timelines = self.timelines.write();
        let timeline = timelines.entry(id.clone()).or_insert_with(Timeline::new);
        for tag in &entity.tags {
            timeline.push(tag.clone());
        }
        let full = Entity {
            id: id.clone(),
            tags: timeline.all().to_vec(),
            content: Vec::new(),
        };
        drop(timelines);

        let now = entity
            .tags
            .last()
            .map(|t| t.timestamp)
            .unwrap_or(Timestamp::now());

        if let Some(lifecycle) = entity
            .tags
            .iter()
            .find(|t| t.namespace() == "lifecycle")
        {
            let state = match lifecycle.value.as_str() {
                "lifecycle:soft" => LifecycleState::Soft,
                "lifecycle:archived" => LifecycleState::Archived,
                "lifecycle:purged" => LifecycleState::Purged,
                "lifecycle:restored" => {
                    self.deletion_index.unmark(&id);
                    self.resync_current_tags(&id, &full, offset, size);
                    self.changes_index.record_change(id.clone(), now);
                    return Ok(());
                }
                other => {
                    return Err(Error::Internal(format!("unknown lifecycle tag {other}")));
                }
            };
            self.deletion_index.mark(id.clone(), now, state, 0);
            let mut live = self.live.write();
            let previous = live.remove(&id).unwrap_or_default();
            self.tag_index.remove_entity(&previous.current_tags, &id);
            for tag_value in &previous.current_tags {
                if let Some(key) = tag_value.split(':').next() {
                    self.variant_cache.unobserve(key, tag_value);
                }
            }
            live.insert(
                id.clone(),
                LiveEntry { offset, size, current_tags: Vec::new() },
            );
            drop(live);
            self.changes_index.record_change(id, now);
            return Ok(());
        }

        self.resync_current_tags(&id, &full, offset, size);
        self.changes_index.record_change(id, now);
        Ok(())
    }

    /// Recompute `full`'s current tag set and diff it against whatever the
    /// live index previously had on file for this id, adding/removing
    /// [`ShardedTagIndex`] and [`VariantCache`] entries accordingly.
    fn resync_current_tags(&self, id: &EntityId, full: &Entity, offset: u64, size: u32) {
        let now = full.tags.last().map(|t| t.timestamp).unwrap_or(Timestamp::EPOCH);
        let current: Vec<String> = full
            .tag_set_as_of(now)
            .into_iter()
            .map(|t| t.value.clone())
            .collect();

        let mut live = self.live.write();
        let previous = live.get(id).cloned().unwrap_or_default();
        let prev_set: HashSet<&String> = previous.current_tags.iter().collect();
        let new_set: HashSet<&String> = current.iter().collect();

        for removed in prev_set.difference(&new_set) {
            self.tag_index.remove(removed, id);
            if let Some(key) = removed.split(':').next() {
                self.variant_cache.unobserve(key, removed);
            }
        }
        for added in new_set.difference(&prev_set) {
            self.tag_index.insert(added, id.clone());
            if let Some(key) = added.split(':').next() {
                self.variant_cache.observe(key, added);
            }
        }

        live.insert(
            id.clone(),
            LiveEntry { offset, size, current_tags: current },
        );
    }

    /// Append one delta record (new tags + full content) for `id`, updating
    /// every live index. Pass an empty `content` for a write that only
    /// changes tags — a chunked parent's post-chunking record, or a
    /// `lifecycle:` delete/restore marker.
    ///
    /// Entity ids under the metrics namespace enter a
    /// [`MetricsRecursionGuard`] scope for the duration of the write
    /// (§4.8.1): this both gates a WAL-full-triggered checkpoint below and
    /// stops a metrics-originated write from itself triggering the
    /// operation-count checkpoint trigger.
    fn write_delta(&self, id: &EntityId, tags: Vec<TagValue>, content: Vec<u8>) -> Result<()> {
        let entity = Entity { id: id.clone(), tags, content };
        let _metrics_scope = is_metrics_entity_id(id.as_str()).then(|| self.metrics.enter());

        let res = match self.writer.append_record(WalOp::Put, &entity) {
            Ok(res) => res,
            Err(Error::StorageTransient(msg))
                if msg.contains("WAL region is full") && self.metrics.may_checkpoint() =>
            {
                self.checkpoint_locked(Timestamp::now())?;
                self.writer.append_record(WalOp::Put, &entity)?
            }
            Err(other) => return Err(other),
        };
        self.apply_delta(entity, res.data_offset, res.data_size)?;
        self.maybe_auto_checkpoint();
        Ok(())
    }

    /// Trip a checkpoint once `checkpoint_ops` writes have accumulated, or
    /// `checkpoint_interval` has elapsed, since the last one — the two
    /// peer L3 triggers (§4.8.1) — unless a metrics-originated write is on
    /// the call stack right now (never checkpoint inside a metrics-write
    /// call). Failures are logged, not propagated — an automatic
    /// checkpoint missing its trigger point isn't a reason to fail the
    /// write that tripped it.
    fn maybe_auto_checkpoint(&self) {
        let count = self.ops_since_checkpoint.fetch_add(1, Ordering::SeqCst) + 1;
        let due_by_ops = count >= self.checkpoint_ops;
        let due_by_time = self.last_checkpoint.lock().elapsed() >= self.checkpoint_interval;
        if (!due_by_ops && !due_by_time) || !self.metrics.may_checkpoint() {
            return;
        }
        if let Err(error) = self.checkpoint_locked(Timestamp::now()) {
            warn!(%error, "automatic checkpoint failed");
        }
    }

    /// Create a new entity. Fails with [`Error::Conflict`] if `id` is
    /// already known, deleted or not (§4.6 `Create`).
    pub fn create(
        &self,
        id: EntityId,
        tags: Vec<TagValue>,
        content: Vec<u8>,
        content_type: Option<&str>,
        now: Timestamp,
    ) -> Result<Entity> {
        let _guard = self.write_lock.lock();
        if self.live.read().contains_key(&id) || self.deletion_index.is_deleted(&id) {
            let err = Error::Conflict(id.to_string());
            self.emit_audit(OpKind::Create, OpStatus::Failure, Some(id.clone()));
            return Err(err);
        }

        let result = self.write_entity_content(&id, tags, content, content_type, now);
        self.emit_audit(
            OpKind::Create,
            if result.is_ok() { OpStatus::Success } else { OpStatus::Failure },
            Some(id.clone()),
        );
        result?;
        self.get(&id)
    }

    /// Append additional tags and/or replace the content of an existing,
    /// non-deleted entity (§4.6 `Update`).
    pub fn update(
        &self,
        id: &EntityId,
        tags: Vec<TagValue>,
        content: Option<Vec<u8>>,
        content_type: Option<&str>,
        now: Timestamp,
    ) -> Result<Entity> {
        let _guard = self.write_lock.lock();
        if self.deletion_index.is_deleted(id) {
            return Err(Error::Deleted(id.to_string()));
        }
        if !self.live.read().contains_key(id) {
            return Err(Error::NotFound(id.to_string()));
        }

        let content = match content {
            Some(c) => c,
            None => self.get(id)?.content,
        };
        let result = self.write_entity_content(id, tags, content, content_type, now);
        self.emit_audit(
            OpKind::Update,
            if result.is_ok() { OpStatus::Success } else { OpStatus::Failure },
            Some(id.clone()),
        );
        result?;
        self.get(id)
    }

    /// Shared by `Create`/`Update`: auto-chunk `content` if it exceeds
    /// [`Limits::auto_chunk_threshold`], writing chunk children first and
    /// the parent's stripped-content record last (§3.4).
    fn write_entity_content(
        &self,
        id: &EntityId,
        mut tags: Vec<TagValue>,
        content: Vec<u8>,
        content_type: Option<&str>,
        now: Timestamp,
    ) -> Result<()> {
        match chunking::split_if_needed(id, &content, content_type, &self.limits, now)? {
            None => self.write_delta(id, tags, content),
            Some((parent, chunks)) => {
                for chunk in &chunks {
                    let chunk_tags = chunking::chunk_tags(id, chunk, now)?;
                    self.write_delta(&chunk.id, chunk_tags, chunk.content.clone())?;
                }
                tags.extend(chunking::parent_tags(&parent, now)?);
                self.write_delta(id, tags, Vec::new())
            }
        }
    }

    /// Read an entity back, hiding it if soft/archived/purged-deleted
    /// (§4.6 `Get`, P-DELETED-HIDDEN). A chunked parent's content is
    /// reassembled from its chunk children (§3.4, P-CHUNK-ROUNDTRIP) — the
    /// parent's own record never carries it.
    pub fn get(&self, id: &EntityId) -> Result<Entity> {
        if self.deletion_index.is_deleted(id) {
            return Err(Error::Deleted(id.to_string()));
        }
        let (offset, size, tags) = {
            let live = self.live.read();
            let entry = live.get(id).ok_or_else(|| Error::NotFound(id.to_string()))?;
            let timelines = self.timelines.read();
            let tags = timelines
                .get(id)
                .map(|t| t.all().to_vec())
                .unwrap_or_default();
            (entry.offset, entry.size, tags)
        };

        let now = tags.last().map(|t| t.timestamp).unwrap_or(Timestamp::now());
        let current = Entity { id: id.clone(), tags: tags.clone(), content: Vec::new() };
        let chunk_count = current
            .tag_set_as_of(now)
            .into_iter()
            .find_map(|t| t.value.strip_prefix("content:chunks:").map(|s| s.to_string()))
            .and_then(|s| s.parse::<usize>().ok());

        let content = match chunk_count {
            Some(n) => {
                let mut chunk_entities = Vec::with_capacity(n);
                for i in 0..n {
                    let chunk_id = id.chunk_id(i)?;
                    chunk_entities.push(self.get(&chunk_id)?);
                }
                chunking::reassemble(&chunk_entities)?
            }
            None => self.writer.read_record_at(offset, size)?.content,
        };

        Ok(Entity { id: id.clone(), tags, content })
    }

    /// Soft/archive/purge an entity: append a `lifecycle:<state>` delta,
    /// mark it in the deletion index, and drop it from the live tag index
    /// so `Query`/`List` stop matching it (§4.6 `Delete`, §9 resolution on
    /// "timeline" wording).
    pub fn delete(&self, id: &EntityId, state: LifecycleState, now: Timestamp) -> Result<()> {
        let _guard = self.write_lock.lock();
        if !self.live.read().contains_key(id) {
            return Err(Error::NotFound(id.to_string()));
        }
        if self.deletion_index.is_deleted(id) {
            return Err(Error::Deleted(id.to_string()));
        }
        let tag = TagValue::new(now, lifecycle_tag(state))?;
        let result = self.write_delta(id, vec![tag], Vec::new());
        self.emit_audit(
            OpKind::Delete,
            if result.is_ok() { OpStatus::Success } else { OpStatus::Failure },
            Some(id.clone()),
        );
        result
    }

    /// Reverse a soft/archived deletion (§3.5, §4.6 `Restore`). Fails if
    /// the entity was purged.
    pub fn restore(&self, id: &EntityId, now: Timestamp) -> Result<Entity> {
        let _guard = self.write_lock.lock();
        if !self.deletion_index.is_restorable(id) {
            return Err(Error::Validation(format!("{id} is not restorable")));
        }
        let tag = TagValue::new(now, "lifecycle:restored")?;
        self.write_delta(id, vec![tag], Vec::new())?;
        self.emit_audit(OpKind::Restore, OpStatus::Success, Some(id.clone()));
        self.get(id)
    }

    /// Every currently live (non-deleted) entity id.
    pub fn list(&self) -> Vec<EntityId> {
        self.live
            .read()
            .keys()
            .filter(|id| !self.deletion_index.is_deleted(id))
            .cloned()
            .collect()
    }

    /// AND-intersection of entities currently carrying every tag value in
    /// `tags`, smallest candidate set first (§4.6 `Query`).
    pub fn query(&self, tags: &[String]) -> Vec<EntityId> {
        if tags.is_empty() {
            return self.list();
        }
        let mut ordered: Vec<&String> = tags.iter().collect();
        ordered.sort_by_key(|t| self.tag_index.set_size(t));

        let mut candidates: Option<HashSet<EntityId>> = None;
        for tag in ordered {
            let set = self.tag_index.entities_for(tag);
            candidates = Some(match candidates {
                None => set,
                Some(acc) => acc.intersection(&set).cloned().collect(),
            });
            if candidates.as_ref().map(|c| c.is_empty()).unwrap_or(false) {
                break;
            }
        }
        candidates
            .unwrap_or_default()
            .into_iter()
            .filter(|id| !self.deletion_index.is_deleted(id))
            .collect()
    }

    pub fn as_of(&self, id: &EntityId, t: Timestamp) -> Result<Vec<TagValue>> {
        let timelines = self.timelines.read();
        let timeline = timelines.get(id).ok_or_else(|| Error::NotFound(id.to_string()))?;
        Ok(temporal::as_of(timeline, t))
    }

    pub fn history(&self, id: &EntityId, from: Timestamp, to: Timestamp) -> Result<Vec<TagValue>> {
        let timelines = self.timelines.read();
        let timeline = timelines.get(id).ok_or_else(|| Error::NotFound(id.to_string()))?;
        Ok(temporal::history(timeline, from, to))
    }

    pub fn diff(&self, id: &EntityId, t1: Timestamp, t2: Timestamp) -> Result<DiffResult> {
        let timelines = self.timelines.read();
        let timeline = timelines.get(id).ok_or_else(|| Error::NotFound(id.to_string()))?;
        Ok(temporal::diff(timeline, t1, t2))
    }

    pub fn changes_since(&self, since: Timestamp) -> Vec<(EntityId, Timestamp)> {
        temporal::changes_since(&self.changes_index, since)
    }

    /// Force a checkpoint: snapshot every live index into the three
    /// on-disk index regions and reset the WAL (§4.3 checkpoint sequence).
    pub fn checkpoint(&self, now: Timestamp) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.checkpoint_locked(now)
    }

    /// The checkpoint body, assuming `write_lock` is already held by the
    /// caller — `write_delta`'s WAL-full and operation-count/interval
    /// auto-checkpoint triggers run inside an existing
    /// `create`/`update`/`delete`/`restore` guard, so they call this
    /// directly rather than deadlocking on `checkpoint`'s own lock
    /// acquisition.
    fn checkpoint_locked(&self, now: Timestamp) -> Result<()> {
        let snapshot = self.build_index_snapshot();
        let result = self.writer.checkpoint(snapshot, now);
        self.emit_audit(
            OpKind::Checkpoint,
            if result.is_ok() { OpStatus::Success } else { OpStatus::Failure },
            None,
        );
        self.ops_since_checkpoint.store(0, Ordering::SeqCst);
        *self.last_checkpoint.lock() = Instant::now();
        result
    }

    /// Build the three rebuildable index regions from the live in-memory
    /// state. Every collection here started life as a `HashMap`/`HashSet`
    /// keyed or hashed with Rust's randomly-seeded `RandomState`, so every
    /// entry list is sorted by entity id (ids within a tag's hit list) or
    /// by entity id (the entity/deletion index entries themselves) before
    /// being handed to the writer — otherwise checkpointing the same
    /// logical content twice would produce different bytes (P-REBUILD:
    /// byte-identical output for identical input data regions).
    fn build_index_snapshot(&self) -> IndexSnapshot {
        let tag_snapshot = self.tag_index.snapshot();
        let live = self.live.read();
        let mut grouped: HashMap<u64, Vec<entitydb_storage::TagIndexShardEntry>> = HashMap::new();
        for (tag_value, ids) in tag_snapshot {
            let hash = entitydb_storage::hash64(&tag_value);
            let mut sorted_ids: Vec<EntityId> = ids.into_iter().collect();
            sorted_ids.sort();
            let entry = entitydb_storage::TagIndexShardEntry {
                tag_hash: hash,
                hits: sorted_ids
                    .into_iter()
                    .map(|entity_id| {
                        let offset = live.get(&entity_id).map(|e| e.offset).unwrap_or(0);
                        entitydb_storage::TagIndexHit { entity_id, offset }
                    })
                    .collect(),
            };
            grouped
                .entry(hash % entitydb_storage::SHARD_COUNT as u64)
                .or_default()
                .push(entry);
        }
        let mut shard_vecs = vec![Vec::new(); entitydb_storage::SHARD_COUNT];
        for (shard_idx, entries) in grouped {
            shard_vecs[shard_idx as usize] = entries;
        }

        let mut entity_entries: Vec<(EntityId, EntityIndexEntry)> = live
            .iter()
            .map(|(id, e)| (id.clone(), EntityIndexEntry { offset: e.offset, size: e.size, flags: 0 }))
            .collect();
        entity_entries.sort_by(|a, b| a.0.cmp(&b.0));
        drop(live);

        let mut deletion_entries: Vec<(EntityId, DeletionIndexEntry)> = self
            .deletion_index
            .snapshot()
            .into_iter()
            .map(|(id, rec)| {
                (
                    id,
                    DeletionIndexEntry {
                        deletion_ns: rec.deletion_ts.as_nanos() as i64,
                        state: rec.state,
                        flags: rec.flags,
                    },
                )
            })
            .collect();
        deletion_entries.sort_by(|a, b| a.0.cmp(&b.0));

        IndexSnapshot {
            tag_index: TagIndexRegion { shards: shard_vecs, dictionary: Vec::new() },
            entity_index: EntityIndexRegion { entries: entity_entries },
            deletion_index: DeletionIndexRegion { entries: deletion_entries },
        }
    }

    fn emit_audit(&self, op: OpKind, status: OpStatus, entity_id: Option<EntityId>) {
        self.audit.record(AuditEvent {
            event_kind: "entity.op".into(),
            entity_id,
            user_id: None,
            op,
            status,
            extra_tags: Vec::new(),
        });
    }

    /// Apply one WAL entry recovered on open, at the offset/size
    /// [`replay::replay`] has already worked out for it. `apply_delta`
    /// already knows how to interpret a `lifecycle:` tag as a deletion or
    /// restoration, so a plain delta application is all replay needs.
    pub(crate) fn apply_wal_record(&self, entity: Entity, offset: u64, size: u32) -> Result<()> {
        self.apply_delta(entity, offset, size)
    }

    /// Write a metric entity through the repository's own circuit breaker
    /// (§4.8.2): a tripped-open breaker silently drops the write rather
    /// than returning an error, so a background metrics collector's own
    /// malfunction can't cascade into foreground-visible failures. `id`
    /// should be under the `metrics:` namespace; this does not enforce
    /// that, callers are expected to follow the convention.
    pub fn write_metric(&self, id: EntityId, tags: Vec<TagValue>) -> Result<()> {
        if !self.metrics_breaker.allow() {
            return Ok(());
        }
        let _guard = self.write_lock.lock();
        let result = self.write_delta(&id, tags, Vec::new());
        match &result {
            Ok(()) => self.metrics_breaker.record_success(),
            Err(_) => self.metrics_breaker.record_failure(),
        }
        result
    }

    /// Current state of the metrics circuit breaker, for diagnostics.
    pub fn metrics_breaker_state(&self) -> entitydb_concurrency::BreakerState {
        self.metrics_breaker.state()
    }

    /// The repository's metrics-recursion guard, for a caller (e.g. a
    /// background retention scheduler) that needs to check whether a
    /// metrics-write is in flight right now before scheduling more work.
    pub fn metrics_guard(&self) -> &MetricsRecursionGuard {
        &self.metrics
    }

    /// Nanoseconds since the epoch of the last checkpoint, for diagnostics
    /// and testing the `checkpoint_ops`/`checkpoint_interval` triggers.
    pub fn last_checkpoint_ns(&self) -> u64 {
        self.writer.header().last_checkpoint_ns
    }
}
