//! End-to-end repository scenarios (spec.md §8).

use std::sync::Arc;
use std::time::Duration;

use entitydb_core::{EntityId, LifecycleState, Limits, NullAuditSink, TagValue, Timestamp};
use entitydb_engine::EntityRepository;
use tempfile::tempdir;

fn open_repo(dir: &std::path::Path) -> EntityRepository {
    EntityRepository::open(dir.join("test.euff"), Limits::for_testing()).unwrap()
}

fn open_repo_with_triggers(
    dir: &std::path::Path,
    checkpoint_ops: u64,
    checkpoint_interval: Duration,
) -> EntityRepository {
    EntityRepository::open_with_audit(
        dir.join("test.euff"),
        Limits::for_testing(),
        checkpoint_ops,
        checkpoint_interval,
        Arc::new(NullAuditSink),
    )
    .unwrap()
}

fn tag(ts: u64, value: &str) -> TagValue {
    TagValue::new(Timestamp::from_nanos(ts), value).unwrap()
}

#[test]
fn scenario_create_get_as_of() {
    let dir = tempdir().unwrap();
    let repo = open_repo(dir.path());
    let id = EntityId::new("E1").unwrap();

    repo.create(
        id.clone(),
        vec![tag(10, "type:doc"), tag(10, "status:draft")],
        Vec::new(),
        None,
        Timestamp::from_nanos(10),
    )
    .unwrap();

    repo.update(
        &id,
        vec![tag(20, "status:published")],
        None,
        None,
        Timestamp::from_nanos(20),
    )
    .unwrap();

    let at_t0 = repo.as_of(&id, Timestamp::from_nanos(10)).unwrap();
    assert!(at_t0.iter().any(|t| t.value == "status:draft"));

    let at_t1 = repo.as_of(&id, Timestamp::from_nanos(20)).unwrap();
    assert!(at_t1.iter().any(|t| t.value == "status:published"));

    let mid = repo.as_of(&id, Timestamp::from_nanos(15)).unwrap();
    assert!(mid.iter().any(|t| t.value == "status:draft"));
}

#[test]
fn scenario_multi_tag_and_query() {
    let dir = tempdir().unwrap();
    let repo = open_repo(dir.path());
    let now = Timestamp::from_nanos(1);

    for i in 0..100 {
        let id = EntityId::new(format!("e{i}")).unwrap();
        let mut tags = Vec::new();
        if i < 10 {
            tags.push(tag(1, "a:1"));
        }
        if (7..17).contains(&i) {
            tags.push(tag(1, "b:1"));
        }
        if tags.is_empty() {
            tags.push(tag(1, "c:1"));
        }
        repo.create(id, tags, Vec::new(), None, now).unwrap();
    }

    let hits = repo.query(&["a:1".to_string(), "b:1".to_string()]);
    assert_eq!(hits.len(), 3);
}

#[test]
fn scenario_checkpoint_and_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.euff");
    {
        let repo = EntityRepository::open(&path, Limits::for_testing()).unwrap();
        for i in 0..50 {
            let id = EntityId::new(format!("doc-{i}")).unwrap();
            repo.create(
                id,
                vec![tag(1, "status:draft")],
                b"payload".to_vec(),
                None,
                Timestamp::from_nanos(1),
            )
            .unwrap();
        }
        repo.checkpoint(Timestamp::from_nanos(2)).unwrap();
    }

    let repo = EntityRepository::open(&path, Limits::for_testing()).unwrap();
    for i in 0..50 {
        let id = EntityId::new(format!("doc-{i}")).unwrap();
        let entity = repo.get(&id).unwrap();
        assert_eq!(entity.content, b"payload");
    }
}

#[test]
fn scenario_wal_replay_recovers_uncheckpointed_writes() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.euff");
    {
        let repo = EntityRepository::open(&path, Limits::for_testing()).unwrap();
        let id = EntityId::new("uncheckpointed").unwrap();
        repo.create(
            id,
            vec![tag(1, "status:draft")],
            b"hi".to_vec(),
            None,
            Timestamp::from_nanos(1),
        )
        .unwrap();
        // No checkpoint() call — this write only lives in the WAL plus the
        // never-truncated data region, never in the cached index regions.
    }

    let repo = EntityRepository::open(&path, Limits::for_testing()).unwrap();
    let id = EntityId::new("uncheckpointed").unwrap();
    let entity = repo.get(&id).unwrap();
    assert_eq!(entity.content, b"hi");

    // A write after reopening must land after the recovered record, not
    // overwrite it.
    let id2 = EntityId::new("after-reopen").unwrap();
    repo.create(
        id2.clone(),
        vec![tag(2, "status:draft")],
        b"second".to_vec(),
        None,
        Timestamp::from_nanos(2),
    )
    .unwrap();
    assert_eq!(repo.get(&id2).unwrap().content, b"second");
    assert_eq!(repo.get(&EntityId::new("uncheckpointed").unwrap()).unwrap().content, b"hi");
}

#[test]
fn scenario_delete_hides_but_history_survives() {
    let dir = tempdir().unwrap();
    let repo = open_repo(dir.path());
    let id = EntityId::new("doc-del").unwrap();
    repo.create(
        id.clone(),
        vec![tag(1, "status:draft")],
        Vec::new(),
        None,
        Timestamp::from_nanos(1),
    )
    .unwrap();

    repo.delete(&id, LifecycleState::Soft, Timestamp::from_nanos(2)).unwrap();

    assert!(repo.get(&id).is_err());
    assert!(!repo.list().contains(&id));

    let history = repo
        .history(&id, Timestamp::EPOCH, Timestamp::MAX)
        .unwrap();
    assert!(history.iter().any(|t| t.value == "status:draft"));
}

#[test]
fn scenario_chunked_content_round_trips() {
    let dir = tempdir().unwrap();
    let repo = open_repo(dir.path());
    let id = EntityId::new("big-doc").unwrap();
    // for_testing()'s auto_chunk_threshold is 1024 bytes.
    let content = vec![7u8; 5000];
    repo.create(id.clone(), Vec::new(), content.clone(), None, Timestamp::from_nanos(1))
        .unwrap();

    let entity = repo.get(&id).unwrap();
    assert_eq!(entity.content, content);
}

#[test]
fn checkpoint_interval_trigger_fires_independently_of_ops_trigger() {
    let dir = tempdir().unwrap();
    // checkpoint_ops is effectively disabled (huge); only the interval
    // trigger can explain a checkpoint happening here.
    let repo = open_repo_with_triggers(dir.path(), u64::MAX, Duration::from_millis(10));
    let before = repo.last_checkpoint_ns();

    repo.create(
        EntityId::new("warmup").unwrap(),
        vec![tag(1, "status:draft")],
        Vec::new(),
        None,
        Timestamp::from_nanos(1),
    )
    .unwrap();

    std::thread::sleep(Duration::from_millis(20));

    repo.create(
        EntityId::new("after-interval").unwrap(),
        vec![tag(2, "status:draft")],
        Vec::new(),
        None,
        Timestamp::from_nanos(2),
    )
    .unwrap();

    assert!(repo.last_checkpoint_ns() > before);
}

#[test]
fn checkpoint_index_regions_are_byte_identical_across_independent_rebuilds() {
    use entitydb_storage::EuffHeader;

    let dir = tempdir().unwrap();
    let path = dir.path().join("test.euff");
    let region_bytes = |path: &std::path::Path| {
        let raw = std::fs::read(path).unwrap();
        let header = EuffHeader::decode(&raw).unwrap();
        let start = header.tag_index_offset as usize;
        let end = (header.deletion_index_offset + header.deletion_index_size) as usize;
        raw[start..end].to_vec()
    };

    {
        let repo = open_repo(dir.path());
        for i in 0..40 {
            let id = EntityId::new(format!("e{i}")).unwrap();
            repo.create(
                id,
                vec![tag(1, &format!("group:{}", i % 5)), tag(1, "kind:doc")],
                Vec::new(),
                None,
                Timestamp::from_nanos(1),
            )
            .unwrap();
        }
        repo.checkpoint(Timestamp::from_nanos(2)).unwrap();
    }
    let first = region_bytes(&path);

    // Reopening rebuilds every live index (tag shards, entity/deletion
    // maps) into brand-new `HashMap`/`HashSet` instances with freshly
    // randomized hash seeds — the only realistic way to exercise the
    // randomized-iteration-order hazard within one test process.
    {
        let repo = open_repo(dir.path());
        repo.checkpoint(Timestamp::from_nanos(3)).unwrap();
    }
    let second = region_bytes(&path);

    assert_eq!(first, second);
}

#[test]
fn scenario_metrics_feedback_loop_trips_breaker() {
    let dir = tempdir().unwrap();
    let repo = open_repo(dir.path());

    // `for_testing()`'s MAX_ENTITY_SIZE is 64 KiB; a tag this long makes
    // every write_metric call fail at `IntegrityGuard::validate_write`
    // before it ever touches the file, a deterministic stand-in for
    // "force every metric write to fail" (§8 scenario 4).
    let oversized = TagValue::new(Timestamp::from_nanos(1), "x".repeat(70_000)).unwrap();

    for i in 0..5u64 {
        let result = repo.write_metric(
            EntityId::new(format!("metrics:writes-{i}")).unwrap(),
            vec![oversized.clone()],
        );
        assert!(result.is_err());
    }

    assert_eq!(
        repo.metrics_breaker_state(),
        entitydb_concurrency::BreakerState::Open
    );

    // The breaker is now open: a further metric write is silently
    // dropped (returns `Ok`) rather than propagating the failure.
    let dropped = repo.write_metric(
        EntityId::new("metrics:writes-5").unwrap(),
        vec![oversized],
    );
    assert!(dropped.is_ok());
}
