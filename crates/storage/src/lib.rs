//! EUFF (EntityDB Unified File Format): the single-file on-disk layout
//! (spec.md §4.1), the in-memory sharded indexes that front it (§4.5), and
//! the bounded reader pool (§4.4).
//!
//! This crate owns byte-level encode/decode only; write ordering, WAL
//! integrity gating, and checkpoint orchestration live in
//! `entitydb-durability` and `entitydb-engine`.

pub mod format;
pub mod index;
pub mod reader_pool;

pub use format::{
    DeletionIndexEntry, DeletionIndexRegion, EntityIndexEntry, EntityIndexRegion, EuffHeader,
    RecordCodecError, StoredEntityRecord, TagIndexHit, TagIndexRegion, TagIndexShardEntry,
    WalEntry, WalOp, EUFF_MAGIC, FORMAT_VERSION, HEADER_SIZE, POST_HEADER_OFFSET,
};
pub use index::{
    hash64, DeletionIndex, DeletionRecord, ShardedTagIndex, Timeline, VariantCache, SHARD_COUNT,
};
pub use reader_pool::{PooledReader, ReaderPool, ReaderPoolError};
