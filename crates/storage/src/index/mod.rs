//! In-memory sharded indexes that front the EUFF file (spec.md §4.5).

mod deletion;
mod tag_shard;
mod timeline;
mod variant_cache;

pub use deletion::{DeletionIndex, DeletionRecord};
pub use tag_shard::{hash64, ShardedTagIndex, SHARD_COUNT};
pub use timeline::Timeline;
pub use variant_cache::VariantCache;
