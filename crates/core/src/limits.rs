//! Size limits enforced by the WAL integrity system (§4.3) and the writer
//! (§4.2). Violations map to [`crate::Error::Validation`] or
//! [`crate::Error::CorruptionDetected`] depending on which gate caught them.

/// Configurable size thresholds. Defaults match spec.md §4.3's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Reject a `PUT` whose `len(id) + len(content) + sum(tag lens)`
    /// exceeds this (default 100 MiB).
    pub max_entity_size: u64,
    /// Reject a WAL entry whose encoded length exceeds this (default 200 MiB).
    pub max_entry_length: u64,
    /// Entry sizes at or above this are treated as corruption and trip
    /// emergency mode rather than merely being rejected (default 1 GiB).
    pub astronomical_threshold: u64,
    /// Force a checkpoint once the WAL region reaches this size (default 1 GiB).
    pub max_wal_size: u64,
    /// Content larger than this is split into chunks (default 4 MiB).
    pub auto_chunk_threshold: u64,
    /// Size of each chunk produced by the auto-chunker (default 4 MiB).
    pub chunk_size: u64,
}

impl Default for Limits {
    fn default() -> Self {
        const MIB: u64 = 1024 * 1024;
        const GIB: u64 = 1024 * MIB;
        Limits {
            max_entity_size: 100 * MIB,
            max_entry_length: 200 * MIB,
            astronomical_threshold: GIB,
            max_wal_size: GIB,
            auto_chunk_threshold: 4 * MIB,
            chunk_size: 4 * MIB,
        }
    }
}

impl Limits {
    /// Small thresholds for unit/integration tests that need to exercise
    /// chunking or rejection paths without allocating hundreds of MiB.
    pub fn for_testing() -> Self {
        Limits {
            max_entity_size: 64 * 1024,
            max_entry_length: 128 * 1024,
            astronomical_threshold: 8 * 1024 * 1024,
            max_wal_size: 256 * 1024,
            auto_chunk_threshold: 1024,
            chunk_size: 512,
        }
    }
}
