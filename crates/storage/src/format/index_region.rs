//! On-disk codecs for the tag, entity, and deletion index regions
//! (spec.md §4.1.4–4.1.6). These regions are a *cache*: if validation
//! fails on open, they are rebuilt from the data region (§4.3.2) rather
//! than trusted blindly.

use byteorder::{ByteOrder, LittleEndian};
use entitydb_core::{EntityId, LifecycleState};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexRegionError {
    #[error("truncated index region: needed {needed} bytes, found {found}")]
    Truncated { needed: usize, found: usize },
    #[error("invalid entity id in index region: {0}")]
    InvalidEntityId(String),
    #[error("invalid lifecycle state byte in deletion index: {0}")]
    InvalidState(String),
}

fn need(buf: &[u8], off: usize, n: usize) -> Result<(), IndexRegionError> {
    if buf.len() < off + n {
        Err(IndexRegionError::Truncated {
            needed: off + n,
            found: buf.len(),
        })
    } else {
        Ok(())
    }
}

fn write_entity_id(out: &mut Vec<u8>, id: &EntityId) {
    out.extend_from_slice(&id.to_fixed_bytes());
}

fn read_entity_id(buf: &[u8], off: usize) -> Result<EntityId, IndexRegionError> {
    let mut fixed = [0u8; entitydb_core::ENTITY_ID_MAX_LEN];
    fixed.copy_from_slice(&buf[off..off + entitydb_core::ENTITY_ID_MAX_LEN]);
    EntityId::from_fixed_bytes(&fixed).map_err(|e| IndexRegionError::InvalidEntityId(e.to_string()))
}

/// One entry in the tag-index region's shard: which entity ids carry this
/// tag value, and at what data-region offset their record lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagIndexHit {
    pub entity_id: EntityId,
    pub offset: u64,
}

/// One shard of the 256-way tag index: a tag value's hash, and the hits
/// carrying it (§4.1.4).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TagIndexShardEntry {
    pub tag_hash: u64,
    pub hits: Vec<TagIndexHit>,
}

/// The full tag-index region: 256 shards plus an optional string
/// dictionary for interned tag values (§4.1.4).
#[derive(Debug, Clone, Default)]
pub struct TagIndexRegion {
    pub shards: Vec<Vec<TagIndexShardEntry>>,
    pub dictionary: Vec<String>,
}

impl TagIndexRegion {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let mut u64buf = [0u8; 8];
        let mut u32buf = [0u8; 4];

        for shard in &self.shards {
            LittleEndian::write_u64(&mut u64buf, shard.len() as u64);
            out.extend_from_slice(&u64buf);
            for entry in shard {
                LittleEndian::write_u64(&mut u64buf, entry.tag_hash);
                out.extend_from_slice(&u64buf);
                LittleEndian::write_u64(&mut u64buf, entry.hits.len() as u64);
                out.extend_from_slice(&u64buf);
                for hit in &entry.hits {
                    write_entity_id(&mut out, &hit.entity_id);
                    LittleEndian::write_u64(&mut u64buf, hit.offset);
                    out.extend_from_slice(&u64buf);
                }
            }
        }

        LittleEndian::write_u32(&mut u32buf, self.dictionary.len() as u32);
        out.extend_from_slice(&u32buf);
        for s in &self.dictionary {
            let bytes = s.as_bytes();
            LittleEndian::write_u32(&mut u32buf, bytes.len() as u32);
            out.extend_from_slice(&u32buf);
            out.extend_from_slice(bytes);
        }
        out
    }

    pub fn decode(buf: &[u8], shard_count: usize) -> Result<Self, IndexRegionError> {
        let mut off = 0usize;
        let mut shards = Vec::with_capacity(shard_count);

        for _ in 0..shard_count {
            need(buf, off, 8)?;
            let entry_count = LittleEndian::read_u64(&buf[off..off + 8]) as usize;
            off += 8;
            let mut entries = Vec::with_capacity(entry_count);
            for _ in 0..entry_count {
                need(buf, off, 16)?;
                let tag_hash = LittleEndian::read_u64(&buf[off..off + 8]);
                off += 8;
                let hit_count = LittleEndian::read_u64(&buf[off..off + 8]) as usize;
                off += 8;
                let mut hits = Vec::with_capacity(hit_count);
                for _ in 0..hit_count {
                    need(buf, off, entitydb_core::ENTITY_ID_MAX_LEN + 8)?;
                    let entity_id = read_entity_id(buf, off)?;
                    off += entitydb_core::ENTITY_ID_MAX_LEN;
                    let offset = LittleEndian::read_u64(&buf[off..off + 8]);
                    off += 8;
                    hits.push(TagIndexHit { entity_id, offset });
                }
                entries.push(TagIndexShardEntry { tag_hash, hits });
            }
            shards.push(entries);
        }

        need(buf, off, 4)?;
        let dict_count = LittleEndian::read_u32(&buf[off..off + 4]) as usize;
        off += 4;
        let mut dictionary = Vec::with_capacity(dict_count);
        for _ in 0..dict_count {
            need(buf, off, 4)?;
            let len = LittleEndian::read_u32(&buf[off..off + 4]) as usize;
            off += 4;
            need(buf, off, len)?;
            let s = String::from_utf8_lossy(&buf[off..off + len]).into_owned();
            off += len;
            dictionary.push(s);
        }

        Ok(TagIndexRegion { shards, dictionary })
    }
}

/// One entry of the entity-index region (§4.1.5): the most recent
/// data-region record for an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityIndexEntry {
    pub offset: u64,
    pub size: u32,
    pub flags: u8,
}

#[derive(Debug, Clone, Default)]
pub struct EntityIndexRegion {
    pub entries: Vec<(EntityId, EntityIndexEntry)>,
}

impl EntityIndexRegion {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let mut u64buf = [0u8; 8];
        let mut u32buf = [0u8; 4];
        LittleEndian::write_u64(&mut u64buf, self.entries.len() as u64);
        out.extend_from_slice(&u64buf);
        for (id, e) in &self.entries {
            write_entity_id(&mut out, id);
            LittleEndian::write_u64(&mut u64buf, e.offset);
            out.extend_from_slice(&u64buf);
            LittleEndian::write_u32(&mut u32buf, e.size);
            out.extend_from_slice(&u32buf);
            out.push(e.flags);
        }
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, IndexRegionError> {
        let mut off = 0;
        need(buf, off, 8)?;
        let count = LittleEndian::read_u64(&buf[off..off + 8]) as usize;
        off += 8;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            need(buf, off, entitydb_core::ENTITY_ID_MAX_LEN + 8 + 4 + 1)?;
            let id = read_entity_id(buf, off)?;
            off += entitydb_core::ENTITY_ID_MAX_LEN;
            let offset = LittleEndian::read_u64(&buf[off..off + 8]);
            off += 8;
            let size = LittleEndian::read_u32(&buf[off..off + 4]);
            off += 4;
            let flags = buf[off];
            off += 1;
            entries.push((id, EntityIndexEntry { offset, size, flags }));
        }
        Ok(EntityIndexRegion { entries })
    }
}

/// One entry of the deletion index region (§4.1.6, §3.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeletionIndexEntry {
    pub deletion_ns: i64,
    pub state: LifecycleState,
    pub flags: u8,
}

#[derive(Debug, Clone, Default)]
pub struct DeletionIndexRegion {
    pub entries: Vec<(EntityId, DeletionIndexEntry)>,
}

impl DeletionIndexRegion {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let mut u64buf = [0u8; 8];
        LittleEndian::write_u64(&mut u64buf, self.entries.len() as u64);
        out.extend_from_slice(&u64buf);
        for (id, e) in &self.entries {
            write_entity_id(&mut out, id);
            let mut i64buf = [0u8; 8];
            LittleEndian::write_i64(&mut i64buf, e.deletion_ns);
            out.extend_from_slice(&i64buf);
            out.push(e.state.as_u8());
            out.push(e.flags);
        }
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, IndexRegionError> {
        let mut off = 0;
        need(buf, off, 8)?;
        let count = LittleEndian::read_u64(&buf[off..off + 8]) as usize;
        off += 8;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            need(buf, off, entitydb_core::ENTITY_ID_MAX_LEN + 8 + 1 + 1)?;
            let id = read_entity_id(buf, off)?;
            off += entitydb_core::ENTITY_ID_MAX_LEN;
            let deletion_ns = LittleEndian::read_i64(&buf[off..off + 8]);
            off += 8;
            let state_byte = buf[off];
            off += 1;
            let flags = buf[off];
            off += 1;
            let state = LifecycleState::from_u8(state_byte)
                .map_err(|e| IndexRegionError::InvalidState(e.to_string()))?;
            entries.push((
                id,
                DeletionIndexEntry {
                    deletion_ns,
                    state,
                    flags,
                },
            ));
        }
        Ok(DeletionIndexRegion { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entitydb_core::EntityId;

    #[test]
    fn tag_index_roundtrip() {
        let mut shards = vec![Vec::new(); 2];
        shards[0].push(TagIndexShardEntry {
            tag_hash: 42,
            hits: vec![TagIndexHit {
                entity_id: EntityId::new("e1").unwrap(),
                offset: 100,
            }],
        });
        let region = TagIndexRegion {
            shards,
            dictionary: vec!["status:active".into()],
        };
        let bytes = region.encode();
        let decoded = TagIndexRegion::decode(&bytes, 2).unwrap();
        assert_eq!(decoded.shards[0].len(), 1);
        assert_eq!(decoded.dictionary, region.dictionary);
    }

    #[test]
    fn entity_index_roundtrip() {
        let id = EntityId::new("ent-1").unwrap();
        let region = EntityIndexRegion {
            entries: vec![(
                id.clone(),
                EntityIndexEntry {
                    offset: 256,
                    size: 64,
                    flags: 0,
                },
            )],
        };
        let bytes = region.encode();
        let decoded = EntityIndexRegion::decode(&bytes).unwrap();
        assert_eq!(decoded.entries[0].0, id);
        assert_eq!(decoded.entries[0].1.offset, 256);
    }

    #[test]
    fn deletion_index_roundtrip() {
        let id = EntityId::new("ent-2").unwrap();
        let region = DeletionIndexRegion {
            entries: vec![(
                id.clone(),
                DeletionIndexEntry {
                    deletion_ns: 12345,
                    state: LifecycleState::Soft,
                    flags: 0,
                },
            )],
        };
        let bytes = region.encode();
        let decoded = DeletionIndexRegion::decode(&bytes).unwrap();
        assert_eq!(decoded.entries[0].1.deletion_ns, 12345);
        assert_eq!(decoded.entries[0].1.state, LifecycleState::Soft);
    }
}
