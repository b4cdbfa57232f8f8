//! Data-region entity snapshot record codec (spec.md §4.1.3).
//!
//! ```text
//! (u64 id_len, id[64-byte fixed ASCII, zero-filled],
//!  u32 tag_count, tag_records[],
//!  u64 content_len, content_bytes,
//!  u32 crc)
//! tag_record = (u64 timestamp_ns, u16 value_len, value_bytes)
//! ```
//!
//! A tag value may be interned via the tag-index region's dictionary: an
//! interned reference sets the top bit of `value_len` and stores a 4-byte
//! little-endian dictionary id in place of the literal string bytes. The
//! writer in this crate never emits interned tags itself (interning is an
//! optional compaction-time optimization, §4.1.4) but the decoder
//! understands both forms given a dictionary to resolve against.

use byteorder::{ByteOrder, LittleEndian};
use entitydb_core::{Entity, EntityId, TagValue, Timestamp, ENTITY_ID_MAX_LEN};
use thiserror::Error;

const INTERNED_FLAG: u16 = 0x8000;

/// Errors decoding a single entity record from the data region.
#[derive(Debug, Error)]
pub enum RecordCodecError {
    #[error("truncated record: expected at least {expected} bytes, found {found}")]
    Truncated { expected: usize, found: usize },
    #[error("record crc mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    CrcMismatch { stored: u32, computed: u32 },
    #[error("invalid entity id: {0}")]
    InvalidEntityId(String),
    #[error("invalid tag value: {0}")]
    InvalidTagValue(String),
    #[error("interned tag id {0} not present in dictionary")]
    UnresolvedIntern(u32),
}

/// A decoded (or about-to-be-encoded) entity snapshot record, plus its
/// on-disk size — callers need the size to populate the entity-index
/// region's `size_u32` field (§4.1.5).
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntityRecord {
    pub entity: Entity,
}

impl StoredEntityRecord {
    pub fn new(entity: Entity) -> Self {
        StoredEntityRecord { entity }
    }

    /// Encode into the on-disk record layout. Tags are always written
    /// literally (no interning) by this path.
    pub fn encode(&self) -> Vec<u8> {
        let id_bytes = self.entity.id.as_str().as_bytes();
        let id_fixed = self.entity.id.to_fixed_bytes();

        let mut body = Vec::with_capacity(8 + ENTITY_ID_MAX_LEN + 4 + 8 + self.entity.content.len());
        let mut u64buf = [0u8; 8];

        LittleEndian::write_u64(&mut u64buf, id_bytes.len() as u64);
        body.extend_from_slice(&u64buf);
        body.extend_from_slice(&id_fixed);

        let mut u32buf = [0u8; 4];
        LittleEndian::write_u32(&mut u32buf, self.entity.tags.len() as u32);
        body.extend_from_slice(&u32buf);

        for tag in &self.entity.tags {
            LittleEndian::write_u64(&mut u64buf, tag.timestamp.as_nanos());
            body.extend_from_slice(&u64buf);
            let value_bytes = tag.value.as_bytes();
            let mut u16buf = [0u8; 2];
            LittleEndian::write_u16(&mut u16buf, value_bytes.len() as u16);
            body.extend_from_slice(&u16buf);
            body.extend_from_slice(value_bytes);
        }

        LittleEndian::write_u64(&mut u64buf, self.entity.content.len() as u64);
        body.extend_from_slice(&u64buf);
        body.extend_from_slice(&self.entity.content);

        let crc = crc32fast::hash(&body);
        let mut out = body;
        let mut crcbuf = [0u8; 4];
        LittleEndian::write_u32(&mut crcbuf, crc);
        out.extend_from_slice(&crcbuf);
        out
    }

    /// Decode one record from the front of `buf`, returning it plus the
    /// number of bytes consumed. `dictionary` resolves interned tag refs
    /// (pass `&[]` if the file has none).
    pub fn decode(buf: &[u8], dictionary: &[String]) -> Result<(Self, usize), RecordCodecError> {
        let mut off = 0usize;
        let need = |off: usize, n: usize, buf: &[u8]| -> Result<(), RecordCodecError> {
            if buf.len() < off + n {
                Err(RecordCodecError::Truncated {
                    expected: off + n,
                    found: buf.len(),
                })
            } else {
                Ok(())
            }
        };

        need(off, 8, buf)?;
        let id_len = LittleEndian::read_u64(&buf[off..off + 8]) as usize;
        off += 8;

        need(off, ENTITY_ID_MAX_LEN, buf)?;
        let mut id_fixed = [0u8; ENTITY_ID_MAX_LEN];
        id_fixed.copy_from_slice(&buf[off..off + ENTITY_ID_MAX_LEN]);
        off += ENTITY_ID_MAX_LEN;
        let _ = id_len; // length is implied by the zero-fill; kept for forward-compat.
        let id = EntityId::from_fixed_bytes(&id_fixed)
            .map_err(|e| RecordCodecError::InvalidEntityId(e.to_string()))?;

        need(off, 4, buf)?;
        let tag_count = LittleEndian::read_u32(&buf[off..off + 4]) as usize;
        off += 4;

        let mut tags = Vec::with_capacity(tag_count);
        for _ in 0..tag_count {
            need(off, 8, buf)?;
            let ts = LittleEndian::read_u64(&buf[off..off + 8]);
            off += 8;
            need(off, 2, buf)?;
            let raw_len = LittleEndian::read_u16(&buf[off..off + 2]);
            off += 2;

            let value = if raw_len & INTERNED_FLAG != 0 {
                need(off, 4, buf)?;
                let dict_id = LittleEndian::read_u32(&buf[off..off + 4]);
                off += 4;
                dictionary
                    .get(dict_id as usize)
                    .cloned()
                    .ok_or(RecordCodecError::UnresolvedIntern(dict_id))?
            } else {
                let len = raw_len as usize;
                need(off, len, buf)?;
                let s = std::str::from_utf8(&buf[off..off + len])
                    .map_err(|e| RecordCodecError::InvalidTagValue(e.to_string()))?
                    .to_string();
                off += len;
                s
            };
            tags.push(
                TagValue::new(Timestamp::from_nanos(ts), value)
                    .map_err(|e| RecordCodecError::InvalidTagValue(e.to_string()))?,
            );
        }

        need(off, 8, buf)?;
        let content_len = LittleEndian::read_u64(&buf[off..off + 8]) as usize;
        off += 8;
        need(off, content_len, buf)?;
        let content = buf[off..off + content_len].to_vec();
        off += content_len;

        need(off, 4, buf)?;
        let crc_stored = LittleEndian::read_u32(&buf[off..off + 4]);
        let crc_computed = crc32fast::hash(&buf[..off]);
        if crc_stored != crc_computed {
            return Err(RecordCodecError::CrcMismatch {
                stored: crc_stored,
                computed: crc_computed,
            });
        }
        off += 4;

        Ok((
            StoredEntityRecord {
                entity: Entity { id, tags, content },
            },
            off,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(id: &str, content: &[u8]) -> Entity {
        Entity {
            id: EntityId::new(id).unwrap(),
            tags: vec![
                TagValue::new(Timestamp::from_nanos(10), "type:doc").unwrap(),
                TagValue::new(Timestamp::from_nanos(20), "status:draft").unwrap(),
            ],
            content: content.to_vec(),
        }
    }

    #[test]
    fn roundtrip_with_content() {
        let e = entity("e1", b"hello world");
        let rec = StoredEntityRecord::new(e.clone());
        let bytes = rec.encode();
        let (decoded, consumed) = StoredEntityRecord::decode(&bytes, &[]).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded.entity, e);
    }

    #[test]
    fn roundtrip_empty_content() {
        let e = entity("e2", b"");
        let rec = StoredEntityRecord::new(e.clone());
        let bytes = rec.encode();
        let (decoded, _) = StoredEntityRecord::decode(&bytes, &[]).unwrap();
        assert_eq!(decoded.entity, e);
    }

    #[test]
    fn detects_crc_corruption() {
        let e = entity("e3", b"payload");
        let rec = StoredEntityRecord::new(e);
        let mut bytes = rec.encode();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let err = StoredEntityRecord::decode(&bytes, &[]).unwrap_err();
        assert!(matches!(err, RecordCodecError::CrcMismatch { .. }));
    }

    #[test]
    fn decode_reports_truncation() {
        let e = entity("e4", b"payload");
        let rec = StoredEntityRecord::new(e);
        let bytes = rec.encode();
        let truncated = &bytes[..bytes.len() - 5];
        assert!(StoredEntityRecord::decode(truncated, &[]).is_err());
    }

    #[test]
    fn two_records_back_to_back() {
        let e1 = entity("first", b"a");
        let e2 = entity("second", b"bb");
        let mut buf = StoredEntityRecord::new(e1.clone()).encode();
        buf.extend(StoredEntityRecord::new(e2.clone()).encode());

        let (d1, n1) = StoredEntityRecord::decode(&buf, &[]).unwrap();
        let (d2, n2) = StoredEntityRecord::decode(&buf[n1..], &[]).unwrap();
        assert_eq!(d1.entity, e1);
        assert_eq!(d2.entity, e2);
        assert_eq!(n1 + n2, buf.len());
    }

    proptest::proptest! {
        /// encode/decode must round-trip for any well-formed entity, not
        /// just the handful of fixtures above (P-REBUILD relies on this
        /// being exact, since a checkpoint is just these records back to
        /// back).
        #[test]
        fn roundtrip_holds_for_arbitrary_entities(
            id in "[a-zA-Z0-9_-]{1,64}",
            content in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..2048),
            tag_count in 0usize..8,
        ) {
            let tags: Vec<TagValue> = (0..tag_count)
                .map(|i| TagValue::new(Timestamp::from_nanos(i as u64), format!("tag:{i}")).unwrap())
                .collect();
            let e = Entity { id: EntityId::new(id).unwrap(), tags, content };
            let rec = StoredEntityRecord::new(e.clone());
            let bytes = rec.encode();
            let (decoded, consumed) = StoredEntityRecord::decode(&bytes, &[]).unwrap();
            proptest::prop_assert_eq!(consumed, bytes.len());
            proptest::prop_assert_eq!(decoded.entity, e);
        }

        /// Decoding arbitrary bytes must never panic, only return an
        /// error — a corrupt or truncated data region is a routine
        /// self-healing input, not an invariant violation.
        #[test]
        fn decode_never_panics_on_arbitrary_bytes(
            data in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..512),
        ) {
            let _ = StoredEntityRecord::decode(&data, &[]);
        }
    }
}
