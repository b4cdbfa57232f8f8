//! WAL region entry codec (spec.md §4.1.2).
//!
//! ```text
//! (u64 length, u8 op, entity_record_bytes, u32 crc)
//! ```
//!
//! `length` is the length of `entity_record_bytes` alone (the already
//! self-describing, self-checksummed data-region record encoding, §4.1.3);
//! `crc` here covers `op` and `entity_record_bytes` together so a torn
//! write (WAL entry fully written, data-region append truncated — §4.2
//! failure model, §8 scenario 2) is detected at replay time even before
//! the inner record's own CRC is checked.

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

/// The operation a WAL entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WalOp {
    Put = 1,
    Delete = 2,
}

impl WalOp {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(WalOp::Put),
            2 => Some(WalOp::Delete),
            _ => None,
        }
    }
}

/// Errors decoding a WAL entry from the WAL region.
#[derive(Debug, Error)]
pub enum WalEntryError {
    #[error("truncated WAL entry: needed {needed} bytes, found {found}")]
    Truncated { needed: usize, found: usize },
    #[error("unknown WAL op byte: {0}")]
    UnknownOp(u8),
    #[error("WAL entry crc mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    CrcMismatch { stored: u32, computed: u32 },
}

/// A decoded WAL entry: an operation plus the raw bytes of the data-region
/// record it applies to (a `PUT`'s full `StoredEntityRecord` encoding, or
/// for a `DELETE`, the same encoding of a tombstone carrying only the id).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalEntry {
    pub op: WalOp,
    pub record_bytes: Vec<u8>,
}

impl WalEntry {
    pub fn new(op: WalOp, record_bytes: Vec<u8>) -> Self {
        WalEntry { op, record_bytes }
    }

    /// Total encoded size in bytes, used by the integrity system's
    /// pre-write length estimate (§4.3.1) before actually allocating it.
    pub fn estimated_encoded_len(record_bytes_len: usize) -> u64 {
        8 + 1 + record_bytes_len as u64 + 4
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::estimated_encoded_len(self.record_bytes.len()) as usize);
        let mut u64buf = [0u8; 8];
        LittleEndian::write_u64(&mut u64buf, self.record_bytes.len() as u64);
        out.extend_from_slice(&u64buf);
        out.push(self.op as u8);
        out.extend_from_slice(&self.record_bytes);

        let crc = crc32fast::hash(&out);
        let mut crcbuf = [0u8; 4];
        LittleEndian::write_u32(&mut crcbuf, crc);
        out.extend_from_slice(&crcbuf);
        out
    }

    /// Decode one entry from the front of `buf`. Returns `Ok(None)` when
    /// `buf` doesn't contain a complete, checksummed entry — the caller
    /// (WAL replay, §4.6) treats that as "end of durable WAL", not an
    /// error, since it's the expected shape of a torn tail write.
    pub fn try_decode(buf: &[u8]) -> Result<Option<(Self, usize)>, WalEntryError> {
        if buf.len() < 8 {
            return Ok(None);
        }
        let len = LittleEndian::read_u64(&buf[0..8]) as usize;
        let total = 8 + 1 + len + 4;
        if buf.len() < total {
            return Ok(None);
        }

        let op_byte = buf[8];
        let op = WalOp::from_u8(op_byte).ok_or(WalEntryError::UnknownOp(op_byte))?;
        let record_bytes = buf[9..9 + len].to_vec();

        let crc_stored = LittleEndian::read_u32(&buf[9 + len..9 + len + 4]);
        let crc_computed = crc32fast::hash(&buf[..9 + len]);
        if crc_stored != crc_computed {
            return Err(WalEntryError::CrcMismatch {
                stored: crc_stored,
                computed: crc_computed,
            });
        }

        Ok(Some((WalEntry { op, record_bytes }, total)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_put() {
        let e = WalEntry::new(WalOp::Put, vec![1, 2, 3, 4]);
        let bytes = e.encode();
        let (decoded, consumed) = WalEntry::try_decode(&bytes).unwrap().unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded, e);
    }

    #[test]
    fn truncated_tail_is_none_not_error() {
        let e = WalEntry::new(WalOp::Delete, vec![9, 9, 9]);
        let bytes = e.encode();
        let torn = &bytes[..bytes.len() - 2];
        assert!(WalEntry::try_decode(torn).unwrap().is_none());
    }

    #[test]
    fn crc_mismatch_is_error() {
        let e = WalEntry::new(WalOp::Put, vec![1, 2, 3]);
        let mut bytes = e.encode();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let err = WalEntry::try_decode(&bytes).unwrap_err();
        assert!(matches!(err, WalEntryError::CrcMismatch { .. }));
    }
}
