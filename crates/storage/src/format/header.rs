//! The fixed EUFF header (spec.md §4.1.1).

use byteorder::{ByteOrder, LittleEndian};
use entitydb_core::Limits;

use super::{EUFF_MAGIC, FORMAT_VERSION};

/// Size in bytes of the fixed header region. Region offset/size pairs are
/// `u64`; there are five regions (WAL, data, tag index, entity index,
/// deletion index), plus magic, version, flags, last-checkpoint timestamp,
/// creation/last-open counters and the trailing CRC.
pub const HEADER_SIZE: usize = 8   // magic
    + 4                             // version
    + 4                             // flags
    + 5 * 16                        // 5 x (offset u64, size u64)
    + 8                             // last_checkpoint_ns
    + 8                             // creation_counter
    + 8                             // last_open_counter
    + 4; // crc32 over everything above

/// Bit flags stored in the header (§4.1.1).
pub mod flags {
    /// Set while the integrity system has the file in emergency mode
    /// (§4.3.1); cleared once `Recover()` succeeds.
    pub const EMERGENCY_MODE: u32 = 1 << 0;
    /// Set when the file was closed cleanly (checkpoint + fsync) so a
    /// re-open can skip a precautionary self-heal scan.
    pub const CLEAN_SHUTDOWN: u32 = 1 << 1;
}

/// In-memory view of the EUFF header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EuffHeader {
    pub version: u32,
    pub flags: u32,
    pub wal_offset: u64,
    pub wal_size: u64,
    pub data_offset: u64,
    pub data_size: u64,
    pub tag_index_offset: u64,
    pub tag_index_size: u64,
    pub entity_index_offset: u64,
    pub entity_index_size: u64,
    pub deletion_index_offset: u64,
    pub deletion_index_size: u64,
    pub last_checkpoint_ns: u64,
    pub creation_counter: u64,
    pub last_open_counter: u64,
}

impl EuffHeader {
    /// A freshly created, empty file's header: all regions start right
    /// after the header, all sizes are zero.
    pub fn new_empty() -> Self {
        let post_header = HEADER_SIZE as u64;
        EuffHeader {
            version: FORMAT_VERSION,
            flags: 0,
            wal_offset: post_header,
            wal_size: 0,
            data_offset: post_header,
            data_size: 0,
            tag_index_offset: post_header,
            tag_index_size: 0,
            entity_index_offset: post_header,
            entity_index_size: 0,
            deletion_index_offset: post_header,
            deletion_index_size: 0,
            last_checkpoint_ns: 0,
            creation_counter: 1,
            last_open_counter: 0,
        }
    }

    /// A fresh file's header sized for `limits`: the WAL region reserves
    /// `limits.max_wal_size` bytes right after the header, and the data
    /// region (and, until the first checkpoint, the index regions) start
    /// right after that. Unlike [`EuffHeader::new_empty`], this leaves
    /// room for the WAL to actually hold entries before the data region
    /// begins.
    pub fn for_limits(limits: &Limits) -> Self {
        let wal_offset = HEADER_SIZE as u64;
        let data_offset = wal_offset + limits.max_wal_size;
        EuffHeader {
            wal_offset,
            wal_size: limits.max_wal_size,
            data_offset,
            tag_index_offset: data_offset,
            entity_index_offset: data_offset,
            deletion_index_offset: data_offset,
            ..Self::new_empty()
        }
    }

    /// Serialize to the fixed-size on-disk header, CRC included.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        let mut off = 0;
        buf[off..off + 8].copy_from_slice(&EUFF_MAGIC);
        off += 8;
        LittleEndian::write_u32(&mut buf[off..off + 4], self.version);
        off += 4;
        LittleEndian::write_u32(&mut buf[off..off + 4], self.flags);
        off += 4;
        for pair in [
            (self.wal_offset, self.wal_size),
            (self.data_offset, self.data_size),
            (self.tag_index_offset, self.tag_index_size),
            (self.entity_index_offset, self.entity_index_size),
            (self.deletion_index_offset, self.deletion_index_size),
        ] {
            LittleEndian::write_u64(&mut buf[off..off + 8], pair.0);
            off += 8;
            LittleEndian::write_u64(&mut buf[off..off + 8], pair.1);
            off += 8;
        }
        LittleEndian::write_u64(&mut buf[off..off + 8], self.last_checkpoint_ns);
        off += 8;
        LittleEndian::write_u64(&mut buf[off..off + 8], self.creation_counter);
        off += 8;
        LittleEndian::write_u64(&mut buf[off..off + 8], self.last_open_counter);
        off += 8;

        let crc = crc32fast::hash(&buf[..off]);
        LittleEndian::write_u32(&mut buf[off..off + 4], crc);
        buf
    }

    /// Decode from bytes, validating the magic number and CRC. A CRC or
    /// magic mismatch is reported as `None` — the caller (self-heal, §4.3.2)
    /// treats that as grounds for quarantine-and-rebuild, not a panic.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        if buf[0..8] != EUFF_MAGIC {
            return None;
        }
        let crc_stored = LittleEndian::read_u32(&buf[HEADER_SIZE - 4..HEADER_SIZE]);
        let crc_actual = crc32fast::hash(&buf[..HEADER_SIZE - 4]);
        if crc_stored != crc_actual {
            return None;
        }

        let mut off = 8;
        let version = LittleEndian::read_u32(&buf[off..off + 4]);
        off += 4;
        let flags = LittleEndian::read_u32(&buf[off..off + 4]);
        off += 4;

        let mut read_pair = |off: &mut usize| -> (u64, u64) {
            let o = LittleEndian::read_u64(&buf[*off..*off + 8]);
            *off += 8;
            let s = LittleEndian::read_u64(&buf[*off..*off + 8]);
            *off += 8;
            (o, s)
        };
        let (wal_offset, wal_size) = read_pair(&mut off);
        let (data_offset, data_size) = read_pair(&mut off);
        let (tag_index_offset, tag_index_size) = read_pair(&mut off);
        let (entity_index_offset, entity_index_size) = read_pair(&mut off);
        let (deletion_index_offset, deletion_index_size) = read_pair(&mut off);

        let last_checkpoint_ns = LittleEndian::read_u64(&buf[off..off + 8]);
        off += 8;
        let creation_counter = LittleEndian::read_u64(&buf[off..off + 8]);
        off += 8;
        let last_open_counter = LittleEndian::read_u64(&buf[off..off + 8]);

        Some(EuffHeader {
            version,
            flags,
            wal_offset,
            wal_size,
            data_offset,
            data_size,
            tag_index_offset,
            tag_index_size,
            entity_index_offset,
            entity_index_size,
            deletion_index_offset,
            deletion_index_size,
            last_checkpoint_ns,
            creation_counter,
            last_open_counter,
        })
    }

    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }

    pub fn set_flag(&mut self, flag: u32, on: bool) {
        if on {
            self.flags |= flag;
        } else {
            self.flags &= !flag;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let mut h = EuffHeader::new_empty();
        h.set_flag(flags::EMERGENCY_MODE, true);
        h.wal_size = 128;
        h.last_open_counter = 7;
        let encoded = h.encode();
        let decoded = EuffHeader::decode(&encoded).expect("valid header");
        assert_eq!(h, decoded);
        assert!(decoded.has_flag(flags::EMERGENCY_MODE));
    }

    #[test]
    fn rejects_bad_magic() {
        let mut buf = EuffHeader::new_empty().encode();
        buf[0] = b'X';
        assert!(EuffHeader::decode(&buf).is_none());
    }

    #[test]
    fn rejects_corrupted_crc() {
        let mut buf = EuffHeader::new_empty().encode();
        let last = buf.len() - 1;
        buf[last] ^= 0xFF;
        assert!(EuffHeader::decode(&buf).is_none());
    }
}
