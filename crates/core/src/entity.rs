//! The `Entity` primitive (spec.md §3.1): a 64-byte ASCII id, an ordered
//! sequence of timestamped tags, and an opaque content payload.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::timestamp::Timestamp;

/// Maximum length, in bytes, of an entity id (§4.1 data region record).
pub const ENTITY_ID_MAX_LEN: usize = 64;

/// A caller-chosen, stable entity identifier.
///
/// On disk this is a 64-byte fixed ASCII field, trailing zero-filled
/// (§4.1.3). In memory it is kept as the trimmed `String` a caller gave us;
/// `to_fixed_bytes`/`from_fixed_bytes` perform the on-disk conversion so
/// every other layer works with the ergonomic form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(String);

impl EntityId {
    /// Validate and wrap a caller-supplied id.
    ///
    /// Must be non-empty, printable ASCII, and no longer than
    /// [`ENTITY_ID_MAX_LEN`] bytes (§3.1, §4.1.3).
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::Validation("entity id must not be empty".into()));
        }
        if id.len() > ENTITY_ID_MAX_LEN {
            return Err(Error::Validation(format!(
                "entity id {id:?} exceeds {ENTITY_ID_MAX_LEN} bytes"
            )));
        }
        if !id.bytes().all(|b| b.is_ascii_graphic() || b == b' ') {
            return Err(Error::Validation(format!(
                "entity id {id:?} must be printable ASCII"
            )));
        }
        Ok(EntityId(id))
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Derive a chunk child id: `<parent>-chunk-<i>` (§3.4).
    ///
    /// Returns an error rather than silently truncating if the derived id
    /// would overflow [`ENTITY_ID_MAX_LEN`].
    pub fn chunk_id(&self, index: usize) -> Result<EntityId> {
        EntityId::new(format!("{}-chunk-{}", self.0, index))
    }

    /// Encode into the on-disk fixed 64-byte, zero-padded ASCII field.
    pub fn to_fixed_bytes(&self) -> [u8; ENTITY_ID_MAX_LEN] {
        let mut buf = [0u8; ENTITY_ID_MAX_LEN];
        let bytes = self.0.as_bytes();
        buf[..bytes.len()].copy_from_slice(bytes);
        buf
    }

    /// Decode from the on-disk fixed 64-byte, zero-padded ASCII field.
    pub fn from_fixed_bytes(buf: &[u8; ENTITY_ID_MAX_LEN]) -> Result<Self> {
        let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        let s = std::str::from_utf8(&buf[..end])
            .map_err(|e| Error::Corruption(format!("entity id is not valid utf-8: {e}")))?;
        EntityId::new(s)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A single timestamped tag event (§3.1, §4.5.2 timeline).
///
/// `value` is conventionally `namespace:key` or `namespace:key:value`. The
/// same value string may recur at different timestamps — that recurrence
/// *is* the temporal history of the attribute (§3.1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagValue {
    /// Nanoseconds since epoch at which this tag was written.
    pub timestamp: Timestamp,
    /// The tag string itself.
    pub value: String,
}

impl TagValue {
    /// Construct a tag event, validating the value against the printable
    /// tag-string convention (§3.1).
    pub fn new(timestamp: Timestamp, value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.is_empty() {
            return Err(Error::Validation("tag value must not be empty".into()));
        }
        if !value.chars().all(|c| c.is_ascii_graphic() || c == ' ') {
            return Err(Error::Validation(format!(
                "tag value {value:?} must be printable"
            )));
        }
        Ok(TagValue { timestamp, value })
    }

    /// The tag's namespace: everything before the first `:`, or the whole
    /// value if there is no `:`.
    pub fn namespace(&self) -> &str {
        self.value.split(':').next().unwrap_or(&self.value)
    }
}

/// Deletion lifecycle state (spec.md §3.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum LifecycleState {
    /// Hidden from reads, recoverable, retained indefinitely.
    Soft = 1,
    /// Hidden from reads, recoverable, subject to long-term retention policy.
    Archived = 2,
    /// Hidden from reads, not recoverable; chunks become eligible for
    /// compaction (§9 open question on chunked-content deletion).
    Purged = 3,
}

impl LifecycleState {
    /// Decode from the on-disk `state_u8` field (§4.1.6).
    pub fn from_u8(v: u8) -> Result<Self> {
        match v {
            1 => Ok(LifecycleState::Soft),
            2 => Ok(LifecycleState::Archived),
            3 => Ok(LifecycleState::Purged),
            other => Err(Error::Corruption(format!(
                "invalid lifecycle state byte: {other}"
            ))),
        }
    }

    /// Encode to the on-disk `state_u8` field.
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// An entity snapshot record: an id, its full ordered tag history as
/// appended so far, and its current content payload (§3.1).
///
/// A single `Entity` value, as read back by the engine, always reflects
/// the *latest* persisted record for that id; the tag `Vec` is the
/// complete history, not just the latest state — derivation of "state at
/// T" is the temporal query layer's job (§4.7), not this type's.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Stable identifier.
    pub id: EntityId,
    /// Full ordered tag history, oldest first.
    pub tags: Vec<TagValue>,
    /// Opaque content payload. Empty for chunked parents (§3.4) once the
    /// writer has stripped inline content in favor of chunk children.
    pub content: Vec<u8>,
}

impl Entity {
    /// The raw size counted against `MAX_ENTITY_SIZE` (§3.2): id length,
    /// content length, and the summed length of every tag value.
    pub fn raw_size(&self) -> usize {
        self.id.as_str().len()
            + self.content.len()
            + self.tags.iter().map(|t| t.value.len()).sum::<usize>()
    }

    /// The tag-set active at or before `t`: for each distinct namespace,
    /// the most recent event with `timestamp <= t` (§4.7 `AsOf`).
    ///
    /// Ties on `(namespace, timestamp)` resolve in insertion (append)
    /// order, i.e. the later-appended tag in `self.tags` wins, matching
    /// the WAL/data-region append order tie-break rule (§4.7).
    pub fn tag_set_as_of(&self, t: Timestamp) -> Vec<&TagValue> {
        let mut latest: Vec<&TagValue> = Vec::new();
        for tag in &self.tags {
            if tag.timestamp > t {
                continue;
            }
            if let Some(slot) = latest
                .iter_mut()
                .find(|existing| existing.namespace() == tag.namespace())
            {
                // Later-or-equal timestamp (we iterate oldest-first) always
                // replaces, preserving append-order tie-break.
                if tag.timestamp >= slot.timestamp {
                    *slot = tag;
                }
            } else {
                latest.push(tag);
            }
        }
        latest
    }
}
