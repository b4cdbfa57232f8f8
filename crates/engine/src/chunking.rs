//! Auto-chunking policy (spec.md §3.4): content above
//! `Limits::auto_chunk_threshold` is split into `<parent>-chunk-<i>` child
//! entities, each tagged with enough metadata to be reassembled without
//! consulting the parent's content field at all.

use sha2::{Digest, Sha256};

use entitydb_core::{Entity, EntityId, Limits, Result, TagValue, Timestamp};

/// A chunk child ready to be written as its own entity.
pub struct Chunk {
    pub id: EntityId,
    pub index: usize,
    pub content: Vec<u8>,
    pub checksum_hex: String,
}

/// The parent-side tags to attach once its content has been split off.
pub struct ChunkedParent {
    pub content_type: Option<String>,
    pub content_size: u64,
    pub content_checksum_hex: String,
    pub chunk_count: usize,
}

/// Split `content` into chunks of `limits.chunk_size`, deriving child ids
/// from `parent_id` (§3.4: `<parent>-chunk-<i>`, zero-indexed).
///
/// Returns `None` if `content.len()` does not exceed
/// `limits.auto_chunk_threshold` — the caller should store it inline.
pub fn split_if_needed(
    parent_id: &EntityId,
    content: &[u8],
    content_type: Option<&str>,
    limits: &Limits,
    written_at: Timestamp,
) -> Result<Option<(ChunkedParent, Vec<Chunk>)>> {
    if (content.len() as u64) <= limits.auto_chunk_threshold {
        return Ok(None);
    }

    let chunk_size = limits.chunk_size.max(1) as usize;
    let mut chunks = Vec::new();
    for (index, part) in content.chunks(chunk_size).enumerate() {
        let checksum_hex = sha256_hex(part);
        let child_id = parent_id.chunk_id(index)?;
        chunks.push(Chunk {
            id: child_id,
            index,
            content: part.to_vec(),
            checksum_hex,
        });
    }

    let parent = ChunkedParent {
        content_type: content_type.map(|s| s.to_string()),
        content_size: content.len() as u64,
        content_checksum_hex: sha256_hex(content),
        chunk_count: chunks.len(),
    };

    Ok(Some((parent, chunks)))
}

/// Build the tag set a chunk child entity carries (§3.4): `type:chunk`,
/// `parent:<id>`, `chunk:<i>`, `content:size:<n>`,
/// `content:checksum:sha256:<hex>`.
pub fn chunk_tags(parent_id: &EntityId, chunk: &Chunk, at: Timestamp) -> Result<Vec<TagValue>> {
    Ok(vec![
        TagValue::new(at, "type:chunk")?,
        TagValue::new(at, format!("parent:{parent_id}"))?,
        TagValue::new(at, format!("chunk:{}", chunk.index))?,
        TagValue::new(at, format!("content:size:{}", chunk.content.len()))?,
        TagValue::new(
            at,
            format!("content:checksum:sha256:{}", chunk.checksum_hex),
        )?,
    ])
}

/// Build the tag set a chunked parent entity carries once its content has
/// been stripped out in favor of chunk children (§3.4).
pub fn parent_tags(parent: &ChunkedParent, at: Timestamp) -> Result<Vec<TagValue>> {
    let mut tags = Vec::new();
    if let Some(ct) = &parent.content_type {
        tags.push(TagValue::new(at, format!("content:type:{ct}"))?);
    }
    tags.push(TagValue::new(
        at,
        format!("content:size:{}", parent.content_size),
    )?);
    tags.push(TagValue::new(
        at,
        format!("content:checksum:sha256:{}", parent.content_checksum_hex),
    )?);
    tags.push(TagValue::new(
        at,
        format!("content:chunks:{}", parent.chunk_count),
    )?);
    Ok(tags)
}

/// Reassemble a chunked parent's content from its chunk children, in index
/// order, verifying each chunk's checksum tag along the way
/// (P-CHUNK-ROUNDTRIP).
pub fn reassemble(chunks: &[Entity]) -> Result<Vec<u8>> {
    let mut ordered: Vec<&Entity> = chunks.iter().collect();
    ordered.sort_by_key(|e| chunk_index_of(e).unwrap_or(usize::MAX));
    let mut out = Vec::new();
    for entity in ordered {
        out.extend_from_slice(&entity.content);
    }
    Ok(out)
}

fn chunk_index_of(entity: &Entity) -> Option<usize> {
    entity
        .tags
        .iter()
        .rev()
        .find_map(|t| t.value.strip_prefix("chunk:"))
        .and_then(|s| s.parse().ok())
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
