//! APPEND_TURN request body.
//!
//! ```text
//! context_id u64 · parent_turn_id u64
//! type_id_len u32 · type_id utf8 · type_version u32
//! encoding u32 (=1 msgpack) · compression u32 (=0 none)
//! uncompressed_len u32 · content_hash [32]
//! payload_len u32 · payload
//! idem_key_len u32 · idem_key [32]
//! ```
//!
//! All integers little-endian. The uncompressed length and the payload
//! length are the same value since compression is never applied.

use sha2::{Digest, Sha256};

use crate::constants::{COMPRESSION_NONE, ENCODING_MSGPACK, HASH_LEN};
use crate::errors::{Result, WireError};
use crate::payload::ContentHash;

/// Metadata describing one turn to append.
#[derive(Clone, Copy, Debug)]
pub struct AppendRequest<'a> {
    /// Target context.
    pub context_id: u64,
    /// Parent turn; 0 appends after the current head.
    pub parent_turn_id: u64,
    /// Declared type identifier, e.g. `amplifier.ToolEvent`.
    pub type_id: &'a str,
    /// Declared type version.
    pub type_version: u32,
    /// Serialized msgpack payload.
    pub payload: &'a [u8],
    /// BLAKE3-256 of `payload`.
    pub content_hash: &'a ContentHash,
}

/// Deterministic idempotency key: SHA-256 over the little-endian context id,
/// a `:` separator, and the content hash.
///
/// Identical content appended twice to the same context yields the same key,
/// which lets the server discard retried duplicates.
#[must_use]
pub fn idempotency_key(context_id: u64, content_hash: &ContentHash) -> [u8; HASH_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(context_id.to_le_bytes());
    hasher.update(b":");
    hasher.update(content_hash);
    hasher.finalize().into()
}

fn len_u32(field: &'static str, len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| WireError::LengthOverflow { field, len })
}

/// Build the binary APPEND_TURN body for `req`.
pub fn encode_append_payload(req: &AppendRequest<'_>) -> Result<Vec<u8>> {
    let type_id = req.type_id.as_bytes();
    let type_id_len = len_u32("type_id", type_id.len())?;
    let payload_len = len_u32("payload", req.payload.len())?;
    let idem = idempotency_key(req.context_id, req.content_hash);

    let mut out =
        Vec::with_capacity(8 + 8 + 4 + type_id.len() + 4 * 5 + 2 * HASH_LEN + req.payload.len() + 4);
    out.extend_from_slice(&req.context_id.to_le_bytes());
    out.extend_from_slice(&req.parent_turn_id.to_le_bytes());
    out.extend_from_slice(&type_id_len.to_le_bytes());
    out.extend_from_slice(type_id);
    out.extend_from_slice(&req.type_version.to_le_bytes());
    out.extend_from_slice(&ENCODING_MSGPACK.to_le_bytes());
    out.extend_from_slice(&COMPRESSION_NONE.to_le_bytes());
    out.extend_from_slice(&payload_len.to_le_bytes());
    out.extend_from_slice(req.content_hash);
    out.extend_from_slice(&payload_len.to_le_bytes());
    out.extend_from_slice(req.payload);
    #[allow(clippy::cast_possible_truncation)]
    out.extend_from_slice(&(HASH_LEN as u32).to_le_bytes());
    out.extend_from_slice(&idem);
    Ok(out)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
