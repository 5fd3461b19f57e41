//! Binary frame encoding and decoding.
//!
//! Every message on the wire is a 16-byte little-endian header followed by
//! the payload:
//!
//! | Offset | Size | Field            |
//! |--------|------|------------------|
//! | 0      | 4    | `payload_length` |
//! | 4      | 2    | `message_type`   |
//! | 6      | 2    | `flags`          |
//! | 8      | 8    | `request_id`     |
//!
//! A frame is only decoded once the full header and payload are present.
//! Short input is an error here; buffering until the bytes arrive is the
//! reader's job.

use crate::constants::FRAME_HEADER_SIZE;
use crate::errors::{Result, WireError};

/// Decoded frame header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    /// Number of payload bytes following the header.
    pub payload_len: u32,
    /// Message type code (see [`crate::constants::msg`]).
    pub msg_type: u16,
    /// Reserved flags.
    pub flags: u16,
    /// Caller-assigned request identifier.
    pub request_id: u64,
}

impl FrameHeader {
    /// Encode the header into its 16-byte wire form.
    #[must_use]
    pub fn encode(&self) -> [u8; FRAME_HEADER_SIZE] {
        let mut out = [0u8; FRAME_HEADER_SIZE];
        out[0..4].copy_from_slice(&self.payload_len.to_le_bytes());
        out[4..6].copy_from_slice(&self.msg_type.to_le_bytes());
        out[6..8].copy_from_slice(&self.flags.to_le_bytes());
        out[8..16].copy_from_slice(&self.request_id.to_le_bytes());
        out
    }

    /// Decode a header from the first 16 bytes of `data`.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < FRAME_HEADER_SIZE {
            return Err(WireError::FrameTooShort {
                got: data.len(),
                need: FRAME_HEADER_SIZE,
            });
        }
        Ok(Self {
            payload_len: u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
            msg_type: u16::from_le_bytes([data[4], data[5]]),
            flags: u16::from_le_bytes([data[6], data[7]]),
            request_id: u64::from_le_bytes([
                data[8], data[9], data[10], data[11], data[12], data[13], data[14], data[15],
            ]),
        })
    }
}

/// A fully decoded frame borrowing its payload from the input buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Frame<'a> {
    /// Message type code.
    pub msg_type: u16,
    /// Reserved flags.
    pub flags: u16,
    /// Request identifier.
    pub request_id: u64,
    /// Payload bytes.
    pub payload: &'a [u8],
}

/// Encode a complete frame (header + payload).
///
/// The payload length is written as `u32`; use [`checked_encode_frame`]
/// when the payload size is not already bounded.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn encode_frame(msg_type: u16, request_id: u64, payload: &[u8], flags: u16) -> Vec<u8> {
    let header = FrameHeader {
        payload_len: payload.len() as u32,
        msg_type,
        flags,
        request_id,
    };
    let mut out = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(payload);
    out
}

/// Encode a frame, rejecting payloads whose length does not fit in `u32`.
pub fn checked_encode_frame(
    msg_type: u16,
    request_id: u64,
    payload: &[u8],
    flags: u16,
) -> Result<Vec<u8>> {
    if u32::try_from(payload.len()).is_err() {
        return Err(WireError::LengthOverflow {
            field: "payload",
            len: payload.len(),
        });
    }
    Ok(encode_frame(msg_type, request_id, payload, flags))
}

/// Decode a frame from a buffer holding at least one complete frame.
///
/// Bytes past the declared payload length are ignored.
pub fn decode_frame(data: &[u8]) -> Result<Frame<'_>> {
    let header = FrameHeader::decode(data)?;
    let expected = header.payload_len as usize;
    let available = data.len() - FRAME_HEADER_SIZE;
    if available < expected {
        return Err(WireError::IncompletePayload {
            got: available,
            expected,
        });
    }
    Ok(Frame {
        msg_type: header.msg_type,
        flags: header.flags,
        request_id: header.request_id,
        payload: &data[FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + expected],
    })
}

/// Decode an ERROR frame payload into `(code, detail)`.
///
/// Layout: `code(u32) · detail_len(u32) · detail(utf8)`. Payloads shorter
/// than 8 bytes are treated leniently as a bare UTF-8 message with no code.
/// A detail length running past the payload is clamped to what is present.
#[must_use]
pub fn decode_error_payload(payload: &[u8]) -> (Option<u32>, String) {
    if payload.len() < 8 {
        return (None, String::from_utf8_lossy(payload).into_owned());
    }
    let code = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
    let detail_len = u32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]) as usize;
    let end = 8usize.saturating_add(detail_len).min(payload.len());
    let detail = String::from_utf8_lossy(&payload[8..end]).into_owned();
    (Some(code), detail)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
