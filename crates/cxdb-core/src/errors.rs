//! Wire codec error types.
//!
//! [`WireError`] covers local validation failures: undersized buffers,
//! truncated payloads, and payloads that cannot be encoded or decoded.
//! These indicate a programming error or a corrupt byte stream rather than
//! a transient condition, so callers should not retry them.

use thiserror::Error;

/// Errors produced by the wire codec.
#[derive(Debug, Error)]
pub enum WireError {
    /// Fewer bytes than a frame header were supplied.
    #[error("frame too short: {got} bytes, need at least {need}")]
    FrameTooShort {
        /// Bytes supplied.
        got: usize,
        /// Bytes required for a header.
        need: usize,
    },

    /// The header declared more payload bytes than were supplied.
    #[error("incomplete payload: got {got} bytes, expected {expected}")]
    IncompletePayload {
        /// Payload bytes supplied.
        got: usize,
        /// Payload length declared in the header.
        expected: usize,
    },

    /// A length field does not fit in its wire representation.
    #[error("{field} length {len} exceeds the wire limit")]
    LengthOverflow {
        /// Which field overflowed.
        field: &'static str,
        /// The offending length.
        len: usize,
    },

    /// msgpack encoding failed.
    #[error("msgpack encode error: {0}")]
    Encode(String),

    /// msgpack decoding failed.
    #[error("msgpack decode error: {0}")]
    Decode(String),

    /// Decoded payload did not have the expected tag-map shape.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

/// Result type for wire codec operations.
pub type Result<T> = std::result::Result<T, WireError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_too_short_display() {
        let err = WireError::FrameTooShort { got: 3, need: 16 };
        assert_eq!(err.to_string(), "frame too short: 3 bytes, need at least 16");
    }

    #[test]
    fn incomplete_payload_display() {
        let err = WireError::IncompletePayload {
            got: 2,
            expected: 10,
        };
        assert_eq!(
            err.to_string(),
            "incomplete payload: got 2 bytes, expected 10"
        );
    }

    #[test]
    fn length_overflow_display() {
        let err = WireError::LengthOverflow {
            field: "tag",
            len: 70_000,
        };
        assert_eq!(err.to_string(), "tag length 70000 exceeds the wire limit");
    }

    #[test]
    fn invalid_payload_display() {
        let err = WireError::InvalidPayload("top level is not a map".into());
        assert!(err.to_string().contains("top level is not a map"));
    }
}
