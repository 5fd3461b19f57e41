//! Protocol constants shared by the codec and the client.

/// Crate version (sourced from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Size of the fixed frame header in bytes.
pub const FRAME_HEADER_SIZE: usize = 16;

/// Largest response payload the client will read.
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Protocol version announced in the HELLO handshake.
pub const PROTOCOL_VERSION: u16 = 1;

/// Payload encoding tag for msgpack (the only supported encoding).
pub const ENCODING_MSGPACK: u32 = 1;

/// Payload compression tag for uncompressed payloads.
pub const COMPRESSION_NONE: u32 = 0;

/// Length in bytes of content hashes and idempotency keys.
pub const HASH_LEN: usize = 32;

/// Message type codes carried in the frame header.
pub mod msg {
    /// Handshake.
    pub const HELLO: u16 = 1;
    /// Create a new context.
    pub const CTX_CREATE: u16 = 2;
    /// Fork a context from a turn.
    pub const CTX_FORK: u16 = 3;
    /// Query the head of a context.
    pub const GET_HEAD: u16 = 4;
    /// Append one turn to a context.
    pub const APPEND_TURN: u16 = 5;
    /// Server-side error reply.
    pub const ERROR: u16 = 255;

    /// Human-readable name for a message type code.
    #[must_use]
    pub fn name(code: u16) -> &'static str {
        match code {
            HELLO => "HELLO",
            CTX_CREATE => "CTX_CREATE",
            CTX_FORK => "CTX_FORK",
            GET_HEAD => "GET_HEAD",
            APPEND_TURN => "APPEND_TURN",
            ERROR => "ERROR",
            _ => "UNKNOWN",
        }
    }
}
