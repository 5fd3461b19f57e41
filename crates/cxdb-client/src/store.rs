//! The context-store seam.
//!
//! The event router only ever talks to a [`ContextStore`]. [`crate::CxdbClient`]
//! is the production implementation; [`crate::MemoryStore`] backs tests.

use async_trait::async_trait;
use cxdb_core::Payload;
use cxdb_core::payload::serialize_payload;

use crate::errors::Result;

/// Head of a freshly created or forked context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContextHead {
    /// Context id.
    pub context_id: u64,
    /// Turn at the head.
    pub head_turn_id: u64,
    /// Depth of the head turn.
    pub head_depth: u32,
}

/// Head pointer of an existing context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TurnHead {
    /// Turn at the head.
    pub turn_id: u64,
    /// Depth of the head turn.
    pub depth: u32,
}

/// Acknowledgement of an appended turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AppendAck {
    /// Context echoed by the server.
    pub context_id: u64,
    /// Id assigned to the new turn.
    pub turn_id: u64,
    /// Depth of the new turn.
    pub depth: u32,
}

/// An append-only context store.
///
/// All RPCs other than [`connect`](Self::connect) and [`close`](Self::close)
/// fail with [`crate::ClientError::NotConnected`] while disconnected.
#[async_trait]
pub trait ContextStore: Send {
    /// Whether a handshaken connection is currently held.
    fn is_connected(&self) -> bool;

    /// Tag announced to the server in the handshake.
    fn client_tag(&self) -> &str;

    /// Open the connection and perform the handshake.
    async fn connect(&mut self) -> Result<()>;

    /// Create a new context based on `base_turn_id` (0 = empty).
    async fn create_context(&mut self, base_turn_id: u64) -> Result<ContextHead>;

    /// Fork a new context from `base_turn_id`.
    async fn fork_context(&mut self, base_turn_id: u64) -> Result<ContextHead>;

    /// Current head of `context_id`.
    async fn get_head(&mut self, context_id: u64) -> Result<TurnHead>;

    /// Append bytes that are already msgpack-serialized.
    ///
    /// The content hash and idempotency key are derived from exactly these
    /// bytes, so replaying a buffered record yields the same key.
    async fn append_serialized(
        &mut self,
        context_id: u64,
        payload: &[u8],
        type_id: &str,
        type_version: u32,
        parent_turn_id: u64,
    ) -> Result<AppendAck>;

    /// Serialize `payload` and append it.
    async fn append_turn(
        &mut self,
        context_id: u64,
        payload: &Payload,
        type_id: &str,
        type_version: u32,
        parent_turn_id: u64,
    ) -> Result<AppendAck> {
        let bytes = serialize_payload(payload)?;
        self.append_serialized(context_id, &bytes, type_id, type_version, parent_turn_id)
            .await
    }

    /// Close the connection. Best effort and idempotent.
    async fn close(&mut self);
}
