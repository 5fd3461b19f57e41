//! In-process [`ContextStore`].
//!
//! Keeps every appended turn in memory behind a shared handle so a test can
//! hold one clone while the router owns another. Failures can be scripted to
//! exercise the buffering paths without a socket.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::errors::{ClientError, Result};
use crate::store::{AppendAck, ContextHead, ContextStore, TurnHead};

/// One turn stored by [`MemoryStore`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredTurn {
    /// Context the turn was appended to.
    pub context_id: u64,
    /// Assigned turn id (global sequence, starting at 1).
    pub turn_id: u64,
    /// Parent turn supplied by the caller.
    pub parent_turn_id: u64,
    /// Declared type id.
    pub type_id: String,
    /// Declared type version.
    pub type_version: u32,
    /// Serialized payload.
    pub payload: Vec<u8>,
}

#[derive(Debug, Default)]
struct State {
    connected: bool,
    next_context_id: u64,
    next_turn_id: u64,
    turns: Vec<StoredTurn>,
    connect_calls: usize,
    fail_connect: bool,
    fail_appends: bool,
    fail_create: bool,
    fail_append_after: Option<usize>,
    appends_attempted: usize,
    rejected_types: Vec<String>,
}

/// Shared-state in-memory store.
#[derive(Clone, Debug)]
pub struct MemoryStore {
    tag: String,
    state: Arc<Mutex<State>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new("memory")
    }
}

impl MemoryStore {
    /// Empty, disconnected store announcing `tag`.
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make `connect` fail until reset.
    pub fn set_fail_connect(&self, fail: bool) {
        self.state().fail_connect = fail;
    }

    /// Make every append fail with a connection error (and disconnect).
    pub fn set_fail_appends(&self, fail: bool) {
        self.state().fail_appends = fail;
    }

    /// Make `create_context` fail with a protocol error.
    pub fn set_fail_create(&self, fail: bool) {
        self.state().fail_create = fail;
    }

    /// Let the next `n` appends succeed, then fail every later one.
    pub fn fail_appends_after(&self, n: usize) {
        let mut state = self.state();
        state.fail_append_after = Some(state.appends_attempted + n);
    }

    /// Answer appends of `type_id` with an error frame, staying connected.
    pub fn reject_type(&self, type_id: impl Into<String>) {
        self.state().rejected_types.push(type_id.into());
    }

    /// Force the store into the disconnected state.
    pub fn disconnect(&self) {
        self.state().connected = false;
    }

    /// Number of `connect` calls so far.
    pub fn connect_calls(&self) -> usize {
        self.state().connect_calls
    }

    /// Every stored turn, in append order.
    pub fn turns(&self) -> Vec<StoredTurn> {
        self.state().turns.clone()
    }

    /// Stored turns of one context, in append order.
    pub fn turns_in(&self, context_id: u64) -> Vec<StoredTurn> {
        self.state()
            .turns
            .iter()
            .filter(|t| t.context_id == context_id)
            .cloned()
            .collect()
    }

    /// Ids of the contexts created so far.
    pub fn context_ids(&self) -> Vec<u64> {
        (1..=self.state().next_context_id).collect()
    }

    fn new_context(&self) -> Result<ContextHead> {
        let mut state = self.state();
        if !state.connected {
            return Err(ClientError::NotConnected);
        }
        if state.fail_create {
            return Err(ClientError::Protocol {
                code: Some(500),
                detail: "context creation disabled".into(),
            });
        }
        state.next_context_id += 1;
        Ok(ContextHead {
            context_id: state.next_context_id,
            head_turn_id: 0,
            head_depth: 0,
        })
    }
}

#[async_trait]
impl ContextStore for MemoryStore {
    fn is_connected(&self) -> bool {
        self.state().connected
    }

    fn client_tag(&self) -> &str {
        &self.tag
    }

    async fn connect(&mut self) -> Result<()> {
        let mut state = self.state();
        state.connect_calls += 1;
        if state.fail_connect {
            state.connected = false;
            return Err(ClientError::Connect {
                addr: "memory".into(),
                source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
            });
        }
        state.connected = true;
        Ok(())
    }

    async fn create_context(&mut self, _base_turn_id: u64) -> Result<ContextHead> {
        self.new_context()
    }

    async fn fork_context(&mut self, base_turn_id: u64) -> Result<ContextHead> {
        let mut head = self.new_context()?;
        head.head_turn_id = base_turn_id;
        Ok(head)
    }

    async fn get_head(&mut self, context_id: u64) -> Result<TurnHead> {
        let state = self.state();
        if !state.connected {
            return Err(ClientError::NotConnected);
        }
        let in_ctx: Vec<&StoredTurn> = state
            .turns
            .iter()
            .filter(|t| t.context_id == context_id)
            .collect();
        Ok(TurnHead {
            turn_id: in_ctx.last().map_or(0, |t| t.turn_id),
            depth: u32::try_from(in_ctx.len()).unwrap_or(u32::MAX),
        })
    }

    async fn append_serialized(
        &mut self,
        context_id: u64,
        payload: &[u8],
        type_id: &str,
        type_version: u32,
        parent_turn_id: u64,
    ) -> Result<AppendAck> {
        let mut state = self.state();
        if !state.connected {
            return Err(ClientError::NotConnected);
        }
        state.appends_attempted += 1;
        if state.rejected_types.iter().any(|t| t == type_id) {
            return Err(ClientError::Protocol {
                code: Some(413),
                detail: format!("type {type_id} rejected"),
            });
        }
        let over_limit = state
            .fail_append_after
            .is_some_and(|limit| state.appends_attempted > limit);
        if state.fail_appends || over_limit {
            state.connected = false;
            return Err(ClientError::ConnectionLost(std::io::Error::from(
                std::io::ErrorKind::ConnectionReset,
            )));
        }
        state.next_turn_id += 1;
        let turn_id = state.next_turn_id;
        state.turns.push(StoredTurn {
            context_id,
            turn_id,
            parent_turn_id,
            type_id: type_id.to_string(),
            type_version,
            payload: payload.to_vec(),
        });
        let depth = state.turns.iter().filter(|t| t.context_id == context_id).count();
        Ok(AppendAck {
            context_id,
            turn_id,
            depth: u32::try_from(depth).unwrap_or(u32::MAX),
        })
    }

    async fn close(&mut self) {
        self.state().connected = false;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn shared_handle_sees_appends() {
        let observer = MemoryStore::new("t");
        let mut store = observer.clone();
        store.connect().await.unwrap();
        let ctx = store.create_context(0).await.unwrap().context_id;
        let ack = store
            .append_serialized(ctx, b"\x80", "amplifier.GenericEvent", 1, 0)
            .await
            .unwrap();
        assert_eq!(ack.turn_id, 1);
        assert_eq!(observer.turns_in(ctx).len(), 1);
        assert_eq!(observer.turns()[0].type_id, "amplifier.GenericEvent");
        assert_eq!(store.get_head(ctx).await.unwrap().depth, 1);
    }

    #[tokio::test]
    async fn scripted_append_failure_disconnects() {
        let mut store = MemoryStore::default();
        store.connect().await.unwrap();
        store.fail_appends_after(1);
        assert!(store.append_serialized(1, b"a", "t", 1, 0).await.is_ok());
        let err = store.append_serialized(1, b"b", "t", 1, 0).await.unwrap_err();
        assert!(err.is_connection_error());
        assert!(!store.is_connected());
        assert_matches!(
            store.append_serialized(1, b"c", "t", 1, 0).await,
            Err(ClientError::NotConnected)
        );
    }

    #[tokio::test]
    async fn rejected_type_keeps_connection() {
        let mut store = MemoryStore::default();
        store.connect().await.unwrap();
        store.reject_type("amplifier.ToolEvent");
        assert_matches!(
            store.append_serialized(1, b"a", "amplifier.ToolEvent", 1, 0).await,
            Err(ClientError::Protocol { code: Some(413), .. })
        );
        assert!(store.is_connected());
        assert!(store.append_serialized(1, b"b", "amplifier.PlanEvent", 1, 0).await.is_ok());
        assert_eq!(store.turns().len(), 1);
    }

    #[tokio::test]
    async fn connect_failure() {
        let mut store = MemoryStore::default();
        store.set_fail_connect(true);
        assert!(store.connect().await.is_err());
        assert!(!store.is_connected());
        assert_eq!(store.connect_calls(), 1);
        store.set_fail_connect(false);
        store.connect().await.unwrap();
        assert!(store.is_connected());
    }

    #[tokio::test]
    async fn contexts_are_numbered() {
        let mut store = MemoryStore::default();
        store.connect().await.unwrap();
        assert_eq!(store.create_context(0).await.unwrap().context_id, 1);
        assert_eq!(store.fork_context(9).await.unwrap().head_turn_id, 9);
        assert_eq!(store.context_ids(), vec![1, 2]);
    }
}
