//! Context resolution for a session's two contexts.

use async_trait::async_trait;
use cxdb_client::{ContextStore, Result};
use tracing::info;

use crate::session::SessionLineage;

/// The pair of contexts one session writes to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionContexts {
    /// Reconstructed conversation turns.
    pub turns: u64,
    /// Every subscribed event.
    pub events: u64,
    /// Parent session's turns context, when known.
    pub parent: Option<u64>,
    /// Root session's turns context, when known.
    pub root: Option<u64>,
}

/// Decides which contexts a session writes to.
#[async_trait]
pub trait ContextResolver: Send + Sync {
    /// Create or look up the contexts for `lineage`.
    async fn resolve_contexts(
        &self,
        store: &mut (dyn ContextStore + '_),
        lineage: &SessionLineage,
    ) -> Result<SessionContexts>;
}

/// Creates two fresh, empty contexts for every session, child or root.
#[derive(Clone, Copy, Debug, Default)]
pub struct CreateNewContexts;

#[async_trait]
impl ContextResolver for CreateNewContexts {
    async fn resolve_contexts(
        &self,
        store: &mut (dyn ContextStore + '_),
        lineage: &SessionLineage,
    ) -> Result<SessionContexts> {
        let turns = store.create_context(0).await?.context_id;
        let events = store.create_context(0).await?.context_id;
        info!(
            session_id = %lineage.session_id,
            turns,
            events,
            "created CXDB contexts"
        );
        Ok(SessionContexts {
            turns,
            events,
            parent: None,
            root: None,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
