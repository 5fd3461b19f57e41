//! The host-side seam: how the hook is registered and fed events.

use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::HostError;
use crate::types::HookResult;

/// Removes one registration when called.
pub type Unregister = Box<dyn FnOnce() + Send>;

/// Receives events the host dispatches.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle one event. Observers always return [`HookResult::continue_`].
    async fn handle(&self, event: &str, data: &serde_json::Value) -> HookResult;
}

/// The session coordinator the hook is mounted into.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HostCoordinator: Send + Sync {
    /// Current session id.
    fn session_id(&self) -> String;

    /// Delegating session id, for child sessions.
    fn parent_id(&self) -> Option<String>;

    /// Coordinator configuration (carries `root_session_id`).
    fn config(&self) -> serde_json::Value;

    /// Subscribe `handler` to `event`.
    fn register(
        &self,
        event: &str,
        handler: Arc<dyn EventHandler>,
        priority: i32,
        name: &str,
    ) -> Unregister;

    /// Values other modules contributed to `channel`.
    async fn collect_contributions(
        &self,
        channel: &str,
    ) -> Result<Vec<serde_json::Value>, HostError>;
}
