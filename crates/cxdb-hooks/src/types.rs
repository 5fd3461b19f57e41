//! Handler result type shared with the host.
//!
//! This hook observes only, so the sole action is [`HookAction::Continue`].

use serde::{Deserialize, Serialize};

/// Action a hook handler asks the host to take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookAction {
    /// Continue execution normally.
    Continue,
}

/// Result returned by a hook handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookResult {
    /// Action to take.
    pub action: HookAction,
}

impl HookResult {
    /// Create a `Continue` result (no action needed).
    #[must_use]
    pub fn continue_() -> Self {
        Self {
            action: HookAction::Continue,
        }
    }

    /// Whether the host should carry on.
    #[must_use]
    pub fn is_continue(&self) -> bool {
        self.action == HookAction::Continue
    }
}

impl Default for HookResult {
    fn default() -> Self {
        Self::continue_()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
