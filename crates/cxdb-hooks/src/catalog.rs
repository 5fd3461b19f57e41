//! Event names, their CXDB types, and variant families.
//!
//! Every subscribed event lands in the everything context typed by
//! [`cxdb_type`]. Names with `:debug`/`:raw` siblings form a variant family
//! collapsed by [`crate::dedup::VariantDeduplicator`].

/// Declared CXDB type of a record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CxdbType {
    /// Type identifier, e.g. `amplifier.ToolEvent`.
    pub type_id: &'static str,
    /// Type version.
    pub version: u32,
}

impl CxdbType {
    const fn event(type_id: &'static str) -> Self {
        Self {
            type_id,
            version: 1,
        }
    }
}

/// Conversation item type used for turns, metadata and system-shaped events.
pub const CONVERSATION_ITEM: CxdbType = CxdbType {
    type_id: "cxdb.ConversationItem",
    version: 3,
};

/// `session:*` lifecycle.
pub const SESSION_EVENT: CxdbType = CxdbType::event("amplifier.SessionEvent");
/// `prompt:*`.
pub const PROMPT_EVENT: CxdbType = CxdbType::event("amplifier.PromptEvent");
/// `plan:*`.
pub const PLAN_EVENT: CxdbType = CxdbType::event("amplifier.PlanEvent");
/// `provider:*` and `llm:*`.
pub const PROVIDER_EVENT: CxdbType = CxdbType::event("amplifier.ProviderEvent");
/// `content_block:*`.
pub const CONTENT_BLOCK_EVENT: CxdbType = CxdbType::event("amplifier.ContentBlockEvent");
/// `thinking:*`.
pub const THINKING_EVENT: CxdbType = CxdbType::event("amplifier.ThinkingEvent");
/// `tool:*`.
pub const TOOL_EVENT: CxdbType = CxdbType::event("amplifier.ToolEvent");
/// `context:*`.
pub const CONTEXT_EVENT: CxdbType = CxdbType::event("amplifier.ContextEvent");
/// Orchestrator and execution boundaries.
pub const ORCHESTRATOR_EVENT: CxdbType = CxdbType::event("amplifier.OrchestratorEvent");
/// `task:agent_*` delegation.
pub const DELEGATION_EVENT: CxdbType = CxdbType::event("amplifier.DelegationEvent");
/// Approvals and policy violations.
pub const APPROVAL_EVENT: CxdbType = CxdbType::event("amplifier.ApprovalEvent");
/// `cancel:*`.
pub const CANCEL_EVENT: CxdbType = CxdbType::event("amplifier.CancelEvent");
/// `user:notification`.
pub const NOTIFICATION_EVENT: CxdbType = CxdbType::event("amplifier.NotificationEvent");
/// `artifact:*`.
pub const ARTIFACT_EVENT: CxdbType = CxdbType::event("amplifier.ArtifactEvent");
/// Fallback for names not in the catalog.
pub const GENERIC_EVENT: CxdbType = CxdbType::event("amplifier.GenericEvent");

/// Every `amplifier.*` event type, fallback last.
pub const EVENT_TYPES: [CxdbType; 15] = [
    SESSION_EVENT,
    PROMPT_EVENT,
    PLAN_EVENT,
    PROVIDER_EVENT,
    CONTENT_BLOCK_EVENT,
    THINKING_EVENT,
    TOOL_EVENT,
    CONTEXT_EVENT,
    ORCHESTRATOR_EVENT,
    DELEGATION_EVENT,
    APPROVAL_EVENT,
    CANCEL_EVENT,
    NOTIFICATION_EVENT,
    ARTIFACT_EVENT,
    GENERIC_EVENT,
];

/// Kernel events emitted by every session.
pub const CANONICAL_EVENTS: &[&str] = &[
    "session:start",
    "session:start:debug",
    "session:start:raw",
    "session:end",
    "session:fork",
    "session:fork:debug",
    "session:fork:raw",
    "session:resume",
    "session:resume:debug",
    "session:resume:raw",
    "prompt:submit",
    "prompt:complete",
    "plan:start",
    "plan:end",
    "provider:request",
    "provider:response",
    "provider:error",
    "llm:request",
    "llm:request:debug",
    "llm:request:raw",
    "llm:response",
    "llm:response:debug",
    "llm:response:raw",
    "content_block:start",
    "content_block:delta",
    "content_block:end",
    "thinking:delta",
    "thinking:final",
    "tool:pre",
    "tool:post",
    "tool:error",
    "context:pre_compact",
    "context:post_compact",
    "context:compaction",
    "context:include",
    "orchestrator:complete",
    "execution:start",
    "execution:end",
    "approval:required",
    "approval:granted",
    "approval:denied",
    "policy:violation",
    "cancel:requested",
    "cancel:completed",
    "user:notification",
    "artifact:write",
    "artifact:read",
];

/// Events emitted by the task delegation module, not announced by the kernel.
pub const MODULE_EVENTS: &[&str] = &[
    "task:agent_spawned",
    "task:agent_completed",
    "task:agent_resumed",
];

/// High-frequency streaming events never subscribed.
pub const DEFAULT_EXCLUDES: &[&str] = &["content_block:delta", "thinking:delta"];

const VARIANT_FAMILIES: &[&str] = &[
    "session:start",
    "session:fork",
    "session:resume",
    "llm:request",
    "llm:response",
];

/// CXDB type for an event name; [`GENERIC_EVENT`] when unknown.
#[must_use]
pub fn cxdb_type(event: &str) -> CxdbType {
    match event {
        "session:start" | "session:start:debug" | "session:start:raw" | "session:end"
        | "session:fork" | "session:fork:debug" | "session:fork:raw" | "session:resume"
        | "session:resume:debug" | "session:resume:raw" => SESSION_EVENT,
        "prompt:submit" | "prompt:complete" => PROMPT_EVENT,
        "plan:start" | "plan:end" => PLAN_EVENT,
        "provider:request" | "provider:response" | "provider:error" | "llm:request"
        | "llm:request:debug" | "llm:request:raw" | "llm:response" | "llm:response:debug"
        | "llm:response:raw" => PROVIDER_EVENT,
        "content_block:start" | "content_block:delta" | "content_block:end" => {
            CONTENT_BLOCK_EVENT
        }
        "thinking:delta" | "thinking:final" => THINKING_EVENT,
        "tool:pre" | "tool:post" | "tool:error" => TOOL_EVENT,
        "context:pre_compact" | "context:post_compact" | "context:compaction"
        | "context:include" => CONTEXT_EVENT,
        "orchestrator:complete" | "execution:start" | "execution:end" => ORCHESTRATOR_EVENT,
        "task:agent_spawned" | "task:agent_completed" | "task:agent_resumed" => DELEGATION_EVENT,
        "approval:required" | "approval:granted" | "approval:denied" | "policy:violation" => {
            APPROVAL_EVENT
        }
        "cancel:requested" | "cancel:completed" => CANCEL_EVENT,
        "user:notification" => NOTIFICATION_EVENT,
        "artifact:write" | "artifact:read" => ARTIFACT_EVENT,
        _ => GENERIC_EVENT,
    }
}

/// Strip a trailing `:raw` or `:debug`.
#[must_use]
pub fn base_event(event: &str) -> &str {
    event
        .strip_suffix(":raw")
        .or_else(|| event.strip_suffix(":debug"))
        .unwrap_or(event)
}

/// Whether `event` (base or variant) belongs to a variant family.
#[must_use]
pub fn has_variants(event: &str) -> bool {
    VARIANT_FAMILIES.contains(&base_event(event))
}

/// Richness of a variant: raw 2, debug 1, base 0.
#[must_use]
pub fn variant_rank(event: &str) -> u8 {
    if event.ends_with(":raw") {
        2
    } else if event.ends_with(":debug") {
        1
    } else {
        0
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
