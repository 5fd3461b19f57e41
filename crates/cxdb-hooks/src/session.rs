//! Session identity of the mounted hook.

use uuid::Uuid;

/// Where a session sits in the delegation tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionLineage {
    /// Session emitting the events.
    pub session_id: String,
    /// Delegating session, `None` for a root session.
    pub parent_id: Option<String>,
    /// Root of the delegation tree (the session itself when root).
    pub root_session_id: String,
    /// Agent name parsed from `session_id`.
    pub agent_name: Option<String>,
}

impl SessionLineage {
    /// Lineage for `session_id`; the agent name is derived from the id.
    pub fn new(
        session_id: impl Into<String>,
        parent_id: Option<String>,
        root_session_id: Option<String>,
    ) -> Self {
        let session_id = session_id.into();
        let root_session_id = root_session_id
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| session_id.clone());
        let agent_name = extract_agent_name(&session_id).map(str::to_string);
        Self {
            session_id,
            parent_id: parent_id.filter(|p| !p.is_empty()),
            root_session_id,
            agent_name,
        }
    }

    /// Whether this is a root session.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Why this session's contexts exist: `root` or `delegate`.
    #[must_use]
    pub fn spawn_reason(&self) -> &'static str {
        if self.is_root() { "root" } else { "delegate" }
    }
}

/// Agent name encoded in a child session id (`{parent}-{child}_{agent}`).
///
/// Plain UUIDs and ids without an underscore belong to root sessions and
/// carry no agent.
#[must_use]
pub fn extract_agent_name(session_id: &str) -> Option<&str> {
    if session_id.is_empty() || Uuid::try_parse(session_id).is_ok() {
        return None;
    }
    let (_, agent) = session_id.rsplit_once('_')?;
    (!agent.is_empty()).then_some(agent)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_after_last_underscore() {
        assert_eq!(
            extract_agent_name("0000aaaa-1111bbbb_zen-architect"),
            Some("zen-architect")
        );
        assert_eq!(extract_agent_name("a_b_explorer"), Some("explorer"));
    }

    #[test]
    fn no_agent_for_root_ids() {
        assert_eq!(
            extract_agent_name("6f1c2d3e-4a5b-4c6d-8e9f-0a1b2c3d4e5f"),
            None
        );
        assert_eq!(extract_agent_name("plain-session"), None);
        assert_eq!(extract_agent_name(""), None);
        assert_eq!(extract_agent_name("trailing_"), None);
    }

    #[test]
    fn root_lineage() {
        let l = SessionLineage::new("abc", None, None);
        assert!(l.is_root());
        assert_eq!(l.root_session_id, "abc");
        assert_eq!(l.spawn_reason(), "root");
        assert_eq!(l.agent_name, None);
    }

    #[test]
    fn child_lineage() {
        let l = SessionLineage::new("p-c_researcher", Some("p".into()), Some("root".into()));
        assert!(!l.is_root());
        assert_eq!(l.spawn_reason(), "delegate");
        assert_eq!(l.root_session_id, "root");
        assert_eq!(l.agent_name.as_deref(), Some("researcher"));
    }

    #[test]
    fn empty_parent_and_root_are_ignored() {
        let l = SessionLineage::new("s", Some(String::new()), Some(String::new()));
        assert!(l.is_root());
        assert_eq!(l.root_session_id, "s");
    }
}
