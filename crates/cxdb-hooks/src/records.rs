//! Record builders for both contexts.
//!
//! Everything-context records are either a flat `amplifier.*` envelope or a
//! `cxdb.ConversationItem` system item wrapping that envelope. The first
//! record of every context is a context-metadata item that names it in the
//! store UI.

use cxdb_core::payload::{json_to_value, serialize_payload, to_map_value};
use cxdb_core::{Payload, Result};
use cxdb_settings::EventRecordShape;
use rmpv::Value;
use sha2::{Digest, Sha256};

use crate::catalog::{CONVERSATION_ITEM, CxdbType, cxdb_type};
use crate::provenance::{ContextProvenance, ProcessIdentity};
use crate::session::SessionLineage;

/// Envelope tags shared by every `amplifier.*` record.
pub mod envelope {
    /// Event name.
    pub const EVENT: u64 = 1;
    /// Emitting session.
    pub const SESSION_ID: u64 = 2;
    /// Parent session.
    pub const PARENT_SESSION_ID: u64 = 3;
    /// Timestamp, ms since epoch.
    pub const TIMESTAMP: u64 = 4;
    /// Agent name.
    pub const AGENT: u64 = 5;
    /// Serialized size of the envelope.
    pub const PAYLOAD_BYTES: u64 = 6;
    /// Event data.
    pub const DATA: u64 = 7;
    /// Root session.
    pub const ROOT_SESSION_ID: u64 = 8;
}

/// `cxdb.ConversationItem` v3 tags.
pub mod item {
    /// `user_input`, `assistant_turn` or `system`.
    pub const ITEM_TYPE: u64 = 1;
    /// Item status.
    pub const STATUS: u64 = 2;
    /// Timestamp, ms since epoch.
    pub const TIMESTAMP: u64 = 3;
    /// Content-derived item id.
    pub const ID: u64 = 4;
    /// User input subtree.
    pub const USER_INPUT: u64 = 10;
    /// Assistant turn subtree.
    pub const ASSISTANT_TURN: u64 = 11;
    /// System message subtree.
    pub const SYSTEM: u64 = 12;
    /// Wrapped event envelope.
    pub const EVENT: u64 = 13;
    /// Context metadata subtree.
    pub const CONTEXT_METADATA: u64 = 30;

    /// System subtree tags.
    pub mod system {
        /// `info`, `error`, `lifecycle`, `llm` or `tool`.
        pub const KIND: u64 = 1;
        /// Display title.
        pub const TITLE: u64 = 2;
        /// Body text.
        pub const CONTENT: u64 = 3;
    }

    /// Context metadata subtree tags.
    pub mod metadata {
        /// Client tag.
        pub const CLIENT_TAG: u64 = 1;
        /// Display title.
        pub const TITLE: u64 = 2;
        /// Labels for filtering.
        pub const LABELS: u64 = 3;
        /// Provenance subtree.
        pub const PROVENANCE: u64 = 10;
    }
}

/// Event data keys already carried by the envelope.
const ENVELOPE_KEYS: [&str; 3] = ["session_id", "parent_id", "ts"];

/// A record ready to serialize and append.
#[derive(Clone, Debug, PartialEq)]
pub struct EventRecord {
    /// Declared type.
    pub cxdb_type: CxdbType,
    /// Tagged payload.
    pub payload: Payload,
}

/// Current time in ms since the Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// 24 hex chars of SHA-256 over `session:label:ts`.
#[must_use]
pub fn item_id(session_id: &str, label: &str, ts_ms: i64) -> String {
    let digest = Sha256::digest(format!("{session_id}:{label}:{ts_ms}").as_bytes());
    let mut id = hex::encode(digest);
    id.truncate(24);
    id
}

/// Event data minus the envelope fields, or `None` when nothing is left.
#[must_use]
pub fn event_data(data: &serde_json::Value) -> Option<serde_json::Value> {
    match data {
        serde_json::Value::Null => None,
        serde_json::Value::Object(map) => {
            let filtered: serde_json::Map<String, serde_json::Value> = map
                .iter()
                .filter(|(k, _)| !ENVELOPE_KEYS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            (!filtered.is_empty()).then_some(serde_json::Value::Object(filtered))
        }
        other => Some(other.clone()),
    }
}

/// Flat event envelope.
///
/// The size tag holds the length of the envelope serialized with a zero
/// placeholder in that slot.
pub fn build_envelope(
    event: &str,
    data: &serde_json::Value,
    lineage: &SessionLineage,
    ts_ms: i64,
) -> Result<Payload> {
    let mut env = Payload::new();
    let _ = env.insert(envelope::EVENT, Value::from(event));
    let _ = env.insert(envelope::SESSION_ID, Value::from(lineage.session_id.as_str()));
    if let Some(parent) = &lineage.parent_id {
        let _ = env.insert(envelope::PARENT_SESSION_ID, Value::from(parent.as_str()));
    }
    let _ = env.insert(envelope::TIMESTAMP, Value::from(ts_ms));
    if let Some(agent) = &lineage.agent_name {
        let _ = env.insert(envelope::AGENT, Value::from(agent.as_str()));
    }
    if let Some(filtered) = event_data(data) {
        let _ = env.insert(envelope::DATA, json_to_value(&filtered)?);
    }
    let _ = env.insert(
        envelope::ROOT_SESSION_ID,
        Value::from(lineage.root_session_id.as_str()),
    );

    let _ = env.insert(envelope::PAYLOAD_BYTES, Value::from(0u64));
    let size = serialize_payload(&env)?.len();
    let _ = env.insert(envelope::PAYLOAD_BYTES, Value::from(u64::try_from(size).unwrap_or(u64::MAX)));
    Ok(env)
}

/// System-message kind for an event name.
#[must_use]
pub fn system_kind(event: &str) -> &'static str {
    if event.contains("error") {
        "error"
    } else if event.starts_with("session:") {
        "lifecycle"
    } else if event.starts_with("llm:") {
        "llm"
    } else if event.starts_with("tool:") {
        "tool"
    } else {
        "info"
    }
}

fn system_subtree(kind: &str, title: &str, content: &str) -> Value {
    let mut sys = Payload::new();
    let _ = sys.insert(item::system::KIND, Value::from(kind));
    let _ = sys.insert(item::system::TITLE, Value::from(title));
    let _ = sys.insert(item::system::CONTENT, Value::from(content));
    to_map_value(&sys)
}

fn system_item(session_id: &str, label: &str, ts_ms: i64, subtree: Value) -> Payload {
    let mut out = Payload::new();
    let _ = out.insert(item::ITEM_TYPE, Value::from("system"));
    let _ = out.insert(item::STATUS, Value::from("complete"));
    let _ = out.insert(item::TIMESTAMP, Value::from(ts_ms));
    let _ = out.insert(item::ID, Value::from(item_id(session_id, label, ts_ms)));
    let _ = out.insert(item::SYSTEM, subtree);
    out
}

/// Event rendered as a `system` conversation item wrapping its envelope.
pub fn build_system_item(
    event: &str,
    data: &serde_json::Value,
    lineage: &SessionLineage,
    ts_ms: i64,
) -> Result<Payload> {
    let title = match &lineage.agent_name {
        Some(agent) => format!("[{agent}] {event}"),
        None => event.to_string(),
    };
    let content = event_data(data).map_or_else(|| "{}".to_string(), |d| d.to_string());
    let mut out = system_item(
        &lineage.session_id,
        event,
        ts_ms,
        system_subtree(system_kind(event), &title, &content),
    );
    let env = build_envelope(event, data, lineage, ts_ms)?;
    let _ = out.insert(item::EVENT, to_map_value(&env));
    Ok(out)
}

/// Everything-context record for `event` in the configured shape.
pub fn build_event_record(
    shape: EventRecordShape,
    event: &str,
    data: &serde_json::Value,
    lineage: &SessionLineage,
    ts_ms: i64,
) -> Result<EventRecord> {
    Ok(match shape {
        EventRecordShape::Envelope => EventRecord {
            cxdb_type: cxdb_type(event),
            payload: build_envelope(event, data, lineage, ts_ms)?,
        },
        EventRecordShape::ConversationItem => EventRecord {
            cxdb_type: CONVERSATION_ITEM,
            payload: build_system_item(event, data, lineage, ts_ms)?,
        },
    })
}

/// Inputs describing one context for its metadata record.
#[derive(Clone, Debug)]
pub struct ContextMetadata<'a> {
    /// `Turns` or `Events`.
    pub label: &'a str,
    /// Client tag of the connection.
    pub client_tag: &'a str,
    /// Project (working directory name); empty when unknown.
    pub project_name: &'a str,
    /// Active bundle; empty when unknown.
    pub bundle_name: &'a str,
    /// Parent context, for child sessions.
    pub parent_context_id: Option<u64>,
    /// Root context, for child sessions.
    pub root_context_id: Option<u64>,
}

/// Display title: `Amplifier [<project>] <label>: <sid12>`.
#[must_use]
pub fn context_title(project_name: &str, label: &str, session_id: &str) -> String {
    let short: String = session_id.chars().take(12).collect();
    if project_name.is_empty() {
        format!("Amplifier {label}: {short}")
    } else {
        format!("Amplifier {project_name} {label}: {short}")
    }
}

/// First record of a context: a `system` item carrying tag-30 metadata.
#[must_use]
pub fn build_context_metadata(
    meta: &ContextMetadata<'_>,
    lineage: &SessionLineage,
    identity: &ProcessIdentity,
    ts_ms: i64,
) -> Payload {
    let label_lower = meta.label.to_lowercase();
    let mut labels = vec![Value::from("amplifier"), Value::from(label_lower.as_str())];
    if !meta.project_name.is_empty() {
        labels.push(Value::from(meta.project_name));
    }

    let provenance = identity.provenance(&ContextProvenance {
        session_id: &lineage.session_id,
        parent_context_id: meta.parent_context_id,
        root_context_id: meta.root_context_id,
        spawn_reason: lineage.spawn_reason(),
        agent_name: lineage.agent_name.as_deref(),
        bundle_name: Some(meta.bundle_name),
        captured_at_ms: ts_ms,
    });

    let mut cm = Payload::new();
    let _ = cm.insert(item::metadata::CLIENT_TAG, Value::from(meta.client_tag));
    let _ = cm.insert(
        item::metadata::TITLE,
        Value::from(context_title(meta.project_name, meta.label, &lineage.session_id)),
    );
    let _ = cm.insert(item::metadata::LABELS, Value::Array(labels));
    let _ = cm.insert(item::metadata::PROVENANCE, provenance);

    let mut out = system_item(
        &lineage.session_id,
        &format!("context_metadata_{label_lower}"),
        ts_ms,
        system_subtree(
            "info",
            &format!("Context: {}", meta.label),
            &format!("Amplifier session {}", lineage.session_id),
        ),
    );
    let _ = out.insert(item::CONTEXT_METADATA, to_map_value(&cm));
    out
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TOOL_EVENT;
    use crate::provenance::tests::synthetic;
    use serde_json::json;

    fn lineage() -> SessionLineage {
        SessionLineage::new("p-c_explorer", Some("parent".into()), Some("root-session".into()))
    }

    fn field<'a>(map: &'a Value, tag: u64) -> Option<&'a Value> {
        map.as_map()?
            .iter()
            .find(|(k, _)| k.as_u64() == Some(tag))
            .map(|(_, v)| v)
    }

    #[test]
    fn item_id_is_deterministic_24_hex() {
        let a = item_id("s", "label", 5);
        assert_eq!(a.len(), 24);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(a, item_id("s", "label", 5));
        assert_ne!(a, item_id("s", "label", 6));
    }

    #[test]
    fn event_data_drops_envelope_fields() {
        let d = json!({ "session_id": "s", "parent_id": "p", "ts": 1, "tool_name": "bash" });
        assert_eq!(event_data(&d), Some(json!({ "tool_name": "bash" })));
        assert_eq!(event_data(&json!({ "session_id": "s" })), None);
        assert_eq!(event_data(&serde_json::Value::Null), None);
    }

    #[test]
    fn envelope_fields() {
        let env = build_envelope("tool:post", &json!({ "tool_name": "bash" }), &lineage(), 99)
            .unwrap();
        assert_eq!(env[&envelope::EVENT].as_str(), Some("tool:post"));
        assert_eq!(env[&envelope::SESSION_ID].as_str(), Some("p-c_explorer"));
        assert_eq!(env[&envelope::PARENT_SESSION_ID].as_str(), Some("parent"));
        assert_eq!(env[&envelope::TIMESTAMP].as_i64(), Some(99));
        assert_eq!(env[&envelope::AGENT].as_str(), Some("explorer"));
        assert_eq!(env[&envelope::ROOT_SESSION_ID].as_str(), Some("root-session"));
        let data = &env[&envelope::DATA];
        assert_eq!(
            data.as_map().unwrap()[0],
            (Value::from("tool_name"), Value::from("bash"))
        );
    }

    #[test]
    fn envelope_size_is_placeholder_serialization() {
        let mut env = build_envelope("x:y", &json!({ "a": 1 }), &lineage(), 1).unwrap();
        let size = env[&envelope::PAYLOAD_BYTES].as_u64().unwrap();
        let _ = env.insert(envelope::PAYLOAD_BYTES, Value::from(0u64));
        assert_eq!(size as usize, serialize_payload(&env).unwrap().len());
    }

    #[test]
    fn root_envelope_omits_optional_tags() {
        let root = SessionLineage::new("abc", None, None);
        let env = build_envelope("session:start", &json!({ "session_id": "abc" }), &root, 1)
            .unwrap();
        assert!(!env.contains_key(&envelope::PARENT_SESSION_ID));
        assert!(!env.contains_key(&envelope::AGENT));
        assert!(!env.contains_key(&envelope::DATA));
        assert_eq!(env[&envelope::ROOT_SESSION_ID].as_str(), Some("abc"));
    }

    #[test]
    fn system_kinds() {
        assert_eq!(system_kind("provider:error"), "error");
        assert_eq!(system_kind("session:start"), "lifecycle");
        assert_eq!(system_kind("llm:response:raw"), "llm");
        assert_eq!(system_kind("tool:pre"), "tool");
        assert_eq!(system_kind("plan:start"), "info");
    }

    #[test]
    fn system_item_wraps_envelope() {
        let rec = build_system_item("tool:pre", &json!({ "tool_name": "bash" }), &lineage(), 7)
            .unwrap();
        assert_eq!(rec[&item::ITEM_TYPE].as_str(), Some("system"));
        assert_eq!(rec[&item::STATUS].as_str(), Some("complete"));
        assert_eq!(
            rec[&item::ID].as_str(),
            Some(item_id("p-c_explorer", "tool:pre", 7).as_str())
        );
        let sys = &rec[&item::SYSTEM];
        assert_eq!(field(sys, item::system::KIND).and_then(Value::as_str), Some("tool"));
        assert_eq!(
            field(sys, item::system::TITLE).and_then(Value::as_str),
            Some("[explorer] tool:pre")
        );
        assert_eq!(
            field(sys, item::system::CONTENT).and_then(Value::as_str),
            Some(r#"{"tool_name":"bash"}"#)
        );
        let wrapped = &rec[&item::EVENT];
        assert_eq!(field(wrapped, envelope::EVENT).and_then(Value::as_str), Some("tool:pre"));
    }

    #[test]
    fn record_shape_selects_type() {
        let env = build_event_record(
            EventRecordShape::Envelope,
            "tool:post",
            &json!({}),
            &lineage(),
            1,
        )
        .unwrap();
        assert_eq!(env.cxdb_type, TOOL_EVENT);
        let wrapped = build_event_record(
            EventRecordShape::ConversationItem,
            "tool:post",
            &json!({}),
            &lineage(),
            1,
        )
        .unwrap();
        assert_eq!(wrapped.cxdb_type, CONVERSATION_ITEM);
    }

    #[test]
    fn titles() {
        assert_eq!(context_title("", "Turns", "0123456789abcdef"), "Amplifier Turns: 0123456789ab");
        assert_eq!(context_title("web", "Events", "short"), "Amplifier web Events: short");
    }

    #[test]
    fn context_metadata_record() {
        let root = SessionLineage::new("0123456789abcdef", None, None);
        let meta = ContextMetadata {
            label: "Turns",
            client_tag: "amplifier - web - 0123456789ab",
            project_name: "web",
            bundle_name: "",
            parent_context_id: None,
            root_context_id: None,
        };
        let rec = build_context_metadata(&meta, &root, &synthetic(), 10);
        assert_eq!(rec[&item::ITEM_TYPE].as_str(), Some("system"));
        assert_eq!(
            rec[&item::ID].as_str(),
            Some(item_id("0123456789abcdef", "context_metadata_turns", 10).as_str())
        );
        let sys = &rec[&item::SYSTEM];
        assert_eq!(field(sys, item::system::KIND).and_then(Value::as_str), Some("info"));
        assert_eq!(
            field(sys, item::system::TITLE).and_then(Value::as_str),
            Some("Context: Turns")
        );
        assert_eq!(
            field(sys, item::system::CONTENT).and_then(Value::as_str),
            Some("Amplifier session 0123456789abcdef")
        );
        let cm = &rec[&item::CONTEXT_METADATA];
        assert_eq!(
            field(cm, item::metadata::TITLE).and_then(Value::as_str),
            Some("Amplifier web Turns: 0123456789ab")
        );
        let labels: Vec<&str> = field(cm, item::metadata::LABELS)
            .and_then(Value::as_array)
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .collect();
        assert_eq!(labels, vec!["amplifier", "turns", "web"]);
        let prov = field(cm, item::metadata::PROVENANCE).unwrap();
        assert_eq!(
            field(prov, crate::provenance::tag::SPAWN_REASON).and_then(Value::as_str),
            Some("root")
        );
    }
}
