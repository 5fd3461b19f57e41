//! Settings types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How base/debug/raw event variants are collapsed to one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DedupMode {
    /// Richest registered variant wins, decided once from the event list.
    #[default]
    #[serde(alias = "pre_computed", alias = "preComputed")]
    Precomputed,
    /// Richest variant seen so far in the current cycle wins.
    #[serde(alias = "high_water_mark", alias = "hwm")]
    HighWaterMark,
}

/// Record layout used for the everything context.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventRecordShape {
    /// Flat envelope typed as `amplifier.*`.
    #[default]
    Envelope,
    /// Envelope wrapped in a `cxdb.ConversationItem` system item.
    #[serde(alias = "conversation_item")]
    ConversationItem,
}

/// Resolved configuration for one mounted hook.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CxdbHookSettings {
    /// Store host. Empty disables the hook.
    pub cxdb_host: String,
    /// Binary protocol port.
    pub cxdb_port: u16,
    /// HTTP port used for registry publishing.
    pub cxdb_http_port: u16,
    /// TCP connect timeout.
    pub connect_timeout_seconds: f64,
    /// Per-request and flush timeout.
    pub flush_timeout_seconds: f64,
    /// Retry buffer capacity.
    pub buffer_size: usize,
    /// Handler priority passed to the host.
    pub priority: i32,
    /// Extra exclusions: exact event names or glob patterns.
    pub exclude_events: Vec<String>,
    /// Event names to subscribe beyond the built-in list.
    pub additional_events: Vec<String>,
    /// Variant dedup strategy.
    pub dedup_mode: DedupMode,
    /// Everything-context record layout.
    pub event_record_shape: EventRecordShape,
    /// Publish the type registry bundle on first connect.
    pub publish_registry: bool,
    /// Overrides the derived client tag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_tag: Option<String>,
}

impl Default for CxdbHookSettings {
    fn default() -> Self {
        Self {
            cxdb_host: String::new(),
            cxdb_port: 9009,
            cxdb_http_port: 80,
            connect_timeout_seconds: 5.0,
            flush_timeout_seconds: 5.0,
            buffer_size: 1000,
            priority: 100,
            exclude_events: Vec::new(),
            additional_events: Vec::new(),
            dedup_mode: DedupMode::default(),
            event_record_shape: EventRecordShape::default(),
            publish_registry: true,
            client_tag: None,
        }
    }
}

fn secs(value: f64, fallback: Duration) -> Duration {
    Duration::try_from_secs_f64(value)
        .ok()
        .filter(|d| !d.is_zero())
        .unwrap_or(fallback)
}

impl CxdbHookSettings {
    /// Whether a store host is configured.
    pub fn is_enabled(&self) -> bool {
        !self.cxdb_host.trim().is_empty()
    }

    /// Connect timeout as a [`Duration`] (5 s if unset or invalid).
    pub fn connect_timeout(&self) -> Duration {
        secs(self.connect_timeout_seconds, Duration::from_secs(5))
    }

    /// Request/flush timeout as a [`Duration`] (5 s if unset or invalid).
    pub fn flush_timeout(&self) -> Duration {
        secs(self.flush_timeout_seconds, Duration::from_secs(5))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults() {
        let s = CxdbHookSettings::default();
        assert!(!s.is_enabled());
        assert_eq!(s.cxdb_port, 9009);
        assert_eq!(s.cxdb_http_port, 80);
        assert_eq!(s.buffer_size, 1000);
        assert_eq!(s.priority, 100);
        assert_eq!(s.dedup_mode, DedupMode::Precomputed);
        assert_eq!(s.event_record_shape, EventRecordShape::Envelope);
        assert!(s.publish_registry);
        assert_eq!(s.flush_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn whitespace_host_is_disabled() {
        let s = CxdbHookSettings {
            cxdb_host: "  ".into(),
            ..Default::default()
        };
        assert!(!s.is_enabled());
    }

    #[test]
    fn camel_case_serialization() {
        let v = serde_json::to_value(CxdbHookSettings::default()).unwrap();
        assert_eq!(v["cxdbPort"], 9009);
        assert_eq!(v["dedupMode"], "precomputed");
        assert_eq!(v["eventRecordShape"], "envelope");
        assert!(v.get("clientTag").is_none());
    }

    #[test]
    fn enum_aliases() {
        let m: DedupMode = serde_json::from_value(json!("high_water_mark")).unwrap();
        assert_eq!(m, DedupMode::HighWaterMark);
        let m: DedupMode = serde_json::from_value(json!("highWaterMark")).unwrap();
        assert_eq!(m, DedupMode::HighWaterMark);
        let s: EventRecordShape = serde_json::from_value(json!("conversation_item")).unwrap();
        assert_eq!(s, EventRecordShape::ConversationItem);
    }

    #[test]
    fn fractional_and_invalid_timeouts() {
        let s = CxdbHookSettings {
            connect_timeout_seconds: 0.25,
            flush_timeout_seconds: -1.0,
            ..Default::default()
        };
        assert_eq!(s.connect_timeout(), Duration::from_millis(250));
        assert_eq!(s.flush_timeout(), Duration::from_secs(5));
    }
}
