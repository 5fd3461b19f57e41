//! Process identity stamped into every context's metadata record.
//!
//! Captured once at mount time and handed to the router by `Arc`. Everything
//! that varies per context (lineage, context ids, capture time) is supplied
//! at build time.

use std::collections::BTreeMap;

use cxdb_core::Payload;
use cxdb_core::payload::to_map_value;
use rmpv::Value;
use uuid::Uuid;

/// Provenance subtree tags.
pub mod tag {
    /// Parent context id.
    pub const PARENT_CONTEXT: u64 = 1;
    /// Why the context was created.
    pub const SPAWN_REASON: u64 = 2;
    /// Root context id.
    pub const ROOT_CONTEXT: u64 = 3;
    /// Trace id (the session id).
    pub const TRACE_ID: u64 = 10;
    /// Span id.
    pub const SPAN_ID: u64 = 11;
    /// User the process acts for.
    pub const ON_BEHALF_OF: u64 = 20;
    /// How `ON_BEHALF_OF` was established.
    pub const ON_BEHALF_OF_SOURCE: u64 = 21;
    /// Service name.
    pub const SERVICE_NAME: u64 = 40;
    /// Service version.
    pub const SERVICE_VERSION: u64 = 41;
    /// Per-process instance id.
    pub const SERVICE_INSTANCE_ID: u64 = 42;
    /// Process id.
    pub const PROCESS_PID: u64 = 43;
    /// OS user owning the process.
    pub const PROCESS_OWNER: u64 = 44;
    /// Host name.
    pub const HOST_NAME: u64 = 45;
    /// CPU architecture.
    pub const HOST_ARCH: u64 = 46;
    /// Allow-listed environment.
    pub const ENV: u64 = 60;
    /// Recording SDK.
    pub const SDK_NAME: u64 = 70;
    /// Capture time, ms since epoch.
    pub const CAPTURED_AT: u64 = 80;
}

/// Environment variables safe to copy into provenance.
pub const ENV_ALLOWLIST: &[&str] = &[
    "USER",
    "HOSTNAME",
    "HOME",
    "ENVIRONMENT",
    "ENV",
    "STAGE",
    "AWS_REGION",
    "AWS_DEFAULT_REGION",
    "GOOGLE_CLOUD_PROJECT",
    "K8S_NAMESPACE",
    "K8S_POD_NAME",
];

const SERVICE_NAME: &str = "amplifier";
const SDK_NAME: &str = "amplifier-hooks-cxdb-events";

/// Immutable description of the running process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessIdentity {
    /// Service name.
    pub service_name: String,
    /// Service version, when known.
    pub service_version: Option<String>,
    /// Random per-process instance id.
    pub instance_id: Uuid,
    /// OS process id.
    pub pid: u32,
    /// OS user, when known.
    pub owner: Option<String>,
    /// Host name, when known.
    pub host_name: Option<String>,
    /// CPU architecture.
    pub host_arch: String,
    /// Recording SDK name.
    pub sdk_name: String,
    /// Allow-listed environment variables with non-empty values.
    pub env: BTreeMap<String, String>,
}

/// Per-context additions layered over a [`ProcessIdentity`].
#[derive(Clone, Debug, Default)]
pub struct ContextProvenance<'a> {
    /// Session id, used as the trace id.
    pub session_id: &'a str,
    /// Parent context, for child sessions.
    pub parent_context_id: Option<u64>,
    /// Root context; falls back to the parent context.
    pub root_context_id: Option<u64>,
    /// `root` or `delegate`.
    pub spawn_reason: &'a str,
    /// Agent running the session.
    pub agent_name: Option<&'a str>,
    /// Active bundle.
    pub bundle_name: Option<&'a str>,
    /// Capture time, ms since epoch.
    pub captured_at_ms: i64,
}

impl ProcessIdentity {
    /// Capture from the live process environment.
    #[must_use]
    pub fn capture() -> Self {
        Self::capture_with(|key| std::env::var(key).ok())
    }

    /// Capture with an explicit environment lookup.
    pub fn capture_with(env: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| env(key).filter(|v| !v.is_empty());
        let host_name = non_empty("HOSTNAME").or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
        });
        Self {
            service_name: SERVICE_NAME.to_string(),
            service_version: Some(env!("CARGO_PKG_VERSION").to_string()),
            instance_id: Uuid::new_v4(),
            pid: std::process::id(),
            owner: non_empty("USER").or_else(|| non_empty("LOGNAME")),
            host_name,
            host_arch: std::env::consts::ARCH.to_string(),
            sdk_name: SDK_NAME.to_string(),
            env: ENV_ALLOWLIST
                .iter()
                .filter_map(|k| non_empty(k).map(|v| ((*k).to_string(), v)))
                .collect(),
        }
    }

    /// Full provenance subtree for one context.
    #[must_use]
    pub fn provenance(&self, ctx: &ContextProvenance<'_>) -> Value {
        let mut prov = Payload::new();
        let _ = prov.insert(tag::SERVICE_NAME, Value::from(self.service_name.as_str()));
        if let Some(version) = &self.service_version {
            let _ = prov.insert(tag::SERVICE_VERSION, Value::from(version.as_str()));
        }
        let _ = prov.insert(
            tag::SERVICE_INSTANCE_ID,
            Value::from(self.instance_id.to_string()),
        );
        let _ = prov.insert(tag::PROCESS_PID, Value::from(self.pid));
        if let Some(owner) = &self.owner {
            let _ = prov.insert(tag::PROCESS_OWNER, Value::from(owner.as_str()));
            let _ = prov.insert(tag::ON_BEHALF_OF, Value::from(owner.as_str()));
            let _ = prov.insert(tag::ON_BEHALF_OF_SOURCE, Value::from("cli"));
        }
        if let Some(host) = &self.host_name {
            let _ = prov.insert(tag::HOST_NAME, Value::from(host.as_str()));
        }
        let _ = prov.insert(tag::HOST_ARCH, Value::from(self.host_arch.as_str()));
        let _ = prov.insert(tag::SDK_NAME, Value::from(self.sdk_name.as_str()));

        if let Some(parent) = ctx.parent_context_id {
            let _ = prov.insert(tag::PARENT_CONTEXT, Value::from(parent));
        }
        if let Some(root) = ctx.root_context_id.or(ctx.parent_context_id) {
            let _ = prov.insert(tag::ROOT_CONTEXT, Value::from(root));
        }
        if !ctx.spawn_reason.is_empty() {
            let _ = prov.insert(tag::SPAWN_REASON, Value::from(ctx.spawn_reason));
        }
        let _ = prov.insert(tag::TRACE_ID, Value::from(ctx.session_id));

        let mut env = self.env.clone();
        if let Some(agent) = ctx.agent_name.filter(|a| !a.is_empty()) {
            let _ = env.insert("AMPLIFIER_AGENT".into(), agent.to_string());
        }
        if let Some(bundle) = ctx.bundle_name.filter(|b| !b.is_empty()) {
            let _ = env.insert("AMPLIFIER_BUNDLE".into(), bundle.to_string());
        }
        let _ = env.insert("AMPLIFIER_SESSION".into(), ctx.session_id.to_string());
        let _ = prov.insert(
            tag::ENV,
            Value::Map(
                env.into_iter()
                    .map(|(k, v)| (Value::from(k), Value::from(v)))
                    .collect(),
            ),
        );

        let _ = prov.insert(tag::CAPTURED_AT, Value::from(ctx.captured_at_ms));
        to_map_value(&prov)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Deterministic identity for record tests.
    pub(crate) fn synthetic() -> ProcessIdentity {
        ProcessIdentity {
            service_name: "amplifier".into(),
            service_version: None,
            instance_id: Uuid::nil(),
            pid: 4242,
            owner: Some("alice".into()),
            host_name: Some("devbox".into()),
            host_arch: "x86_64".into(),
            sdk_name: "amplifier-hooks-cxdb-events".into(),
            env: BTreeMap::from([("STAGE".into(), "test".into())]),
        }
    }

    fn get<'a>(map: &'a Value, tag: u64) -> Option<&'a Value> {
        map.as_map()?
            .iter()
            .find(|(k, _)| k.as_u64() == Some(tag))
            .map(|(_, v)| v)
    }

    fn env_entry<'a>(env: &'a Value, key: &str) -> Option<&'a str> {
        env.as_map()?
            .iter()
            .find(|(k, _)| k.as_str() == Some(key))
            .and_then(|(_, v)| v.as_str())
    }

    #[test]
    fn capture_filters_env_allowlist() {
        let id = ProcessIdentity::capture_with(|k| match k {
            "USER" => Some("bob".into()),
            "STAGE" => Some("prod".into()),
            "ENV" => Some(String::new()),
            "SECRET_TOKEN" => Some("nope".into()),
            "HOSTNAME" => Some("box-1".into()),
            _ => None,
        });
        assert_eq!(id.owner.as_deref(), Some("bob"));
        assert_eq!(id.host_name.as_deref(), Some("box-1"));
        assert_eq!(id.env.get("STAGE").map(String::as_str), Some("prod"));
        assert!(!id.env.contains_key("ENV"));
        assert!(!id.env.contains_key("SECRET_TOKEN"));
        assert_eq!(id.pid, std::process::id());
        assert_eq!(id.sdk_name, "amplifier-hooks-cxdb-events");
    }

    #[test]
    fn each_capture_gets_a_fresh_instance_id() {
        let env = |_: &str| None;
        assert_ne!(
            ProcessIdentity::capture_with(env).instance_id,
            ProcessIdentity::capture_with(env).instance_id
        );
    }

    #[test]
    fn root_context_provenance() {
        let prov = synthetic().provenance(&ContextProvenance {
            session_id: "sess-1",
            spawn_reason: "root",
            captured_at_ms: 1_700_000_000_000,
            ..Default::default()
        });
        assert_eq!(get(&prov, tag::TRACE_ID).and_then(Value::as_str), Some("sess-1"));
        assert_eq!(get(&prov, tag::SPAWN_REASON).and_then(Value::as_str), Some("root"));
        assert_eq!(get(&prov, tag::ON_BEHALF_OF_SOURCE).and_then(Value::as_str), Some("cli"));
        assert_eq!(get(&prov, tag::PROCESS_PID).and_then(Value::as_u64), Some(4242));
        assert!(get(&prov, tag::PARENT_CONTEXT).is_none());
        assert!(get(&prov, tag::ROOT_CONTEXT).is_none());
        assert!(get(&prov, tag::SERVICE_VERSION).is_none());
        let env = get(&prov, tag::ENV).unwrap();
        assert_eq!(env_entry(env, "AMPLIFIER_SESSION"), Some("sess-1"));
        assert_eq!(env_entry(env, "STAGE"), Some("test"));
        assert_eq!(env_entry(env, "AMPLIFIER_AGENT"), None);
    }

    #[test]
    fn child_context_provenance() {
        let prov = synthetic().provenance(&ContextProvenance {
            session_id: "p-c_explorer",
            parent_context_id: Some(7),
            spawn_reason: "delegate",
            agent_name: Some("explorer"),
            bundle_name: Some(""),
            captured_at_ms: 1,
            ..Default::default()
        });
        assert_eq!(get(&prov, tag::PARENT_CONTEXT).and_then(Value::as_u64), Some(7));
        assert_eq!(get(&prov, tag::ROOT_CONTEXT).and_then(Value::as_u64), Some(7));
        let env = get(&prov, tag::ENV).unwrap();
        assert_eq!(env_entry(env, "AMPLIFIER_AGENT"), Some("explorer"));
        assert_eq!(env_entry(env, "AMPLIFIER_BUNDLE"), None);
    }

    #[test]
    fn tags_are_ascending() {
        let prov = synthetic().provenance(&ContextProvenance {
            session_id: "s",
            parent_context_id: Some(1),
            root_context_id: Some(2),
            ..Default::default()
        });
        let tags: Vec<u64> = prov
            .as_map()
            .unwrap()
            .iter()
            .filter_map(|(k, _)| k.as_u64())
            .collect();
        let mut sorted = tags.clone();
        sorted.sort_unstable();
        assert_eq!(tags, sorted);
    }
}
