//! The event router.
//!
//! One router per session. Every subscribed event passes through
//! [`EventRouter::handle_event`], which records it in the everything context,
//! feeds the turn accumulator, and writes reconstructed turns to the turns
//! context when an orchestrator cycle completes.
//!
//! Nothing here ever fails the host: each internal step returns a
//! [`RouterError`], the failures of one call are collected in a report, and
//! the report is logged once when the call returns.

use std::sync::Arc;

use cxdb_client::ContextStore;
use cxdb_core::payload::serialize_payload;
use cxdb_settings::{CxdbHookSettings, DedupMode, EventRecordShape};
use tracing::{debug, info, warn};

use crate::buffer::{BufferedRecord, RetryBuffer, StoreSink};
use crate::catalog::CONVERSATION_ITEM;
use crate::dedup::VariantDeduplicator;
use crate::errors::RouterError;
use crate::provenance::ProcessIdentity;
use crate::records::{
    ContextMetadata, EventRecord, build_context_metadata, build_event_record, now_ms,
};
use crate::registry::RegistryPublisher;
use crate::resolver::{ContextResolver, CreateNewContexts, SessionContexts};
use crate::session::SessionLineage;
use crate::turns::TurnAccumulator;
use crate::types::HookResult;

/// Event that closes an orchestrator cycle.
pub const CYCLE_COMPLETE: &str = "orchestrator:complete";

/// Router behaviour knobs, usually derived from [`CxdbHookSettings`].
#[derive(Clone, Debug)]
pub struct RouterConfig {
    /// Retry buffer capacity.
    pub buffer_size: usize,
    /// Variant dedup strategy.
    pub dedup_mode: DedupMode,
    /// Everything-context record layout.
    pub record_shape: EventRecordShape,
    /// Publish the registry bundle before creating contexts.
    pub publish_registry: bool,
    /// Working directory name; empty when unknown.
    pub project_name: String,
    /// Active bundle; empty when unknown.
    pub bundle_name: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::from_settings(&CxdbHookSettings::default(), "")
    }
}

impl RouterConfig {
    /// Config for `settings` in `project_name`.
    pub fn from_settings(settings: &CxdbHookSettings, project_name: impl Into<String>) -> Self {
        Self {
            buffer_size: settings.buffer_size,
            dedup_mode: settings.dedup_mode,
            record_shape: settings.event_record_shape,
            publish_registry: settings.publish_registry,
            project_name: project_name.into(),
            bundle_name: String::new(),
        }
    }
}

/// Failures collected during one router call.
#[derive(Debug, Default)]
struct StepReport {
    failures: Vec<(&'static str, RouterError)>,
}

impl StepReport {
    fn record(&mut self, step: &'static str, result: Result<(), RouterError>) {
        if let Err(e) = result {
            self.failures.push((step, e));
        }
    }

    fn extend(&mut self, step: &'static str, errors: Vec<RouterError>) {
        self.failures.extend(errors.into_iter().map(|e| (step, e)));
    }

    fn log(self, event: &str) {
        for (step, error) in self.failures {
            if step == "initialize" {
                warn!(
                    event,
                    step,
                    kind = error.kind(),
                    error = %error,
                    "CXDB initialization failed"
                );
            } else {
                debug!(event, step, kind = error.kind(), error = %error, "CXDB step failed");
            }
        }
    }
}

/// Routes one session's events into its two contexts.
pub struct EventRouter<S: ContextStore> {
    store: S,
    lineage: SessionLineage,
    config: RouterConfig,
    identity: Arc<ProcessIdentity>,
    publisher: Option<Arc<dyn RegistryPublisher>>,
    resolver: Arc<dyn ContextResolver>,
    contexts: Option<SessionContexts>,
    registry_published: bool,
    buffer: RetryBuffer,
    turns: TurnAccumulator,
    dedup: VariantDeduplicator,
}

impl<S: ContextStore> EventRouter<S> {
    /// Router over `store` for the subscribed `known_events`.
    pub fn new(
        store: S,
        lineage: SessionLineage,
        config: RouterConfig,
        identity: Arc<ProcessIdentity>,
        known_events: &[String],
    ) -> Self {
        Self {
            buffer: RetryBuffer::new(config.buffer_size),
            turns: TurnAccumulator::new(lineage.agent_name.clone()),
            dedup: VariantDeduplicator::for_mode(config.dedup_mode, known_events),
            store,
            lineage,
            config,
            identity,
            publisher: None,
            resolver: Arc::new(CreateNewContexts),
            contexts: None,
            registry_published: false,
        }
    }

    /// Publish the registry bundle through `publisher`.
    #[must_use]
    pub fn with_publisher(mut self, publisher: Arc<dyn RegistryPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Resolve contexts through `resolver`.
    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn ContextResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Whether both contexts exist.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.contexts.is_some()
    }

    /// Turns context, once initialized.
    #[must_use]
    pub fn turns_context_id(&self) -> Option<u64> {
        self.contexts.map(|c| c.turns)
    }

    /// Everything context, once initialized.
    #[must_use]
    pub fn everything_context_id(&self) -> Option<u64> {
        self.contexts.map(|c| c.events)
    }

    /// Whether the registry bundle has been published.
    #[must_use]
    pub fn registry_published(&self) -> bool {
        self.registry_published
    }

    /// Process identity stamped into context metadata.
    #[must_use]
    pub fn identity(&self) -> &ProcessIdentity {
        &self.identity
    }

    /// Session identity.
    #[must_use]
    pub fn lineage(&self) -> &SessionLineage {
        &self.lineage
    }

    /// Pending retry records.
    #[must_use]
    pub fn buffer(&self) -> &RetryBuffer {
        &self.buffer
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Connect, publish the registry bundle, and set up both contexts.
    ///
    /// Idempotent once it has succeeded. On failure the router stays
    /// uninitialized and the next event tries again.
    pub async fn initialize(&mut self) -> Result<(), RouterError> {
        if self.contexts.is_some() {
            return Ok(());
        }
        if !self.store.is_connected() {
            self.store.connect().await?;
            info!(client_tag = self.store.client_tag(), "connected to CXDB");
        }

        if self.config.publish_registry && !self.registry_published {
            if let Some(publisher) = &self.publisher {
                match publisher.publish().await {
                    Ok(()) => self.registry_published = true,
                    Err(e) => warn!(error = %e, "registry publish failed, continuing"),
                }
            }
        }

        let contexts = self
            .resolver
            .resolve_contexts(&mut self.store, &self.lineage)
            .await?;
        self.contexts = Some(contexts);

        let ts = now_ms();
        for (context_id, label) in [(contexts.turns, "Turns"), (contexts.events, "Events")] {
            let payload = build_context_metadata(
                &ContextMetadata {
                    label,
                    client_tag: self.store.client_tag(),
                    project_name: &self.config.project_name,
                    bundle_name: &self.config.bundle_name,
                    parent_context_id: contexts.parent,
                    root_context_id: contexts.root,
                },
                &self.lineage,
                &self.identity,
                ts,
            );
            let record = EventRecord {
                cxdb_type: CONVERSATION_ITEM,
                payload,
            };
            if let Err(e) = self.write_record(context_id, &record).await {
                debug!(context_id, error = %e, "context metadata buffered");
            }
        }
        Ok(())
    }

    /// Handle one host event. Never fails; always lets the host continue.
    pub async fn handle_event(&mut self, event: &str, data: &serde_json::Value) -> HookResult {
        let mut report = StepReport::default();

        if self.contexts.is_none() {
            report.record("initialize", self.initialize().await);
        } else if !self.store.is_connected() {
            report.record("reconnect", self.reconnect().await);
        }
        if self.store.is_connected() && !self.buffer.is_empty() {
            let sent = self.drain_buffer().await;
            if sent > 0 {
                debug!(sent, remaining = self.buffer.size(), "retry buffer drained");
            }
        }

        if !self.dedup.should_process(event) || self.turns.is_straggler(event) {
            report.log(event);
            return HookResult::continue_();
        }

        if TurnAccumulator::is_turn_event(event) {
            let _ = self.turns.on_event(event, data);
        }

        report.record("write_event", self.write_event(event, data).await);

        if event == CYCLE_COMPLETE {
            let errors = self.flush_turns().await;
            report.extend("flush_turns", errors);
            self.dedup.reset();
        }

        report.log(event);
        HookResult::continue_()
    }

    /// Flush the open exchange and the retry buffer, then close.
    pub async fn cleanup(&mut self) {
        let mut report = StepReport::default();
        let errors = self.flush_turns().await;
        report.extend("flush_turns", errors);

        if self.store.is_connected() && !self.buffer.is_empty() {
            let _ = self.drain_buffer().await;
        }
        if !self.buffer.is_empty() {
            debug!(remaining = self.buffer.size(), "records left unsent at cleanup");
        }
        self.store.close().await;
        report.log("cleanup");
    }

    async fn reconnect(&mut self) -> Result<(), RouterError> {
        self.store.connect().await?;
        info!(pending = self.buffer.size(), "reconnected to CXDB");
        Ok(())
    }

    /// Flush the buffer in order. A record the server refuses is dropped
    /// so it cannot hold back everything queued behind it.
    async fn drain_buffer(&mut self) -> usize {
        let mut sent = 0;
        loop {
            let mut sink = StoreSink::new(&mut self.store);
            sent += self.buffer.flush(&mut sink).await;
            match sink.into_error() {
                Some(e) if e.is_protocol_error() => {
                    if let Some(record) = self.buffer.discard_front() {
                        warn!(
                            context_id = record.context_id,
                            type_id = %record.type_id,
                            error = %e,
                            "buffered record rejected by CXDB, dropped"
                        );
                    }
                }
                _ => return sent,
            }
        }
    }

    async fn write_event(
        &mut self,
        event: &str,
        data: &serde_json::Value,
    ) -> Result<(), RouterError> {
        let context_id = self.everything_context_id().ok_or(RouterError::NotInitialized)?;
        let record =
            build_event_record(self.config.record_shape, event, data, &self.lineage, now_ms())?;
        self.write_record(context_id, &record).await
    }

    async fn flush_turns(&mut self) -> Vec<RouterError> {
        let Some(turn) = self.turns.flush() else {
            return Vec::new();
        };
        let Some(context_id) = self.turns_context_id() else {
            return vec![RouterError::NotInitialized];
        };
        let mut errors = Vec::new();
        for payload in turn.to_records(&self.lineage.session_id, now_ms()) {
            let record = EventRecord {
                cxdb_type: CONVERSATION_ITEM,
                payload,
            };
            if let Err(e) = self.write_record(context_id, &record).await {
                errors.push(e);
            }
        }
        errors
    }

    /// Append directly when connected and nothing older is pending;
    /// otherwise buffer the serialized record. A failed append is buffered
    /// unless the server refused the record itself.
    async fn write_record(
        &mut self,
        context_id: u64,
        record: &EventRecord,
    ) -> Result<(), RouterError> {
        let payload = serialize_payload(&record.payload)?;
        let buffered = |payload: Vec<u8>| BufferedRecord {
            context_id,
            payload,
            type_id: record.cxdb_type.type_id.to_string(),
            type_version: record.cxdb_type.version,
        };

        if !self.store.is_connected() || !self.buffer.is_empty() {
            self.buffer.enqueue(buffered(payload));
            return Ok(());
        }

        let result = self
            .store
            .append_serialized(
                context_id,
                &payload,
                record.cxdb_type.type_id,
                record.cxdb_type.version,
                0,
            )
            .await;
        match result {
            Ok(ack) => {
                debug!(
                    context_id,
                    turn_id = ack.turn_id,
                    type_id = record.cxdb_type.type_id,
                    "appended"
                );
                Ok(())
            }
            Err(e) if e.is_protocol_error() => {
                warn!(
                    context_id,
                    type_id = record.cxdb_type.type_id,
                    error = %e,
                    "record rejected by CXDB, dropped"
                );
                Err(e.into())
            }
            Err(e) => {
                self.buffer.enqueue(buffered(payload));
                Err(e.into())
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::catalog::CANONICAL_EVENTS;
    use crate::errors::RegistryError;
    use crate::provenance::tests::synthetic;
    use crate::records::{envelope, item};
    use async_trait::async_trait;
    use cxdb_client::{MemoryStore, StoredTurn};
    use cxdb_core::logging::capture_logs;
    use cxdb_core::payload::deserialize_payload;
    use serde_json::json;
    use tracing::Level;

    #[derive(Default)]
    struct CountingPublisher {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl RegistryPublisher for CountingPublisher {
        async fn publish(&self) -> Result<(), RegistryError> {
            let _ = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(RegistryError::Status {
                    status: 500,
                    body: "down".into(),
                })
            } else {
                Ok(())
            }
        }
    }

    fn known() -> Vec<String> {
        CANONICAL_EVENTS.iter().map(|e| (*e).to_string()).collect()
    }

    fn router_with(store: &MemoryStore, config: RouterConfig) -> EventRouter<MemoryStore> {
        EventRouter::new(
            store.clone(),
            SessionLineage::new("0123456789abcdef", None, None),
            config,
            Arc::new(synthetic()),
            &known(),
        )
    }

    fn router(store: &MemoryStore) -> EventRouter<MemoryStore> {
        router_with(store, RouterConfig::default())
    }

    fn item_type(turn: &StoredTurn) -> String {
        let payload = deserialize_payload(&turn.payload).unwrap();
        payload[&item::ITEM_TYPE].as_str().unwrap_or_default().to_string()
    }

    fn event_name(turn: &StoredTurn) -> String {
        let payload = deserialize_payload(&turn.payload).unwrap();
        payload[&envelope::EVENT].as_str().unwrap_or_default().to_string()
    }

    #[tokio::test]
    async fn prompt_text_complete_end_to_end() {
        let store = MemoryStore::default();
        let mut r = router(&store);

        assert!(r.handle_event("prompt:submit", &json!({ "prompt": "hi" })).await.is_continue());
        let _ = r
            .handle_event("content_block:end", &json!({ "block_type": "text", "block": "hello" }))
            .await;
        let _ = r.handle_event("orchestrator:complete", &json!({})).await;

        let turns = store.turns_in(r.turns_context_id().unwrap());
        assert_eq!(turns.len(), 3);
        assert_eq!(item_type(&turns[0]), "system");
        assert_eq!(item_type(&turns[1]), "user_input");
        assert_eq!(item_type(&turns[2]), "assistant_turn");
        assert!(turns.iter().all(|t| t.type_id == "cxdb.ConversationItem" && t.type_version == 3));

        let events = store.turns_in(r.everything_context_id().unwrap());
        assert_eq!(events.len(), 4);
        assert_eq!(item_type(&events[0]), "system");
        let names: Vec<String> = events[1..].iter().map(event_name).collect();
        assert_eq!(names, vec!["prompt:submit", "content_block:end", "orchestrator:complete"]);
        assert_eq!(events[1].type_id, "amplifier.PromptEvent");
        assert_eq!(events[3].type_id, "amplifier.OrchestratorEvent");
    }

    #[tokio::test]
    async fn conversation_item_shape() {
        let store = MemoryStore::default();
        let config = RouterConfig {
            record_shape: EventRecordShape::ConversationItem,
            ..RouterConfig::default()
        };
        let mut r = router_with(&store, config);
        let _ = r.handle_event("tool:pre", &json!({ "tool_name": "bash" })).await;
        let events = store.turns_in(r.everything_context_id().unwrap());
        assert_eq!(events[1].type_id, "cxdb.ConversationItem");
        assert_eq!(item_type(&events[1]), "system");
    }

    #[tokio::test]
    async fn init_failure_is_logged_and_retried() {
        let (logs, _guard) = capture_logs();
        let store = MemoryStore::default();
        store.set_fail_connect(true);
        let mut r = router(&store);

        let result = r.handle_event("session:start:raw", &json!({})).await;
        assert!(result.is_continue());
        assert!(!r.is_initialized());
        assert_eq!(logs.count_matching(Level::WARN, "CXDB initialization failed"), 1);

        store.set_fail_connect(false);
        let _ = r.handle_event("session:end", &json!({})).await;
        assert!(r.is_initialized());
        let events = store.turns_in(r.everything_context_id().unwrap());
        assert_eq!(events.len(), 2);
        assert_eq!(event_name(&events[1]), "session:end");
    }

    #[tokio::test]
    async fn failed_append_is_buffered_and_piggybacked() {
        let store = MemoryStore::default();
        let mut r = router(&store);
        r.initialize().await.unwrap();

        store.set_fail_appends(true);
        let _ = r.handle_event("plan:start", &json!({})).await;
        assert_eq!(r.buffer().size(), 1);
        assert!(!store.is_connected());

        store.set_fail_appends(false);
        let _ = r.handle_event("plan:end", &json!({})).await;
        assert!(r.buffer().is_empty());
        let events = store.turns_in(r.everything_context_id().unwrap());
        let names: Vec<String> = events[1..].iter().map(event_name).collect();
        assert_eq!(names, vec!["plan:start", "plan:end"]);
    }

    #[tokio::test]
    async fn rejected_record_does_not_hold_back_later_events() {
        let (logs, _guard) = capture_logs();
        let store = MemoryStore::default();
        store.reject_type("amplifier.ToolEvent");
        let mut r = router(&store);

        for e in ["tool:pre", "plan:start", "plan:end", "prompt:complete", "session:end"] {
            let _ = r.handle_event(e, &json!({ "tool_name": "bash" })).await;
        }
        let events = store.turns_in(r.everything_context_id().unwrap());
        assert_eq!(events.len(), 5);
        let names: Vec<String> = events[1..].iter().map(event_name).collect();
        assert_eq!(names, vec!["plan:start", "plan:end", "prompt:complete", "session:end"]);
        assert!(r.buffer().is_empty());
        assert!(store.is_connected());
        assert_eq!(logs.count_matching(Level::WARN, "record rejected by CXDB"), 1);
    }

    #[tokio::test]
    async fn rejected_record_is_dropped_from_buffer_on_replay() {
        let (logs, _guard) = capture_logs();
        let store = MemoryStore::default();
        let mut r = router(&store);
        r.initialize().await.unwrap();

        store.disconnect();
        store.set_fail_connect(true);
        let _ = r.handle_event("tool:pre", &json!({ "tool_name": "bash" })).await;
        let _ = r.handle_event("plan:start", &json!({})).await;
        assert_eq!(r.buffer().size(), 2);

        store.set_fail_connect(false);
        store.reject_type("amplifier.ToolEvent");
        let _ = r.handle_event("plan:end", &json!({})).await;

        let events = store.turns_in(r.everything_context_id().unwrap());
        let names: Vec<String> = events[1..].iter().map(event_name).collect();
        assert_eq!(names, vec!["plan:start", "plan:end"]);
        assert!(r.buffer().is_empty());
        assert_eq!(r.buffer().rejected_count(), 1);
        assert_eq!(logs.count_matching(Level::WARN, "buffered record rejected by CXDB"), 1);
    }

    #[tokio::test]
    async fn order_is_kept_while_store_is_down() {
        let store = MemoryStore::default();
        let mut r = router(&store);
        r.initialize().await.unwrap();

        store.disconnect();
        store.set_fail_connect(true);
        for e in ["cancel:requested", "cancel:completed", "user:notification"] {
            let _ = r.handle_event(e, &json!({})).await;
        }
        assert_eq!(r.buffer().size(), 3);

        store.set_fail_connect(false);
        let _ = r.handle_event("artifact:write", &json!({})).await;
        let events = store.turns_in(r.everything_context_id().unwrap());
        let names: Vec<String> = events[1..].iter().map(event_name).collect();
        assert_eq!(
            names,
            vec!["cancel:requested", "cancel:completed", "user:notification", "artifact:write"]
        );
    }

    #[tokio::test]
    async fn variants_are_deduplicated() {
        let store = MemoryStore::default();
        let mut r = router(&store);
        for e in ["llm:request", "llm:request:debug", "llm:request:raw"] {
            let _ = r.handle_event(e, &json!({})).await;
        }
        let events = store.turns_in(r.everything_context_id().unwrap());
        let names: Vec<String> = events[1..].iter().map(event_name).collect();
        assert_eq!(names, vec!["llm:request:raw"]);
    }

    #[tokio::test]
    async fn high_water_mark_resets_each_cycle() {
        let store = MemoryStore::default();
        let config = RouterConfig {
            dedup_mode: DedupMode::HighWaterMark,
            ..RouterConfig::default()
        };
        let mut r = router_with(&store, config);
        for e in [
            "llm:response:raw",
            "llm:response",
            "orchestrator:complete",
            "llm:response",
        ] {
            let _ = r.handle_event(e, &json!({})).await;
        }
        let events = store.turns_in(r.everything_context_id().unwrap());
        let names: Vec<String> = events[1..].iter().map(event_name).collect();
        assert_eq!(names, vec!["llm:response:raw", "orchestrator:complete", "llm:response"]);
    }

    #[tokio::test]
    async fn stragglers_are_suppressed() {
        let store = MemoryStore::default();
        let mut r = router(&store);
        let _ = r.handle_event("execution:end", &json!({})).await;
        let _ = r.handle_event("llm:response:raw", &json!({})).await;
        let events = store.turns_in(r.everything_context_id().unwrap());
        let names: Vec<String> = events[1..].iter().map(event_name).collect();
        assert_eq!(names, vec!["execution:end"]);
    }

    #[tokio::test]
    async fn registry_published_once() {
        let store = MemoryStore::default();
        let publisher = Arc::new(CountingPublisher::default());
        let mut r = router(&store).with_publisher(publisher.clone());
        let _ = r.handle_event("session:end", &json!({})).await;
        let _ = r.handle_event("session:end", &json!({})).await;
        assert!(r.registry_published());
        assert_eq!(publisher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn registry_failure_does_not_block_init_and_is_retried() {
        let (logs, _guard) = capture_logs();
        let store = MemoryStore::default();
        let publisher = Arc::new(CountingPublisher {
            fail: true,
            ..Default::default()
        });
        let mut r = router(&store).with_publisher(publisher.clone());

        store.set_fail_create(true);
        let _ = r.handle_event("session:end", &json!({})).await;
        assert!(!r.is_initialized());

        store.set_fail_create(false);
        let _ = r.handle_event("session:end", &json!({})).await;
        assert!(r.is_initialized());
        assert!(!r.registry_published());
        assert_eq!(publisher.calls.load(Ordering::SeqCst), 2);
        assert_eq!(logs.count_matching(Level::WARN, "registry publish failed"), 2);
    }

    #[tokio::test]
    async fn registry_publish_can_be_disabled() {
        let store = MemoryStore::default();
        let publisher = Arc::new(CountingPublisher::default());
        let config = RouterConfig {
            publish_registry: false,
            ..RouterConfig::default()
        };
        let mut r = router_with(&store, config).with_publisher(publisher.clone());
        r.initialize().await.unwrap();
        assert_eq!(publisher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cleanup_flushes_open_turn_and_closes() {
        let store = MemoryStore::default();
        let mut r = router(&store);
        let _ = r.handle_event("prompt:submit", &json!({ "prompt": "bye" })).await;
        r.cleanup().await;
        let turns = store.turns_in(r.turns_context_id().unwrap());
        assert_eq!(turns.len(), 2);
        assert_eq!(item_type(&turns[1]), "user_input");
        assert!(!store.is_connected());
    }

    #[tokio::test]
    async fn cleanup_without_connection_does_not_fail() {
        let store = MemoryStore::default();
        store.set_fail_connect(true);
        let mut r = router(&store);
        let _ = r.handle_event("prompt:submit", &json!({ "prompt": "x" })).await;
        r.cleanup().await;
        assert!(store.turns().is_empty());
    }

    #[tokio::test]
    async fn metadata_written_first_in_each_context() {
        let store = MemoryStore::new("amplifier - web - 0123456789ab");
        let mut r = router(&store);
        r.initialize().await.unwrap();
        r.initialize().await.unwrap();
        assert_eq!(store.context_ids(), vec![1, 2]);
        for ctx in [r.turns_context_id().unwrap(), r.everything_context_id().unwrap()] {
            let turns = store.turns_in(ctx);
            assert_eq!(turns.len(), 1);
            let payload = deserialize_payload(&turns[0].payload).unwrap();
            assert!(payload.contains_key(&item::CONTEXT_METADATA));
        }
    }

    #[tokio::test]
    async fn uninitialized_writes_are_reported() {
        let (logs, _guard) = capture_logs();
        let store = MemoryStore::default();
        store.set_fail_connect(true);
        let mut r = router(&store);
        let _ = r.handle_event("plan:start", &json!({})).await;
        let failed = logs
            .events()
            .into_iter()
            .filter(|e| e.level == Level::DEBUG && e.field("step") == Some("write_event"))
            .count();
        assert_eq!(failed, 1);
    }
}
