//! Mounting the hook into a host session.
//!
//! [`mount`] resolves settings, builds the subscribed event list, creates
//! the protocol client and router, and registers one handler per event. The
//! returned [`MountHandle`] tears all of that down again.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use cxdb_client::{ClientConfig, ContextStore, CxdbClient};
use cxdb_settings::{CxdbHookSettings, load_settings};
use globset::{Glob, GlobSet, GlobSetBuilder};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::catalog::{CANONICAL_EVENTS, DEFAULT_EXCLUDES, MODULE_EVENTS};
use crate::errors::{MountError, Result};
use crate::host::{EventHandler, HostCoordinator, Unregister};
use crate::provenance::ProcessIdentity;
use crate::registry::{HttpRegistryPublisher, RegistryPublisher};
use crate::router::{EventRouter, RouterConfig};
use crate::session::SessionLineage;
use crate::types::HookResult;

/// Name every registration is made under.
pub const HANDLER_NAME: &str = "cxdb-events";

/// Contribution channel other modules announce their events on.
pub const EVENTS_CHANNEL: &str = "observability.events";

/// Exact names and glob patterns an event must not match.
#[derive(Debug)]
pub struct ExcludeFilter {
    exact: HashSet<String>,
    globs: GlobSet,
}

impl ExcludeFilter {
    /// Default exclusions plus `patterns`.
    pub fn new(patterns: &[String]) -> Result<Self> {
        let mut exact: HashSet<String> =
            DEFAULT_EXCLUDES.iter().map(|e| (*e).to_string()).collect();
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let _ = exact.insert(pattern.clone());
            let glob = Glob::new(pattern).map_err(|source| MountError::Pattern {
                pattern: pattern.clone(),
                source,
            })?;
            let _ = builder.add(glob);
        }
        let globs = builder.build().map_err(|source| MountError::Pattern {
            pattern: patterns.join(","),
            source,
        })?;
        Ok(Self { exact, globs })
    }

    /// Whether `event` is excluded.
    #[must_use]
    pub fn excludes(&self, event: &str) -> bool {
        self.exact.contains(event) || self.globs.is_match(event)
    }
}

/// Ordered, de-duplicated, filtered event list.
///
/// Layers: canonical events, module events, contributions on
/// [`EVENTS_CHANNEL`], then `additionalEvents`.
pub async fn subscribed_events(
    coordinator: &dyn HostCoordinator,
    settings: &CxdbHookSettings,
) -> Result<Vec<String>> {
    let mut events: Vec<String> = CANONICAL_EVENTS
        .iter()
        .chain(MODULE_EVENTS)
        .map(|e| (*e).to_string())
        .collect();

    match coordinator.collect_contributions(EVENTS_CHANNEL).await {
        Ok(contributions) => {
            for contribution in contributions {
                match contribution {
                    serde_json::Value::Array(items) => events.extend(
                        items
                            .iter()
                            .filter_map(serde_json::Value::as_str)
                            .map(str::to_string),
                    ),
                    serde_json::Value::String(name) => events.push(name),
                    _ => {}
                }
            }
        }
        Err(e) => debug!(channel = EVENTS_CHANNEL, error = %e, "contribution collection failed"),
    }

    events.extend(settings.additional_events.iter().cloned());

    let filter = ExcludeFilter::new(&settings.exclude_events)?;
    let mut seen = HashSet::new();
    events.retain(|e| seen.insert(e.clone()) && !filter.excludes(e));
    Ok(events)
}

/// `amplifier - <project> - <root12>`.
#[must_use]
pub fn client_tag(project_name: &str, root_session_id: &str) -> String {
    let short: String = root_session_id.chars().take(12).collect();
    format!("amplifier - {project_name} - {short}")
}

/// Base name of the working directory.
#[must_use]
pub fn project_name() -> String {
    std::env::current_dir()
        .ok()
        .and_then(|dir| dir.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_default()
}

fn lineage_of(coordinator: &dyn HostCoordinator) -> SessionLineage {
    let root = coordinator
        .config()
        .get("root_session_id")
        .and_then(serde_json::Value::as_str)
        .map(str::to_string);
    SessionLineage::new(coordinator.session_id(), coordinator.parent_id(), root)
}

/// Forwards host events to a shared router.
struct RouterHandler<S: ContextStore> {
    router: Arc<Mutex<EventRouter<S>>>,
}

#[async_trait]
impl<S: ContextStore + 'static> EventHandler for RouterHandler<S> {
    async fn handle(&self, event: &str, data: &serde_json::Value) -> HookResult {
        self.router.lock().await.handle_event(event, data).await
    }
}

/// A mounted hook.
pub struct MountHandle<S: ContextStore = CxdbClient> {
    router: Arc<Mutex<EventRouter<S>>>,
    events: Vec<String>,
    unregisters: Vec<Unregister>,
}

impl<S: ContextStore> MountHandle<S> {
    /// Events the hook is registered for.
    #[must_use]
    pub fn events(&self) -> &[String] {
        &self.events
    }

    /// The shared router.
    #[must_use]
    pub fn router(&self) -> Arc<Mutex<EventRouter<S>>> {
        Arc::clone(&self.router)
    }

    /// Flush and close the router, then drop every registration.
    pub async fn cleanup(self) {
        self.router.lock().await.cleanup().await;
        for unregister in self.unregisters {
            unregister();
        }
    }
}

/// Mount the hook. Returns `None` when no store host is configured.
pub async fn mount(
    coordinator: &dyn HostCoordinator,
    config: &serde_json::Value,
) -> Result<Option<MountHandle>> {
    let settings = load_settings(config)?;
    if !settings.is_enabled() {
        debug!("no cxdbHost configured, hook disabled");
        return Ok(None);
    }

    let project = project_name();
    let lineage = lineage_of(coordinator);
    let tag = settings
        .client_tag
        .clone()
        .unwrap_or_else(|| client_tag(&project, &lineage.root_session_id));
    let client = CxdbClient::new(
        ClientConfig::new(settings.cxdb_host.clone(), settings.cxdb_port)
            .with_client_tag(tag)
            .with_timeouts(settings.connect_timeout(), settings.flush_timeout()),
    );
    let publisher: Arc<dyn RegistryPublisher> = Arc::new(HttpRegistryPublisher::new(
        &settings.cxdb_host,
        settings.cxdb_http_port,
    )?);

    let identity = Arc::new(ProcessIdentity::capture());

    mount_with_store(
        coordinator,
        &settings,
        client,
        &project,
        identity,
        Some(publisher),
    )
    .await
    .map(Some)
}

/// Mount over an explicit store, process identity and publisher.
pub async fn mount_with_store<S: ContextStore + 'static>(
    coordinator: &dyn HostCoordinator,
    settings: &CxdbHookSettings,
    store: S,
    project_name: &str,
    identity: Arc<ProcessIdentity>,
    publisher: Option<Arc<dyn RegistryPublisher>>,
) -> Result<MountHandle<S>> {
    let events = subscribed_events(coordinator, settings).await?;
    let mut router = EventRouter::new(
        store,
        lineage_of(coordinator),
        RouterConfig::from_settings(settings, project_name),
        identity,
        &events,
    );
    if let Some(publisher) = publisher {
        router = router.with_publisher(publisher);
    }
    let router = Arc::new(Mutex::new(router));

    let handler: Arc<dyn EventHandler> = Arc::new(RouterHandler {
        router: Arc::clone(&router),
    });
    let unregisters: Vec<Unregister> = events
        .iter()
        .map(|event| {
            coordinator.register(event, Arc::clone(&handler), settings.priority, HANDLER_NAME)
        })
        .collect();

    info!(
        events = events.len(),
        priority = settings.priority,
        host = %settings.cxdb_host,
        port = settings.cxdb_port,
        "CXDB hook registered"
    );

    Ok(MountHandle {
        router,
        events,
        unregisters,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
