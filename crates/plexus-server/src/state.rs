//! Gateway state and the per-request handler policy
//!
//! Owns the atomically swappable snapshot (routing table, pipeline
//! registry, balancer), serializes reloads, and drives each request
//! through classify → pick → acquire → execute → record. A failed
//! reload keeps the previous snapshot; in-flight requests always finish
//! against the snapshot they started with.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use serde_json::Value;

use plexus_config::{ServerSettings, SystemConfig, UserConfig};
use plexus_core::{Category, HttpError, RequestContext};
use plexus_pipeline::{InboundRequest, PipelineError, PipelineInstance, PipelineRegistry};
use plexus_routing::{
    BlacklistWindows, ConfigError, HealthEventSender, KeyLease, LoadBalancer,
    PipelineTableArtifact, RoutingError, RoutingTable, assemble, classify,
};
use thiserror::Error;

/// Request-time failures surfaced to clients
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl HttpError for GatewayError {
    fn status_code(&self) -> http::StatusCode {
        match self {
            Self::Routing(e) => e.status_code(),
            Self::Pipeline(e) => e.status_code(),
        }
    }

    fn error_type(&self) -> &str {
        match self {
            Self::Routing(e) => e.error_type(),
            Self::Pipeline(e) => e.error_type(),
        }
    }

    fn client_message(&self) -> String {
        match self {
            Self::Routing(e) => e.client_message(),
            Self::Pipeline(e) => e.client_message(),
        }
    }
}

/// Construction options beyond the two config documents
#[derive(Debug, Default)]
pub struct GatewayOptions {
    /// Where the pipeline-table artifact is written; `None` disables it
    pub artifact_path: Option<PathBuf>,
    /// User-config path, enabling the reload endpoint
    pub config_path: Option<PathBuf>,
    /// Observer channel for health events
    pub events: Option<HealthEventSender>,
    /// Name recorded in the artifact
    pub config_name: String,
}

/// One assembly's worth of shared, mostly-immutable state
pub(crate) struct Snapshot {
    pub table: Arc<RoutingTable>,
    pub registry: Arc<PipelineRegistry>,
    pub balancer: Arc<LoadBalancer>,
}

/// The router's shared state; cheap to clone into handlers
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

struct GatewayInner {
    snapshot: RwLock<Arc<Snapshot>>,
    reload_lock: tokio::sync::Mutex<()>,
    system: SystemConfig,
    settings: ServerSettings,
    options: GatewayOptions,
}

impl Gateway {
    /// Assemble the table and build all runtime state
    ///
    /// Fails with the full validation issue list on bad configuration.
    pub fn new(
        user: &UserConfig,
        system: SystemConfig,
        options: GatewayOptions,
    ) -> Result<Self, ConfigError> {
        let settings = user.server.clone();
        let snapshot = build_snapshot(user, &system, options.events.clone())?;
        write_artifact(&options, &snapshot.table);

        tracing::info!(
            pipelines = snapshot.table.pipelines().len(),
            "routing table assembled"
        );

        Ok(Self {
            inner: Arc::new(GatewayInner {
                snapshot: RwLock::new(Arc::new(snapshot)),
                reload_lock: tokio::sync::Mutex::new(()),
                system,
                settings,
                options,
            }),
        })
    }

    pub fn settings(&self) -> &ServerSettings {
        &self.inner.settings
    }

    pub(crate) fn config_path(&self) -> Option<&PathBuf> {
        self.inner.options.config_path.as_ref()
    }

    /// Current snapshot; requests hold it for their whole lifetime
    pub(crate) fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.inner.snapshot.read().expect("snapshot lock poisoned"))
    }

    /// Re-assemble from a fresh user config and swap the snapshot
    ///
    /// Concurrent reloads serialize on an async mutex. On validation
    /// failure the old snapshot stays live and the error is returned.
    pub async fn reload(&self, user: &UserConfig) -> Result<usize, ConfigError> {
        let _guard = self.inner.reload_lock.lock().await;

        let snapshot = build_snapshot(user, &self.inner.system, self.inner.options.events.clone())?;
        write_artifact(&self.inner.options, &snapshot.table);
        let pipelines = snapshot.table.pipelines().len();

        let previous = {
            let mut slot = self.inner.snapshot.write().expect("snapshot lock poisoned");
            std::mem::replace(&mut *slot, Arc::new(snapshot))
        };
        previous.registry.shutdown();

        tracing::info!(pipelines, "routing table reloaded");
        Ok(pipelines)
    }

    /// Handle one request end to end
    pub async fn handle(
        &self,
        inbound: &InboundRequest,
        ctx: &mut RequestContext,
    ) -> Result<Value, GatewayError> {
        let snapshot = self.snapshot();

        let category = resolve_category(inbound, &snapshot.table)?;
        ctx.category = Some(category);

        let (instance, lease) = pick_and_acquire(&snapshot, category, ctx)?;
        ctx.pipeline_id = Some(instance.config().id.clone());

        tracing::debug!(
            request_id = %ctx.request_id,
            category = %category,
            pipeline = %instance.config().id,
            "pipeline selected"
        );

        let outcome = instance.execute(inbound, ctx).await;

        match outcome.upstream {
            Some(upstream) => {
                snapshot.balancer.record(instance.config(), upstream);
                lease.complete(upstream, Some(outcome.elapsed));
            }
            // Failed before the server layer; nothing to record
            None => lease.abandon(),
        }

        Ok(outcome.result?)
    }

    /// Diagnostics view: the canonical table plus live health state
    pub fn pipelines_view(&self) -> Value {
        let snapshot = self.snapshot();
        let mut view = snapshot.table.to_canonical_json();

        if let Some(pipelines) = view
            .get_mut("pipelines")
            .and_then(Value::as_array_mut)
        {
            for entry in pipelines {
                let Some(id) = entry.get("id").and_then(Value::as_str) else {
                    continue;
                };
                let health = snapshot.balancer.health_snapshot(id);
                entry["health"] = serde_json::json!(format!("{:?}", health.status));
                entry["consecutiveFailures"] = serde_json::json!(health.consecutive_failures);
            }
        }

        view
    }
}

/// Classify and apply the category fallback policy
///
/// An empty classified category falls back to `default`; when `default`
/// is empty too the request fails — no silent substitution beyond that.
fn resolve_category(
    inbound: &InboundRequest,
    table: &RoutingTable,
) -> Result<Category, GatewayError> {
    let classified = classify(&inbound.signals());

    if table.has_pipelines(classified) {
        return Ok(classified);
    }

    if classified != Category::Default && table.has_pipelines(Category::Default) {
        tracing::debug!(category = %classified, "no pipelines for category, using default");
        return Ok(Category::Default);
    }

    Err(RoutingError::NoPipelineForCategory {
        category: classified,
    }
    .into())
}

/// Pick a pipeline and reserve its key slot, with one advised re-pick
///
/// The second attempt runs only after telling the balancer the first
/// failed; further re-picks are not permitted.
fn pick_and_acquire(
    snapshot: &Snapshot,
    category: Category,
    ctx: &RequestContext,
) -> Result<(Arc<PipelineInstance>, KeyLease), GatewayError> {
    match try_pick(snapshot, category, ctx) {
        Ok(picked) => Ok(picked),
        Err(_) => {
            snapshot.balancer.advise_exhausted(category);
            try_pick(snapshot, category, ctx).map_err(Into::into)
        }
    }
}

fn try_pick(
    snapshot: &Snapshot,
    category: Category,
    ctx: &RequestContext,
) -> Result<(Arc<PipelineInstance>, KeyLease), RoutingError> {
    let id = snapshot.balancer.pick(&snapshot.table, category, ctx.priority)?;

    let exhausted = || RoutingError::NoEligiblePipeline { category };

    let config = snapshot.table.pipeline(&id).ok_or_else(exhausted)?;
    let instance = snapshot.registry.instance(&id).ok_or_else(exhausted)?;
    // A concurrent request may have saturated the slot since the pick
    let lease = snapshot.balancer.acquire(config).ok_or_else(exhausted)?;

    Ok((instance, lease))
}

fn build_snapshot(
    user: &UserConfig,
    system: &SystemConfig,
    events: Option<HealthEventSender>,
) -> Result<Snapshot, ConfigError> {
    let table = Arc::new(assemble(user, system)?);
    let registry = Arc::new(PipelineRegistry::build(&table));
    let balancer = Arc::new(LoadBalancer::from_table(
        &table,
        BlacklistWindows::from(&user.blacklist_settings),
        events,
    ));

    Ok(Snapshot {
        table,
        registry,
        balancer,
    })
}

/// Best-effort artifact write; failure is logged, never fatal
fn write_artifact(options: &GatewayOptions, table: &RoutingTable) {
    let Some(path) = &options.artifact_path else {
        return;
    };

    let artifact = PipelineTableArtifact::from_table(options.config_name.clone(), table);
    if let Err(error) = artifact.write_to(path) {
        tracing::warn!(path = %path.display(), error = %error, "failed to write pipeline table artifact");
    }
}
