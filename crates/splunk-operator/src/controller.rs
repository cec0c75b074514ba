//! The reconcile loop shared by every Splunk resource kind.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use kube::runtime::controller::{self, Action, Controller};
use kube::runtime::{WatchStreamExt, predicates, reflector, watcher};
use kube::{Api, Client, Resource, ResourceExt};
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use crate::apply::{ApplySummary, apply_graph};
use crate::config::OperatorConfig;
use crate::crds::common::{DependencyRef, Phase, SplunkStatus};
use crate::crds::enterprise::SplunkEnterpriseStatus;
use crate::error::{ReconcileError, Result};
use crate::graph::ObjectGraph;
use crate::instance::{self, InstanceType};
use crate::metrics::MetricsSink;
use crate::secrets::{self, SecretBundle, SecretSource};
use crate::store::{Object, ObjectStore};

/// Periodic resync for healthy resources.
const RESYNC: Duration = Duration::from_secs(300);
const BACKOFF_BASE: Duration = Duration::from_secs(5);
const BACKOFF_MAX: Duration = Duration::from_secs(300);

/// Annotation that freezes a resource of kind `kind`.
pub fn paused_annotation(kind: &str) -> String {
    format!("{}.enterprise.splunk.com/paused", kind.to_lowercase())
}

/// What a resource needs besides its own spec to synthesize its objects.
#[derive(Debug, Clone, Copy)]
pub struct SynthesisInputs<'a> {
    pub config: &'a OperatorConfig,
    pub namespace: &'a str,
    /// Present when the kind stores generated credentials.
    pub secrets: Option<&'a SecretBundle>,
}

impl<'a> SynthesisInputs<'a> {
    pub fn secrets(&self) -> Result<&'a SecretBundle> {
        self.secrets.ok_or_else(|| {
            ReconcileError::Anyhow(anyhow::anyhow!("secret bundle was not prepared"))
        })
    }
}

/// Status shapes the loop can report.
pub trait ReportedStatus: Serialize + Clone + PartialEq + Send + Sync {
    fn phase(&self) -> Phase;
    fn transition_time(&self) -> Option<&String>;
    fn set_transition_time(&mut self, time: Option<String>);
}

impl ReportedStatus for SplunkStatus {
    fn phase(&self) -> Phase {
        self.phase
    }
    fn transition_time(&self) -> Option<&String> {
        self.last_transition_time.as_ref()
    }
    fn set_transition_time(&mut self, time: Option<String>) {
        self.last_transition_time = time;
    }
}

impl ReportedStatus for SplunkEnterpriseStatus {
    fn phase(&self) -> Phase {
        self.phase
    }
    fn transition_time(&self) -> Option<&String> {
        self.last_transition_time.as_ref()
    }
    fn set_transition_time(&mut self, time: Option<String>) {
        self.last_transition_time = time;
    }
}

/// A custom resource reconciled by [`reconcile`].
pub trait SplunkResource: Object {
    type Status: ReportedStatus;

    /// Tier whose name the generated secret carries, if this kind keeps one.
    fn secret_instance(&self) -> Option<InstanceType>;

    /// Indexer cluster whose `idxc_secret` this resource must share.
    fn cluster_secret_ref(&self) -> Option<DependencyRef> {
        None
    }

    fn synthesize(&self, inputs: &SynthesisInputs<'_>) -> Result<ObjectGraph>;

    fn current_status(&self) -> Option<&Self::Status>;

    fn ready_status(&self, inputs: &SynthesisInputs<'_>, summary: &ApplySummary) -> Self::Status;

    fn error_status(&self, message: String) -> Self::Status;

    /// Extra watches beyond the core workload objects.
    fn watch_children(
        controller: Controller<Self>,
        _client: &Client,
        _namespace: Option<&str>,
    ) -> Controller<Self> {
        controller
    }
}

/// Status for a resource backed directly by StatefulSets.
pub fn workload_status(generation: Option<i64>, summary: &ApplySummary) -> SplunkStatus {
    let (replicas, ready) = summary.statefulsets.iter().fold((0, 0), |(r, ready), sts| {
        let desired = sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0);
        let current = sts
            .status
            .as_ref()
            .and_then(|s| s.ready_replicas)
            .unwrap_or(0);
        (r + desired, ready + current)
    });
    let phase = if replicas > 0 && ready >= replicas {
        Phase::Ready
    } else {
        Phase::Pending
    };
    SplunkStatus {
        phase,
        replicas,
        ready_replicas: ready,
        message: None,
        observed_generation: generation,
        last_transition_time: None,
    }
}

pub fn error_status(generation: Option<i64>, message: String) -> SplunkStatus {
    SplunkStatus {
        phase: Phase::Error,
        message: Some(message),
        observed_generation: generation,
        ..Default::default()
    }
}

/// Shared state for every controller in the process.
pub struct Context<S> {
    pub store: S,
    pub config: OperatorConfig,
    pub metrics: Arc<dyn MetricsSink>,
    pub random: Arc<dyn SecretSource>,
    /// Process-wide bound on reconciles in flight, across all kinds.
    pub workers: Arc<Semaphore>,
    /// Consecutive failures per resource, for backoff.
    pub failures: DashMap<String, u32>,
}

impl<S: ObjectStore> Context<S> {
    pub fn new(
        store: S,
        config: OperatorConfig,
        metrics: Arc<dyn MetricsSink>,
        random: Arc<dyn SecretSource>,
    ) -> Self {
        let workers = Arc::new(Semaphore::new(usize::from(config.workers)));
        Self {
            store,
            config,
            metrics,
            random,
            workers,
            failures: DashMap::new(),
        }
    }
}

fn failure_key<K: SplunkResource>(namespace: &str, name: &str) -> String {
    format!("{}/{}/{}", K::kind(&()), namespace, name)
}

fn is_paused<K: SplunkResource>(obj: &K) -> bool {
    obj.annotations()
        .contains_key(&paused_annotation(&K::kind(&())))
}

fn now() -> Option<String> {
    OffsetDateTime::now_utc().format(&Rfc3339).ok()
}

/// Patches the status only when it changed. The transition time moves
/// only with the phase.
async fn report<K: SplunkResource, S: ObjectStore>(
    store: &S,
    obj: &K,
    mut status: K::Status,
) -> Result<()> {
    let previous = obj.current_status();
    match previous {
        Some(prev) if prev.phase() == status.phase() => {
            status.set_transition_time(prev.transition_time().cloned())
        }
        _ => status.set_transition_time(now()),
    }
    if previous == Some(&status) {
        return Ok(());
    }
    let namespace = obj.namespace().unwrap_or_default();
    store
        .patch_status::<K>(&namespace, &obj.name_any(), serde_json::to_value(&status)?)
        .await
}

/// Looks up the credentials a resource already has, plus any cluster
/// secret it must share.
async fn prepare_secrets<K: SplunkResource, S: ObjectStore>(
    obj: &K,
    ctx: &Context<S>,
    namespace: &str,
) -> Result<Option<SecretBundle>> {
    let Some(instance) = obj.secret_instance() else {
        return Ok(None);
    };
    let name = instance::secrets_name(&obj.name_any(), instance);
    let existing = ctx.store.get::<Secret>(namespace, &name).await?;

    let cluster_secret = match obj.cluster_secret_ref() {
        Some(r) => {
            let ns = r.namespace.as_deref().filter(|ns| !ns.is_empty()).unwrap_or(namespace);
            let shared = instance::secrets_name(&r.name, InstanceType::Indexer);
            ctx.store
                .get::<Secret>(ns, &shared)
                .await?
                .and_then(|s| secrets::secret_value(&s, secrets::IDXC_SECRET))
        }
        None => None,
    };
    Ok(Some(secrets::ensure_secrets(
        existing.as_ref(),
        cluster_secret.as_deref(),
        ctx.random.as_ref(),
    )))
}

async fn converge<K: SplunkResource, S: ObjectStore>(
    obj: &K,
    ctx: &Context<S>,
    namespace: &str,
) -> Result<K::Status> {
    let bundle = prepare_secrets(obj, ctx, namespace).await?;
    let inputs = SynthesisInputs {
        config: &ctx.config,
        namespace,
        secrets: bundle.as_ref(),
    };
    let graph = obj.synthesize(&inputs)?;
    let summary = apply_graph(&ctx.store, &graph).await?;
    debug!(
        created = summary.created,
        updated = summary.updated,
        unchanged = summary.unchanged,
        "applied"
    );
    Ok(obj.ready_status(&inputs, &summary))
}

/// One pass: fetch, honour the pause annotation, synthesize, apply.
#[instrument(skip_all, fields(name = %obj.name_any(), namespace = ?obj.namespace()))]
pub async fn reconcile<K: SplunkResource, S: ObjectStore>(
    obj: Arc<K>,
    ctx: Arc<Context<S>>,
) -> Result<Action> {
    let _permit = ctx
        .workers
        .acquire()
        .await
        .map_err(|e| ReconcileError::Anyhow(e.into()))?;

    let kind = K::kind(&());
    let name = obj.name_any();
    let namespace = obj.namespace().ok_or_else(|| ReconcileError::MissingMetadata {
        kind: kind.to_string(),
        field: "namespace",
    })?;
    ctx.metrics.reconcile_started(&kind, &namespace, &name);

    let Some(current) = ctx.store.get::<K>(&namespace, &name).await? else {
        info!(%kind, "resource is gone");
        ctx.failures.remove(&failure_key::<K>(&namespace, &name));
        return Ok(Action::await_change());
    };
    if is_paused(&current) {
        info!(%kind, delay_secs = ctx.config.pause_retry_delay.as_secs(), "paused");
        return Ok(Action::requeue(ctx.config.pause_retry_delay));
    }

    match converge(&current, &ctx, &namespace).await {
        Ok(status) => {
            ctx.failures.remove(&failure_key::<K>(&namespace, &name));
            report(&ctx.store, &current, status).await?;
            Ok(Action::requeue(RESYNC))
        }
        Err(err) => {
            ctx.metrics.reconcile_failed(&kind, &namespace, &name);
            if err.is_validation() {
                let status = current.error_status(err.to_string());
                if let Err(patch_err) = report(&ctx.store, &current, status).await {
                    warn!(error = %patch_err, "unable to record validation error");
                }
            }
            Err(err)
        }
    }
}

/// Delay before retrying after the `attempt`th consecutive failure.
pub fn backoff(attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    BACKOFF_BASE
        .saturating_mul(2u32.saturating_pow(exp))
        .min(BACKOFF_MAX)
}

pub fn error_policy<K: SplunkResource, S: ObjectStore>(
    obj: Arc<K>,
    err: &ReconcileError,
    ctx: Arc<Context<S>>,
) -> Action {
    let key = failure_key::<K>(&obj.namespace().unwrap_or_default(), &obj.name_any());
    let attempt = {
        let mut entry = ctx.failures.entry(key.clone()).or_insert(0);
        *entry += 1;
        *entry
    };
    let delay = backoff(attempt);
    warn!(error = %err, attempt, delay_secs = delay.as_secs(), "reconcile of {} failed", key);
    Action::requeue(delay)
}

pub(crate) fn scoped<K: Object>(client: &Client, namespace: Option<&str>) -> Api<K> {
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Controller for `K`, re-triggered by changes to anything it owns.
/// Updates to `K` itself only count when they bump `metadata.generation`,
/// so the loop's own status patches do not wake it again.
pub fn controller<K: SplunkResource>(client: &Client, config: &OperatorConfig) -> Controller<K> {
    let ns = config.watch_namespace.as_deref();
    let wc = watcher::Config::default;
    let (reader, writer) = reflector::store();
    let resources = watcher(scoped::<K>(client, ns), wc())
        .default_backoff()
        .reflect(writer)
        .applied_objects()
        .predicate_filter(predicates::generation);
    let c = Controller::for_stream(resources, reader)
        .owns(scoped::<StatefulSet>(client, ns), wc())
        .owns(scoped::<Secret>(client, ns), wc())
        .owns(scoped::<ConfigMap>(client, ns), wc())
        .owns(scoped::<Service>(client, ns), wc());
    K::watch_children(c, client, ns)
        .with_config(controller::Config::default().concurrency(config.workers))
        .shutdown_on_signal()
}

/// Drives the controller for `K` until shutdown.
pub async fn run<K: SplunkResource, S: ObjectStore>(client: Client, ctx: Arc<Context<S>>) {
    let kind = K::kind(&()).to_string();
    info!(%kind, "starting controller");
    controller::<K>(&client, &ctx.config)
        .run(reconcile::<K, S>, error_policy::<K, S>, ctx)
        .for_each(|res| {
            let kind = kind.clone();
            async move {
                match res {
                    Ok((obj, _)) => debug!(%kind, name = %obj.name, "reconciled"),
                    Err(e) => warn!(%kind, error = %e, "reconcile error"),
                }
            }
        })
        .await;
}
