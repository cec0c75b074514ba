//! Create-or-update of synthesized objects.
//!
//! Each kind knows which of its fields the operator owns. Updates copy only
//! those fields onto the live object, so values defaulted by the API server,
//! immutable fields and volume claim templates are left alone and a second
//! pass over an unchanged graph writes nothing.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{
    ConfigMap, Container, PodSpec, PodTemplateSpec, Probe, ResourceRequirements, Secret, Service,
    ServicePort, Volume,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::core::ObjectMeta;
use kube::{Resource, ResourceExt};
use tracing::{debug, info};

use crate::crds::common::{Phase, SplunkStatus};
use crate::crds::indexer::IndexerCluster;
use crate::crds::license_master::LicenseMaster;
use crate::crds::spark::Spark;
use crate::crds::search_head::SearchHeadCluster;
use crate::crds::standalone::Standalone;
use crate::error::{ReconcileError, Result};
use crate::graph::{ManagedObject, ObjectGraph};
use crate::store::{Object, ObjectStore};
use crate::validate::quantity_value;

/// Brings a live object in line with the desired one.
pub trait Converge {
    /// Returns true if `self` was modified.
    fn converge(&mut self, desired: &Self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Created,
    Updated,
    Unchanged,
}

fn set<T: PartialEq + Clone>(live: &mut T, desired: &T) -> bool {
    if live == desired {
        false
    } else {
        *live = desired.clone();
        true
    }
}

/// Adds or overwrites the desired entries, keeping any others.
fn merge_map<V: PartialEq + Clone>(
    live: &mut Option<BTreeMap<String, V>>,
    desired: &Option<BTreeMap<String, V>>,
) -> bool {
    let Some(desired) = desired else {
        return false;
    };
    let target = live.get_or_insert_with(BTreeMap::new);
    let mut changed = false;
    for (k, v) in desired {
        if target.get(k) != Some(v) {
            target.insert(k.clone(), v.clone());
            changed = true;
        }
    }
    changed
}

fn converge_meta(live: &mut ObjectMeta, desired: &ObjectMeta) -> bool {
    let mut changed = merge_map(&mut live.labels, &desired.labels);
    changed |= merge_map(&mut live.annotations, &desired.annotations);
    for owner in desired.owner_references.iter().flatten() {
        let refs = live.owner_references.get_or_insert_with(Vec::new);
        if !refs.iter().any(|r| r.uid == owner.uid) {
            refs.push(owner.clone());
            changed = true;
        }
    }
    changed
}

impl Converge for Secret {
    fn converge(&mut self, desired: &Self) -> bool {
        converge_meta(&mut self.metadata, &desired.metadata) | merge_map(&mut self.data, &desired.data)
    }
}

impl Converge for ConfigMap {
    fn converge(&mut self, desired: &Self) -> bool {
        converge_meta(&mut self.metadata, &desired.metadata) | merge_map(&mut self.data, &desired.data)
    }
}

fn port_key(p: &ServicePort) -> (Option<&str>, i32, &str) {
    (
        p.name.as_deref(),
        p.port,
        p.protocol.as_deref().unwrap_or("TCP"),
    )
}

impl Converge for Service {
    fn converge(&mut self, desired: &Self) -> bool {
        let mut changed = converge_meta(&mut self.metadata, &desired.metadata);
        let Some(want) = &desired.spec else {
            return changed;
        };
        let spec = self.spec.get_or_insert_with(Default::default);

        let live_ports: Vec<_> = spec.ports.iter().flatten().map(port_key).collect();
        let want_ports: Vec<_> = want.ports.iter().flatten().map(port_key).collect();
        if live_ports != want_ports {
            spec.ports = want.ports.clone();
            changed = true;
        }
        changed |= set(&mut spec.selector, &want.selector);
        // an unset type is defaulted by the API server
        if want.type_.is_some() {
            changed |= set(&mut spec.type_, &want.type_);
        }
        if spec.publish_not_ready_addresses.unwrap_or(false)
            != want.publish_not_ready_addresses.unwrap_or(false)
        {
            spec.publish_not_ready_addresses = want.publish_not_ready_addresses;
            changed = true;
        }
        changed
    }
}

fn same_quantities(
    live: &Option<BTreeMap<String, Quantity>>,
    want: &Option<BTreeMap<String, Quantity>>,
) -> bool {
    let empty = BTreeMap::new();
    let (live, want) = (live.as_ref().unwrap_or(&empty), want.as_ref().unwrap_or(&empty));
    live.len() == want.len()
        && want.iter().all(|(k, q)| {
            live.get(k)
                .is_some_and(|l| l == q || quantity_value(&l.0) == quantity_value(&q.0))
        })
}

fn same_resources(live: &Option<ResourceRequirements>, want: &Option<ResourceRequirements>) -> bool {
    let empty = ResourceRequirements::default();
    let (live, want) = (live.as_ref().unwrap_or(&empty), want.as_ref().unwrap_or(&empty));
    same_quantities(&live.requests, &want.requests) && same_quantities(&live.limits, &want.limits)
}

fn same_probe(live: &Option<Probe>, want: &Option<Probe>) -> bool {
    let key = |p: &Option<Probe>| {
        p.as_ref().map(|p| {
            (
                p.exec.as_ref().and_then(|e| e.command.clone()),
                p.initial_delay_seconds,
                p.timeout_seconds,
                p.period_seconds,
            )
        })
    };
    key(live) == key(want)
}

/// Converges the operator-owned fields of one container.
fn converge_container(live: &mut Container, want: &Container) -> bool {
    let mut changed = set(&mut live.image, &want.image);
    changed |= set(&mut live.image_pull_policy, &want.image_pull_policy);
    changed |= set(&mut live.command, &want.command);
    changed |= set(&mut live.env, &want.env);

    let port_key = |c: &Container| -> Vec<(Option<String>, i32)> {
        c.ports
            .iter()
            .flatten()
            .map(|p| (p.name.clone(), p.container_port))
            .collect()
    };
    if port_key(live) != port_key(want) {
        live.ports = want.ports.clone();
        changed = true;
    }
    let mount_key = |c: &Container| -> Vec<(String, String)> {
        c.volume_mounts
            .iter()
            .flatten()
            .map(|m| (m.name.clone(), m.mount_path.clone()))
            .collect()
    };
    if mount_key(live) != mount_key(want) {
        live.volume_mounts = want.volume_mounts.clone();
        changed = true;
    }
    if !same_resources(&live.resources, &want.resources) {
        live.resources = want.resources.clone();
        changed = true;
    }
    if !same_probe(&live.liveness_probe, &want.liveness_probe) {
        live.liveness_probe = want.liveness_probe.clone();
        changed = true;
    }
    if !same_probe(&live.readiness_probe, &want.readiness_probe) {
        live.readiness_probe = want.readiness_probe.clone();
        changed = true;
    }
    changed
}

fn converge_containers(live: &mut Vec<Container>, want: &[Container]) -> bool {
    let mut changed = false;
    if live.len() != want.len() || live.iter().zip(want).any(|(l, w)| l.name != w.name) {
        // rebuild from scratch when the container set itself differs
        live.clear();
        changed = true;
    }
    if live.is_empty() {
        live.extend(want.iter().cloned());
        return changed || !want.is_empty();
    }
    for (l, w) in live.iter_mut().zip(want) {
        changed |= converge_container(l, w);
    }
    changed
}

fn volume_key(v: &Volume) -> (String, Option<String>, Option<String>, bool) {
    (
        v.name.clone(),
        v.secret.as_ref().and_then(|s| s.secret_name.clone()),
        v.config_map.as_ref().map(|c| c.name.clone()),
        v.empty_dir.is_some(),
    )
}

fn converge_pod_spec(live: &mut PodSpec, want: &PodSpec) -> bool {
    let mut changed = set(&mut live.affinity, &want.affinity);
    changed |= set(&mut live.scheduler_name, &want.scheduler_name);

    let ctx = |p: &PodSpec| {
        p.security_context
            .as_ref()
            .map(|s| (s.run_as_user, s.fs_group))
    };
    if ctx(live) != ctx(want) {
        live.security_context = want.security_context.clone();
        changed = true;
    }

    let volumes = |p: &PodSpec| p.volumes.iter().flatten().map(volume_key).collect::<Vec<_>>();
    if volumes(live) != volumes(want) {
        live.volumes = want.volumes.clone();
        changed = true;
    }

    let mut init = live.init_containers.take().unwrap_or_default();
    changed |= converge_containers(&mut init, want.init_containers.as_deref().unwrap_or(&[]));
    live.init_containers = (!init.is_empty()).then_some(init);

    changed | converge_containers(&mut live.containers, &want.containers)
}

fn converge_template(live: &mut PodTemplateSpec, want: &PodTemplateSpec) -> bool {
    let mut changed = false;
    if let Some(meta) = &want.metadata {
        changed |= converge_meta(live.metadata.get_or_insert_with(Default::default), meta);
    }
    if let Some(spec) = &want.spec {
        changed |= converge_pod_spec(live.spec.get_or_insert_with(Default::default), spec);
    }
    changed
}

impl Converge for StatefulSet {
    /// Only replicas and the pod template are updated. Selector, service name
    /// and claim templates are immutable once created.
    fn converge(&mut self, desired: &Self) -> bool {
        let mut changed = converge_meta(&mut self.metadata, &desired.metadata);
        let (Some(live), Some(want)) = (self.spec.as_mut(), desired.spec.as_ref()) else {
            return changed;
        };
        changed |= set(&mut live.replicas, &want.replicas);
        changed | converge_template(&mut live.template, &want.template)
    }
}

impl Converge for Standalone {
    fn converge(&mut self, desired: &Self) -> bool {
        converge_meta(&mut self.metadata, &desired.metadata) | set(&mut self.spec, &desired.spec)
    }
}

impl Converge for SearchHeadCluster {
    fn converge(&mut self, desired: &Self) -> bool {
        converge_meta(&mut self.metadata, &desired.metadata) | set(&mut self.spec, &desired.spec)
    }
}

impl Converge for IndexerCluster {
    fn converge(&mut self, desired: &Self) -> bool {
        converge_meta(&mut self.metadata, &desired.metadata) | set(&mut self.spec, &desired.spec)
    }
}

impl Converge for LicenseMaster {
    fn converge(&mut self, desired: &Self) -> bool {
        converge_meta(&mut self.metadata, &desired.metadata) | set(&mut self.spec, &desired.spec)
    }
}

impl Converge for Spark {
    fn converge(&mut self, desired: &Self) -> bool {
        converge_meta(&mut self.metadata, &desired.metadata) | set(&mut self.spec, &desired.spec)
    }
}

/// Creates `desired` if absent, otherwise updates the live object to match.
/// A secret that already exists keeps its payload.
pub async fn apply<K, S>(store: &S, desired: &K) -> Result<(K, Outcome)>
where
    K: Object + Converge,
    S: ObjectStore,
{
    let kind = K::kind(&());
    let name = desired.name_any();
    let namespace = desired.namespace().unwrap_or_default();
    let context = |e| ReconcileError::apply(&kind, &namespace, &name, e);

    match store.get::<K>(&namespace, &name).await.map_err(context)? {
        None => match store.create(desired).await {
            Ok(created) => {
                info!(%kind, %name, "created");
                Ok((created, Outcome::Created))
            }
            Err(ReconcileError::AlreadyExists { .. }) => {
                // lost a race with another writer; take theirs as-is
                debug!(%kind, %name, "already exists");
                let live = store
                    .get::<K>(&namespace, &name)
                    .await
                    .map_err(context)?
                    .ok_or_else(|| {
                        ReconcileError::Anyhow(anyhow::anyhow!("{kind} {namespace}/{name} vanished"))
                    })?;
                Ok((live, Outcome::Unchanged))
            }
            Err(e) => Err(context(e)),
        },
        Some(mut live) => {
            if live.converge(desired) {
                let updated = store.replace(&live).await.map_err(context)?;
                info!(%kind, %name, "updated");
                Ok((updated, Outcome::Updated))
            } else {
                Ok((live, Outcome::Unchanged))
            }
        }
    }
}

/// What one pass over a graph did.
#[derive(Debug, Clone, Default)]
pub struct ApplySummary {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Live StatefulSets after the pass, for status reporting.
    pub statefulsets: Vec<StatefulSet>,
    /// Child resources that do not report Ready yet.
    pub pending_children: usize,
}

impl ApplySummary {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Created => self.created += 1,
            Outcome::Updated => self.updated += 1,
            Outcome::Unchanged => self.unchanged += 1,
        }
    }

    fn child(&mut self, status: Option<&SplunkStatus>) {
        if status.map(|s| s.phase) != Some(Phase::Ready) {
            self.pending_children += 1;
        }
    }

    pub fn changed(&self) -> bool {
        self.created + self.updated > 0
    }
}

/// Applies every object in order. Stops at the first failure; the next pass
/// picks up from the same desired state.
pub async fn apply_graph<S: ObjectStore>(store: &S, graph: &ObjectGraph) -> Result<ApplySummary> {
    let mut summary = ApplySummary::default();
    for object in graph.iter() {
        let outcome = match object {
            ManagedObject::Secret(o) => apply(store, o).await?.1,
            ManagedObject::ConfigMap(o) => apply(store, o).await?.1,
            ManagedObject::Service(o) => apply(store, o).await?.1,
            ManagedObject::StatefulSet(o) => {
                let (live, outcome) = apply(store, o).await?;
                summary.statefulsets.push(live);
                outcome
            }
            ManagedObject::Standalone(o) => {
                let (live, outcome) = apply(store, &**o).await?;
                summary.child(live.status.as_ref());
                outcome
            }
            ManagedObject::SearchHeadCluster(o) => {
                let (live, outcome) = apply(store, &**o).await?;
                summary.child(live.status.as_ref());
                outcome
            }
            ManagedObject::IndexerCluster(o) => {
                let (live, outcome) = apply(store, &**o).await?;
                summary.child(live.status.as_ref());
                outcome
            }
            ManagedObject::LicenseMaster(o) => {
                let (live, outcome) = apply(store, &**o).await?;
                summary.child(live.status.as_ref());
                outcome
            }
            ManagedObject::Spark(o) => {
                let (live, outcome) = apply(store, &**o).await?;
                summary.child(live.status.as_ref());
                outcome
            }
        };
        summary.record(outcome);
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::ByteString;
    use k8s_openapi::api::apps::v1::StatefulSetSpec;
    use k8s_openapi::api::core::v1::{EnvVar, ServiceSpec};

    fn sts(replicas: i32, image: &str, cpu: &str) -> StatefulSet {
        StatefulSet {
            spec: Some(StatefulSetSpec {
                replicas: Some(replicas),
                template: PodTemplateSpec {
                    spec: Some(PodSpec {
                        containers: vec![Container {
                            name: "splunk".into(),
                            image: Some(image.into()),
                            resources: Some(ResourceRequirements {
                                requests: Some(BTreeMap::from([(
                                    "cpu".to_string(),
                                    Quantity(cpu.into()),
                                )])),
                                ..Default::default()
                            }),
                            ..Default::default()
                        }],
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn canonicalized_quantities_are_not_drift() {
        let mut live = sts(3, "splunk/splunk:9", "100m");
        assert!(!live.converge(&sts(3, "splunk/splunk:9", "0.1")));
    }

    #[test]
    fn statefulset_picks_up_replicas_and_image() {
        let mut live = sts(3, "splunk/splunk:8", "1");
        live.spec.as_mut().unwrap().template.spec.as_mut().unwrap().containers[0]
            .termination_message_path = Some("/dev/termination-log".into());
        let want = sts(5, "splunk/splunk:9", "1");
        assert!(live.converge(&want));
        let spec = live.spec.as_ref().unwrap();
        assert_eq!(spec.replicas, Some(5));
        let c = &spec.template.spec.as_ref().unwrap().containers[0];
        assert_eq!(c.image.as_deref(), Some("splunk/splunk:9"));
        // server defaults survive
        assert!(c.termination_message_path.is_some());
        assert!(!live.converge(&want));
    }

    #[test]
    fn env_changes_are_applied() {
        let mut live = sts(1, "img", "1");
        let mut want = live.clone();
        want.spec.as_mut().unwrap().template.spec.as_mut().unwrap().containers[0].env =
            Some(vec![EnvVar {
                name: "SPLUNK_ROLE".into(),
                value: Some("splunk_indexer".into()),
                ..Default::default()
            }]);
        assert!(live.converge(&want));
        assert!(!live.converge(&want));
    }

    #[test]
    fn secret_merge_keeps_foreign_keys() {
        let mut live = Secret {
            data: Some(BTreeMap::from([
                ("extra".to_string(), ByteString(b"x".to_vec())),
                ("password".to_string(), ByteString(b"old".to_vec())),
            ])),
            ..Default::default()
        };
        let want = Secret {
            data: Some(BTreeMap::from([(
                "password".to_string(),
                ByteString(b"old".to_vec()),
            )])),
            ..Default::default()
        };
        assert!(!live.converge(&want));
        assert_eq!(live.data.as_ref().unwrap().len(), 2);
    }

    #[test]
    fn service_keeps_allocated_cluster_ip() {
        let want = Service {
            spec: Some(ServiceSpec {
                ports: Some(vec![ServicePort {
                    name: Some("splunkd".into()),
                    port: 8089,
                    ..Default::default()
                }]),
                publish_not_ready_addresses: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        };
        let mut live = want.clone();
        live.spec.as_mut().unwrap().cluster_ip = Some("10.0.0.12".into());
        live.spec.as_mut().unwrap().publish_not_ready_addresses = None;
        assert!(live.converge(&want));
        assert_eq!(live.spec.as_ref().unwrap().cluster_ip.as_deref(), Some("10.0.0.12"));
        assert!(!live.converge(&want));
    }

    #[test]
    fn service_type_follows_the_template_only_when_set() {
        let mut live = Service {
            spec: Some(ServiceSpec {
                type_: Some("ClusterIP".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(!live.converge(&Service {
            spec: Some(ServiceSpec::default()),
            ..Default::default()
        }));

        let want = Service {
            spec: Some(ServiceSpec {
                type_: Some("NodePort".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(live.converge(&want));
        assert_eq!(live.spec.unwrap().type_.as_deref(), Some("NodePort"));
    }

    #[test]
    fn owner_references_are_added_once() {
        let owner = k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference {
            uid: "uid-1".into(),
            kind: "Standalone".into(),
            ..Default::default()
        };
        let want = ConfigMap {
            metadata: ObjectMeta {
                owner_references: Some(vec![owner]),
                ..Default::default()
            },
            ..Default::default()
        };
        let mut live = ConfigMap::default();
        assert!(live.converge(&want));
        assert!(!live.converge(&want));
        assert_eq!(live.metadata.owner_references.unwrap().len(), 1);
    }
}
