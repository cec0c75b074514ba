//! Builders for the Kubernetes objects backing one Splunk tier.
//!
//! Everything here is a pure function of its inputs. Pod templates are
//! threaded by value through each `with_*` step and returned, so nothing
//! shared is ever mutated.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Affinity, ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource,
    EnvVar, ExecAction, PersistentVolumeClaim, PersistentVolumeClaimSpec, PodAffinityTerm,
    PodAntiAffinity, PodSecurityContext, PodSpec, PodTemplateSpec, Probe, ResourceRequirements,
    Secret, SecretVolumeSource, Service, ServicePort, ServiceSpec, Volume, VolumeMount,
    VolumeResourceRequirements, WeightedPodAffinityTerm,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::core::ObjectMeta;

use crate::config::ImageDefaults;
use crate::crds::common::DependencyRef;
use crate::dependencies::{Origin, ResolvedEnv, env, spark_master_host};
use crate::error::Result;
use crate::graph::{ManagedObject, ObjectGraph, Owner};
use crate::instance::{self, InstanceType, NamedPort};
use crate::secrets::{DEFAULT_YML, SecretBundle};
use crate::validate::{self, ValidatedSpec};

pub const CONTAINER_NAME: &str = "splunk";
pub const INIT_CONTAINER_NAME: &str = "init";
const SPLUNK_HOME: &str = "/opt/splunk";
const SPLUNK_USER: i64 = 41812;
const SECRETS_DEFAULTS: &str = "/mnt/splunk-secrets/default.yml";
const INLINE_DEFAULTS: &str = "/mnt/splunk-defaults/default.yml";
/// Ports Splunk uses between its own pods; kept out of the mesh.
const MESH_EXCLUDED_PORTS: [i32; 8] = [8089, 8191, 9997, 7777, 9000, 17000, 17500, 19000];
const ANTI_AFFINITY_WEIGHT: i32 = 100;
const HOSTNAME_TOPOLOGY_KEY: &str = "kubernetes.io/hostname";

/// Wiring into a distributed compute tier.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputeIntegration {
    pub master_host: String,
    pub image: String,
    pub image_pull_policy: String,
    /// Multi-replica tiers run with worker slots enabled.
    pub slots_enabled: bool,
}

/// Everything needed to build one tier's StatefulSet.
#[derive(Debug, Clone)]
pub struct Workload<'a> {
    pub instance: InstanceType,
    pub identifier: &'a str,
    pub replicas: i32,
    pub spec: &'a ValidatedSpec,
    pub owner: &'a Owner,
    pub secret_name: String,
    /// ConfigMap with inline defaults, if the spec carries any.
    pub defaults_name: Option<String>,
    pub env: ResolvedEnv,
    pub compute: Option<ComputeIntegration>,
}

/// Labels that select the pods of one tier.
pub fn selector_labels(identifier: &str, component: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app.kubernetes.io/name".to_string(), "splunk".to_string()),
        (
            "app.kubernetes.io/part-of".to_string(),
            format!("splunk-{identifier}"),
        ),
        (
            "app.kubernetes.io/component".to_string(),
            component.to_string(),
        ),
    ])
}

pub fn labels(identifier: &str, component: &str) -> BTreeMap<String, String> {
    let mut labels = selector_labels(identifier, component);
    labels.insert(
        "app.kubernetes.io/managed-by".to_string(),
        "splunk-operator".to_string(),
    );
    labels
}

/// Adds a preferred anti-affinity rule spreading one tier across nodes.
/// Rules already present in `affinity` are kept.
pub fn with_anti_affinity(
    affinity: Option<Affinity>,
    selector: BTreeMap<String, String>,
) -> Affinity {
    let mut affinity = affinity.unwrap_or_default();
    let mut anti = affinity.pod_anti_affinity.unwrap_or_default();
    let mut preferred = anti
        .preferred_during_scheduling_ignored_during_execution
        .unwrap_or_default();
    preferred.push(WeightedPodAffinityTerm {
        weight: ANTI_AFFINITY_WEIGHT,
        pod_affinity_term: PodAffinityTerm {
            label_selector: Some(LabelSelector {
                match_labels: Some(selector),
                ..Default::default()
            }),
            topology_key: HOSTNAME_TOPOLOGY_KEY.to_string(),
            ..Default::default()
        },
    });
    anti.preferred_during_scheduling_ignored_during_execution = Some(preferred);
    affinity.pod_anti_affinity = Some(anti);
    affinity
}

fn joined(ports: impl Iterator<Item = i32>) -> String {
    ports.map(|p| p.to_string()).collect::<Vec<_>>().join(",")
}

/// Service mesh sidecar annotations for a pod exposing `ports`.
pub fn mesh_annotations(ports: &[NamedPort]) -> BTreeMap<String, String> {
    let inbound = ports
        .iter()
        .map(|p| p.port)
        .filter(|p| !MESH_EXCLUDED_PORTS.contains(p));
    BTreeMap::from([
        (
            "traffic.sidecar.istio.io/excludeOutboundPorts".to_string(),
            joined(MESH_EXCLUDED_PORTS.into_iter()),
        ),
        (
            "traffic.sidecar.istio.io/includeInboundPorts".to_string(),
            joined(inbound),
        ),
    ])
}

pub(crate) fn container_ports(ports: &[NamedPort]) -> Vec<ContainerPort> {
    ports
        .iter()
        .map(|p| ContainerPort {
            name: Some(p.name.to_string()),
            container_port: p.port,
            protocol: Some("TCP".into()),
            ..Default::default()
        })
        .collect()
}

fn service_ports(ports: &[NamedPort]) -> Vec<ServicePort> {
    ports
        .iter()
        .map(|p| ServicePort {
            name: Some(p.name.to_string()),
            port: p.port,
            target_port: Some(IntOrString::Int(p.port)),
            protocol: Some("TCP".into()),
            ..Default::default()
        })
        .collect()
}

/// The `etc` and `var` claim templates.
pub fn volume_claims(
    spec: &ValidatedSpec,
    labels: &BTreeMap<String, String>,
) -> Vec<PersistentVolumeClaim> {
    [("etc", &spec.etc_storage), ("var", &spec.var_storage)]
        .into_iter()
        .map(|(name, size)| PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(format!("pvc-{name}")),
                labels: Some(labels.clone()),
                ..Default::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                access_modes: Some(vec!["ReadWriteOnce".into()]),
                resources: Some(VolumeResourceRequirements {
                    requests: Some(BTreeMap::from([("storage".to_string(), size.clone())])),
                    limits: None,
                }),
                storage_class_name: spec.storage_class_name.clone(),
                ..Default::default()
            }),
            ..Default::default()
        })
        .collect()
}

fn exec_probe(command: &[&str], delay: i32, timeout: i32, period: i32) -> Probe {
    Probe {
        exec: Some(ExecAction {
            command: Some(command.iter().map(|c| c.to_string()).collect()),
        }),
        initial_delay_seconds: Some(delay),
        timeout_seconds: Some(timeout),
        period_seconds: Some(period),
        ..Default::default()
    }
}

pub fn liveness_probe() -> Probe {
    exec_probe(&["/sbin/checkstate.sh"], 300, 30, 30)
}

/// Ready once the container's startup plays have written "started".
pub fn readiness_probe() -> Probe {
    exec_probe(
        &[
            "/bin/grep",
            "started",
            "/opt/container_artifact/splunk-container.state",
        ],
        10,
        5,
        5,
    )
}

/// Locations of default.yml, lowest precedence first.
pub fn defaults_search_path(spec: &ValidatedSpec) -> String {
    let mut path = vec![SECRETS_DEFAULTS];
    if let Some(url) = &spec.defaults_url {
        path.push(url);
    }
    if spec.defaults.is_some() {
        path.push(INLINE_DEFAULTS);
    }
    path.join(",")
}

/// Environment for the Splunk container, in the order the image reads it.
pub fn splunk_env(w: &Workload<'_>) -> Vec<EnvVar> {
    let mut vars = vec![
        env("SPLUNK_HOME", SPLUNK_HOME),
        env("SPLUNK_START_ARGS", "--accept-license"),
        env("SPLUNK_DEFAULTS_URL", defaults_search_path(w.spec)),
        env("SPLUNK_HOME_OWNERSHIP_ENFORCEMENT", "false"),
        env("SPLUNK_ROLE", w.instance.role()),
    ];
    if let Some(uri) = &w.spec.license_url {
        vars.push(env("SPLUNK_LICENSE_URI", uri.as_str()));
    }
    if let Some(url) = &w.env.license_master_url {
        vars.push(env("SPLUNK_LICENSE_MASTER_URL", url.as_str()));
    }
    vars.extend(w.env.extra.iter().cloned());
    if let Some(url) = &w.env.cluster_master_url {
        vars.push(env("SPLUNK_CLUSTER_MASTER_URL", url.as_str()));
    }
    vars
}

fn compute_env(c: &ComputeIntegration) -> [EnvVar; 5] {
    [
        env("SPLUNK_ENABLE_DFS", "true"),
        env("SPARK_MASTER_HOST", c.master_host.as_str()),
        env("SPARK_HOME", "/mnt/splunk-spark"),
        env("JAVA_HOME", "/mnt/splunk-jdk"),
        env(
            "SPLUNK_DFW_NUM_SLOTS_ENABLED",
            if c.slots_enabled { "true" } else { "false" },
        ),
    ]
}

fn pod_spec(template: &mut PodTemplateSpec) -> &mut PodSpec {
    template.spec.get_or_insert_with(Default::default)
}

/// Adds a volume to the pod and mounts it in every application container.
fn with_volume(mut template: PodTemplateSpec, volume: Volume, mount_path: String) -> PodTemplateSpec {
    let pod = pod_spec(&mut template);
    for c in pod.containers.iter_mut() {
        c.volume_mounts
            .get_or_insert_with(Vec::new)
            .push(VolumeMount {
                name: volume.name.clone(),
                mount_path: mount_path.clone(),
                ..Default::default()
            });
    }
    pod.volumes.get_or_insert_with(Vec::new).push(volume);
    template
}

/// Adds `mnt-splunk-<name>` mounted at `/mnt/splunk-<name>`.
fn with_splunk_volume(template: PodTemplateSpec, name: &str, volume: Volume) -> PodTemplateSpec {
    let volume = Volume {
        name: format!("mnt-splunk-{name}"),
        ..volume
    };
    with_volume(template, volume, format!("/mnt/splunk-{name}"))
}

fn with_user_volumes(template: PodTemplateSpec, volumes: &[Volume]) -> PodTemplateSpec {
    volumes.iter().fold(template, |t, v| {
        let path = format!("/mnt/{}", v.name);
        with_volume(t, v.clone(), path)
    })
}

fn with_secret_and_defaults(mut template: PodTemplateSpec, w: &Workload<'_>) -> PodTemplateSpec {
    template = with_splunk_volume(
        template,
        "secrets",
        Volume {
            secret: Some(SecretVolumeSource {
                secret_name: Some(w.secret_name.clone()),
                ..Default::default()
            }),
            ..Default::default()
        },
    );
    if let Some(defaults) = &w.defaults_name {
        template = with_splunk_volume(
            template,
            "defaults",
            Volume {
                config_map: Some(ConfigMapVolumeSource {
                    name: defaults.clone(),
                    ..Default::default()
                }),
                ..Default::default()
            },
        );
    }
    template
}

fn with_runtime_config(mut template: PodTemplateSpec, w: &Workload<'_>) -> PodTemplateSpec {
    let env = splunk_env(w);
    let pod = pod_spec(&mut template);
    pod.security_context = Some(PodSecurityContext {
        run_as_user: Some(SPLUNK_USER),
        fs_group: Some(SPLUNK_USER),
        ..Default::default()
    });
    for c in pod.containers.iter_mut() {
        c.resources = Some(w.spec.resources.clone());
        c.liveness_probe = Some(liveness_probe());
        c.readiness_probe = Some(readiness_probe());
        c.env = Some(env.clone());
    }
    template
}

/// Injects the compute integration: an init container that fills the jdk
/// and spark directories, two empty volumes and five variables.
pub fn with_compute(template: PodTemplateSpec, c: &ComputeIntegration) -> PodTemplateSpec {
    let empty = || Volume {
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    };
    let mut template = with_splunk_volume(template, "jdk", empty());
    template = with_splunk_volume(template, "spark", empty());

    let init = Container {
        name: INIT_CONTAINER_NAME.into(),
        image: Some(c.image.clone()),
        image_pull_policy: Some(c.image_pull_policy.clone()),
        command: Some(vec![
            "bash".into(),
            "-c".into(),
            "cp -r /opt/jdk /mnt && cp -r /opt/spark /mnt".into(),
        ]),
        volume_mounts: Some(vec![
            VolumeMount {
                name: "mnt-splunk-jdk".into(),
                mount_path: "/mnt/jdk".into(),
                ..Default::default()
            },
            VolumeMount {
                name: "mnt-splunk-spark".into(),
                mount_path: "/mnt/spark".into(),
                ..Default::default()
            },
        ]),
        resources: Some(ResourceRequirements {
            requests: Some(BTreeMap::from([
                ("cpu".to_string(), Quantity("0.25".into())),
                ("memory".to_string(), Quantity("128Mi".into())),
            ])),
            limits: Some(BTreeMap::from([
                ("cpu".to_string(), Quantity("1".into())),
                ("memory".to_string(), Quantity("512Mi".into())),
            ])),
            ..Default::default()
        }),
        ..Default::default()
    };

    let pod = pod_spec(&mut template);
    pod.init_containers.get_or_insert_with(Vec::new).push(init);
    for container in pod.containers.iter_mut() {
        container
            .env
            .get_or_insert_with(Vec::new)
            .extend(compute_env(c));
    }
    template
}

fn base_template(w: &Workload<'_>, ports: &[NamedPort]) -> PodTemplateSpec {
    let component = w.instance.short_name();
    let mut pod_labels = labels(w.identifier, component);
    pod_labels.insert("kind".into(), w.instance.kind_label().into());
    pod_labels.extend(w.owner.labels.clone());
    let mut annotations = mesh_annotations(ports);
    annotations.extend(w.owner.annotations.clone());

    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(pod_labels),
            annotations: Some(annotations),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            affinity: Some(with_anti_affinity(
                w.spec.affinity.clone(),
                selector_labels(w.identifier, component),
            )),
            scheduler_name: Some(w.spec.scheduler_name.clone()),
            containers: vec![Container {
                name: CONTAINER_NAME.into(),
                image: Some(w.spec.image.clone()),
                image_pull_policy: Some(w.spec.image_pull_policy.clone()),
                ports: Some(container_ports(ports)),
                volume_mounts: Some(vec![
                    VolumeMount {
                        name: "pvc-etc".into(),
                        mount_path: format!("{SPLUNK_HOME}/etc"),
                        ..Default::default()
                    },
                    VolumeMount {
                        name: "pvc-var".into(),
                        mount_path: format!("{SPLUNK_HOME}/var"),
                        ..Default::default()
                    },
                ]),
                ..Default::default()
            }],
            ..Default::default()
        }),
    }
}

pub fn build_pod_template(w: &Workload<'_>) -> PodTemplateSpec {
    let ports = w.instance.ports();
    let mut template = base_template(w, &ports);
    template = with_user_volumes(template, &w.spec.volumes);
    template = with_secret_and_defaults(template, w);
    template = with_runtime_config(template, w);
    if let Some(c) = &w.compute {
        template = with_compute(template, c);
    }
    template
}

pub fn build_statefulset(w: &Workload<'_>) -> StatefulSet {
    let component = w.instance.short_name();
    let mut claim_labels = labels(w.identifier, component);
    claim_labels.insert("kind".into(), w.instance.kind_label().into());

    StatefulSet {
        metadata: w
            .owner
            .child_meta(instance::statefulset_name(w.instance, w.identifier)),
        spec: Some(StatefulSetSpec {
            selector: LabelSelector {
                match_labels: Some(selector_labels(w.identifier, component)),
                ..Default::default()
            },
            service_name: Some(instance::service_name(w.instance, w.identifier, true)),
            replicas: Some(w.replicas),
            pod_management_policy: Some("Parallel".into()),
            template: build_pod_template(w),
            volume_claim_templates: Some(volume_claims(w.spec, &claim_labels)),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Normal or headless service in front of one tier. A non-headless service
/// starts from `template`: its type, extra ports, labels and annotations are
/// kept, while name, owner, selector and the tier's own ports are ours.
pub fn build_service(
    instance: InstanceType,
    identifier: &str,
    owner: &Owner,
    headless: bool,
    template: Option<&Service>,
) -> Service {
    let template = template.filter(|_| !headless).cloned().unwrap_or_default();
    let mut meta = owner.child_meta(instance::service_name(instance, identifier, headless));
    let mut svc_labels = template.metadata.labels.unwrap_or_default();
    svc_labels.extend(labels(identifier, &format!("{instance}-service")));
    svc_labels.extend(owner.labels.clone());
    meta.labels = Some(svc_labels);
    let mut annotations = template.metadata.annotations.unwrap_or_default();
    annotations.extend(owner.annotations.clone());
    if !annotations.is_empty() {
        meta.annotations = Some(annotations);
    }

    // bootstrap handshakes must reach peers before they report ready
    let publish_not_ready = instance == InstanceType::Deployer
        || (instance == InstanceType::SearchHead && headless);

    let own_ports = instance.ports();
    let mut spec = template.spec.unwrap_or_default();
    let mut ports = spec.ports.take().unwrap_or_default();
    ports.retain(|p| !own_ports.iter().any(|own| own.port == p.port));
    ports.extend(service_ports(&own_ports));
    if headless {
        spec.cluster_ip = Some("None".to_string());
    }
    spec.selector = Some(selector_labels(identifier, instance.short_name()));
    spec.ports = Some(ports);
    if publish_not_ready {
        spec.publish_not_ready_addresses = Some(true);
    }

    Service {
        metadata: meta,
        spec: Some(spec),
        ..Default::default()
    }
}

pub fn build_secret(name: &str, owner: &Owner, bundle: &SecretBundle) -> Result<Secret> {
    Ok(Secret {
        metadata: owner.child_meta(name),
        data: Some(bundle.to_data()?),
        ..Default::default()
    })
}

/// ConfigMap holding inline `default.yml` contents.
pub fn build_defaults(name: &str, owner: &Owner, defaults: &str) -> ConfigMap {
    ConfigMap {
        metadata: owner.child_meta(name),
        data: Some(BTreeMap::from([(
            DEFAULT_YML.to_string(),
            defaults.to_string(),
        )])),
        ..Default::default()
    }
}

/// Credentials and inline defaults shared by every tier of one resource.
#[derive(Debug, Clone)]
pub struct SharedConfig {
    pub secret_name: String,
    pub defaults_name: Option<String>,
    pub objects: Vec<ManagedObject>,
}

pub fn shared_config(
    owner: &Owner,
    instance: InstanceType,
    spec: &ValidatedSpec,
    bundle: &SecretBundle,
) -> Result<SharedConfig> {
    let secret_name = instance::secrets_name(&owner.name, instance);
    let mut objects = vec![ManagedObject::Secret(build_secret(
        &secret_name,
        owner,
        bundle,
    )?)];
    let defaults_name = spec.defaults.as_ref().map(|defaults| {
        let name = instance::defaults_name(&owner.name, instance);
        objects.push(ManagedObject::ConfigMap(build_defaults(
            &name, owner, defaults,
        )));
        name
    });
    Ok(SharedConfig {
        secret_name,
        defaults_name,
        objects,
    })
}

/// Compute integration for a tier, when it references a compute tier.
pub fn compute_integration(
    spark_ref: Option<&DependencyRef>,
    spark_image: &Option<String>,
    spec: &ValidatedSpec,
    origin: Origin<'_>,
    images: &ImageDefaults,
    replicas: i32,
) -> Option<ComputeIntegration> {
    let reference = spark_ref.filter(|r| r.is_set())?;
    Some(ComputeIntegration {
        master_host: spark_master_host(reference, origin),
        image: validate::spark_image(spark_image, images),
        image_pull_policy: spec.image_pull_policy.clone(),
        slots_enabled: replicas > 1,
    })
}

/// StatefulSet plus its normal and headless services.
pub fn tier_objects(w: &Workload<'_>) -> [ManagedObject; 3] {
    [
        ManagedObject::Service(build_service(
            w.instance,
            w.identifier,
            w.owner,
            false,
            w.spec.service_template.as_ref(),
        )),
        ManagedObject::Service(build_service(w.instance, w.identifier, w.owner, true, None)),
        ManagedObject::StatefulSet(build_statefulset(w)),
    ]
}

/// Graph of a resource that runs exactly one tier.
pub fn single_tier(
    owner: &Owner,
    instance: InstanceType,
    spec: &ValidatedSpec,
    replicas: i32,
    bundle: &SecretBundle,
    env: ResolvedEnv,
    compute: Option<ComputeIntegration>,
) -> Result<ObjectGraph> {
    let shared = shared_config(owner, instance, spec, bundle)?;
    let workload = Workload {
        instance,
        identifier: &owner.name,
        replicas,
        spec,
        owner,
        secret_name: shared.secret_name,
        defaults_name: shared.defaults_name,
        env,
        compute,
    };
    let mut graph = ObjectGraph::default();
    graph.extend(shared.objects);
    graph.extend(tier_objects(&workload));
    Ok(graph)
}
