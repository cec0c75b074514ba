//! The distributed compute tier: one master and a set of workers that
//! search heads and standalones hand work to.

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Affinity, Container, EnvVar, PodSpec, PodTemplateSpec, ResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::core::ObjectMeta;

use crate::apply::ApplySummary;
use crate::config::ImageDefaults;
use crate::controller::{self, SplunkResource, SynthesisInputs, workload_status};
use crate::crds::common::SplunkStatus;
use crate::crds::spark::{Spark, SparkSpec};
use crate::dependencies::env;
use crate::error::Result;
use crate::graph::{ManagedObject, ObjectGraph, Owner};
use crate::instance::{self, InstanceType, SPARK_MASTER_PORT};
use crate::resources::{
    CONTAINER_NAME, build_service, container_ports, labels, mesh_annotations, selector_labels,
    with_anti_affinity,
};
use crate::validate::{self, validate_pull_policy, validate_replicas, validate_resources};

/// A [`SparkSpec`] with defaults applied.
#[derive(Debug, Clone, PartialEq)]
struct ComputeSettings {
    image: String,
    image_pull_policy: String,
    scheduler_name: String,
    affinity: Option<Affinity>,
    resources: ResourceRequirements,
}

fn settings(spec: &SparkSpec, images: &ImageDefaults) -> Result<ComputeSettings> {
    Ok(ComputeSettings {
        image: validate::spark_image(&spec.image, images),
        image_pull_policy: validate_pull_policy(spec.image_pull_policy.as_deref())?,
        scheduler_name: spec
            .scheduler_name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or("default-scheduler")
            .to_string(),
        affinity: spec.affinity.clone(),
        resources: validate_resources(&spec.resources)?,
    })
}

fn tier_env(instance: InstanceType, identifier: &str) -> Vec<EnvVar> {
    let mut vars = vec![env("SPLUNK_ROLE", instance.role())];
    if instance == InstanceType::SparkWorker {
        vars.push(env(
            "SPARK_MASTER_HOSTNAME",
            instance::spark_master_service_name(identifier),
        ));
        vars.push(env("SPARK_WORKER_PORT", SPARK_MASTER_PORT.to_string()));
    }
    vars
}

fn build_compute_statefulset(
    instance: InstanceType,
    owner: &Owner,
    settings: &ComputeSettings,
    replicas: i32,
) -> StatefulSet {
    let identifier = owner.name.as_str();
    let component = instance.short_name();
    let ports = instance.ports();
    let mut pod_labels = labels(identifier, component);
    pod_labels.insert("kind".into(), instance.kind_label().into());
    pod_labels.extend(owner.labels.clone());
    let mut annotations = mesh_annotations(&ports);
    annotations.extend(owner.annotations.clone());

    let template = PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(pod_labels),
            annotations: Some(annotations),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            affinity: Some(with_anti_affinity(
                settings.affinity.clone(),
                selector_labels(identifier, component),
            )),
            scheduler_name: Some(settings.scheduler_name.clone()),
            containers: vec![Container {
                name: CONTAINER_NAME.into(),
                image: Some(settings.image.clone()),
                image_pull_policy: Some(settings.image_pull_policy.clone()),
                ports: Some(container_ports(&ports)),
                env: Some(tier_env(instance, identifier)),
                resources: Some(settings.resources.clone()),
                ..Default::default()
            }],
            ..Default::default()
        }),
    };

    StatefulSet {
        metadata: owner.child_meta(instance::statefulset_name(instance, identifier)),
        spec: Some(StatefulSetSpec {
            selector: LabelSelector {
                match_labels: Some(selector_labels(identifier, component)),
                ..Default::default()
            },
            service_name: Some(instance::service_name(instance, identifier, true)),
            replicas: Some(replicas),
            pod_management_policy: Some("Parallel".into()),
            template,
            ..Default::default()
        }),
        ..Default::default()
    }
}

impl SplunkResource for Spark {
    type Status = SplunkStatus;

    fn secret_instance(&self) -> Option<InstanceType> {
        None
    }

    fn synthesize(&self, inputs: &SynthesisInputs<'_>) -> Result<ObjectGraph> {
        let owner = Owner::of(self)?;
        let settings = settings(&self.spec, &inputs.config.images)?;
        let tiers = [
            (InstanceType::SparkMaster, validate_replicas(InstanceType::SparkMaster, 1)),
            (
                InstanceType::SparkWorker,
                validate_replicas(InstanceType::SparkWorker, self.spec.replicas),
            ),
        ];

        let mut graph = ObjectGraph::default();
        for (instance, replicas) in tiers {
            graph.extend([
                ManagedObject::Service(build_service(instance, &owner.name, &owner, false, None)),
                ManagedObject::Service(build_service(instance, &owner.name, &owner, true, None)),
                ManagedObject::StatefulSet(build_compute_statefulset(
                    instance, &owner, &settings, replicas,
                )),
            ]);
        }
        Ok(graph)
    }

    fn current_status(&self) -> Option<&SplunkStatus> {
        self.status.as_ref()
    }

    fn ready_status(&self, _inputs: &SynthesisInputs<'_>, summary: &ApplySummary) -> SplunkStatus {
        workload_status(self.metadata.generation, summary)
    }

    fn error_status(&self, message: String) -> SplunkStatus {
        controller::error_status(self.metadata.generation, message)
    }
}
