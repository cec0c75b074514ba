//! Addresses of the services a tier depends on.

use k8s_openapi::api::core::v1::EnvVar;

use crate::crds::common::DependencyRef;
use crate::instance::{self, InstanceType};
use crate::validate::ValidatedSpec;

/// Where an instance lives and how names are qualified from there.
#[derive(Debug, Clone, Copy)]
pub struct Origin<'a> {
    pub identifier: &'a str,
    pub namespace: &'a str,
    pub cluster_domain: &'a str,
}

impl Origin<'_> {
    /// Service name as seen from this origin: bare within the same namespace,
    /// fully qualified across namespaces.
    fn reach(&self, reference: &DependencyRef, service: String) -> String {
        match reference.namespace.as_deref().filter(|ns| !ns.is_empty()) {
            Some(ns) if ns != self.namespace => {
                instance::service_fqdn(ns, &service, self.cluster_domain)
            }
            _ => service,
        }
    }
}

pub fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

/// Resolved `SPLUNK_LICENSE_MASTER_URL`, if any.
pub fn license_master_url(
    instance: InstanceType,
    spec: &ValidatedSpec,
    origin: Origin<'_>,
) -> Option<String> {
    if instance == InstanceType::LicenseMaster {
        return None;
    }
    if let Some(url) = &spec.license_master_url {
        return Some(url.clone());
    }
    spec.license_master_ref.as_ref().map(|r| {
        origin.reach(
            r,
            instance::service_name(InstanceType::LicenseMaster, &r.name, false),
        )
    })
}

/// Resolved `SPLUNK_CLUSTER_MASTER_URL`, if any. Indexers always talk to the
/// cluster master created alongside them.
pub fn cluster_master_url(
    instance: InstanceType,
    spec: &ValidatedSpec,
    origin: Origin<'_>,
) -> Option<String> {
    match instance {
        InstanceType::ClusterMaster => None,
        InstanceType::Indexer => Some(instance::service_name(
            InstanceType::ClusterMaster,
            origin.identifier,
            false,
        )),
        _ => {
            if let Some(url) = &spec.cluster_master_url {
                return Some(url.clone());
            }
            spec.cluster_master_ref.as_ref().map(|r| {
                origin.reach(
                    r,
                    instance::service_name(InstanceType::ClusterMaster, &r.name, false),
                )
            })
        }
    }
}

/// Host of the compute tier's master service.
pub fn spark_master_host(reference: &DependencyRef, origin: Origin<'_>) -> String {
    origin.reach(reference, instance::spark_master_service_name(&reference.name))
}

/// Dependency addresses for one tier, plus the tier's own extra variables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedEnv {
    pub license_master_url: Option<String>,
    pub cluster_master_url: Option<String>,
    pub extra: Vec<EnvVar>,
}

pub fn resolve(
    instance: InstanceType,
    spec: &ValidatedSpec,
    origin: Origin<'_>,
    extra: Vec<EnvVar>,
) -> ResolvedEnv {
    ResolvedEnv {
        license_master_url: license_master_url(instance, spec, origin),
        cluster_master_url: cluster_master_url(instance, spec, origin),
        extra,
    }
}

/// Peer and captain addresses a search-head tier advertises.
pub fn search_head_env(origin: Origin<'_>, replicas: i32) -> Vec<EnvVar> {
    vec![
        env(
            "SPLUNK_SEARCH_HEAD_URL",
            instance::statefulset_urls(
                origin.namespace,
                InstanceType::SearchHead,
                origin.identifier,
                replicas,
                origin.cluster_domain,
            ),
        ),
        env(
            "SPLUNK_SEARCH_HEAD_CAPTAIN_URL",
            instance::statefulset_url(
                origin.namespace,
                InstanceType::SearchHead,
                origin.identifier,
                0,
                origin.cluster_domain,
            ),
        ),
    ]
}

pub fn indexer_env(origin: Origin<'_>, replicas: i32) -> Vec<EnvVar> {
    vec![env(
        "SPLUNK_INDEXER_URL",
        instance::statefulset_urls(
            origin.namespace,
            InstanceType::Indexer,
            origin.identifier,
            replicas,
            origin.cluster_domain,
        ),
    )]
}

pub fn deployer_env(origin: Origin<'_>) -> EnvVar {
    env(
        "SPLUNK_DEPLOYER_URL",
        instance::service_name(InstanceType::Deployer, origin.identifier, false),
    )
}
