use k8s_openapi::api::core::v1::{Affinity, Service, Volume};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reference to another Splunk resource. An empty namespace means the
/// namespace of the referencing resource.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, JsonSchema)]
pub struct DependencyRef {
    pub name: String,
    pub namespace: Option<String>,
}

impl DependencyRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
        }
    }

    pub fn is_set(&self) -> bool {
        !self.name.is_empty()
    }
}

/// CPU and memory for the Splunk containers, as quantity strings.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpec {
    pub cpu_request: Option<String>,
    pub memory_request: Option<String>,
    pub cpu_limit: Option<String>,
    pub memory_limit: Option<String>,
}

/// Settings shared by every Splunk tier.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CommonSplunkSpec {
    /// Splunk image; defaults to the operator's configured image
    pub image: Option<String>,
    /// Always, IfNotPresent or Never
    pub image_pull_policy: Option<String>,
    pub scheduler_name: Option<String>,
    /// Merged with the operator's own anti-affinity rule
    pub affinity: Option<Affinity>,
    pub storage_class_name: Option<String>,
    #[serde(default)]
    pub resources: ResourceSpec,
    /// Size of /opt/splunk/etc, e.g. "1Gi"
    pub etc_storage: Option<String>,
    /// Size of /opt/splunk/var, e.g. "200Gi"
    pub var_storage: Option<String>,
    /// Extra volumes, mounted at /mnt/<name>
    pub volumes: Option<Vec<Volume>>,
    /// Inline default.yml contents
    pub defaults: Option<String>,
    /// Remote default.yml location(s)
    pub defaults_url: Option<String>,
    /// Location of the license file
    pub license_url: Option<String>,
    pub license_master_ref: Option<DependencyRef>,
    /// Overrides the address derived from licenseMasterRef
    pub license_master_url: Option<String>,
    pub cluster_master_ref: Option<DependencyRef>,
    /// Overrides the address derived from clusterMasterRef
    pub cluster_master_url: Option<String>,
    /// Starting point for the non-headless service, e.g. to set its type
    pub service_template: Option<Service>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq, JsonSchema)]
pub enum Phase {
    #[default]
    Pending,
    Ready,
    Error,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SplunkStatus {
    pub phase: Phase,
    #[serde(default)]
    pub replicas: i32,
    #[serde(default)]
    pub ready_replicas: i32,
    pub message: Option<String>,
    pub observed_generation: Option<i64>,
    pub last_transition_time: Option<String>,
}
