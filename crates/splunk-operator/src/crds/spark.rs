use k8s_openapi::api::core::v1::Affinity;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{ResourceSpec, SplunkStatus};

/// Distributed compute tier: one master and a set of workers.
#[derive(CustomResource, Debug, Serialize, Deserialize, Clone, Default, PartialEq, JsonSchema)]
#[kube(
    group = "enterprise.splunk.com",
    version = "v1alpha2",
    kind = "Spark",
    plural = "sparks",
    namespaced,
    derive = "PartialEq",
    status = "SplunkStatus",
    shortname = "spark"
)]
#[serde(rename_all = "camelCase")]
pub struct SparkSpec {
    /// Number of workers, defaults to 1
    #[serde(default)]
    pub replicas: i32,
    /// Compute image; defaults to the operator's configured image
    pub image: Option<String>,
    pub image_pull_policy: Option<String>,
    pub scheduler_name: Option<String>,
    pub affinity: Option<Affinity>,
    #[serde(default)]
    pub resources: ResourceSpec,
}
