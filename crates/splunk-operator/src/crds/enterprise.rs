use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{CommonSplunkSpec, Phase};

/// Whole-deployment topology, expanded into per-tier resources.
#[derive(CustomResource, Debug, Serialize, Deserialize, Clone, Default, PartialEq, JsonSchema)]
#[kube(
    group = "enterprise.splunk.com",
    version = "v1alpha2",
    kind = "SplunkEnterprise",
    plural = "splunkenterprises",
    namespaced,
    derive = "PartialEq",
    status = "SplunkEnterpriseStatus",
    shortname = "enterprise"
)]
#[serde(rename_all = "camelCase")]
pub struct SplunkEnterpriseSpec {
    #[serde(default)]
    pub topology: Topology,
    /// Enable the distributed compute (Spark) integration
    #[serde(default, rename = "enableDFS")]
    pub enable_dfs: bool,
    pub spark_image: Option<String>,
    /// Size of /opt/splunk/var on indexers; varStorage applies elsewhere
    pub indexer_storage: Option<String>,
    #[serde(flatten)]
    pub common: CommonSplunkSpec,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Topology {
    #[serde(default)]
    pub standalones: i32,
    #[serde(default)]
    pub search_heads: i32,
    #[serde(default)]
    pub indexers: i32,
    #[serde(default)]
    pub spark_workers: i32,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SplunkEnterpriseStatus {
    pub phase: Phase,
    /// Topology after defaulting
    pub topology: Option<Topology>,
    pub message: Option<String>,
    pub observed_generation: Option<i64>,
    pub last_transition_time: Option<String>,
}
