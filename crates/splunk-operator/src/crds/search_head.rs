use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{CommonSplunkSpec, DependencyRef, SplunkStatus};

#[derive(CustomResource, Debug, Serialize, Deserialize, Clone, Default, PartialEq, JsonSchema)]
#[kube(
    group = "enterprise.splunk.com",
    version = "v1alpha2",
    kind = "SearchHeadCluster",
    plural = "searchheadclusters",
    namespaced,
    derive = "PartialEq",
    status = "SplunkStatus",
    shortname = "shc"
)]
#[serde(rename_all = "camelCase")]
pub struct SearchHeadClusterSpec {
    /// Number of search heads; raised to at least 3
    #[serde(default)]
    pub replicas: i32,
    /// SplunkEnterprise whose compute tier the search heads integrate with
    pub spark_ref: Option<DependencyRef>,
    pub spark_image: Option<String>,
    #[serde(flatten)]
    pub common: CommonSplunkSpec,
}
