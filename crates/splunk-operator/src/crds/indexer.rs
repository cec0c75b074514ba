use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{CommonSplunkSpec, SplunkStatus};

#[derive(CustomResource, Debug, Serialize, Deserialize, Clone, Default, PartialEq, JsonSchema)]
#[kube(
    group = "enterprise.splunk.com",
    version = "v1alpha2",
    kind = "IndexerCluster",
    plural = "indexerclusters",
    namespaced,
    derive = "PartialEq",
    status = "SplunkStatus",
    shortname = "idc"
)]
#[serde(rename_all = "camelCase")]
pub struct IndexerClusterSpec {
    /// Number of indexer peers, defaults to 1
    #[serde(default)]
    pub replicas: i32,
    #[serde(flatten)]
    pub common: CommonSplunkSpec,
}
