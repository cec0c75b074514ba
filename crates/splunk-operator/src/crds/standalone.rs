use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{CommonSplunkSpec, DependencyRef, SplunkStatus};

#[derive(CustomResource, Debug, Serialize, Deserialize, Clone, Default, PartialEq, JsonSchema)]
#[kube(
    group = "enterprise.splunk.com",
    version = "v1alpha2",
    kind = "Standalone",
    plural = "standalones",
    namespaced,
    derive = "PartialEq",
    status = "SplunkStatus",
    shortname = "stdaln"
)]
#[serde(rename_all = "camelCase")]
pub struct StandaloneSpec {
    /// Number of standalone instances, defaults to 1
    #[serde(default)]
    pub replicas: i32,
    /// SplunkEnterprise whose compute tier these instances integrate with
    pub spark_ref: Option<DependencyRef>,
    pub spark_image: Option<String>,
    #[serde(flatten)]
    pub common: CommonSplunkSpec,
}
