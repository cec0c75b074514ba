use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{CommonSplunkSpec, SplunkStatus};

#[derive(CustomResource, Debug, Serialize, Deserialize, Clone, Default, PartialEq, JsonSchema)]
#[kube(
    group = "enterprise.splunk.com",
    version = "v1alpha2",
    kind = "LicenseMaster",
    plural = "licensemasters",
    namespaced,
    derive = "PartialEq",
    status = "SplunkStatus",
    shortname = "lm"
)]
#[serde(rename_all = "camelCase")]
pub struct LicenseMasterSpec {
    #[serde(flatten)]
    pub common: CommonSplunkSpec,
}
