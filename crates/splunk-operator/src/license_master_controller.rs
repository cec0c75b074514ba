use crate::apply::ApplySummary;
use crate::controller::{self, SplunkResource, SynthesisInputs, workload_status};
use crate::crds::common::{DependencyRef, SplunkStatus};
use crate::crds::license_master::LicenseMaster;
use crate::dependencies::{self, Origin};
use crate::error::Result;
use crate::graph::{ObjectGraph, Owner};
use crate::instance::InstanceType;
use crate::resources::single_tier;
use crate::validate::{validate_common, validate_replicas};

impl SplunkResource for LicenseMaster {
    type Status = SplunkStatus;

    fn secret_instance(&self) -> Option<InstanceType> {
        Some(InstanceType::LicenseMaster)
    }

    fn cluster_secret_ref(&self) -> Option<DependencyRef> {
        self.spec
            .common
            .cluster_master_ref
            .clone()
            .filter(DependencyRef::is_set)
    }

    fn synthesize(&self, inputs: &SynthesisInputs<'_>) -> Result<ObjectGraph> {
        let owner = Owner::of(self)?;
        let spec = validate_common(&self.spec.common, &inputs.config.images)?;
        let origin = Origin {
            identifier: &owner.name,
            namespace: &owner.namespace,
            cluster_domain: &inputs.config.cluster_domain,
        };
        single_tier(
            &owner,
            InstanceType::LicenseMaster,
            &spec,
            validate_replicas(InstanceType::LicenseMaster, 1),
            inputs.secrets()?,
            dependencies::resolve(InstanceType::LicenseMaster, &spec, origin, Vec::new()),
            None,
        )
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
