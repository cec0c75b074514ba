use crate::apply::ApplySummary;
use crate::controller::{self, SplunkResource, SynthesisInputs, workload_status};
use crate::crds::common::{DependencyRef, SplunkStatus};
use crate::crds::monitoring_console::MonitoringConsole;
use crate::dependencies::{self, Origin};
use crate::error::Result;
use crate::graph::{ObjectGraph, Owner};
use crate::instance::InstanceType;
use crate::resources::single_tier;
use crate::validate::{validate_common, validate_replicas};

impl SplunkResource for MonitoringConsole {
    type Status = SplunkStatus;

    fn secret_instance(&self) -> Option<InstanceType> {
        Some(InstanceType::MonitoringConsole)
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
            InstanceType::MonitoringConsole,
            &spec,
            validate_replicas(InstanceType::MonitoringConsole, 1),
            inputs.secrets()?,
            dependencies::resolve(InstanceType::MonitoringConsole, &spec, origin, Vec::new()),
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
