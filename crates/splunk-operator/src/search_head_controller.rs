use crate::apply::ApplySummary;
use crate::controller::{self, SplunkResource, SynthesisInputs, workload_status};
use crate::crds::common::{DependencyRef, SplunkStatus};
use crate::crds::search_head::SearchHeadCluster;
use crate::dependencies::{self, Origin};
use crate::error::Result;
use crate::graph::{ObjectGraph, Owner};
use crate::instance::InstanceType;
use crate::resources::{Workload, compute_integration, shared_config, tier_objects};
use crate::validate::{validate_common, validate_replicas};

impl SplunkResource for SearchHeadCluster {
    type Status = SplunkStatus;

    fn secret_instance(&self) -> Option<InstanceType> {
        Some(InstanceType::SearchHead)
    }

    fn cluster_secret_ref(&self) -> Option<DependencyRef> {
        self.spec
            .common
            .cluster_master_ref
            .clone()
            .filter(DependencyRef::is_set)
    }

    /// Search heads and their deployer. Both tiers share one secret and one
    /// defaults bundle.
    fn synthesize(&self, inputs: &SynthesisInputs<'_>) -> Result<ObjectGraph> {
        let owner = Owner::of(self)?;
        let spec = validate_common(&self.spec.common, &inputs.config.images)?;
        let replicas = validate_replicas(InstanceType::SearchHead, self.spec.replicas);
        let origin = Origin {
            identifier: &owner.name,
            namespace: &owner.namespace,
            cluster_domain: &inputs.config.cluster_domain,
        };
        let shared = shared_config(&owner, InstanceType::SearchHead, &spec, inputs.secrets()?)?;

        let mut search_head_extra = dependencies::search_head_env(origin, replicas);
        search_head_extra.push(dependencies::deployer_env(origin));
        let search_heads = Workload {
            instance: InstanceType::SearchHead,
            identifier: &owner.name,
            replicas,
            spec: &spec,
            owner: &owner,
            secret_name: shared.secret_name.clone(),
            defaults_name: shared.defaults_name.clone(),
            env: dependencies::resolve(InstanceType::SearchHead, &spec, origin, search_head_extra),
            compute: compute_integration(
                self.spec.spark_ref.as_ref(),
                &self.spec.spark_image,
                &spec,
                origin,
                &inputs.config.images,
                replicas,
            ),
        };
        let deployer = Workload {
            instance: InstanceType::Deployer,
            replicas: validate_replicas(InstanceType::Deployer, 1),
            env: dependencies::resolve(
                InstanceType::Deployer,
                &spec,
                origin,
                dependencies::search_head_env(origin, replicas),
            ),
            compute: None,
            ..search_heads.clone()
        };

        let mut graph = ObjectGraph::default();
        graph.extend(shared.objects);
        graph.extend(tier_objects(&deployer));
        graph.extend(tier_objects(&search_heads));
        Ok(graph)
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
