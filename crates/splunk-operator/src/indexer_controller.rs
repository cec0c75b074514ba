use crate::apply::ApplySummary;
use crate::controller::{self, SplunkResource, SynthesisInputs, workload_status};
use crate::crds::common::SplunkStatus;
use crate::crds::indexer::IndexerCluster;
use crate::dependencies::{self, Origin};
use crate::error::Result;
use crate::graph::{ObjectGraph, Owner};
use crate::instance::InstanceType;
use crate::resources::{Workload, shared_config, tier_objects};
use crate::validate::{validate_common, validate_replicas};

impl SplunkResource for IndexerCluster {
    type Status = SplunkStatus;

    /// The indexer secret carries the `idxc_secret` every cluster member and
    /// every search tier joining this cluster shares.
    fn secret_instance(&self) -> Option<InstanceType> {
        Some(InstanceType::Indexer)
    }

    fn synthesize(&self, inputs: &SynthesisInputs<'_>) -> Result<ObjectGraph> {
        let owner = Owner::of(self)?;
        let spec = validate_common(&self.spec.common, &inputs.config.images)?;
        let replicas = validate_replicas(InstanceType::Indexer, self.spec.replicas);
        let origin = Origin {
            identifier: &owner.name,
            namespace: &owner.namespace,
            cluster_domain: &inputs.config.cluster_domain,
        };
        let shared = shared_config(&owner, InstanceType::Indexer, &spec, inputs.secrets()?)?;

        let indexers = Workload {
            instance: InstanceType::Indexer,
            identifier: &owner.name,
            replicas,
            spec: &spec,
            owner: &owner,
            secret_name: shared.secret_name,
            defaults_name: shared.defaults_name,
            env: dependencies::resolve(
                InstanceType::Indexer,
                &spec,
                origin,
                dependencies::indexer_env(origin, replicas),
            ),
            compute: None,
        };
        let cluster_master = Workload {
            instance: InstanceType::ClusterMaster,
            replicas: validate_replicas(InstanceType::ClusterMaster, 1),
            env: dependencies::resolve(
                InstanceType::ClusterMaster,
                &spec,
                origin,
                dependencies::indexer_env(origin, replicas),
            ),
            ..indexers.clone()
        };

        let mut graph = ObjectGraph::default();
        graph.extend(shared.objects);
        graph.extend(tier_objects(&cluster_master));
        graph.extend(tier_objects(&indexers));
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
