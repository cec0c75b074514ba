//! `SplunkEnterprise` expands a whole-deployment topology into per-tier
//! resources, each reconciled by its own controller.

use kube::Client;
use kube::core::ObjectMeta;
use kube::runtime::watcher;
use kube::runtime::controller::Controller;

use crate::apply::ApplySummary;
use crate::controller::{SplunkResource, SynthesisInputs, scoped};
use crate::crds::common::{CommonSplunkSpec, DependencyRef, Phase};
use crate::crds::enterprise::{SplunkEnterprise, SplunkEnterpriseStatus, Topology};
use crate::crds::indexer::{IndexerCluster, IndexerClusterSpec};
use crate::crds::license_master::{LicenseMaster, LicenseMasterSpec};
use crate::crds::search_head::{SearchHeadCluster, SearchHeadClusterSpec};
use crate::crds::spark::{Spark, SparkSpec};
use crate::crds::standalone::{Standalone, StandaloneSpec};
use crate::error::Result;
use crate::graph::{ManagedObject, ObjectGraph, Owner};
use crate::instance::InstanceType;
use crate::validate::{validate_common, validate_topology};

impl SplunkEnterprise {
    fn topology(&self) -> Result<Topology> {
        validate_topology(&self.spec.topology, self.spec.enable_dfs)
    }

    fn has_license(&self) -> bool {
        self.spec
            .common
            .license_url
            .as_deref()
            .is_some_and(|u| !u.trim().is_empty())
    }
}

fn child_meta(owner: &Owner) -> ObjectMeta {
    let mut meta = owner.child_meta(owner.name.clone());
    if !owner.labels.is_empty() {
        meta.labels = Some(owner.labels.clone());
    }
    if !owner.annotations.is_empty() {
        meta.annotations = Some(owner.annotations.clone());
    }
    meta
}

impl SplunkResource for SplunkEnterprise {
    type Status = SplunkEnterpriseStatus;

    fn secret_instance(&self) -> Option<InstanceType> {
        None
    }

    fn synthesize(&self, inputs: &SynthesisInputs<'_>) -> Result<ObjectGraph> {
        let topology = self.topology()?;
        // surface spec errors here rather than on every child
        validate_common(&self.spec.common, &inputs.config.images)?;
        let owner = Owner::of(self)?;
        let parent = || Some(DependencyRef::new(owner.name.clone()));
        let mut graph = ObjectGraph::default();

        let mut common = self.spec.common.clone();
        if self.has_license() {
            graph.push(ManagedObject::LicenseMaster(Box::new(LicenseMaster {
                metadata: child_meta(&owner),
                spec: LicenseMasterSpec {
                    common: common.clone(),
                },
                status: None,
            })));
            // only the license master installs the license file
            common.license_url = None;
            common.license_master_ref = parent();
            common.license_master_url = None;
        }
        let spark_ref = if self.spec.enable_dfs {
            graph.push(ManagedObject::Spark(Box::new(Spark {
                metadata: child_meta(&owner),
                spec: SparkSpec {
                    replicas: topology.spark_workers,
                    image: self.spec.spark_image.clone(),
                    image_pull_policy: common.image_pull_policy.clone(),
                    scheduler_name: common.scheduler_name.clone(),
                    affinity: common.affinity.clone(),
                    resources: common.resources.clone(),
                },
                status: None,
            })));
            parent()
        } else {
            None
        };

        if topology.indexers > 0 {
            let indexer_common = CommonSplunkSpec {
                var_storage: self
                    .spec
                    .indexer_storage
                    .clone()
                    .or_else(|| common.var_storage.clone()),
                ..common.clone()
            };
            graph.push(ManagedObject::IndexerCluster(Box::new(IndexerCluster {
                metadata: child_meta(&owner),
                spec: IndexerClusterSpec {
                    replicas: topology.indexers,
                    common: indexer_common,
                },
                status: None,
            })));
            common.cluster_master_ref = parent();
            common.cluster_master_url = None;
        }

        if topology.search_heads > 0 {
            graph.push(ManagedObject::SearchHeadCluster(Box::new(SearchHeadCluster {
                metadata: child_meta(&owner),
                spec: SearchHeadClusterSpec {
                    replicas: topology.search_heads,
                    spark_ref: spark_ref.clone(),
                    spark_image: self.spec.spark_image.clone(),
                    common: common.clone(),
                },
                status: None,
            })));
        }

        if topology.standalones > 0 {
            graph.push(ManagedObject::Standalone(Box::new(Standalone {
                metadata: child_meta(&owner),
                spec: StandaloneSpec {
                    replicas: topology.standalones,
                    spark_ref,
                    spark_image: self.spec.spark_image.clone(),
                    common,
                },
                status: None,
            })));
        }
        Ok(graph)
    }

    fn current_status(&self) -> Option<&SplunkEnterpriseStatus> {
        self.status.as_ref()
    }

    fn ready_status(
        &self,
        _inputs: &SynthesisInputs<'_>,
        summary: &ApplySummary,
    ) -> SplunkEnterpriseStatus {
        let phase = if summary.pending_children == 0 {
            Phase::Ready
        } else {
            Phase::Pending
        };
        SplunkEnterpriseStatus {
            phase,
            topology: self.topology().ok(),
            message: None,
            observed_generation: self.metadata.generation,
            last_transition_time: None,
        }
    }

    fn error_status(&self, message: String) -> SplunkEnterpriseStatus {
        SplunkEnterpriseStatus {
            phase: Phase::Error,
            message: Some(message),
            observed_generation: self.metadata.generation,
            ..Default::default()
        }
    }

    fn watch_children(
        controller: Controller<Self>,
        client: &Client,
        namespace: Option<&str>,
    ) -> Controller<Self> {
        let wc = watcher::Config::default;
        controller
            .owns(scoped::<Standalone>(client, namespace), wc())
            .owns(scoped::<SearchHeadCluster>(client, namespace), wc())
            .owns(scoped::<IndexerCluster>(client, namespace), wc())
            .owns(scoped::<LicenseMaster>(client, namespace), wc())
            .owns(scoped::<Spark>(client, namespace), wc())
    }
}
