//! The set of objects synthesized for one managed resource.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::Resource;
use kube::core::ObjectMeta;

use crate::crds::indexer::IndexerCluster;
use crate::crds::license_master::LicenseMaster;
use crate::crds::spark::Spark;
use crate::crds::search_head::SearchHeadCluster;
use crate::crds::standalone::Standalone;
use crate::error::{ReconcileError, Result};

/// Annotations owned by kubectl are not copied onto children.
const KUBECTL_PREFIX: &str = "kubectl.kubernetes.io/";

/// Identity of the managed resource every synthesized object belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct Owner {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub namespace: String,
    pub uid: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

impl Owner {
    pub fn of<K: Resource<DynamicType = ()>>(obj: &K) -> Result<Self> {
        let kind = K::kind(&()).to_string();
        let meta = obj.meta();
        let missing = |field| ReconcileError::MissingMetadata {
            kind: kind.clone(),
            field,
        };
        let name = meta.name.clone().ok_or_else(|| missing("name"))?;
        let namespace = meta.namespace.clone().ok_or_else(|| missing("namespace"))?;
        let uid = meta.uid.clone().ok_or_else(|| missing("uid"))?;
        let annotations = meta
            .annotations
            .iter()
            .flatten()
            .filter(|(k, _)| !k.starts_with(KUBECTL_PREFIX))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(Self {
            api_version: K::api_version(&()).to_string(),
            kind,
            name,
            namespace,
            uid,
            labels: meta.labels.clone().unwrap_or_default(),
            annotations,
        })
    }

    pub fn reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            name: self.name.clone(),
            uid: self.uid.clone(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    /// Metadata for a child named `name`, owned by this resource.
    pub fn child_meta(&self, name: impl Into<String>) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.into()),
            namespace: Some(self.namespace.clone()),
            owner_references: Some(vec![self.reference()]),
            ..Default::default()
        }
    }

    /// True when `meta` lists this resource among its owners.
    pub fn owns(&self, meta: &ObjectMeta) -> bool {
        meta.owner_references
            .iter()
            .flatten()
            .any(|r| r.uid == self.uid && r.kind == self.kind)
    }
}

/// One synthesized object.
#[derive(Debug, Clone, PartialEq)]
pub enum ManagedObject {
    Secret(Secret),
    ConfigMap(ConfigMap),
    Service(Service),
    StatefulSet(StatefulSet),
    Standalone(Box<Standalone>),
    SearchHeadCluster(Box<SearchHeadCluster>),
    IndexerCluster(Box<IndexerCluster>),
    LicenseMaster(Box<LicenseMaster>),
    Spark(Box<Spark>),
}

impl ManagedObject {
    pub fn meta(&self) -> &ObjectMeta {
        match self {
            ManagedObject::Secret(o) => &o.metadata,
            ManagedObject::ConfigMap(o) => &o.metadata,
            ManagedObject::Service(o) => &o.metadata,
            ManagedObject::StatefulSet(o) => &o.metadata,
            ManagedObject::Standalone(o) => &o.metadata,
            ManagedObject::SearchHeadCluster(o) => &o.metadata,
            ManagedObject::IndexerCluster(o) => &o.metadata,
            ManagedObject::LicenseMaster(o) => &o.metadata,
            ManagedObject::Spark(o) => &o.metadata,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ManagedObject::Secret(_) => "Secret",
            ManagedObject::ConfigMap(_) => "ConfigMap",
            ManagedObject::Service(_) => "Service",
            ManagedObject::StatefulSet(_) => "StatefulSet",
            ManagedObject::Standalone(_) => "Standalone",
            ManagedObject::SearchHeadCluster(_) => "SearchHeadCluster",
            ManagedObject::IndexerCluster(_) => "IndexerCluster",
            ManagedObject::LicenseMaster(_) => "LicenseMaster",
            ManagedObject::Spark(_) => "Spark",
        }
    }

    pub fn name(&self) -> &str {
        self.meta().name.as_deref().unwrap_or_default()
    }
}

/// Objects in apply order: secrets and config first, workloads last.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectGraph {
    pub objects: Vec<ManagedObject>,
}

impl ObjectGraph {
    pub fn push(&mut self, object: ManagedObject) {
        self.objects.push(object);
    }

    pub fn extend(&mut self, objects: impl IntoIterator<Item = ManagedObject>) {
        self.objects.extend(objects);
    }

    pub fn iter(&self) -> impl Iterator<Item = &ManagedObject> {
        self.objects.iter()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn find(&self, kind: &str, name: &str) -> Option<&ManagedObject> {
        self.objects
            .iter()
            .find(|o| o.kind() == kind && o.name() == name)
    }

    pub fn statefulsets(&self) -> impl Iterator<Item = &StatefulSet> {
        self.objects.iter().filter_map(|o| match o {
            ManagedObject::StatefulSet(s) => Some(s),
            _ => None,
        })
    }
}
