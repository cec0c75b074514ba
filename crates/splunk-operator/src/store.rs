use std::fmt::Debug;

use async_trait::async_trait;
use kube::api::{Patch, PatchParams, PostParams};
use kube::core::NamespaceResourceScope;
use kube::{Api, Client, Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{ReconcileError, Result};

pub const FIELD_MANAGER: &str = "splunk-operator";

/// A namespaced object the operator reads or writes.
pub trait Object:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<T> Object for T where
    T: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// The operations reconciliation needs from the API server.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    async fn get<K: Object>(&self, namespace: &str, name: &str) -> Result<Option<K>>;

    /// Fails with [`ReconcileError::AlreadyExists`] when the name is taken.
    async fn create<K: Object>(&self, obj: &K) -> Result<K>;

    /// Writes `obj`, which must carry the resourceVersion it was read at.
    async fn replace<K: Object>(&self, obj: &K) -> Result<K>;

    async fn patch_status<K: Object>(
        &self,
        namespace: &str,
        name: &str,
        status: serde_json::Value,
    ) -> Result<()>;
}

fn namespace_of<K: Object>(obj: &K) -> Result<String> {
    obj.namespace().ok_or_else(|| ReconcileError::MissingMetadata {
        kind: K::kind(&()).to_string(),
        field: "namespace",
    })
}

#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K: Object>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get<K: Object>(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        Ok(self.api::<K>(namespace).get_opt(name).await?)
    }

    async fn create<K: Object>(&self, obj: &K) -> Result<K> {
        let ns = namespace_of(obj)?;
        match self.api::<K>(&ns).create(&PostParams::default(), obj).await {
            Ok(created) => Ok(created),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Err(ReconcileError::AlreadyExists {
                kind: K::kind(&()).to_string(),
                namespace: ns,
                name: obj.name_any(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn replace<K: Object>(&self, obj: &K) -> Result<K> {
        let ns = namespace_of(obj)?;
        Ok(self
            .api::<K>(&ns)
            .replace(&obj.name_any(), &PostParams::default(), obj)
            .await?)
    }

    async fn patch_status<K: Object>(
        &self,
        namespace: &str,
        name: &str,
        status: serde_json::Value,
    ) -> Result<()> {
        let pp = PatchParams::apply(FIELD_MANAGER);
        let _ = self
            .api::<K>(namespace)
            .patch_status(name, &pp, &Patch::Merge(serde_json::json!({ "status": status })))
            .await?;
        Ok(())
    }
}
