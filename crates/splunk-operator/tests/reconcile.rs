use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Secret;
use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use serde_json::Value;
use splunk_operator::config::OperatorConfig;
use splunk_operator::controller::{Context, error_policy, paused_annotation, reconcile};
use splunk_operator::crds::common::{DependencyRef, Phase};
use splunk_operator::crds::enterprise::{SplunkEnterprise, SplunkEnterpriseSpec, Topology};
use splunk_operator::crds::indexer::{IndexerCluster, IndexerClusterSpec};
use splunk_operator::crds::search_head::{SearchHeadCluster, SearchHeadClusterSpec};
use splunk_operator::crds::spark::Spark;
use splunk_operator::crds::standalone::{Standalone, StandaloneSpec};
use splunk_operator::error::{ReconcileError, Result};
use splunk_operator::metrics::CountingSink;
use splunk_operator::secrets::{self, SeededSource};
use splunk_operator::store::{Object, ObjectStore};

const NS: &str = "splunk";

type Key = (String, String, String);

/// In-memory API server: objects are kept as JSON, like the real thing.
#[derive(Default)]
struct FakeStore {
    objects: Mutex<BTreeMap<Key, Value>>,
    creates: AtomicUsize,
    replaces: AtomicUsize,
    status_patches: AtomicUsize,
    uids: AtomicUsize,
    /// Makes every `replace` fail, like an unreachable API server.
    fail_replace: AtomicBool,
}

fn key<K: Object>(namespace: &str, name: &str) -> Key {
    (K::kind(&()).to_string(), namespace.to_string(), name.to_string())
}

fn conflict(msg: &str) -> ReconcileError {
    ReconcileError::Anyhow(anyhow::anyhow!("{msg}"))
}

impl FakeStore {
    fn insert<K: Object>(&self, obj: &K) {
        let k = key::<K>(&obj.namespace().unwrap(), &obj.name_any());
        self.objects
            .lock()
            .unwrap()
            .insert(k, serde_json::to_value(obj).unwrap());
    }

    fn fetch<K: Object>(&self, name: &str) -> Option<K> {
        let objects = self.objects.lock().unwrap();
        objects
            .get(&key::<K>(NS, name))
            .map(|v| serde_json::from_value(v.clone()).unwrap())
    }

    fn writes(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
            + self.replaces.load(Ordering::SeqCst)
            + self.status_patches.load(Ordering::SeqCst)
    }

    fn kinds(&self) -> Vec<(String, String)> {
        let objects = self.objects.lock().unwrap();
        objects.keys().map(|(k, _, n)| (k.clone(), n.clone())).collect()
    }

    fn values(&self) -> Vec<Value> {
        self.objects.lock().unwrap().values().cloned().collect()
    }
}

#[async_trait]
impl ObjectStore for FakeStore {
    async fn get<K: Object>(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        let objects = self.objects.lock().unwrap();
        match objects.get(&key::<K>(namespace, name)) {
            Some(v) => Ok(Some(serde_json::from_value(v.clone())?)),
            None => Ok(None),
        }
    }

    async fn create<K: Object>(&self, obj: &K) -> Result<K> {
        let namespace = obj.namespace().unwrap_or_default();
        let k = key::<K>(&namespace, &obj.name_any());
        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(&k) {
            return Err(ReconcileError::AlreadyExists {
                kind: k.0,
                namespace,
                name: k.2,
            });
        }
        let mut created = obj.clone();
        let n = self.uids.fetch_add(1, Ordering::SeqCst);
        let meta = created.meta_mut();
        meta.uid.get_or_insert_with(|| format!("uid-{n}"));
        meta.resource_version = Some("1".into());
        objects.insert(k, serde_json::to_value(&created)?);
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(created)
    }

    async fn replace<K: Object>(&self, obj: &K) -> Result<K> {
        if self.fail_replace.load(Ordering::SeqCst) {
            return Err(conflict("connection reset by peer"));
        }
        let k = key::<K>(&obj.namespace().unwrap_or_default(), &obj.name_any());
        let mut objects = self.objects.lock().unwrap();
        let current = objects.get(&k).ok_or_else(|| conflict("not found"))?;
        let version = current["metadata"]["resourceVersion"]
            .as_str()
            .unwrap_or("0")
            .to_string();
        if obj.meta().resource_version.as_deref() != Some(version.as_str()) {
            return Err(conflict("stale resourceVersion"));
        }
        let mut updated = obj.clone();
        let next = version.parse::<u64>().unwrap_or(0) + 1;
        updated.meta_mut().resource_version = Some(next.to_string());
        objects.insert(k, serde_json::to_value(&updated)?);
        self.replaces.fetch_add(1, Ordering::SeqCst);
        Ok(updated)
    }

    async fn patch_status<K: Object>(
        &self,
        namespace: &str,
        name: &str,
        status: Value,
    ) -> Result<()> {
        let mut objects = self.objects.lock().unwrap();
        let current = objects
            .get_mut(&key::<K>(namespace, name))
            .ok_or_else(|| conflict("not found"))?;
        current["status"] = status;
        self.status_patches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Harness {
    ctx: Arc<Context<FakeStore>>,
    metrics: Arc<CountingSink>,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(OperatorConfig::default())
    }

    fn with_config(config: OperatorConfig) -> Self {
        let metrics = Arc::new(CountingSink::default());
        let ctx = Arc::new(Context::new(
            FakeStore::default(),
            config,
            metrics.clone(),
            Arc::new(SeededSource::new(42)),
        ));
        Self { ctx, metrics }
    }

    fn store(&self) -> &FakeStore {
        &self.ctx.store
    }

    async fn reconcile<K>(&self, obj: &K) -> Result<Action>
    where
        K: splunk_operator::controller::SplunkResource,
    {
        reconcile(Arc::new(obj.clone()), self.ctx.clone()).await
    }
}

fn standalone(name: &str, spec: StandaloneSpec) -> Standalone {
    let mut s = Standalone::new(name, spec);
    s.metadata.namespace = Some(NS.into());
    s.metadata.uid = Some(format!("uid-{name}"));
    s.metadata.generation = Some(1);
    s
}

fn indexer_cluster(name: &str, replicas: i32) -> IndexerCluster {
    let mut idx = IndexerCluster::new(
        name,
        IndexerClusterSpec {
            replicas,
            ..Default::default()
        },
    );
    idx.metadata.namespace = Some(NS.into());
    idx.metadata.uid = Some(format!("uid-{name}"));
    idx.metadata.generation = Some(1);
    idx
}

/// Every object except `owner_name` itself must be owned by `uid`.
fn assert_all_owned(store: &FakeStore, owner_name: &str, uid: &str) {
    for value in store.values() {
        if value["metadata"]["name"] == owner_name {
            continue;
        }
        assert_eq!(
            value["metadata"]["ownerReferences"][0]["uid"], uid,
            "{}",
            value["metadata"]["name"]
        );
    }
}

fn secret_of(store: &FakeStore, name: &str) -> Secret {
    store.fetch::<Secret>(name).expect("secret")
}

#[tokio::test]
async fn missing_resource_is_not_an_error() {
    let h = Harness::new();
    let action = h
        .reconcile(&standalone("gone", StandaloneSpec::default()))
        .await
        .unwrap();
    assert_eq!(action, Action::await_change());
    assert_eq!(h.store().writes(), 0);
}

#[tokio::test]
async fn first_pass_creates_every_object_with_an_owner() {
    let h = Harness::new();
    let s = standalone("s1", StandaloneSpec::default());
    h.store().insert(&s);

    let action = h.reconcile(&s).await.unwrap();
    assert_eq!(action, Action::requeue(Duration::from_secs(300)));
    assert_eq!(
        h.store().kinds(),
        vec![
            ("Secret".to_string(), "splunk-s1-standalone-secrets".to_string()),
            ("Service".to_string(), "splunk-s1-standalone-headless".to_string()),
            ("Service".to_string(), "splunk-s1-standalone-service".to_string()),
            ("Standalone".to_string(), "s1".to_string()),
            ("StatefulSet".to_string(), "splunk-s1-standalone".to_string()),
        ]
    );
    for value in h.store().values() {
        if value["kind"] == "Standalone" {
            continue;
        }
        assert_eq!(value["metadata"]["ownerReferences"][0]["uid"], "uid-s1");
        assert_eq!(value["metadata"]["ownerReferences"][0]["controller"], true);
    }

    let status = h.store().fetch::<Standalone>("s1").unwrap().status.unwrap();
    assert_eq!(status.phase, Phase::Pending);
    assert_eq!(status.replicas, 1);
    assert!(status.last_transition_time.is_some());
    assert_eq!(h.metrics.started(), 1);
}

#[tokio::test]
async fn second_pass_changes_nothing() {
    let h = Harness::new();
    let s = standalone("s1", StandaloneSpec::default());
    h.store().insert(&s);
    h.reconcile(&s).await.unwrap();
    let password = secrets::secret_value(
        &secret_of(h.store(), "splunk-s1-standalone-secrets"),
        secrets::PASSWORD,
    );

    let writes = h.store().writes();
    h.reconcile(&s).await.unwrap();
    assert_eq!(h.store().writes(), writes);
    assert_eq!(
        secrets::secret_value(
            &secret_of(h.store(), "splunk-s1-standalone-secrets"),
            secrets::PASSWORD
        ),
        password
    );
}

#[tokio::test]
async fn drifted_child_is_put_back() {
    let h = Harness::new();
    let s = standalone("s1", StandaloneSpec::default());
    h.store().insert(&s);
    h.reconcile(&s).await.unwrap();

    let mut sts = h.store().fetch::<StatefulSet>("splunk-s1-standalone").unwrap();
    sts.spec.as_mut().unwrap().replicas = Some(5);
    h.store().insert(&sts);

    h.reconcile(&s).await.unwrap();
    let sts = h.store().fetch::<StatefulSet>("splunk-s1-standalone").unwrap();
    assert_eq!(sts.spec.unwrap().replicas, Some(1));
    assert_eq!(h.store().replaces.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn paused_resource_is_left_alone() {
    let h = Harness::new();
    let mut s = standalone("s1", StandaloneSpec::default());
    s.annotations_mut()
        .insert(paused_annotation("Standalone"), "true".into());
    h.store().insert(&s);

    let action = h.reconcile(&s).await.unwrap();
    assert_eq!(action, Action::requeue(Duration::from_secs(30)));
    assert_eq!(h.store().writes(), 0);
    assert_eq!(h.store().kinds().len(), 1);
}

#[tokio::test]
async fn invalid_spec_fails_and_is_reported() {
    let h = Harness::new();
    let mut spec = StandaloneSpec::default();
    spec.common.var_storage = Some("a lot".into());
    let s = standalone("s1", spec);
    h.store().insert(&s);

    let err = h.reconcile(&s).await.unwrap_err();
    assert!(err.is_validation());
    assert_eq!(h.metrics.failed(), 1);
    assert_eq!(h.store().creates.load(Ordering::SeqCst), 0);

    let status = h.store().fetch::<Standalone>("s1").unwrap().status.unwrap();
    assert_eq!(status.phase, Phase::Error);
    assert!(status.message.unwrap().contains("varStorage"));
}

#[tokio::test]
async fn existing_secret_values_survive() {
    let h = Harness::new();
    let s = standalone("s1", StandaloneSpec::default());
    h.store().insert(&s);

    let mut existing = Secret::default();
    existing.metadata.name = Some("splunk-s1-standalone-secrets".into());
    existing.metadata.namespace = Some(NS.into());
    existing.metadata.resource_version = Some("7".into());
    existing.data = Some(BTreeMap::from([(
        secrets::PASSWORD.to_string(),
        k8s_openapi::ByteString(b"hunter2hunter2".to_vec()),
    )]));
    h.store().insert(&existing);

    h.reconcile(&s).await.unwrap();
    let secret = secret_of(h.store(), "splunk-s1-standalone-secrets");
    assert_eq!(
        secrets::secret_value(&secret, secrets::PASSWORD).as_deref(),
        Some(b"hunter2hunter2".as_slice())
    );
    assert!(secrets::secret_value(&secret, secrets::HEC_TOKEN).is_some());
    let yml = secrets::secret_value(&secret, secrets::DEFAULT_YML).unwrap();
    assert!(String::from_utf8(yml).unwrap().contains("hunter2hunter2"));
}

#[tokio::test]
async fn standalone_joins_the_indexer_cluster_secret() {
    let h = Harness::new();
    let idx = indexer_cluster("idx", 2);
    h.store().insert(&idx);
    h.reconcile(&idx).await.unwrap();

    let mut spec = StandaloneSpec::default();
    spec.common.cluster_master_ref = Some(DependencyRef::new("idx"));
    let s = standalone("s1", spec);
    h.store().insert(&s);
    h.reconcile(&s).await.unwrap();

    let cluster = secrets::secret_value(
        &secret_of(h.store(), "splunk-idx-indexer-secrets"),
        secrets::IDXC_SECRET,
    );
    let joined = secrets::secret_value(
        &secret_of(h.store(), "splunk-s1-standalone-secrets"),
        secrets::IDXC_SECRET,
    );
    assert!(cluster.is_some());
    assert_eq!(cluster, joined);
}

#[tokio::test]
async fn enterprise_creates_children_and_waits_for_them() {
    let h = Harness::new();
    let mut e = SplunkEnterprise::new(
        "acme",
        SplunkEnterpriseSpec {
            topology: Topology {
                search_heads: 3,
                indexers: 3,
                ..Default::default()
            },
            ..Default::default()
        },
    );
    e.metadata.namespace = Some(NS.into());
    e.metadata.uid = Some("uid-acme".into());
    h.store().insert(&e);

    h.reconcile(&e).await.unwrap();
    let idx = h.store().fetch::<IndexerCluster>("acme").unwrap();
    assert_eq!(idx.spec.replicas, 3);
    assert_eq!(idx.owner_references()[0].uid, "uid-acme");

    let status = h.store().fetch::<SplunkEnterprise>("acme").unwrap().status.unwrap();
    assert_eq!(status.phase, Phase::Pending);
    assert_eq!(status.topology.map(|t| t.search_heads), Some(3));

    // the child is reconciled by its own controller
    h.reconcile(&idx).await.unwrap();
    assert!(h
        .store()
        .fetch::<StatefulSet>("splunk-acme-cluster-master")
        .is_some());
}

#[tokio::test]
async fn invalid_topology_is_reported_on_the_parent() {
    let h = Harness::new();
    let mut e = SplunkEnterprise::new(
        "acme",
        SplunkEnterpriseSpec {
            topology: Topology {
                indexers: 3,
                ..Default::default()
            },
            ..Default::default()
        },
    );
    e.metadata.namespace = Some(NS.into());
    e.metadata.uid = Some("uid-acme".into());
    h.store().insert(&e);

    assert!(h.reconcile(&e).await.is_err());
    let status = h.store().fetch::<SplunkEnterprise>("acme").unwrap().status.unwrap();
    assert_eq!(status.phase, Phase::Error);
    assert!(status.message.unwrap().contains("search heads"));
    assert_eq!(h.store().kinds().len(), 1);
}

#[tokio::test]
async fn failed_write_names_the_object() {
    let h = Harness::new();
    let s = standalone("s1", StandaloneSpec::default());
    h.store().insert(&s);
    h.reconcile(&s).await.unwrap();

    let mut sts = h.store().fetch::<StatefulSet>("splunk-s1-standalone").unwrap();
    sts.spec.as_mut().unwrap().replicas = Some(4);
    h.store().insert(&sts);
    h.store().fail_replace.store(true, Ordering::SeqCst);

    let err = h.reconcile(&s).await.unwrap_err();
    assert!(!err.is_validation());
    let message = err.to_string();
    assert!(message.contains("StatefulSet"), "{message}");
    assert!(message.contains("splunk/splunk-s1-standalone"), "{message}");
    assert!(message.contains("connection reset by peer"), "{message}");
    assert!(matches!(err, ReconcileError::Apply { .. }));
}

#[tokio::test]
async fn deleted_resource_forgets_its_failures() {
    let h = Harness::new();
    let s = Arc::new(standalone("gone", StandaloneSpec::default()));
    error_policy(s.clone(), &conflict("boom"), h.ctx.clone());
    error_policy(s.clone(), &conflict("boom"), h.ctx.clone());
    assert_eq!(h.ctx.failures.len(), 1);

    let action = h.reconcile(&*s).await.unwrap();
    assert_eq!(action, Action::await_change());
    assert!(h.ctx.failures.is_empty());

    // a later failure starts the backoff from the beginning again
    let action = error_policy(s, &conflict("boom"), h.ctx.clone());
    assert_eq!(action, Action::requeue(Duration::from_secs(5)));
}

#[tokio::test]
async fn reconciles_of_every_kind_share_one_worker_bound() {
    let h = Harness::with_config(OperatorConfig {
        workers: 1,
        ..Default::default()
    });
    let idx = indexer_cluster("idx", 2);
    h.store().insert(&idx);

    // stands in for a reconcile of another kind holding the only worker
    let permit = h.ctx.workers.clone().acquire_owned().await.unwrap();
    let blocked = tokio::time::timeout(Duration::from_millis(100), h.reconcile(&idx)).await;
    assert!(blocked.is_err());
    assert_eq!(h.store().writes(), 0);
    assert_eq!(h.metrics.started(), 0);

    drop(permit);
    tokio::time::timeout(Duration::from_secs(5), h.reconcile(&idx))
        .await
        .expect("reconcile should run once the worker is free")
        .unwrap();
    assert!(h.store().fetch::<StatefulSet>("splunk-idx-indexer").is_some());
    assert_eq!(h.ctx.workers.available_permits(), 1);
}

#[tokio::test]
async fn search_head_cluster_converges_in_one_pass() {
    let h = Harness::new();
    let mut shc = SearchHeadCluster::new(
        "sh",
        SearchHeadClusterSpec {
            replicas: 3,
            ..Default::default()
        },
    );
    shc.metadata.namespace = Some(NS.into());
    shc.metadata.uid = Some("uid-sh".into());
    shc.metadata.generation = Some(1);
    h.store().insert(&shc);

    h.reconcile(&shc).await.unwrap();
    let secrets: Vec<_> = h
        .store()
        .kinds()
        .into_iter()
        .filter(|(kind, _)| kind == "Secret")
        .collect();
    assert_eq!(
        secrets,
        vec![("Secret".to_string(), "splunk-sh-search-head-secrets".to_string())]
    );
    for name in ["splunk-sh-search-head", "splunk-sh-deployer"] {
        let sts = h.store().fetch::<StatefulSet>(name).unwrap();
        let pod = sts.spec.unwrap().template.spec.unwrap();
        let secret_volume = pod
            .volumes
            .iter()
            .flatten()
            .find_map(|v| v.secret.as_ref())
            .and_then(|s| s.secret_name.clone());
        assert_eq!(secret_volume.as_deref(), Some("splunk-sh-search-head-secrets"), "{name}");
    }
    assert_all_owned(h.store(), "sh", "uid-sh");

    let writes = h.store().writes();
    h.reconcile(&shc).await.unwrap();
    assert_eq!(h.store().writes(), writes);
}

#[tokio::test]
async fn indexer_cluster_converges_in_one_pass() {
    let h = Harness::new();
    let idx = indexer_cluster("idx", 3);
    h.store().insert(&idx);

    h.reconcile(&idx).await.unwrap();
    let kinds = h.store().kinds();
    for expected in [
        ("Secret", "splunk-idx-indexer-secrets"),
        ("StatefulSet", "splunk-idx-cluster-master"),
        ("StatefulSet", "splunk-idx-indexer"),
        ("Service", "splunk-idx-cluster-master-service"),
        ("Service", "splunk-idx-indexer-headless"),
    ] {
        assert!(
            kinds.contains(&(expected.0.to_string(), expected.1.to_string())),
            "{expected:?}"
        );
    }
    assert_eq!(kinds.iter().filter(|(kind, _)| kind == "Secret").count(), 1);
    let indexers = h.store().fetch::<StatefulSet>("splunk-idx-indexer").unwrap();
    assert_eq!(indexers.spec.unwrap().replicas, Some(3));
    assert_all_owned(h.store(), "idx", "uid-idx");

    let writes = h.store().writes();
    h.reconcile(&idx).await.unwrap();
    assert_eq!(h.store().writes(), writes);
}

#[tokio::test]
async fn dfs_topology_runs_a_compute_tier() {
    let h = Harness::new();
    let mut e = SplunkEnterprise::new(
        "acme",
        SplunkEnterpriseSpec {
            topology: Topology {
                search_heads: 3,
                indexers: 3,
                spark_workers: 2,
                ..Default::default()
            },
            enable_dfs: true,
            ..Default::default()
        },
    );
    e.metadata.namespace = Some(NS.into());
    e.metadata.uid = Some("uid-acme".into());
    h.store().insert(&e);
    h.reconcile(&e).await.unwrap();

    let spark = h.store().fetch::<Spark>("acme").unwrap();
    assert_eq!(spark.spec.replicas, 2);
    assert_eq!(spark.owner_references()[0].uid, "uid-acme");

    h.reconcile(&spark).await.unwrap();
    let workers = h.store().fetch::<StatefulSet>("splunk-acme-spark-worker").unwrap();
    assert_eq!(workers.spec.unwrap().replicas, Some(2));
    assert!(h.store().fetch::<StatefulSet>("splunk-acme-spark-master").is_some());

    // the host search heads are told about now exists
    let shc = h.store().fetch::<SearchHeadCluster>("acme").unwrap();
    h.reconcile(&shc).await.unwrap();
    let search_heads = h.store().fetch::<StatefulSet>("splunk-acme-search-head").unwrap();
    let pod = search_heads.spec.unwrap().template.spec.unwrap();
    let master_host = pod.containers[0]
        .env
        .iter()
        .flatten()
        .find(|v| v.name == "SPARK_MASTER_HOST")
        .and_then(|v| v.value.clone())
        .unwrap();
    assert!(
        h.store()
            .kinds()
            .contains(&("Service".to_string(), master_host.clone())),
        "{master_host}"
    );
}
