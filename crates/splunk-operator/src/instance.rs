//! Instance types and the naming scheme shared by every synthesized object.

use std::fmt;

/// One tier of a Splunk deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceType {
    Standalone,
    SearchHead,
    Indexer,
    ClusterMaster,
    LicenseMaster,
    Deployer,
    SparkMaster,
    SparkWorker,
    MonitoringConsole,
}

/// A named TCP port exposed by an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamedPort {
    pub name: &'static str,
    pub port: i32,
}

const fn port(name: &'static str, port: i32) -> NamedPort {
    NamedPort { name, port }
}

const BASE_PORTS: [NamedPort; 2] = [port("splunkweb", 8000), port("splunkd", 8089)];
const INGEST_PORTS: [NamedPort; 2] = [port("hec", 8088), port("s2s", 9997)];
const DFC_PORTS: [NamedPort; 3] = [
    port("dfccontrol", 17000),
    port("datareceive", 19000),
    port("dfsmaster", 9000),
];
const SPARK_MASTER_PORTS: [NamedPort; 2] = [port("sparkmaster", 7777), port("sparkwebui", 8009)];
const SPARK_WORKER_PORTS: [NamedPort; 2] =
    [port("workerwebui", 7000), port("dfwreceivedata", 17500)];

/// Port the compute master listens on for workers.
pub const SPARK_MASTER_PORT: i32 = 7777;

/// Static attributes of an instance type.
#[derive(Debug, Clone, Copy)]
pub struct Traits {
    /// Fragment used in generated object names.
    pub short_name: &'static str,
    /// Value of `SPLUNK_ROLE`.
    pub role: &'static str,
    /// Grouping label used for pod anti-affinity.
    pub kind: &'static str,
    /// Receives data directly (HEC and forwarder traffic).
    pub ingests: bool,
    /// Participates in the distributed compute integration.
    pub computes: bool,
}

impl InstanceType {
    pub const ALL: [InstanceType; 9] = [
        InstanceType::Standalone,
        InstanceType::SearchHead,
        InstanceType::Indexer,
        InstanceType::ClusterMaster,
        InstanceType::LicenseMaster,
        InstanceType::Deployer,
        InstanceType::SparkMaster,
        InstanceType::SparkWorker,
        InstanceType::MonitoringConsole,
    ];

    pub const fn traits(self) -> Traits {
        match self {
            InstanceType::Standalone => Traits {
                short_name: "standalone",
                role: "splunk_standalone",
                kind: "standalone",
                ingests: true,
                computes: true,
            },
            InstanceType::SearchHead => Traits {
                short_name: "search-head",
                role: "splunk_search_head",
                kind: "search-head",
                ingests: false,
                computes: true,
            },
            InstanceType::Indexer => Traits {
                short_name: "indexer",
                role: "splunk_indexer",
                kind: "indexer",
                ingests: true,
                computes: false,
            },
            InstanceType::ClusterMaster => Traits {
                short_name: "cluster-master",
                role: "splunk_cluster_master",
                kind: "indexer",
                ingests: false,
                computes: false,
            },
            InstanceType::LicenseMaster => Traits {
                short_name: "license-master",
                role: "splunk_license_master",
                kind: "license-master",
                ingests: false,
                computes: false,
            },
            InstanceType::Deployer => Traits {
                short_name: "deployer",
                role: "splunk_deployer",
                kind: "search-head",
                ingests: false,
                computes: false,
            },
            InstanceType::SparkMaster => Traits {
                short_name: "spark-master",
                role: "splunk_spark_master",
                kind: "spark",
                ingests: false,
                computes: false,
            },
            InstanceType::SparkWorker => Traits {
                short_name: "spark-worker",
                role: "splunk_spark_worker",
                kind: "spark",
                ingests: false,
                computes: false,
            },
            InstanceType::MonitoringConsole => Traits {
                short_name: "monitoring-console",
                role: "splunk_monitor",
                kind: "monitoring-console",
                ingests: false,
                computes: false,
            },
        }
    }

    pub fn short_name(self) -> &'static str {
        self.traits().short_name
    }

    pub fn role(self) -> &'static str {
        self.traits().role
    }

    pub fn kind_label(self) -> &'static str {
        self.traits().kind
    }

    /// Ports exposed by this instance type, sorted by port number.
    pub fn ports(self) -> Vec<NamedPort> {
        let traits = self.traits();
        let mut ports = match self {
            InstanceType::SparkMaster => SPARK_MASTER_PORTS.to_vec(),
            InstanceType::SparkWorker => SPARK_WORKER_PORTS.to_vec(),
            _ => BASE_PORTS.to_vec(),
        };
        if traits.ingests {
            ports.extend(INGEST_PORTS);
        }
        if traits.computes {
            ports.extend(DFC_PORTS);
        }
        ports.sort_by_key(|p| p.port);
        ports
    }

    /// Replica count used when a tier is requested without one.
    pub fn default_replicas(self) -> i32 {
        match self {
            InstanceType::SearchHead => 3,
            _ => 1,
        }
    }
}

impl fmt::Display for InstanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

pub fn statefulset_name(instance: InstanceType, identifier: &str) -> String {
    format!("splunk-{}-{}", identifier, instance)
}

pub fn service_name(instance: InstanceType, identifier: &str, headless: bool) -> String {
    let suffix = if headless { "headless" } else { "service" };
    format!("splunk-{}-{}-{}", identifier, instance, suffix)
}

pub fn secrets_name(identifier: &str, instance: InstanceType) -> String {
    format!("splunk-{}-{}-secrets", identifier, instance)
}

pub fn defaults_name(identifier: &str, instance: InstanceType) -> String {
    format!("splunk-{}-{}-defaults", identifier, instance)
}

pub fn spark_master_service_name(identifier: &str) -> String {
    service_name(InstanceType::SparkMaster, identifier, false)
}

pub fn service_fqdn(namespace: &str, name: &str, cluster_domain: &str) -> String {
    format!("{}.{}.svc.{}", name, namespace, cluster_domain)
}

/// DNS name of one replica, reached through the headless service.
pub fn statefulset_url(
    namespace: &str,
    instance: InstanceType,
    identifier: &str,
    index: i32,
    cluster_domain: &str,
) -> String {
    let pod = format!("{}-{}", statefulset_name(instance, identifier), index);
    let host = format!("{}.{}", pod, service_name(instance, identifier, true));
    service_fqdn(namespace, &host, cluster_domain)
}

/// Comma separated DNS names of every replica.
pub fn statefulset_urls(
    namespace: &str,
    instance: InstanceType,
    identifier: &str,
    replicas: i32,
    cluster_domain: &str,
) -> String {
    (0..replicas)
        .map(|i| statefulset_url(namespace, instance, identifier, i, cluster_domain))
        .collect::<Vec<_>>()
        .join(",")
}
