//! Defaulting and validation of resource specs. Nothing here performs I/O.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Affinity, ResourceRequirements, Service, Volume};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use crate::config::ImageDefaults;
use crate::crds::common::{CommonSplunkSpec, DependencyRef, ResourceSpec};
use crate::crds::enterprise::Topology;
use crate::error::{ReconcileError, Result};
use crate::instance::InstanceType;

const PULL_POLICIES: [&str; 3] = ["Always", "IfNotPresent", "Never"];

/// A [`CommonSplunkSpec`] with every default applied and every quantity parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedSpec {
    pub image: String,
    pub image_pull_policy: String,
    pub scheduler_name: String,
    pub affinity: Option<Affinity>,
    pub storage_class_name: Option<String>,
    pub resources: ResourceRequirements,
    pub etc_storage: Quantity,
    pub var_storage: Quantity,
    pub volumes: Vec<Volume>,
    pub defaults: Option<String>,
    pub defaults_url: Option<String>,
    pub license_url: Option<String>,
    pub license_master_ref: Option<DependencyRef>,
    pub license_master_url: Option<String>,
    pub cluster_master_ref: Option<DependencyRef>,
    pub cluster_master_url: Option<String>,
    pub service_template: Option<Service>,
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn set_ref(value: &Option<DependencyRef>) -> Option<DependencyRef> {
    value.clone().filter(DependencyRef::is_set)
}

pub fn validate_common(spec: &CommonSplunkSpec, images: &ImageDefaults) -> Result<ValidatedSpec> {
    let image_pull_policy = validate_pull_policy(spec.image_pull_policy.as_deref())?;
    Ok(ValidatedSpec {
        image: non_empty(&spec.image).unwrap_or_else(|| images.splunk.clone()),
        image_pull_policy,
        scheduler_name: non_empty(&spec.scheduler_name)
            .unwrap_or_else(|| "default-scheduler".into()),
        affinity: spec.affinity.clone(),
        storage_class_name: non_empty(&spec.storage_class_name),
        resources: validate_resources(&spec.resources)?,
        etc_storage: parse_quantity(spec.etc_storage.as_deref(), "1Gi", "etcStorage")?,
        var_storage: parse_quantity(spec.var_storage.as_deref(), "200Gi", "varStorage")?,
        // the schema rejects null where a list is expected
        volumes: spec.volumes.clone().unwrap_or_default(),
        defaults: non_empty(&spec.defaults),
        defaults_url: non_empty(&spec.defaults_url),
        license_url: non_empty(&spec.license_url),
        license_master_ref: set_ref(&spec.license_master_ref),
        license_master_url: non_empty(&spec.license_master_url),
        cluster_master_ref: set_ref(&spec.cluster_master_ref),
        cluster_master_url: non_empty(&spec.cluster_master_url),
        service_template: spec.service_template.clone(),
    })
}

/// CPU and memory requests and limits, defaulting to 0.1/512Mi and 4/8Gi.
pub fn validate_resources(r: &ResourceSpec) -> Result<ResourceRequirements> {
    let requests = BTreeMap::from([
        (
            "cpu".to_string(),
            parse_quantity(r.cpu_request.as_deref(), "0.1", "cpuRequest")?,
        ),
        (
            "memory".to_string(),
            parse_quantity(r.memory_request.as_deref(), "512Mi", "memoryRequest")?,
        ),
    ]);
    let limits = BTreeMap::from([
        (
            "cpu".to_string(),
            parse_quantity(r.cpu_limit.as_deref(), "4", "cpuLimit")?,
        ),
        (
            "memory".to_string(),
            parse_quantity(r.memory_limit.as_deref(), "8Gi", "memoryLimit")?,
        ),
    ]);
    Ok(ResourceRequirements {
        requests: Some(requests),
        limits: Some(limits),
        ..Default::default()
    })
}

pub fn validate_pull_policy(value: Option<&str>) -> Result<String> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok("IfNotPresent".into()),
        Some(v) if PULL_POLICIES.contains(&v) => Ok(v.to_string()),
        Some(v) => Err(ReconcileError::InvalidField {
            field: "imagePullPolicy".into(),
            value: v.to_string(),
        }),
    }
}

/// Replica count after applying the per-type minimum.
pub fn validate_replicas(instance: InstanceType, requested: i32) -> i32 {
    match instance {
        InstanceType::SearchHead => requested.max(3),
        InstanceType::Deployer
        | InstanceType::ClusterMaster
        | InstanceType::LicenseMaster
        | InstanceType::SparkMaster
        | InstanceType::MonitoringConsole => 1,
        _ if requested <= 0 => instance.default_replicas(),
        _ => requested,
    }
}

/// Image used by the compute integration's init container.
pub fn spark_image(requested: &Option<String>, images: &ImageDefaults) -> String {
    non_empty(requested).unwrap_or_else(|| images.spark.clone())
}

/// Top-level sanity rules for a whole-deployment topology.
pub fn validate_topology(topology: &Topology, enable_dfs: bool) -> Result<Topology> {
    if topology.search_heads > 0 && topology.indexers <= 0 {
        return Err(ReconcileError::Topology(
            "you must specify how many indexers the cluster should have".into(),
        ));
    }
    if topology.search_heads <= 0 && topology.indexers > 0 {
        return Err(ReconcileError::Topology(
            "you must specify how many search heads the cluster should have".into(),
        ));
    }

    let mut normalized = topology.clone();
    if normalized.search_heads <= 0 && normalized.indexers <= 0 && normalized.standalones <= 0 {
        normalized.standalones = InstanceType::Standalone.default_replicas();
    }
    if enable_dfs && normalized.spark_workers <= 0 {
        normalized.spark_workers = InstanceType::SparkWorker.default_replicas();
    }
    Ok(normalized)
}

/// Parses a non-negative Kubernetes quantity such as `10Gi`, `0.5`, `250m`
/// or `1e3`, falling back to `default` when unset.
pub fn parse_quantity(value: Option<&str>, default: &str, field: &str) -> Result<Quantity> {
    let raw = value.map(str::trim).filter(|v| !v.is_empty()).unwrap_or(default);
    // capacities and requests are never negative
    if is_quantity(raw) && !raw.starts_with('-') {
        Ok(Quantity(raw.to_string()))
    } else {
        Err(ReconcileError::quantity(field, raw))
    }
}

/// Numeric value of a quantity, so `0.1` and `100m` compare equal.
pub fn quantity_value(s: &str) -> Option<f64> {
    let s = s.trim();
    if !is_quantity(s) {
        return None;
    }
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '+' || c == '-'))
        .unwrap_or(s.len());
    let (number, suffix) = s.split_at(split);
    let number: f64 = number.parse().ok()?;
    // sub-unit suffixes divide so that 100m and 0.1 round identically
    let (mul, div) = match suffix {
        "" => (1.0, 1.0),
        "Ki" => (1024f64, 1.0),
        "Mi" => (1024f64.powi(2), 1.0),
        "Gi" => (1024f64.powi(3), 1.0),
        "Ti" => (1024f64.powi(4), 1.0),
        "Pi" => (1024f64.powi(5), 1.0),
        "Ei" => (1024f64.powi(6), 1.0),
        "n" => (1.0, 1e9),
        "u" => (1.0, 1e6),
        "m" => (1.0, 1e3),
        "k" => (1e3, 1.0),
        "M" => (1e6, 1.0),
        "G" => (1e9, 1.0),
        "T" => (1e12, 1.0),
        "P" => (1e15, 1.0),
        "E" => (1e18, 1.0),
        exp => {
            let e = exp[1..].parse::<i32>().ok()?;
            if e < 0 {
                (1.0, 10f64.powi(-e))
            } else {
                (10f64.powi(e), 1.0)
            }
        }
    };
    Some(number * mul / div)
}

fn is_quantity(s: &str) -> bool {
    let unsigned = s.strip_prefix(['+', '-']).unwrap_or(s);
    let split = unsigned
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(unsigned.len());
    let (number, suffix) = unsigned.split_at(split);

    let mut parts = number.splitn(2, '.');
    let whole = parts.next().unwrap_or("");
    let frac = parts.next();
    if frac.is_some_and(|f| f.contains('.')) || (whole.is_empty() && frac.unwrap_or("").is_empty())
    {
        return false;
    }

    match suffix {
        "" | "Ki" | "Mi" | "Gi" | "Ti" | "Pi" | "Ei" | "n" | "u" | "m" | "k" | "M" | "G" | "T"
        | "P" | "E" => true,
        exp if exp.starts_with(['e', 'E']) => {
            let digits = exp[1..].strip_prefix(['+', '-']).unwrap_or(&exp[1..]);
            !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_kubernetes_quantities() {
        for q in ["1", "0.1", "250m", "10Gi", "1.5Ti", "200G", "1e3", "2E-2", ".5", "5."] {
            assert!(is_quantity(q), "{q}");
        }
        for q in ["", "Gi", "ten", "1.2.3", "10GB", "1e", "1 Gi", "e3"] {
            assert!(!is_quantity(q), "{q}");
        }
    }

    #[test]
    fn quantity_values_compare_across_notations() {
        assert_eq!(quantity_value("0.1"), quantity_value("100m"));
        assert_eq!(quantity_value("1Gi"), Some(1073741824.0));
        assert_eq!(quantity_value("1e3"), quantity_value("1k"));
        assert_eq!(quantity_value("lots"), None);
    }

    #[test]
    fn quantity_errors_name_the_field() {
        let spec = CommonSplunkSpec {
            var_storage: Some("lots".into()),
            ..Default::default()
        };
        let err = validate_common(&spec, &ImageDefaults::default()).unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().starts_with("varStorage:"), "{err}");

        let spec = CommonSplunkSpec {
            resources: ResourceSpec {
                memory_limit: Some("8 gigs".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        let err = validate_common(&spec, &ImageDefaults::default()).unwrap_err();
        assert!(err.to_string().starts_with("memoryLimit:"), "{err}");
    }

    #[test]
    fn negative_quantities_are_rejected() {
        assert!(parse_quantity(Some("-5Gi"), "1Gi", "etcStorage").is_err());
        assert!(parse_quantity(Some("+5Gi"), "1Gi", "etcStorage").is_ok());
        let spec = CommonSplunkSpec {
            resources: ResourceSpec {
                cpu_request: Some("-1".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        let err = validate_common(&spec, &ImageDefaults::default()).unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().starts_with("cpuRequest:"), "{err}");
    }

    #[test]
    fn applies_defaults() {
        let v = validate_common(&CommonSplunkSpec::default(), &ImageDefaults::default()).unwrap();
        assert_eq!(v.image, "splunk/splunk");
        assert_eq!(v.image_pull_policy, "IfNotPresent");
        assert_eq!(v.scheduler_name, "default-scheduler");
        assert_eq!(v.etc_storage, Quantity("1Gi".into()));
        assert_eq!(v.var_storage, Quantity("200Gi".into()));
        assert!(v.volumes.is_empty());
        let requests = v.resources.requests.unwrap();
        assert_eq!(requests["cpu"], Quantity("0.1".into()));
        assert_eq!(requests["memory"], Quantity("512Mi".into()));
    }

    #[test]
    fn blank_strings_and_empty_refs_count_as_unset() {
        let spec = CommonSplunkSpec {
            image: Some("  ".into()),
            defaults: Some(String::new()),
            cluster_master_ref: Some(DependencyRef::default()),
            ..Default::default()
        };
        let v = validate_common(&spec, &ImageDefaults::default()).unwrap();
        assert_eq!(v.image, "splunk/splunk");
        assert!(v.defaults.is_none());
        assert!(v.cluster_master_ref.is_none());
    }

    #[test]
    fn rejects_unknown_pull_policy() {
        assert_eq!(validate_pull_policy(Some("Always")).unwrap(), "Always");
        assert!(validate_pull_policy(Some("Sometimes")).is_err());
    }

    #[test]
    fn replicas_respect_role_minimums() {
        assert_eq!(validate_replicas(InstanceType::SearchHead, 0), 3);
        assert_eq!(validate_replicas(InstanceType::SearchHead, 2), 3);
        assert_eq!(validate_replicas(InstanceType::SearchHead, 5), 5);
        assert_eq!(validate_replicas(InstanceType::Indexer, 0), 1);
        assert_eq!(validate_replicas(InstanceType::Indexer, 4), 4);
        assert_eq!(validate_replicas(InstanceType::Standalone, 0), 1);
        assert_eq!(validate_replicas(InstanceType::Deployer, 7), 1);
    }

    #[test]
    fn search_heads_without_indexers_is_an_error() {
        let t = Topology {
            search_heads: 3,
            ..Default::default()
        };
        let err = validate_topology(&t, false).unwrap_err();
        assert!(err.to_string().contains("indexers"), "{err}");
    }

    #[test]
    fn indexers_without_search_heads_is_an_error() {
        let t = Topology {
            indexers: 3,
            ..Default::default()
        };
        let err = validate_topology(&t, false).unwrap_err();
        assert!(err.to_string().contains("search heads"), "{err}");
    }

    #[test]
    fn empty_topology_becomes_one_standalone() {
        let t = validate_topology(&Topology::default(), false).unwrap();
        assert_eq!(t.standalones, 1);
        assert_eq!(t.spark_workers, 0);

        let t = validate_topology(&Topology::default(), true).unwrap();
        assert_eq!(t.spark_workers, 1);
    }

    #[test]
    fn clustered_topology_is_left_alone() {
        let t = Topology {
            search_heads: 3,
            indexers: 5,
            spark_workers: 2,
            ..Default::default()
        };
        assert_eq!(validate_topology(&t, true).unwrap(), t);
    }
}
