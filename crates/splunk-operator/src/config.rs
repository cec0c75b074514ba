//! Operator settings read from the environment at start-up.

use std::time::Duration;

use anyhow::Context;

const DEFAULT_WORKERS: u16 = 15;
const DEFAULT_PAUSE_RETRY_SECS: u64 = 30;

/// Images used when a resource does not name one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDefaults {
    pub splunk: String,
    pub spark: String,
}

impl Default for ImageDefaults {
    fn default() -> Self {
        Self {
            splunk: "splunk/splunk".into(),
            spark: "splunk/spark".into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OperatorConfig {
    /// Restrict every controller to one namespace.
    pub watch_namespace: Option<String>,
    /// Upper bound on concurrent reconciles across all kinds.
    pub workers: u16,
    /// How long a paused resource waits before it is looked at again.
    pub pause_retry_delay: Duration,
    pub cluster_domain: String,
    pub images: ImageDefaults,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            watch_namespace: None,
            workers: DEFAULT_WORKERS,
            pause_retry_delay: Duration::from_secs(DEFAULT_PAUSE_RETRY_SECS),
            cluster_domain: "cluster.local".into(),
            images: ImageDefaults::default(),
        }
    }
}

impl OperatorConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let workers = match get("OPERATOR_WORKERS") {
            Some(v) => v
                .trim()
                .parse::<u16>()
                .with_context(|| format!("OPERATOR_WORKERS: invalid value {v:?}"))?,
            None => defaults.workers,
        };
        if workers == 0 {
            anyhow::bail!("OPERATOR_WORKERS must be at least 1");
        }
        let pause_retry_delay = match get("PAUSE_RETRY_DELAY_SECS") {
            Some(v) => Duration::from_secs(
                v.trim()
                    .parse::<u64>()
                    .with_context(|| format!("PAUSE_RETRY_DELAY_SECS: invalid value {v:?}"))?,
            ),
            None => defaults.pause_retry_delay,
        };

        Ok(Self {
            watch_namespace: get("WATCH_NAMESPACE"),
            workers,
            pause_retry_delay,
            cluster_domain: get("CLUSTER_DOMAIN").unwrap_or(defaults.cluster_domain),
            images: ImageDefaults {
                splunk: get("RELATED_IMAGE_SPLUNK_ENTERPRISE").unwrap_or(defaults.images.splunk),
                spark: get("RELATED_IMAGE_SPARK").unwrap_or(defaults.images.spark),
            },
        })
    }
}
