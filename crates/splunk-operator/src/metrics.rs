//! Reconcile counters.

use std::sync::atomic::{AtomicU64, Ordering};

pub const RECONCILE_TOTAL: &str = "splunk_operator_reconcile_total";
pub const RECONCILE_ERRORS_TOTAL: &str = "splunk_operator_reconcile_errors_total";

pub trait MetricsSink: Send + Sync {
    fn reconcile_started(&self, kind: &str, namespace: &str, name: &str);
    fn reconcile_failed(&self, kind: &str, namespace: &str, name: &str);
}

/// Forwards to whatever `metrics` recorder the process installed.
#[derive(Debug, Default, Clone, Copy)]
pub struct RecorderSink;

impl MetricsSink for RecorderSink {
    fn reconcile_started(&self, kind: &str, namespace: &str, name: &str) {
        metrics::counter!(
            RECONCILE_TOTAL,
            "kind" => kind.to_string(),
            "namespace" => namespace.to_string(),
            "name" => name.to_string()
        )
        .increment(1);
    }

    fn reconcile_failed(&self, kind: &str, namespace: &str, name: &str) {
        metrics::counter!(
            RECONCILE_ERRORS_TOTAL,
            "kind" => kind.to_string(),
            "namespace" => namespace.to_string(),
            "name" => name.to_string()
        )
        .increment(1);
    }
}

/// In-process totals, handy in tests.
#[derive(Debug, Default)]
pub struct CountingSink {
    pub started: AtomicU64,
    pub failed: AtomicU64,
}

impl CountingSink {
    pub fn started(&self) -> u64 {
        self.started.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

impl MetricsSink for CountingSink {
    fn reconcile_started(&self, _kind: &str, _namespace: &str, _name: &str) {
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    fn reconcile_failed(&self, _kind: &str, _namespace: &str, _name: &str) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }
}
