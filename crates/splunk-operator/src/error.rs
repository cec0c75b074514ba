use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
    #[error(transparent)]
    Kube(#[from] kube::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
    /// Inconsistent tier counts in a topology.
    #[error("invalid topology: {0}")]
    Topology(String),
    #[error("{field}: unable to parse quantity {value:?}")]
    Quantity { field: String, value: String },
    #[error("{field}: unsupported value {value:?}")]
    InvalidField { field: String, value: String },
    #[error("{kind} is missing metadata.{field}")]
    MissingMetadata { kind: String, field: &'static str },
    #[error("{kind} {namespace}/{name} already exists")]
    AlreadyExists {
        kind: String,
        namespace: String,
        name: String,
    },
    /// A substrate call failed for one managed object.
    #[error("unable to apply {kind} {namespace}/{name}: {source}")]
    Apply {
        kind: String,
        namespace: String,
        name: String,
        #[source]
        source: Box<ReconcileError>,
    },
}

pub type Result<T, E = ReconcileError> = std::result::Result<T, E>;

impl ReconcileError {
    /// Errors caused by the resource's own spec. Retrying them only helps once
    /// the user edits the resource, so they are surfaced on its status.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ReconcileError::Topology(_)
                | ReconcileError::Quantity { .. }
                | ReconcileError::InvalidField { .. }
        )
    }

    pub(crate) fn apply(kind: &str, namespace: &str, name: &str, source: ReconcileError) -> Self {
        ReconcileError::Apply {
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
            source: Box::new(source),
        }
    }

    pub(crate) fn quantity(field: &str, value: &str) -> Self {
        ReconcileError::Quantity {
            field: field.to_string(),
            value: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantity_error_names_field() {
        let err = ReconcileError::quantity("etcStorage", "ten gigs");
        assert_eq!(
            err.to_string(),
            "etcStorage: unable to parse quantity \"ten gigs\""
        );
        assert!(err.is_validation());
    }

    #[test]
    fn substrate_errors_are_not_validation() {
        let err = ReconcileError::AlreadyExists {
            kind: "Secret".into(),
            namespace: "default".into(),
            name: "splunk-a-standalone-secrets".into(),
        };
        assert!(!err.is_validation());
        assert!(!ReconcileError::Anyhow(anyhow::anyhow!("boom")).is_validation());
    }

    #[test]
    fn apply_error_names_the_object() {
        let err = ReconcileError::apply(
            "StatefulSet",
            "splunk",
            "splunk-a-standalone",
            ReconcileError::Anyhow(anyhow::anyhow!("connection reset")),
        );
        assert_eq!(
            err.to_string(),
            "unable to apply StatefulSet splunk/splunk-a-standalone: connection reset"
        );
        assert!(!err.is_validation());
        assert!(std::error::Error::source(&err).is_some());
    }
}
