use common::CodecError;
use thiserror::Error;

/// Startup configuration errors (fatal)
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} must be set (root DNS domain used to build Service hostnames)")]
    MissingRootDomain(&'static str),

    #[error("invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },

    #[error("invalid cluster address {address:?}: {reason}")]
    InvalidClusterAddress { address: String, reason: String },

    #[error("unable to discover cluster configuration: {0}")]
    Discovery(String),
}

/// Errors surfaced by a [`ServiceApi`](crate::apis::service::client::ServiceApi)
#[derive(Error, Debug)]
pub enum ApiError {
    /// The write raced another writer (stale resourceVersion)
    #[error("conflicting update: {0}")]
    Conflict(String),

    #[error("update rejected: {0}")]
    Rejected(String),

    #[error("watch unavailable: {0}")]
    WatchUnavailable(String),

    #[error("Kubernetes error: {0}")]
    Kubernetes(#[from] kube::Error),

    #[error("watch stream error: {0}")]
    Watch(#[from] kube::runtime::watcher::Error),
}

impl ApiError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, ApiError::Conflict(_))
    }
}

/// Per-event reconciliation errors (recoverable, logged by the watcher)
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("failed to encode proxy configuration for {namespace}/{name}: {source}")]
    Encode {
        namespace: String,
        name: String,
        #[source]
        source: CodecError,
    },

    #[error("invalid proxy configuration annotation on {namespace}/{name}: {source}")]
    InvalidConfiguration {
        namespace: String,
        name: String,
        #[source]
        source: CodecError,
    },

    #[error("failed to persist {namespace}/{name}: {source}")]
    Persist {
        namespace: String,
        name: String,
        #[source]
        source: ApiError,
    },
}

impl ReconcileError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, ReconcileError::Persist { source, .. } if source.is_conflict())
    }

    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            ReconcileError::Encode { .. } => "encode_error",
            ReconcileError::InvalidConfiguration { .. } => "invalid_configuration",
            ReconcileError::Persist { source, .. } if source.is_conflict() => "conflict",
            ReconcileError::Persist { .. } => "persist_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_classification() {
        let err = ReconcileError::Persist {
            namespace: "prod".to_string(),
            name: "api".to_string(),
            source: ApiError::Conflict("resourceVersion mismatch".to_string()),
        };
        assert!(err.is_conflict());
        assert_eq!(err.kind(), "conflict");

        let err = ReconcileError::Persist {
            namespace: "prod".to_string(),
            name: "api".to_string(),
            source: ApiError::Rejected("forbidden".to_string()),
        };
        assert!(!err.is_conflict());
        assert_eq!(err.kind(), "persist_error");
    }

    #[test]
    fn test_error_messages_name_the_service() {
        let err = ReconcileError::Persist {
            namespace: "prod".to_string(),
            name: "api".to_string(),
            source: ApiError::Rejected("forbidden".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "failed to persist prod/api: update rejected: forbidden"
        );
    }
}
