//! Error types for coverkube workflows

use std::time::Duration;

use thiserror::Error;

use crate::models::ResourceKind;

/// Result alias used across the library
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the gateway, the waiter and the workflows
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The target resource does not exist
    #[error("{kind} {name} not found")]
    NotFound { kind: ResourceKind, name: String },

    /// A resource with the same name already exists
    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: ResourceKind, name: String },

    /// Optimistic concurrency check failed on update
    #[error("{kind} {name} was modified concurrently: {message}")]
    Conflict {
        kind: ResourceKind,
        name: String,
        message: String,
    },

    /// A wait loop exceeded its deadline
    #[error("timed out after {timeout:?} waiting for {description}")]
    Timeout {
        description: String,
        timeout: Duration,
    },

    /// No storage class carries the default-class annotation
    #[error("no default storage class found in the cluster")]
    NoDefaultStorageClass,

    /// Collect was called before Init provisioned the claim
    #[error("persistent volume claim {claim} not found in namespace {namespace}, did you run `coverkube init`?")]
    StorageNotProvisioned { namespace: String, claim: String },

    /// The artifact copy out of the collector pod failed
    #[error("failed to extract coverage data: {0}")]
    ExtractionFailed(String),

    /// The target workload cannot be instrumented
    #[error("invalid workload {name}: {reason}")]
    InvalidWorkload { name: String, reason: String },

    /// Invalid input such as an unsupported label selector
    #[error("validation error: {0}")]
    Validation(String),

    /// The operation was aborted through its cancellation token
    #[error("operation cancelled")]
    Cancelled,

    /// Settings could not be loaded
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Local filesystem error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create an invalid-workload error
    pub fn invalid_workload(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidWorkload {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create an extraction error with the given message
    pub fn extraction(msg: impl Into<String>) -> Self {
        Self::ExtractionFailed(msg.into())
    }

    /// Translate a kube-rs error for a specific resource into the taxonomy.
    ///
    /// 404 becomes `NotFound`, 409 with reason `AlreadyExists` becomes
    /// `AlreadyExists`, any other 409 becomes `Conflict`. Everything else is
    /// wrapped unchanged.
    pub fn from_kube(err: kube::Error, kind: ResourceKind, name: &str) -> Self {
        match err {
            kube::Error::Api(ae) if ae.code == 404 => Self::NotFound {
                kind,
                name: name.to_string(),
            },
            kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
                Self::AlreadyExists {
                    kind,
                    name: name.to_string(),
                }
            }
            kube::Error::Api(ae) if ae.code == 409 => Self::Conflict {
                kind,
                name: name.to_string(),
                message: ae.message,
            },
            other => Self::Kube(other),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    /// Errors worth polling through: throttling and server-side hiccups
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Kube(kube::Error::Api(ae)) => matches!(ae.code, 429 | 500 | 502 | 503 | 504),
            Self::Kube(kube::Error::HyperError(_)) => true,
            _ => false,
        }
    }
}
