// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InjectorError {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Cluster operation failed: {0}")]
    Cluster(#[from] ClusterError),

    #[error("Invalid desired state: {0}")]
    Validation(String),

    #[error("Failed to render templates: {0}")]
    Render(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invariant violated: {0}")]
    Invariant(String),

    #[error("Apply incomplete: {0}")]
    Incomplete(String),

    #[error("Reconciliation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Reconciliation canceled")]
    Canceled,
}

impl InjectorError {
    /// Permanent errors are not retried until the custom resource changes.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            InjectorError::Validation(_) | InjectorError::Render(_) | InjectorError::Invariant(_)
        )
    }
}

/// Outcome of a single cluster API call, classified for the retry policy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClusterError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("invalid: {0}")]
    Invalid(String),

    #[error("kind {0} is not managed by this operator")]
    UnsupportedKind(String),

    #[error("object {0} exists and is not owned by this instance")]
    OwnershipConflict(String),

    #[error("transient: {0}")]
    Transient(String),
}

impl ClusterError {
    /// Conflicts and transient failures are retried with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClusterError::Conflict(_) | ClusterError::Transient(_) | ClusterError::AlreadyExists(_)
        )
    }
}

impl From<kube::Error> for ClusterError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(resp) => {
                let message = resp.message.clone();
                match resp.code {
                    404 => ClusterError::NotFound(message),
                    409 if resp.reason == "AlreadyExists" => ClusterError::AlreadyExists(message),
                    409 => ClusterError::Conflict(message),
                    401 | 403 => ClusterError::Forbidden(message),
                    400 | 422 => ClusterError::Invalid(message),
                    408 | 429 | 500..=599 => {
                        ClusterError::Transient(format!("{} ({})", message, resp.code))
                    }
                    // Other client errors do not go away by retrying
                    400..=499 => ClusterError::Invalid(format!("{} ({})", message, resp.code)),
                    _ => ClusterError::Transient(format!("{} ({})", message, resp.code)),
                }
            }
            other => ClusterError::Transient(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, InjectorError>;
