use thiserror::Error;

/// Errors that can occur during Kubernetes operations.
#[derive(Debug, Error)]
pub(crate) enum KubernetesError {
    #[error("Failed to connect to Kubernetes API: {message}")]
    ConnectionFailed { message: String },
    #[error("Kubernetes API request failed: {message}")]
    RequestFailed { message: String },
    #[error("Node not found: {node}")]
    NodeNotFound { node: String },
}
