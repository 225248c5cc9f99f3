use std::time::Duration;

use thiserror::Error;

/// Top-level failure of a gpu-sim command.
#[derive(Debug, Error)]
pub(crate) enum ProvisionError {
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },
    #[error("Missing prerequisite: {message}")]
    MissingPrerequisite { message: String },
    #[error("External command failed during {step}")]
    Command { step: &'static str },
    #[error("Kubernetes API failure during {step}")]
    Kubernetes { step: &'static str },
    #[error("No worker nodes found in cluster {cluster}")]
    NoWorkerNodes { cluster: String },
    #[error("{what} not ready within {timeout:?} (waited {elapsed:?})")]
    ReadinessTimeout {
        what: String,
        timeout: Duration,
        elapsed: Duration,
    },
    #[error("Cancelled")]
    Cancelled,
    #[error("Failed to write {path}")]
    Io { path: String },
}

impl ProvisionError {
    /// Process exit code reported for this failure.
    pub(crate) fn exit_code(&self) -> u8 {
        match self {
            ProvisionError::InvalidArgument { .. } => 2,
            ProvisionError::ReadinessTimeout { .. } => 3,
            ProvisionError::Cancelled => 130,
            _ => 1,
        }
    }
}

pub(crate) type ProvisionResult<T> = Result<T, error_stack::Report<ProvisionError>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_has_distinct_exit_code() {
        let timeout = ProvisionError::ReadinessTimeout {
            what: "DaemonSet kube-system/nvidia-device-plugin-daemonset".to_string(),
            timeout: Duration::from_secs(1),
            elapsed: Duration::from_secs(6),
        };
        assert_eq!(timeout.exit_code(), 3);
        assert_eq!(
            ProvisionError::Command {
                step: "cluster create"
            }
            .exit_code(),
            1
        );
        assert!(timeout.to_string().contains("not ready within 1s"));
        assert_eq!(
            ProvisionError::InvalidArgument {
                message: "empty model id".to_string()
            }
            .exit_code(),
            2
        );
    }
}
