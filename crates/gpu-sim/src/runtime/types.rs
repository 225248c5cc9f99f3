use thiserror::Error;

/// Errors raised while running external programs.
#[derive(Debug, Error)]
pub(crate) enum RuntimeError {
    #[error("Failed to spawn `{command}`")]
    Spawn { command: String },
    #[error("Command `{command}` failed with exit code {code:?}: {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("No supported container runtime found on PATH (tried: {tried})")]
    NoRuntime { tried: String },
}
