//! Error types for dockhand

use thiserror::Error;

use crate::pipeline::PipelineError;
use crate::remote::RemoteError;
use crate::swap::SwapError;
use crate::tooling::ToolError;

/// Where a failure sits in the deployment lifecycle.
///
/// Drives the user-facing wording and tells the operator whether the
/// remote host could have been touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Nothing remote was mutated yet
    Precondition,

    /// Local build, save or transfer failed; safe to retry the command
    BuildOrTransfer,

    /// Cutover failed and the swap rolled itself back
    Cutover,

    /// The deployment went live but the record could not be written
    Persistence,
}

/// Main error type for dockhand
#[derive(Error, Debug)]
pub enum DockhandError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml_ng::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Connection error: {0}")]
    ConnectionError(RemoteError),

    #[error("Secrets sync failed: {0}")]
    SecretsError(String),

    #[error("Build failed: {0}")]
    BuildError(String),

    #[error("Transfer failed: {0}")]
    TransferError(String),

    #[error("Remote command failed: {0}")]
    RemoteCommandError(RemoteError),

    #[error("{}", describe_cutover(.0))]
    CutoverError(SwapError),

    #[error(
        "Deployment is live but the app record could not be saved (version counter is now stale): {0}"
    )]
    PersistError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Logging setup failed: {0}")]
    LoggingError(String),

    #[error("Cancelled before {0}")]
    Cancelled(String),

    #[error("Pipeline error: {0}")]
    PipelineError(#[from] PipelineError),
}

fn describe_cutover(err: &SwapError) -> String {
    match err {
        SwapError::RollbackFailed { .. } => {
            format!("Cutover failed and the host needs attention: {err}")
        }
        _ => format!("Cutover failed, the previous version is still live: {err}"),
    }
}

impl DockhandError {
    /// Classify the failure
    pub fn kind(&self) -> FailureKind {
        match self {
            DockhandError::SecretsError(_)
            | DockhandError::BuildError(_)
            | DockhandError::TransferError(_)
            | DockhandError::RemoteCommandError(_) => FailureKind::BuildOrTransfer,
            DockhandError::CutoverError(_) => FailureKind::Cutover,
            DockhandError::PersistError(_) => FailureKind::Persistence,
            _ => FailureKind::Precondition,
        }
    }
}

impl From<ToolError> for DockhandError {
    fn from(err: ToolError) -> Self {
        DockhandError::BuildError(err.to_string())
    }
}
