//! Local tooling the drivers shell out to
//!
//! Each tool sits behind a trait so drivers can be exercised without
//! docker, sops or git installed.

pub mod docker;
pub mod git;
pub mod process;
pub mod sops;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::pipeline::EventSink;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("failed to launch {program}: {message}")]
    Spawn { program: String, message: String },

    #[error("{program} failed ({}): {last_line}", describe_exit(.exit_code))]
    Failed {
        program: String,
        exit_code: Option<i32>,
        last_line: String,
    },

    #[error("{0}")]
    Io(String),
}

fn describe_exit(exit_code: &Option<i32>) -> String {
    match exit_code {
        Some(code) => format!("exit {code}"),
        None => "killed by signal".to_string(),
    }
}

impl From<std::io::Error> for ToolError {
    fn from(err: std::io::Error) -> Self {
        ToolError::Io(err.to_string())
    }
}

/// Builds and serialises container images
#[async_trait]
pub trait ContainerTool: Send + Sync {
    /// Build the image in `context` under every tag in `tags`
    async fn build(&self, context: &Path, tags: &[String], sink: &EventSink)
        -> Result<(), ToolError>;

    /// Write every image in `refs` into one tar archive at `output`
    async fn save(&self, refs: &[String], output: &Path, sink: &EventSink)
        -> Result<(), ToolError>;
}

/// Encrypts env files to a public key
#[async_trait]
pub trait SecretEncryptor: Send + Sync {
    async fn encrypt(&self, input: &Path, public_key: &str, output: &Path)
        -> Result<(), ToolError>;
}

/// Source control queries used by preview deploys
#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Whether the working tree has no uncommitted changes
    async fn is_clean(&self, dir: &Path) -> Result<bool, ToolError>;

    /// Short hash of the checked out commit
    async fn short_hash(&self, dir: &Path) -> Result<String, ToolError>;
}

/// The set of local tools a driver uses
#[derive(Clone)]
pub struct Toolkit {
    pub containers: Arc<dyn ContainerTool>,
    pub encryptor: Arc<dyn SecretEncryptor>,
    pub vcs: Arc<dyn SourceControl>,
}

impl Toolkit {
    /// The real command line tools found on `PATH`
    pub fn system() -> Self {
        Self {
            containers: Arc::new(docker::DockerCli::new()),
            encryptor: Arc::new(sops::SopsEncryptor::new()),
            vcs: Arc::new(git::GitCli::new()),
        }
    }
}
