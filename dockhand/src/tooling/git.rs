//! git queries

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::tooling::process::run_quiet;
use crate::tooling::{SourceControl, ToolError};

#[derive(Debug, Clone)]
pub struct GitCli {
    program: String,
}

impl GitCli {
    pub fn new() -> Self {
        Self {
            program: "git".to_string(),
        }
    }

    fn command(&self, dir: &Path, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.current_dir(dir).args(args);
        cmd
    }
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceControl for GitCli {
    async fn is_clean(&self, dir: &Path) -> Result<bool, ToolError> {
        let output = run_quiet(self.command(dir, &["status", "--porcelain"])).await?;
        let clean = output.stdout.iter().all(|l| l.trim().is_empty());
        debug!("Working tree at {} clean: {}", dir.display(), clean);
        Ok(clean)
    }

    async fn short_hash(&self, dir: &Path) -> Result<String, ToolError> {
        let output = run_quiet(self.command(dir, &["rev-parse", "--short", "HEAD"])).await?;
        output
            .stdout
            .iter()
            .map(|l| l.trim())
            .find(|l| !l.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ToolError::Io("git rev-parse printed no commit hash".to_string()))
    }
}
