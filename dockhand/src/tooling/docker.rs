//! Docker CLI adapter

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::info;

use crate::pipeline::EventSink;
use crate::tooling::process::run_streaming;
use crate::tooling::{ContainerTool, ToolError};

/// Target platform of every image built for the host
pub const TARGET_PLATFORM: &str = "linux/amd64";

#[derive(Debug, Clone)]
pub struct DockerCli {
    program: String,
}

impl DockerCli {
    pub fn new() -> Self {
        Self {
            program: "docker".to_string(),
        }
    }

    fn build_command(&self, context: &Path, tags: &[String]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("build");
        for tag in tags {
            cmd.arg("--tag").arg(tag);
        }
        cmd.arg("--progress=plain")
            .arg(format!("--platform={TARGET_PLATFORM}"))
            .arg(context);
        cmd
    }

    fn save_command(&self, refs: &[String], output: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("save").arg("-o").arg(output).args(refs);
        cmd
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerTool for DockerCli {
    async fn build(
        &self,
        context: &Path,
        tags: &[String],
        sink: &EventSink,
    ) -> Result<(), ToolError> {
        info!("Building {} from {}", tags.join(", "), context.display());
        run_streaming(self.build_command(context, tags), Some(sink)).await?;
        Ok(())
    }

    async fn save(
        &self,
        refs: &[String],
        output: &Path,
        sink: &EventSink,
    ) -> Result<(), ToolError> {
        info!("Saving {} to {}", refs.join(", "), output.display());
        run_streaming(self.save_command(refs, output), Some(sink)).await?;
        Ok(())
    }
}
