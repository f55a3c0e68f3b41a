//! File transfer over the session's control master

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::remote::ssh::{detach_from_terminal, SshClient};
use crate::remote::{classify_exit, FileTransfer, RemoteError};

/// Copies files with `scp`, reusing the ssh control socket
#[derive(Debug, Clone)]
pub struct ScpTransfer {
    client: SshClient,
}

impl ScpTransfer {
    pub fn new(client: SshClient) -> Self {
        Self { client }
    }

    fn command(&self, local: &Path, remote: &str) -> Command {
        let mut cmd = Command::new("scp");
        detach_from_terminal(&mut cmd);
        cmd.arg("-C").arg("-q");
        self.client.apply_options(&mut cmd);
        cmd.arg("-P")
            .arg(self.client.target.port.to_string())
            .arg(local)
            .arg(format!("{}:{}", self.client.target.destination(), remote));
        cmd
    }
}

#[async_trait]
impl FileTransfer for ScpTransfer {
    async fn upload(&self, local: &Path, remote: &str) -> Result<(), RemoteError> {
        info!("Uploading {} to {}", local.display(), remote);
        let output = self
            .command(local, remote)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| RemoteError::Connection(format!("failed to launch scp: {e}")))?;

        let stderr: Vec<String> = String::from_utf8_lossy(&output.stderr)
            .lines()
            .map(str::to_string)
            .collect();
        classify_exit(&self.client.target.host, output.status.code(), stderr)?;
        debug!("Uploaded {}", local.display());
        Ok(())
    }
}
