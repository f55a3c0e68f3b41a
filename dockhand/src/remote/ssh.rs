//! OpenSSH-backed remote session
//!
//! One control master per target carries every command as its own channel.
//! Host keys are trusted on first use and rejected when they change.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::remote::transfer::ScpTransfer;
use crate::remote::{
    classify_exit, is_host_key_mismatch, Connection, Connector, RemoteCommand, RemoteError,
    RemoteExecution, RemoteSession,
};
use crate::storage::settings::Settings;
use crate::utils::sha256_hash;
use crate::workers::relay::pump_lines;

/// Where and as whom to connect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub host: String,
    pub user: String,
    pub port: u16,
    pub identity_file: Option<PathBuf>,
}

impl SshTarget {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            host: settings.server_address.clone(),
            user: settings.ssh_user.clone(),
            port: settings.ssh_port,
            identity_file: settings.identity_file.clone(),
        }
    }

    /// `user@host`
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

/// Connection tuning
#[derive(Debug, Clone)]
pub struct SshConfig {
    pub connect_timeout: Duration,
    pub control_persist: Duration,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            control_persist: Duration::from_secs(300),
        }
    }
}

/// Options shared by every ssh and scp invocation against one target
#[derive(Debug, Clone)]
pub struct SshClient {
    pub target: SshTarget,
    pub control_path: PathBuf,
    pub config: SshConfig,
}

impl SshClient {
    pub fn new(target: SshTarget, control_dir: &Path, config: SshConfig) -> Self {
        let control_path = control_path_for_target(control_dir, &target);
        Self {
            target,
            control_path,
            config,
        }
    }

    /// Apply the options common to ssh and scp; the port flag differs
    /// between the two and is left to the caller
    pub fn apply_options(&self, cmd: &mut Command) {
        cmd.arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg("StrictHostKeyChecking=accept-new")
            .arg("-o")
            .arg(format!(
                "ConnectTimeout={}",
                self.config.connect_timeout.as_secs()
            ))
            .arg("-o")
            .arg(format!("ControlPath={}", self.control_path.display()));
        if let Some(identity) = &self.target.identity_file {
            cmd.arg("-i").arg(identity);
        }
    }

    fn ssh(&self) -> Command {
        let mut cmd = Command::new("ssh");
        detach_from_terminal(&mut cmd);
        self.apply_options(&mut cmd);
        cmd.arg("-p").arg(self.target.port.to_string());
        cmd
    }

    async fn master_active(&self) -> bool {
        if !self.control_path.exists() {
            return false;
        }
        let mut cmd = self.ssh();
        cmd.arg("-O")
            .arg("check")
            .arg(self.target.destination())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        cmd.status().await.map(|s| s.success()).unwrap_or(false)
    }

    async fn spawn_master(&self) -> Result<(), RemoteError> {
        let mut cmd = self.ssh();
        cmd.arg("-o")
            .arg("ControlMaster=yes")
            .arg("-o")
            .arg(format!(
                "ControlPersist={}s",
                self.config.control_persist.as_secs()
            ))
            .arg("-N")
            .arg("-f")
            .arg(self.target.destination())
            .stdin(Stdio::null());

        let output = cmd
            .output()
            .await
            .map_err(|e| RemoteError::Connection(format!("failed to launch ssh: {e}")))?;
        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.lines().any(is_host_key_mismatch) {
            return Err(RemoteError::HostKeyMismatch {
                host: self.target.host.clone(),
            });
        }
        let message = stderr.trim();
        Err(RemoteError::Connection(if message.is_empty() {
            format!("ssh to {} failed", self.target.destination())
        } else {
            message.to_string()
        }))
    }
}

/// Socket path for a target; hashed so it stays short and unique
fn control_path_for_target(control_dir: &Path, target: &SshTarget) -> PathBuf {
    let id = format!("{}@{}:{}", target.user, target.host, target.port);
    let hash = sha256_hash(id.as_bytes());
    control_dir.join(format!("ssh-{}", &hash[..16]))
}

/// Opens the control master and hands out sessions bound to it
#[derive(Debug, Clone)]
pub struct SshConnector {
    client: SshClient,
}

impl SshConnector {
    pub fn new(target: SshTarget, control_dir: &Path, config: SshConfig) -> Self {
        Self {
            client: SshClient::new(target, control_dir, config),
        }
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(&self) -> Result<Connection, RemoteError> {
        if let Some(dir) = self.client.control_path.parent() {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                RemoteError::Connection(format!(
                    "failed to create control directory {}: {e}",
                    dir.display()
                ))
            })?;
        }

        if self.client.master_active().await {
            debug!("Reusing ssh control master for {}", self.client.target.destination());
        } else {
            info!(
                "Opening ssh control master to {}:{}",
                self.client.target.destination(),
                self.client.target.port
            );
            self.client.spawn_master().await?;
        }

        let session = SshSession::new(self.client.clone());
        let transfer = ScpTransfer::new(self.client.clone());
        Ok(Connection {
            session: Arc::new(session),
            transfer: Arc::new(transfer),
        })
    }
}

/// Runs each command as a separate ssh client over the control master
#[derive(Debug, Clone)]
pub struct SshSession {
    client: SshClient,
}

impl SshSession {
    pub fn new(client: SshClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn exec(&self, command: RemoteCommand) -> Result<RemoteExecution, RemoteError> {
        debug!(
            "ssh {}: {}{}",
            self.client.target.destination(),
            command,
            if command.has_secrets() { " (secret env on stdin)" } else { "" }
        );

        let payload = command.stdin_payload();
        let mut cmd = self.client.ssh();
        cmd.arg("-T")
            .arg(self.client.target.destination())
            .arg(command.render())
            .stdin(if payload.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| RemoteError::Connection(format!("failed to launch ssh: {e}")))?;

        if let Some(payload) = payload {
            let mut stdin = child.stdin.take().ok_or_else(|| {
                RemoteError::Connection("failed to open ssh stdin".to_string())
            })?;
            stdin
                .write_all(payload.expose_secret().as_bytes())
                .await
                .map_err(|e| RemoteError::ConnectionLost {
                    last_stderr: format!("failed to write command input: {e}"),
                })?;
            drop(stdin);
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RemoteError::Connection("failed to capture ssh stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| RemoteError::Connection("failed to capture ssh stderr".to_string()))?;

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (err_tx, err_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = oneshot::channel();

        let out_task = tokio::spawn(pump_lines(stdout, out_tx));
        let err_task = tokio::spawn(pump_lines(stderr, err_tx));
        let host = self.client.target.host.clone();

        tokio::spawn(async move {
            let _ = out_task.await;
            let stderr_lines = err_task.await.unwrap_or_default();
            let result = match child.wait().await {
                Ok(status) => classify_exit(&host, status.code(), stderr_lines),
                Err(e) => Err(RemoteError::ConnectionLost {
                    last_stderr: format!("failed to wait on ssh: {e}"),
                }),
            };
            if let Err(e) = &result {
                debug!("Remote command ended with error: {}", e);
            }
            let _ = done_tx.send(result);
        });

        Ok(RemoteExecution::new(out_rx, err_rx, done_rx))
    }

    async fn close(&self) -> Result<(), RemoteError> {
        let mut cmd = self.client.ssh();
        cmd.arg("-O")
            .arg("exit")
            .arg(self.client.target.destination())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        match cmd.status().await {
            Ok(status) if status.success() => {
                debug!("Closed ssh control master");
                Ok(())
            }
            Ok(_) => {
                warn!("ssh control master was already gone");
                Ok(())
            }
            Err(e) => Err(RemoteError::Connection(format!(
                "failed to stop control master: {e}"
            ))),
        }
    }
}

/// Keep the terminal's Ctrl+C away from ssh and scp
///
/// A cancelled run still lets the remote commands it already started
/// finish, so they must not share the foreground process group.
pub(crate) fn detach_from_terminal(cmd: &mut Command) {
    #[cfg(unix)]
    cmd.process_group(0);
}
