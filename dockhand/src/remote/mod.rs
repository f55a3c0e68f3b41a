//! Remote command execution
//!
//! A [`RemoteSession`] runs shell commands on the target host. Each call
//! gets its own channel and its own stdout/stderr streams, delivered line
//! by line while the command runs. [`RemoteSessionExt`] layers the common
//! "run and collect" and "run and relay into the pipeline" patterns on top.

pub mod ssh;
pub mod transfer;

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::pipeline::EventSink;
use crate::workers::relay::spawn_channel_relay;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("could not connect: {0}")]
    Connection(String),

    #[error("host key for {host} does not match the known key; refusing to connect")]
    HostKeyMismatch { host: String },

    #[error("connection lost: {last_stderr}")]
    ConnectionLost { last_stderr: String },

    #[error("remote command failed (exit {exit_code}): {last_stderr}")]
    CommandFailed {
        exit_code: i32,
        last_stderr: String,
        stderr: Vec<String>,
    },
}

impl RemoteError {
    /// Last stderr line captured for the failure, if any
    pub fn last_stderr(&self) -> Option<&str> {
        match self {
            RemoteError::ConnectionLost { last_stderr }
            | RemoteError::CommandFailed { last_stderr, .. } => {
                Some(last_stderr.as_str()).filter(|s| !s.is_empty())
            }
            _ => None,
        }
    }
}

/// Classify the end of a remote process from its exit code and stderr
///
/// 255 is the OpenSSH transport failure code; a missing code means the
/// client was killed by a signal.
pub fn classify_exit(
    host: &str,
    exit_code: Option<i32>,
    stderr: Vec<String>,
) -> Result<(), RemoteError> {
    let last_stderr = stderr
        .iter()
        .rev()
        .find(|l| !l.trim().is_empty())
        .map(|l| l.trim().to_string())
        .unwrap_or_default();

    match exit_code {
        Some(0) => Ok(()),
        Some(255) | None => {
            if stderr.iter().any(|l| is_host_key_mismatch(l)) {
                return Err(RemoteError::HostKeyMismatch {
                    host: host.to_string(),
                });
            }
            Err(RemoteError::ConnectionLost { last_stderr })
        }
        Some(code) => Err(RemoteError::CommandFailed {
            exit_code: code,
            last_stderr,
            stderr,
        }),
    }
}

pub(crate) fn is_host_key_mismatch(line: &str) -> bool {
    line.contains("REMOTE HOST IDENTIFICATION HAS CHANGED")
        || line.contains("Host key verification failed")
}

/// A shell command for the remote host
///
/// Secret environment values are fed through the command's stdin and read
/// into the environment by the remote shell, so they never appear in a
/// process argument list, in `Display` output or in logs.
#[derive(Clone)]
pub struct RemoteCommand {
    script: String,
    secret_env: Vec<(String, Arc<SecretString>)>,
}

impl RemoteCommand {
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            secret_env: Vec::new(),
        }
    }

    /// Export `name` with a secret value for the duration of the command
    pub fn with_secret_env(mut self, name: impl Into<String>, value: Arc<SecretString>) -> Self {
        self.secret_env.push((name.into(), value));
        self
    }

    /// The command as written, without the secret preamble
    pub fn script(&self) -> &str {
        &self.script
    }

    pub fn has_secrets(&self) -> bool {
        !self.secret_env.is_empty()
    }

    /// The full shell line sent to the host
    pub fn render(&self) -> String {
        let mut line = String::new();
        for (name, _) in &self.secret_env {
            line.push_str(&format!("IFS= read -r {name} && export {name} && "));
        }
        line.push_str(&self.script);
        line
    }

    /// Bytes to write to the command's stdin, one secret per line
    pub fn stdin_payload(&self) -> Option<SecretString> {
        if self.secret_env.is_empty() {
            return None;
        }
        let mut payload = String::new();
        for (_, value) in &self.secret_env {
            payload.push_str(value.expose_secret());
            payload.push('\n');
        }
        Some(SecretString::from(payload))
    }
}

impl fmt::Display for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.script)
    }
}

impl fmt::Debug for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.secret_env.iter().map(|(n, _)| n.as_str()).collect();
        f.debug_struct("RemoteCommand")
            .field("script", &self.script)
            .field("secret_env", &names)
            .finish()
    }
}

impl From<&str> for RemoteCommand {
    fn from(script: &str) -> Self {
        Self::new(script)
    }
}

impl From<String> for RemoteCommand {
    fn from(script: String) -> Self {
        Self::new(script)
    }
}

/// A running remote command
///
/// Both streams close when the command's output ends; `completion`
/// resolves once the exit status is known, after both streams closed.
#[derive(Debug)]
pub struct RemoteExecution {
    pub stdout: mpsc::UnboundedReceiver<String>,
    pub stderr: mpsc::UnboundedReceiver<String>,
    completion: oneshot::Receiver<Result<(), RemoteError>>,
}

impl RemoteExecution {
    pub fn new(
        stdout: mpsc::UnboundedReceiver<String>,
        stderr: mpsc::UnboundedReceiver<String>,
        completion: oneshot::Receiver<Result<(), RemoteError>>,
    ) -> Self {
        Self {
            stdout,
            stderr,
            completion,
        }
    }

    /// Wait for the exit status, ignoring any output not yet drained
    pub async fn wait(self) -> Result<(), RemoteError> {
        wait_completion(self.completion).await
    }

    /// Split into the two streams and the completion handle
    pub fn into_parts(
        self,
    ) -> (
        mpsc::UnboundedReceiver<String>,
        mpsc::UnboundedReceiver<String>,
        oneshot::Receiver<Result<(), RemoteError>>,
    ) {
        (self.stdout, self.stderr, self.completion)
    }
}

async fn wait_completion(
    completion: oneshot::Receiver<Result<(), RemoteError>>,
) -> Result<(), RemoteError> {
    completion.await.unwrap_or_else(|_| {
        Err(RemoteError::ConnectionLost {
            last_stderr: "remote execution ended without an exit status".to_string(),
        })
    })
}

/// Output collected from a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

impl CommandOutput {
    /// Stdout joined back into text
    pub fn stdout_text(&self) -> String {
        self.stdout.join("\n")
    }

    /// Non-empty stdout lines, trimmed
    pub fn stdout_lines(&self) -> impl Iterator<Item = &str> {
        self.stdout
            .iter()
            .map(|l| l.trim())
            .filter(|l| !l.is_empty())
    }
}

/// One authenticated connection to the target host
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Start `command` on its own channel
    async fn exec(&self, command: RemoteCommand) -> Result<RemoteExecution, RemoteError>;

    /// Tear the connection down
    async fn close(&self) -> Result<(), RemoteError> {
        Ok(())
    }
}

#[async_trait]
pub trait RemoteSessionExt: RemoteSession {
    /// Run to completion and collect both streams
    async fn run(&self, command: RemoteCommand) -> Result<CommandOutput, RemoteError> {
        debug!("Remote: {}", command);
        let (mut stdout_rx, mut stderr_rx, completion) = self.exec(command).await?.into_parts();

        let collect_stdout = async {
            let mut lines = Vec::new();
            while let Some(line) = stdout_rx.recv().await {
                lines.push(line);
            }
            lines
        };
        let collect_stderr = async {
            let mut lines = Vec::new();
            while let Some(line) = stderr_rx.recv().await {
                lines.push(line);
            }
            lines
        };
        let (stdout, stderr) = tokio::join!(collect_stdout, collect_stderr);

        wait_completion(completion).await?;
        Ok(CommandOutput { stdout, stderr })
    }

    /// Run to completion while relaying both streams into the pipeline
    ///
    /// Relays are independent tasks; this returns as soon as the exit
    /// status is known, possibly before the last lines were relayed.
    async fn run_relayed(&self, command: RemoteCommand, sink: &EventSink) -> Result<(), RemoteError> {
        debug!("Remote (relayed): {}", command);
        let (stdout_rx, stderr_rx, completion) = self.exec(command).await?.into_parts();
        spawn_channel_relay(stdout_rx, sink.clone());
        spawn_channel_relay(stderr_rx, sink.clone());
        wait_completion(completion).await
    }
}

impl<T: RemoteSession + ?Sized> RemoteSessionExt for T {}

/// Copies local files to the target host
#[async_trait]
pub trait FileTransfer: Send + Sync {
    /// Copy `local` to `remote`, a path relative to the remote home
    async fn upload(&self, local: &Path, remote: &str) -> Result<(), RemoteError>;
}

/// Everything a driver needs from an established connection
#[derive(Clone)]
pub struct Connection {
    pub session: Arc<dyn RemoteSession>,
    pub transfer: Arc<dyn FileTransfer>,
}

/// Establishes connections to the target host
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Connection, RemoteError>;
}
