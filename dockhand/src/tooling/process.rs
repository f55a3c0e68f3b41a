//! Running local subprocesses with live output

use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::pipeline::EventSink;
use crate::tooling::ToolError;
use crate::workers::relay::{pump_lines, spawn_channel_relay};

/// Everything a finished process printed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

impl ProcessOutput {
    /// Last non-blank line, preferring stderr
    pub fn last_line(&self) -> String {
        let last = |lines: &[String]| {
            lines
                .iter()
                .rev()
                .find(|l| !l.trim().is_empty())
                .map(|l| l.trim().to_string())
        };
        last(&self.stderr)
            .or_else(|| last(&self.stdout))
            .unwrap_or_default()
    }
}

fn program_name(cmd: &Command) -> String {
    cmd.as_std().get_program().to_string_lossy().to_string()
}

/// Run `cmd` to completion
///
/// Both output streams are relayed into `sink` line by line while the
/// process runs, and collected for the caller. A non-zero exit becomes
/// [`ToolError::Failed`] carrying the last line printed.
pub async fn run_streaming(
    mut cmd: Command,
    sink: Option<&EventSink>,
) -> Result<ProcessOutput, ToolError> {
    let program = program_name(&cmd);
    debug!("Running {:?}", cmd.as_std());

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(|e| ToolError::Spawn {
        program: program.clone(),
        message: e.to_string(),
    })?;

    let stdout = child.stdout.take().ok_or_else(|| ToolError::Spawn {
        program: program.clone(),
        message: "stdout not captured".to_string(),
    })?;
    let stderr = child.stderr.take().ok_or_else(|| ToolError::Spawn {
        program: program.clone(),
        message: "stderr not captured".to_string(),
    })?;

    let (out_tx, out_rx) = tokio::sync::mpsc::unbounded_channel();
    let (err_tx, err_rx) = tokio::sync::mpsc::unbounded_channel();
    if let Some(sink) = sink {
        spawn_channel_relay(out_rx, sink.clone());
        spawn_channel_relay(err_rx, sink.clone());
    }

    let (stdout, stderr) = tokio::join!(pump_lines(stdout, out_tx), pump_lines(stderr, err_tx));
    let status = child.wait().await?;
    let output = ProcessOutput { stdout, stderr };

    if !status.success() {
        warn!("{} exited with {:?}", program, status.code());
        return Err(ToolError::Failed {
            program,
            exit_code: status.code(),
            last_line: output.last_line(),
        });
    }

    Ok(output)
}

/// Run `cmd` to completion without relaying its output
pub async fn run_quiet(cmd: Command) -> Result<ProcessOutput, ToolError> {
    run_streaming(cmd, None).await
}
