//! Diagnostic log of failed stages
//!
//! Append-only and kept in the project directory so a failure can be read
//! after the live display is gone.

use chrono::{DateTime, Local};

use crate::errors::DockhandError;
use crate::filesys::file::File;

/// Full log of one failed stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageLog {
    /// Zero-based stage index
    pub index: usize,
    pub title: String,
    pub logs: Vec<String>,
}

impl StageLog {
    /// Render the log block, headed by `at`
    pub fn format(&self, at: DateTime<Local>) -> String {
        let mut out = format!(
            "\n=== STAGE {} ERROR LOG - {} ===\n",
            self.index + 1,
            at.format("%Y-%m-%d %H:%M:%S")
        );
        out.push_str(&format!("Stage: {}\n", self.title));
        out.push_str("=== LOGS START ===\n");
        if self.logs.is_empty() {
            out.push_str("(the stage produced no output)\n");
        }
        for line in &self.logs {
            out.push_str(line);
            if !line.ends_with('\n') {
                out.push('\n');
            }
        }
        out.push_str("=== LOGS END ===\n\n");
        out
    }
}

/// Append `log` to the diagnostic file
///
/// A stage that failed without output still gets its header, since the
/// failure frame points the operator at this file.
pub async fn write_stage_log(file: &File, log: &StageLog) -> Result<(), DockhandError> {
    file.append_string(&log.format(Local::now())).await
}
