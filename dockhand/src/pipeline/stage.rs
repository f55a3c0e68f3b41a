//! One step of a deployment

/// A named step with its own log buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    /// Label while the stage is in progress
    pub title: String,

    /// Label once the stage succeeded
    pub success_label: String,

    /// Output lines in arrival order
    pub logs: Vec<String>,

    /// Whether the stage failed
    pub has_error: bool,

    /// Whether the live log pane is shown while the stage runs
    pub captures_logs: bool,
}

impl Stage {
    pub fn new(
        title: impl Into<String>,
        success_label: impl Into<String>,
        captures_logs: bool,
    ) -> Self {
        Self {
            title: title.into(),
            success_label: success_label.into(),
            logs: Vec::new(),
            has_error: false,
            captures_logs,
        }
    }

    /// The last `n` log lines, or all of them when fewer were captured
    pub fn tail(&self, n: usize) -> &[String] {
        let start = self.logs.len().saturating_sub(n);
        &self.logs[start..]
    }
}
