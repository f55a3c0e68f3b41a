//! Typed pipeline events and the shared sink workers send them through

use std::time::Duration;

use tokio::sync::mpsc;

/// Everything a worker can tell the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    /// One line of output for the active stage
    Log(String),

    /// The active stage failed
    Error(Option<String>),

    /// The active stage succeeded, move to the next one
    Advance,

    /// The whole run succeeded
    AllDone { duration: Duration, url: String },

    /// The operator asked to stop
    Cancel,
}

/// Cloneable producer side of the event channel
///
/// The channel is unbounded so a slow render loop never stalls a subprocess
/// and no line is ever dropped. Sends after the loop has gone away are
/// silently discarded.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<PipelineEvent>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<PipelineEvent>) -> Self {
        Self { tx }
    }

    /// Create a sink and the receiver the render loop consumes
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<PipelineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn send(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }

    pub fn log(&self, line: impl Into<String>) {
        self.send(PipelineEvent::Log(line.into()));
    }

    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        self.send(PipelineEvent::Error(
            (!message.is_empty()).then_some(message),
        ));
    }

    pub fn advance(&self) {
        self.send(PipelineEvent::Advance);
    }

    pub fn all_done(&self, duration: Duration, url: impl Into<String>) {
        self.send(PipelineEvent::AllDone {
            duration,
            url: url.into(),
        });
    }

    pub fn cancel(&self) {
        self.send(PipelineEvent::Cancel);
    }

    /// Whether the render loop is still listening
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
