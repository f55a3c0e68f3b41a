//! The render loop
//!
//! Owns the [`Pipeline`] and is the only consumer of the event channel.
//! Workers never touch the pipeline; everything arrives here in channel
//! order and is drawn after each event or spinner tick.

use std::future::Future;
use std::io::Write;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::errors::DockhandError;
use crate::filesys::file::File;
use crate::pipeline::diagnostics::{write_stage_log, StageLog};
use crate::pipeline::event::PipelineEvent;
use crate::pipeline::live_region::LiveRegion;
use crate::pipeline::machine::{Effect, Pipeline, RunOutcome};
use crate::pipeline::render::Renderer;

/// Spinner frame interval
pub const TICK_INTERVAL: Duration = Duration::from_millis(120);

pub struct RenderLoop<W: Write> {
    pipeline: Pipeline,
    renderer: Renderer,
    region: LiveRegion,
    out: W,
    diagnostic_log: File,
    tick_interval: Duration,
}

impl<W: Write> RenderLoop<W> {
    pub fn new(pipeline: Pipeline, renderer: Renderer, out: W, diagnostic_log: File) -> Self {
        Self {
            pipeline,
            renderer,
            region: LiveRegion::new(),
            out,
            diagnostic_log,
            tick_interval: TICK_INTERVAL,
        }
    }

    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    /// Consume events until the pipeline is terminal
    ///
    /// `cancel` resolving marks the run cancelled and returns at once; the
    /// worker is not touched here. A closed channel before any terminal
    /// event is treated as a failure of the active stage.
    pub async fn run<C>(
        mut self,
        mut events: mpsc::UnboundedReceiver<PipelineEvent>,
        cancel: C,
    ) -> Result<(RunOutcome, Pipeline), DockhandError>
    where
        C: Future<Output = ()>,
    {
        tokio::pin!(cancel);
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut failed_stage: Option<StageLog> = None;

        self.draw()?;

        while !self.pipeline.is_terminal() {
            tokio::select! {
                event = events.recv() => {
                    let event = event.unwrap_or_else(|| {
                        warn!("Event channel closed before the run finished");
                        PipelineEvent::Error(Some(
                            "deployment worker stopped unexpectedly".to_string(),
                        ))
                    });
                    debug!("Pipeline event: {:?}", event);
                    match self.pipeline.apply(event) {
                        Ok(Effect::PersistStageLog(log)) => failed_stage = Some(log),
                        Ok(Effect::None) => {}
                        Err(e) => error!("Pipeline error: {}", e),
                    }
                }
                _ = &mut cancel => {
                    info!("Run cancelled by operator");
                    let _ = self.pipeline.apply(PipelineEvent::Cancel);
                }
                _ = ticker.tick() => {
                    self.pipeline.tick();
                }
            }
            self.draw()?;
        }

        if let Some(log) = failed_stage {
            if let Err(e) = write_stage_log(&self.diagnostic_log, &log).await {
                error!(
                    "Failed to write diagnostic log {}: {}",
                    self.diagnostic_log.path().display(),
                    e
                );
            }
        }

        let outcome = self.pipeline.outcome().unwrap_or(RunOutcome::Cancelled);
        info!("Run finished: {:?}", outcome);
        Ok((outcome, self.pipeline))
    }

    fn draw(&mut self) -> Result<(), DockhandError> {
        let frame = self.renderer.render(&self.pipeline);
        self.region.update(&mut self.out, &frame)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::event::EventSink;
    use crate::pipeline::render::Theme;
    use crate::pipeline::stage::Stage;

    fn pipeline() -> Pipeline {
        Pipeline::new(
            "Deploying api",
            vec![
                Stage::new("Connecting", "Connected", false),
                Stage::new("Building", "Built", true),
            ],
        )
        .unwrap()
    }

    fn render_loop(dir: &std::path::Path) -> RenderLoop<Vec<u8>> {
        RenderLoop::new(
            pipeline(),
            Renderer::new(Theme::plain(), 80, "dockhand.logs.txt"),
            Vec::new(),
            File::new(dir.join("dockhand.logs.txt")),
        )
    }

    #[tokio::test]
    async fn test_runs_to_all_done() {
        let dir = tempfile::tempdir().unwrap();
        let (sink, rx) = EventSink::channel();
        sink.log("connected");
        sink.advance();
        sink.log("built");
        sink.all_done(Duration::from_secs(3), "api.example.com");

        let (outcome, pipeline) = render_loop(dir.path())
            .run(rx, std::future::pending())
            .await
            .unwrap();

        assert_eq!(
            outcome,
            RunOutcome::Done {
                duration: Duration::from_secs(3),
                url: "api.example.com".into()
            }
        );
        assert_eq!(pipeline.stages()[1].logs, vec!["built"]);
        assert!(!dir.path().join("dockhand.logs.txt").exists());
    }

    #[tokio::test]
    async fn test_error_writes_diagnostic_log() {
        let dir = tempfile::tempdir().unwrap();
        let (sink, rx) = EventSink::channel();
        sink.advance();
        sink.log("step 1/3");
        sink.error("no space left on device");

        let (outcome, _) = render_loop(dir.path())
            .run(rx, std::future::pending())
            .await
            .unwrap();

        assert_eq!(outcome.exit_code(), 1);
        let log = std::fs::read_to_string(dir.path().join("dockhand.logs.txt")).unwrap();
        assert!(log.contains("=== STAGE 2 ERROR LOG"));
        assert!(log.contains("Stage: Building"));
        assert!(log.contains("step 1/3\nno space left on device\n"));
    }

    #[tokio::test]
    async fn test_silent_failure_still_writes_diagnostic_log() {
        let dir = tempfile::tempdir().unwrap();
        let (sink, rx) = EventSink::channel();
        sink.error("");

        let (outcome, _) = render_loop(dir.path())
            .run(rx, std::future::pending())
            .await
            .unwrap();

        assert_eq!(outcome.exit_code(), 1);
        let log = std::fs::read_to_string(dir.path().join("dockhand.logs.txt")).unwrap();
        assert!(log.contains("=== STAGE 1 ERROR LOG"));
        assert!(log.contains("Stage: Connecting"));
    }

    #[tokio::test]
    async fn test_cancel_future_stops_loop() {
        let dir = tempfile::tempdir().unwrap();
        let (_sink, rx) = EventSink::channel();

        let (outcome, pipeline) = render_loop(dir.path())
            .run(rx, async {})
            .await
            .unwrap();

        assert_eq!(outcome, RunOutcome::Cancelled);
        assert!(pipeline.quitting());
    }

    #[tokio::test]
    async fn test_closed_channel_fails_active_stage() {
        let dir = tempfile::tempdir().unwrap();
        let (sink, rx) = EventSink::channel();
        sink.advance();
        drop(sink);

        let (outcome, _) = render_loop(dir.path())
            .run(rx, std::future::pending())
            .await
            .unwrap();

        assert_eq!(
            outcome,
            RunOutcome::Failed {
                stage_index: 1,
                title: "Building".into()
            }
        );
    }
}
