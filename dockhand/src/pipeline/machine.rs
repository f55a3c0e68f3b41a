//! Pipeline state machine
//!
//! Pure and synchronous: one event in, one state change (and maybe one
//! effect) out. Rendering and I/O live elsewhere.

use std::time::Duration;

use thiserror::Error;

use crate::pipeline::diagnostics::StageLog;
use crate::pipeline::event::PipelineEvent;
use crate::pipeline::stage::Stage;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("advance past the last stage (active {active}, {count} stages)")]
    AdvancePastEnd { active: usize, count: usize },

    #[error("a pipeline needs at least one stage")]
    NoStages,
}

/// Follow-up work the caller performs after an event was applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    None,

    /// Write the failed stage's full log to the diagnostic log
    PersistStageLog(StageLog),
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Done { duration: Duration, url: String },
    Failed { stage_index: usize, title: String },
    Cancelled,
}

impl RunOutcome {
    /// Process exit code for this outcome
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Done { .. } => 0,
            RunOutcome::Failed { .. } => 1,
            RunOutcome::Cancelled => 130,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Status {
    Running,
    Failed,
    Cancelled,
    Done { duration: Duration, url: String },
}

/// An ordered, fixed list of stages and the pointer to the active one
#[derive(Debug, Clone)]
pub struct Pipeline {
    banner: String,
    stages: Vec<Stage>,
    active_index: usize,
    status: Status,
    spinner_tick: usize,
}

impl Pipeline {
    pub fn new(banner: impl Into<String>, stages: Vec<Stage>) -> Result<Self, PipelineError> {
        if stages.is_empty() {
            return Err(PipelineError::NoStages);
        }
        Ok(Self {
            banner: banner.into(),
            stages,
            active_index: 0,
            status: Status::Running,
            spinner_tick: 0,
        })
    }

    pub fn banner(&self) -> &str {
        &self.banner
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn active_index(&self) -> usize {
        self.active_index
    }

    pub fn active_stage(&self) -> &Stage {
        &self.stages[self.active_index]
    }

    pub fn spinner_tick(&self) -> usize {
        self.spinner_tick
    }

    /// Stopped by an error or a cancel
    pub fn quitting(&self) -> bool {
        matches!(self.status, Status::Failed | Status::Cancelled)
    }

    pub fn all_done(&self) -> bool {
        matches!(self.status, Status::Done { .. })
    }

    pub fn is_terminal(&self) -> bool {
        self.status != Status::Running
    }

    /// Duration and URL of a successful run
    pub fn result(&self) -> Option<(Duration, &str)> {
        match &self.status {
            Status::Done { duration, url } => Some((*duration, url.as_str())),
            _ => None,
        }
    }

    /// How the run ended, once it has
    pub fn outcome(&self) -> Option<RunOutcome> {
        match &self.status {
            Status::Running => None,
            Status::Failed => Some(RunOutcome::Failed {
                stage_index: self.active_index,
                title: self.active_stage().title.clone(),
            }),
            Status::Cancelled => Some(RunOutcome::Cancelled),
            Status::Done { duration, url } => Some(RunOutcome::Done {
                duration: *duration,
                url: url.clone(),
            }),
        }
    }

    /// Advance the spinner animation of the active stage
    pub fn tick(&mut self) {
        if !self.is_terminal() {
            self.spinner_tick = self.spinner_tick.wrapping_add(1);
        }
    }

    /// Apply one event
    ///
    /// Events arriving after the run became terminal are ignored.
    pub fn apply(&mut self, event: PipelineEvent) -> Result<Effect, PipelineError> {
        if self.is_terminal() {
            return Ok(Effect::None);
        }

        match event {
            PipelineEvent::Log(line) => {
                self.stages[self.active_index].logs.push(line);
                Ok(Effect::None)
            }
            PipelineEvent::Error(message) => {
                let stage = &mut self.stages[self.active_index];
                stage.has_error = true;
                if let Some(message) = message.filter(|m| !m.is_empty()) {
                    stage.logs.push(message);
                }
                self.status = Status::Failed;
                Ok(Effect::PersistStageLog(StageLog {
                    index: self.active_index,
                    title: stage.title.clone(),
                    logs: stage.logs.clone(),
                }))
            }
            PipelineEvent::Advance => {
                if self.active_index + 1 >= self.stages.len() {
                    return Err(PipelineError::AdvancePastEnd {
                        active: self.active_index,
                        count: self.stages.len(),
                    });
                }
                self.active_index += 1;
                self.spinner_tick = 0;
                Ok(Effect::None)
            }
            PipelineEvent::AllDone { duration, url } => {
                self.status = Status::Done { duration, url };
                Ok(Effect::None)
            }
            PipelineEvent::Cancel => {
                self.status = Status::Cancelled;
                Ok(Effect::None)
            }
        }
    }
}
