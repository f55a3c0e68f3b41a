//! Stage pipeline: the event model, the state machine that consumes it, and
//! the render loop that draws it.

pub mod diagnostics;
pub mod event;
pub mod live_region;
pub mod machine;
pub mod render;
pub mod runner;
pub mod stage;

pub use event::{EventSink, PipelineEvent};
pub use machine::{Effect, Pipeline, PipelineError, RunOutcome};
pub use stage::Stage;
