//! Pipeline orchestration: windowed spawning, relay and completion.

mod runner;
mod types;

pub use runner::CommandRunner;
pub use types::{
    CompletionCallback, KillSwitch, PipelineOutcome, PipelineReport, RunnerContext, SPAWN_WINDOW,
};
