//! Lifecycle callbacks for pipelines and step copies.
//!
//! Listeners are registered between `prepare` and `start`. Step callbacks
//! run on the step copy's own thread; pipeline callbacks run on the thread
//! that calls `start` or `wait_until_finished`. Every method has an empty
//! default, so implementors only override what they observe.

use crate::pipeline::orchestrator::RunResult;
use crate::pipeline::step::StepStatusSnapshot;

/// Observes one pipeline run.
pub trait PipelineListener: Send + Sync {
    /// Every step copy has been spawned.
    fn pipeline_started(&self, _pipeline: &str) {}

    /// Every step copy has ended.
    fn pipeline_finished(&self, _result: &RunResult) {}
}

/// Observes the copies of one step.
pub trait StepListener: Send + Sync {
    /// `init` succeeded and the copy starts processing rows.
    fn step_started(&self, _status: &StepStatusSnapshot) {}

    /// The copy reached a terminal state.
    fn step_finished(&self, _status: &StepStatusSnapshot) {}
}
