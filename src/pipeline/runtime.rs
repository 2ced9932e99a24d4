//! Per-copy step runtime.
//!
//! A `StepRuntime` owns one step instance and its context and drives it on
//! a dedicated thread:
//!
//! 1. `init`; a failure is fatal.
//! 2. Loop: wait while the pipeline is paused, observe stop
//!    (→ `stop_running`, `Stopped`), else `process_row`. Row-level failures
//!    go to the error hop and the loop continues; other failures are fatal.
//! 3. A fatal failure adds to the error count, stops the whole pipeline and
//!    ends the copy as `Errored`.
//! 4. `dispose` and finishing the outputs happen on every exit path, panics
//!    included.
//!
//! Step listeners hear about the copy after a successful `init` and once it
//! has reached its final state.

use crate::pipeline::step::{AnyStep, ProcessOutcome, RowError, Step, StepContext, StepError, StepResult, StepState};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

pub struct StepRuntime {
    step: AnyStep,
    ctx: StepContext,
}

impl StepRuntime {
    pub fn new(step: AnyStep, ctx: StepContext) -> Self {
        Self { step, ctx }
    }

    pub fn context(&self) -> &StepContext {
        &self.ctx
    }

    /// Run the step to completion on the current thread.
    pub fn run(mut self) -> StepState {
        tracing::debug!(
            "Step '{}' copy {} starting in '{}'",
            self.ctx.name(),
            self.ctx.copy(),
            self.ctx.pipeline_name()
        );

        let driven = panic::catch_unwind(AssertUnwindSafe(|| drive(&mut self.step, &mut self.ctx)));
        let mut end = match driven {
            Ok(state) => state,
            Err(payload) => fail(
                &mut self.ctx,
                StepError::Fatal(format!("step panicked: {}", panic_message(&*payload))),
            ),
        };

        let disposed = panic::catch_unwind(AssertUnwindSafe(|| self.step.dispose(&mut self.ctx)));
        if let Err(payload) = disposed {
            end = fail(
                &mut self.ctx,
                StepError::Fatal(format!("dispose panicked: {}", panic_message(&*payload))),
            );
        }

        self.ctx.finish_outputs();
        self.ctx.status().set_state(end);
        self.ctx.notify_finished();

        let status = self.ctx.status().snapshot();
        tracing::debug!(
            "Step '{}' copy {} ended {:?} (read {}, written {}, rejected {}, errors {})",
            status.name,
            status.copy,
            end,
            status.lines_read,
            status.lines_written,
            status.lines_rejected,
            status.errors
        );
        end
    }
}

fn drive(step: &mut AnyStep, ctx: &mut StepContext) -> StepState {
    if let Err(err) = step.init(ctx) {
        if matches!(err, StepError::Stopped) {
            return StepState::Stopped;
        }
        return fail(ctx, err);
    }
    ctx.status().set_state(StepState::Running);
    ctx.notify_started();

    loop {
        if !ctx.wait_while_paused() || ctx.is_stopped() {
            step.stop_running(ctx);
            return StepState::Stopped;
        }
        match step.process_row(ctx) {
            Ok(ProcessOutcome::Continue) => {}
            Ok(ProcessOutcome::Finished) => return StepState::Done,
            Err(StepError::Row(rejected)) => {
                if let Err(err) = reject(ctx, *rejected) {
                    if matches!(err, StepError::Stopped) {
                        step.stop_running(ctx);
                        return StepState::Stopped;
                    }
                    return fail(ctx, err);
                }
            }
            Err(StepError::Stopped) => {
                step.stop_running(ctx);
                return StepState::Stopped;
            }
            Err(err) => return fail(ctx, err),
        }
    }
}

/// Route a rejected row to the error hop, or escalate when there is none.
fn reject(ctx: &mut StepContext, rejected: RowError) -> StepResult<()> {
    if !ctx.has_error_output() {
        return Err(StepError::Fatal(format!(
            "unhandled row error: {}",
            rejected
        )));
    }
    tracing::trace!("Step '{}' rejected a row: {}", ctx.name(), rejected);
    ctx.put_error(rejected)?;

    let max = ctx.config().max_rejected_rows;
    let rejected = ctx.status().lines_rejected();
    if max > 0 && rejected > max {
        tracing::warn!(
            "Step '{}' rejected {} rows, more than the limit of {}",
            ctx.name(),
            rejected,
            max
        );
        return Err(StepError::Fatal(format!(
            "rejected {} rows, limit is {}",
            rejected, max
        )));
    }
    Ok(())
}

fn fail(ctx: &mut StepContext, err: StepError) -> StepState {
    tracing::error!(
        "Step '{}' copy {} in '{}' failed: {}",
        ctx.name(),
        ctx.copy(),
        ctx.pipeline_name(),
        err
    );
    ctx.status().add_errors(err.error_count().max(1));
    ctx.stop_all();
    StepState::Errored
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
