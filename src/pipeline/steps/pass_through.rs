//! PassThroughStep: forwards every row unchanged.
//!
//! Backs the `injector`, `dummy`, `mapping_input` and `mapping_output`
//! kinds. They differ only in how the orchestrator and the mapping step
//! wire them up.

use crate::pipeline::step::{ProcessOutcome, Step, StepContext, StepResult};
use crate::pipeline::step_kind::BuiltinKind;
use crate::pipeline::steps::row_schema;

pub struct PassThroughStep {
    kind: BuiltinKind,
}

impl PassThroughStep {
    pub fn new(kind: BuiltinKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> BuiltinKind {
        self.kind
    }
}

impl Step for PassThroughStep {
    fn process_row(&mut self, ctx: &mut StepContext) -> StepResult<ProcessOutcome> {
        let Some(row) = ctx.get_row()? else {
            return Ok(ProcessOutcome::Finished);
        };
        let schema = row_schema(ctx)?;
        ctx.put_row(&schema, row)?;
        Ok(ProcessOutcome::Continue)
    }
}
