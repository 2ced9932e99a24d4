//! LimitStep: skips `offset` rows, then passes at most `limit` rows.
//!
//! Rows past the limit are read and dropped so upstream steps never block on
//! a full queue.

use crate::pipeline::step::{ProcessOutcome, Step, StepContext, StepResult};
use crate::pipeline::steps::row_schema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitConfig {
    /// `None` passes every row after the offset.
    pub limit: Option<u64>,
    pub offset: u64,
}

pub struct LimitStep {
    config: LimitConfig,
    seen: u64,
    passed: u64,
}

impl LimitStep {
    pub fn new(config: LimitConfig) -> Self {
        Self {
            config,
            seen: 0,
            passed: 0,
        }
    }
}

impl Step for LimitStep {
    fn process_row(&mut self, ctx: &mut StepContext) -> StepResult<ProcessOutcome> {
        let Some(row) = ctx.get_row()? else {
            return Ok(ProcessOutcome::Finished);
        };
        self.seen += 1;
        if self.seen <= self.config.offset {
            return Ok(ProcessOutcome::Continue);
        }
        if self.config.limit.is_some_and(|limit| self.passed >= limit) {
            return Ok(ProcessOutcome::Continue);
        }
        let schema = row_schema(ctx)?;
        ctx.put_row(&schema, row)?;
        self.passed += 1;
        Ok(ProcessOutcome::Continue)
    }
}
