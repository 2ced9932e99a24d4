//! FilterRowsStep: keeps rows matching a condition.
//!
//! Rows whose comparison cannot be evaluated (incomparable types) are
//! rejected with code `FILTER001`. Without a condition every row passes.

use crate::pipeline::condition::{BoundCondition, Condition, ConditionError};
use crate::pipeline::step::{ProcessOutcome, Step, StepContext, StepError, StepResult};
use crate::pipeline::steps::{row_schema, SchemaBound};
use serde::{Deserialize, Serialize};

pub const FILTER_ERROR_CODE: &str = "FILTER001";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterRowsConfig {
    pub condition: Option<Condition>,
}

pub struct FilterRowsStep {
    config: FilterRowsConfig,
    bound: SchemaBound<BoundCondition>,
}

impl FilterRowsStep {
    pub fn new(config: FilterRowsConfig) -> Self {
        Self {
            config,
            bound: SchemaBound::new(),
        }
    }
}

impl Step for FilterRowsStep {
    fn process_row(&mut self, ctx: &mut StepContext) -> StepResult<ProcessOutcome> {
        let Some(row) = ctx.get_row()? else {
            return Ok(ProcessOutcome::Finished);
        };
        let schema = row_schema(ctx)?;
        let Some(condition) = &self.config.condition else {
            ctx.put_row(&schema, row)?;
            return Ok(ProcessOutcome::Continue);
        };

        let bound = self.bound.get_or_try_init(&schema, |s| {
            condition
                .bind(s)
                .map_err(|e| StepError::Config(format!("{} in filter '{}'", e, condition)))
        })?;
        match bound.evaluate(&row) {
            Ok(true) => ctx.put_row(&schema, row)?,
            Ok(false) => {}
            Err(err) => {
                let field = match &err {
                    ConditionError::Incomparable { field, .. }
                    | ConditionError::InvalidOperand { field, .. }
                    | ConditionError::UnknownField(field) => field.clone(),
                };
                return Err(StepError::row(
                    &schema,
                    row,
                    FILTER_ERROR_CODE,
                    err.to_string(),
                    Some(&field),
                ));
            }
        }
        Ok(ProcessOutcome::Continue)
    }
}
