//! UniqueRowsStep: removes adjacent duplicate rows.
//!
//! Only consecutive rows are compared, so the input should be sorted on the
//! compared fields. With a count field each surviving row carries the number
//! of rows it stands for and is emitted once its run ends.

use crate::pipeline::schema::{FieldMeta, Row, Schema};
use crate::pipeline::step::{ProcessOutcome, Step, StepContext, StepError, StepResult};
use crate::pipeline::steps::{field_index, row_schema, SchemaBound};
use crate::pipeline::value::{Value, ValueKey, ValueType};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const DUPLICATE_ERROR_CODE: &str = "UNIQUE001";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniqueField {
    pub name: String,
    #[serde(default)]
    pub case_insensitive: bool,
}

impl UniqueField {
    pub fn new(name: impl Into<String>, case_insensitive: bool) -> Self {
        Self {
            name: name.into(),
            case_insensitive,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UniqueRowsConfig {
    /// Fields compared between rows; empty compares every field.
    pub fields: Vec<UniqueField>,
    /// Append the run length under this name.
    pub count_field: Option<String>,
    /// Send duplicates to the error hop instead of dropping them.
    pub reject_duplicates: bool,
    pub error_description: Option<String>,
}

struct Layout {
    keys: Vec<(usize, bool)>,
    output: Arc<Schema>,
}

pub struct UniqueRowsStep {
    config: UniqueRowsConfig,
    layout: SchemaBound<Layout>,
    previous: Option<(Vec<ValueKey>, Row, Arc<Schema>)>,
    count: i64,
}

impl UniqueRowsStep {
    pub fn new(config: UniqueRowsConfig) -> Self {
        Self {
            config,
            layout: SchemaBound::new(),
            previous: None,
            count: 0,
        }
    }

    fn build_layout(config: &UniqueRowsConfig, schema: &Arc<Schema>) -> StepResult<Layout> {
        let keys = if config.fields.is_empty() {
            (0..schema.len()).map(|i| (i, false)).collect()
        } else {
            config
                .fields
                .iter()
                .map(|f| field_index(schema, &f.name).map(|i| (i, f.case_insensitive)))
                .collect::<StepResult<_>>()?
        };
        let output = match &config.count_field {
            Some(name) => Arc::new(schema.extended([FieldMeta::new(name.clone(), ValueType::Integer)])),
            None => Arc::clone(schema),
        };
        Ok(Layout { keys, output })
    }

    /// Emit the pending row with its run length.
    fn flush(&mut self, ctx: &mut StepContext) -> StepResult<()> {
        if let Some((_, mut row, output)) = self.previous.take() {
            row.push(Value::Integer(self.count));
            ctx.put_row(&output, row)?;
        }
        Ok(())
    }
}

impl Step for UniqueRowsStep {
    fn process_row(&mut self, ctx: &mut StepContext) -> StepResult<ProcessOutcome> {
        let counting = self.config.count_field.is_some();
        let Some(row) = ctx.get_row()? else {
            if counting {
                self.flush(ctx)?;
            }
            return Ok(ProcessOutcome::Finished);
        };
        let schema = row_schema(ctx)?;
        let config = &self.config;
        let layout = self
            .layout
            .get_or_try_init(&schema, |s| Self::build_layout(config, s))?;
        let key: Vec<ValueKey> = layout
            .keys
            .iter()
            .map(|&(i, ci)| row.get(i).unwrap_or(&Value::Null).key(ci))
            .collect();
        let output = Arc::clone(&layout.output);

        let duplicate = matches!(&self.previous, Some((prev, _, _)) if *prev == key);
        if duplicate {
            self.count += 1;
            if self.config.reject_duplicates {
                let message = self
                    .config
                    .error_description
                    .clone()
                    .unwrap_or_else(|| "duplicate row".to_string());
                return Err(StepError::row(&schema, row, DUPLICATE_ERROR_CODE, message, None));
            }
            return Ok(ProcessOutcome::Continue);
        }

        if counting {
            self.flush(ctx)?;
            self.previous = Some((key, row, output));
        } else {
            self.previous = Some((key, row.clone(), output));
            ctx.put_row(&schema, row)?;
        }
        self.count = 1;
        Ok(ProcessOutcome::Continue)
    }
}
