//! DataGridStep: emits a fixed set of rows from its configuration.

use crate::pipeline::schema::{FieldMeta, Row, Schema};
use crate::pipeline::step::{ProcessOutcome, Step, StepContext, StepError, StepResult};
use crate::pipeline::value::Value;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Field layout and literal rows.
///
/// Cells are plain JSON scalars converted to the declared field type, so
/// `"2024-01-31"` in a `Date` column becomes a date.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataGridConfig {
    pub fields: Vec<FieldMeta>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

pub struct DataGridStep {
    config: DataGridConfig,
    schema: Arc<Schema>,
    rows: std::vec::IntoIter<Row>,
}

impl DataGridStep {
    pub fn new(config: DataGridConfig) -> Self {
        Self {
            schema: Arc::new(Schema::new(config.fields.clone())),
            config,
            rows: Vec::new().into_iter(),
        }
    }
}

/// Map a JSON scalar to a value, before type conversion.
pub(crate) fn json_to_value(json: &serde_json::Value) -> Option<Value> {
    match json {
        serde_json::Value::Null => Some(Value::Null),
        serde_json::Value::Bool(b) => Some(Value::Boolean(*b)),
        serde_json::Value::Number(n) => n
            .as_i64()
            .map(Value::Integer)
            .or_else(|| n.as_f64().map(Value::Number)),
        serde_json::Value::String(s) => Some(Value::String(s.clone())),
        _ => None,
    }
}

impl Step for DataGridStep {
    fn init(&mut self, _ctx: &mut StepContext) -> StepResult<()> {
        let fields = self.schema.fields();
        let mut rows = Vec::with_capacity(self.config.rows.len());
        for (line, cells) in self.config.rows.iter().enumerate() {
            if cells.len() != fields.len() {
                return Err(StepError::Config(format!(
                    "data grid row {} has {} values, expected {}",
                    line,
                    cells.len(),
                    fields.len()
                )));
            }
            let row = cells
                .iter()
                .zip(fields)
                .map(|(cell, field)| {
                    json_to_value(cell)
                        .ok_or_else(|| {
                            StepError::Config(format!(
                                "data grid row {} field '{}' is not a scalar",
                                line, field.name
                            ))
                        })?
                        .convert_to(field.value_type)
                        .map_err(|e| StepError::Config(format!("data grid row {}: {}", line, e)))
                })
                .collect::<StepResult<Row>>()?;
            rows.push(row);
        }
        self.rows = rows.into_iter();
        Ok(())
    }

    fn process_row(&mut self, ctx: &mut StepContext) -> StepResult<ProcessOutcome> {
        match self.rows.next() {
            Some(row) => {
                ctx.put_row(&self.schema, row)?;
                Ok(ProcessOutcome::Continue)
            }
            None => Ok(ProcessOutcome::Finished),
        }
    }
}
