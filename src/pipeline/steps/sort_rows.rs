//! SortRowsStep: in-memory stable sort.
//!
//! Collects every input row, sorts once the input ends and then emits the
//! sorted rows one per call.

use crate::pipeline::schema::{Row, Schema};
use crate::pipeline::step::{ProcessOutcome, Step, StepContext, StepResult};
use crate::pipeline::steps::{field_index, row_schema};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortField {
    pub name: String,
    #[serde(default = "default_true")]
    pub ascending: bool,
    #[serde(default = "default_true")]
    pub case_sensitive: bool,
}

impl SortField {
    pub fn ascending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ascending: true,
            case_sensitive: true,
        }
    }

    pub fn descending(name: impl Into<String>) -> Self {
        Self {
            ascending: false,
            ..Self::ascending(name)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SortRowsConfig {
    pub fields: Vec<SortField>,
}

enum Phase {
    Collecting,
    Emitting(Arc<Schema>, std::vec::IntoIter<Row>),
}

pub struct SortRowsStep {
    config: SortRowsConfig,
    rows: Vec<Row>,
    schema: Option<Arc<Schema>>,
    phase: Phase,
}

impl SortRowsStep {
    pub fn new(config: SortRowsConfig) -> Self {
        Self {
            config,
            rows: Vec::new(),
            schema: None,
            phase: Phase::Collecting,
        }
    }

    fn sort(&mut self, schema: &Schema) -> StepResult<()> {
        let keys = self
            .config
            .fields
            .iter()
            .map(|f| field_index(schema, &f.name).map(|i| (i, f)))
            .collect::<StepResult<Vec<_>>>()?;
        self.rows.sort_by(|a, b| {
            for (i, field) in &keys {
                let ord = a[*i].sort_cmp(&b[*i], field.case_sensitive);
                let ord = if field.ascending { ord } else { ord.reverse() };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
        Ok(())
    }
}

impl Step for SortRowsStep {
    fn process_row(&mut self, ctx: &mut StepContext) -> StepResult<ProcessOutcome> {
        if let Phase::Emitting(schema, rows) = &mut self.phase {
            return match rows.next() {
                Some(row) => {
                    ctx.put_row(schema, row)?;
                    Ok(ProcessOutcome::Continue)
                }
                None => Ok(ProcessOutcome::Finished),
            };
        }

        match ctx.get_row()? {
            Some(row) => {
                if self.schema.is_none() {
                    self.schema = Some(row_schema(ctx)?);
                }
                self.rows.push(row);
            }
            None => {
                let Some(schema) = self.schema.take() else {
                    return Ok(ProcessOutcome::Finished);
                };
                self.sort(&schema)?;
                tracing::debug!("Step '{}' sorted {} rows", ctx.name(), self.rows.len());
                let rows = std::mem::take(&mut self.rows);
                self.phase = Phase::Emitting(schema, rows.into_iter());
            }
        }
        Ok(ProcessOutcome::Continue)
    }
}
