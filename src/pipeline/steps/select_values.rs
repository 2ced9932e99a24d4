//! SelectValuesStep: projection, renaming and type conversion.
//!
//! With an explicit field list the output holds exactly those fields in that
//! order; otherwise every input field is kept. Fields in `remove` are dropped
//! in both cases. A value that cannot be converted rejects the row with code
//! `SELECT001`.

use crate::pipeline::schema::{FieldMeta, Schema};
use crate::pipeline::step::{ProcessOutcome, Step, StepContext, StepError, StepResult};
use crate::pipeline::steps::{field_index, row_schema, SchemaBound};
use crate::pipeline::value::{Value, ValueType};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const CONVERSION_ERROR_CODE: &str = "SELECT001";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectField {
    pub name: String,
    #[serde(default)]
    pub rename: Option<String>,
    #[serde(default)]
    pub convert_to: Option<ValueType>,
    #[serde(default)]
    pub length: Option<u32>,
    #[serde(default)]
    pub precision: Option<u32>,
}

impl SelectField {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn renamed(mut self, rename: impl Into<String>) -> Self {
        self.rename = Some(rename.into());
        self
    }

    pub fn converted(mut self, value_type: ValueType) -> Self {
        self.convert_to = Some(value_type);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectValuesConfig {
    pub fields: Vec<SelectField>,
    pub remove: Vec<String>,
}

struct Projection {
    /// Source index and optional conversion per output field.
    columns: Vec<(usize, Option<ValueType>)>,
    output: Arc<Schema>,
}

pub struct SelectValuesStep {
    config: SelectValuesConfig,
    projection: SchemaBound<Projection>,
}

impl SelectValuesStep {
    pub fn new(config: SelectValuesConfig) -> Self {
        Self {
            config,
            projection: SchemaBound::new(),
        }
    }

    /// Output schema for a given input schema.
    pub fn output_schema(config: &SelectValuesConfig, input: &Schema) -> StepResult<Schema> {
        Ok(Self::project(config, input)?.output.as_ref().clone())
    }

    fn project(config: &SelectValuesConfig, schema: &Schema) -> StepResult<Projection> {
        let mut columns = Vec::new();
        let mut fields = Vec::new();
        if config.fields.is_empty() {
            for (i, field) in schema.fields().iter().enumerate() {
                if !config.remove.contains(&field.name) {
                    columns.push((i, None));
                    fields.push(field.clone());
                }
            }
        } else {
            for select in &config.fields {
                let i = field_index(schema, &select.name)?;
                let source = schema.field(i).cloned().unwrap_or_else(|| {
                    FieldMeta::new(select.name.clone(), ValueType::None)
                });
                let name = select.rename.clone().unwrap_or(source.name);
                if config.remove.contains(&name) {
                    continue;
                }
                let mut meta = FieldMeta::new(name, select.convert_to.unwrap_or(source.value_type));
                meta.length = select.length.or(source.length);
                meta.precision = select.precision.or(source.precision);
                columns.push((i, select.convert_to));
                fields.push(meta);
            }
        }
        Ok(Projection {
            columns,
            output: Arc::new(Schema::new(fields)),
        })
    }
}

impl Step for SelectValuesStep {
    fn process_row(&mut self, ctx: &mut StepContext) -> StepResult<ProcessOutcome> {
        let Some(row) = ctx.get_row()? else {
            return Ok(ProcessOutcome::Finished);
        };
        let schema = row_schema(ctx)?;
        let config = &self.config;
        let projection = self
            .projection
            .get_or_try_init(&schema, |s| Self::project(config, s))?;

        let mut out = Vec::with_capacity(projection.columns.len());
        for &(i, convert) in &projection.columns {
            let value = row.get(i).cloned().unwrap_or(Value::Null);
            match convert {
                Some(target) => match value.convert_to(target) {
                    Ok(v) => out.push(v),
                    Err(e) => {
                        let field = schema.field(i).map(|f| f.name.clone());
                        return Err(StepError::row(
                            &schema,
                            row,
                            CONVERSION_ERROR_CODE,
                            e.to_string(),
                            field.as_deref(),
                        ));
                    }
                },
                None => out.push(value),
            }
        }
        let output = Arc::clone(&projection.output);
        ctx.put_row(&output, out)?;
        Ok(ProcessOutcome::Continue)
    }
}
