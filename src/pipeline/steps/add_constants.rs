//! AddConstantsStep: appends constant fields to every row.
//!
//! Constant values are resolved once at init: `${var}` references are
//! substituted when requested and the text is converted to the field type.
//! A step without inputs emits a single row of constants.

use crate::pipeline::schema::{FieldMeta, Row, Schema};
use crate::pipeline::step::{ProcessOutcome, Step, StepContext, StepError, StepResult};
use crate::pipeline::steps::{row_schema, SchemaBound};
use crate::pipeline::value::{Value, ValueType};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

fn default_type() -> ValueType {
    ValueType::String
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstantField {
    pub name: String,
    #[serde(default = "default_type")]
    pub value_type: ValueType,
    /// Textual value; `None` yields a null.
    #[serde(default)]
    pub value: Option<String>,
    /// Replace `${var}` references before conversion.
    #[serde(default)]
    pub substitute: bool,
}

impl ConstantField {
    pub fn new(name: impl Into<String>, value_type: ValueType, value: Option<&str>) -> Self {
        Self {
            name: name.into(),
            value_type,
            value: value.map(str::to_string),
            substitute: false,
        }
    }

    pub fn substituted(mut self) -> Self {
        self.substitute = true;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AddConstantsConfig {
    pub constants: Vec<ConstantField>,
}

pub struct AddConstantsStep {
    config: AddConstantsConfig,
    values: Row,
    output: SchemaBound<Arc<Schema>>,
}

impl AddConstantsStep {
    pub fn new(config: AddConstantsConfig) -> Self {
        Self {
            config,
            values: Vec::new(),
            output: SchemaBound::new(),
        }
    }

    fn fields(&self) -> impl Iterator<Item = FieldMeta> + '_ {
        self.config
            .constants
            .iter()
            .map(|c| FieldMeta::new(c.name.clone(), c.value_type))
    }

    /// Resolve a constant's textual value into a typed value.
    fn resolve(constant: &ConstantField, ctx: &StepContext) -> StepResult<Value> {
        let Some(text) = &constant.value else {
            return Ok(Value::Null);
        };
        let text = if constant.substitute {
            ctx.substitute(text)
        } else {
            text.clone()
        };
        Value::String(text).convert_to(constant.value_type).map_err(|e| {
            StepError::Config(format!("constant '{}': {}", constant.name, e))
        })
    }
}

impl Step for AddConstantsStep {
    fn init(&mut self, ctx: &mut StepContext) -> StepResult<()> {
        self.values = self
            .config
            .constants
            .iter()
            .map(|c| Self::resolve(c, ctx))
            .collect::<StepResult<_>>()?;
        Ok(())
    }

    fn process_row(&mut self, ctx: &mut StepContext) -> StepResult<ProcessOutcome> {
        if ctx.input_count() == 0 {
            let schema = Arc::new(Schema::new(self.fields().collect()));
            ctx.put_row(&schema, self.values.clone())?;
            return Ok(ProcessOutcome::Finished);
        }
        let Some(mut row) = ctx.get_row()? else {
            return Ok(ProcessOutcome::Finished);
        };
        let schema = row_schema(ctx)?;
        let extra: Vec<FieldMeta> = self.fields().collect();
        let output = self
            .output
            .get_or_try_init(&schema, |s| Ok(Arc::new(s.extended(extra))))?;
        let output = Arc::clone(output);
        row.extend(self.values.iter().cloned());
        ctx.put_row(&output, row)?;
        Ok(ProcessOutcome::Continue)
    }
}
