//! GroupByStep: in-memory grouping with aggregates.
//!
//! Groups are emitted in the order their first row arrived. Output rows hold
//! the group fields followed by one field per aggregate.

use crate::pipeline::schema::{FieldMeta, Row, Schema};
use crate::pipeline::step::{ProcessOutcome, Step, StepContext, StepError, StepResult};
use crate::pipeline::steps::{field_index, row_schema};
use crate::pipeline::value::{Value, ValueKey, ValueType};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFunction {
    /// Non-null values of a field.
    Count,
    /// Every row, `COUNT(*)`.
    CountAll,
    CountDistinct,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFunction {
    pub fn name(&self) -> &'static str {
        match self {
            AggregateFunction::Count | AggregateFunction::CountAll => "COUNT",
            AggregateFunction::CountDistinct => "COUNT DISTINCT",
            AggregateFunction::Sum => "SUM",
            AggregateFunction::Avg => "AVG",
            AggregateFunction::Min => "MIN",
            AggregateFunction::Max => "MAX",
        }
    }

    pub fn needs_field(&self) -> bool {
        !matches!(self, AggregateFunction::CountAll)
    }

    /// Type of the aggregate given the type of its input field.
    pub fn result_type(&self, input: ValueType) -> ValueType {
        match self {
            AggregateFunction::Count
            | AggregateFunction::CountAll
            | AggregateFunction::CountDistinct => ValueType::Integer,
            AggregateFunction::Avg => ValueType::Number,
            AggregateFunction::Sum if input == ValueType::Integer => ValueType::Integer,
            AggregateFunction::Sum => ValueType::Number,
            AggregateFunction::Min | AggregateFunction::Max => input,
        }
    }
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateField {
    /// Output field name.
    pub name: String,
    /// Input field; unused by `count_all`.
    #[serde(default)]
    pub field: Option<String>,
    pub function: AggregateFunction,
}

impl AggregateField {
    pub fn new(name: impl Into<String>, function: AggregateFunction, field: Option<&str>) -> Self {
        Self {
            name: name.into(),
            field: field.map(str::to_string),
            function,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupByConfig {
    pub group: Vec<String>,
    pub aggregates: Vec<AggregateField>,
}

#[derive(Debug, Clone)]
enum Accumulator {
    Count(i64),
    Distinct(HashSet<ValueKey>),
    SumInt(Option<i64>),
    SumNum(Option<f64>),
    Avg { sum: f64, count: i64 },
    Min(Option<Value>),
    Max(Option<Value>),
}

impl Accumulator {
    fn new(function: AggregateFunction, input: ValueType) -> Self {
        match function {
            AggregateFunction::Count | AggregateFunction::CountAll => Accumulator::Count(0),
            AggregateFunction::CountDistinct => Accumulator::Distinct(HashSet::new()),
            AggregateFunction::Sum if input == ValueType::Integer => Accumulator::SumInt(None),
            AggregateFunction::Sum => Accumulator::SumNum(None),
            AggregateFunction::Avg => Accumulator::Avg { sum: 0.0, count: 0 },
            AggregateFunction::Min => Accumulator::Min(None),
            AggregateFunction::Max => Accumulator::Max(None),
        }
    }

    /// Fold one value in. `None` means the row itself (`COUNT(*)`).
    fn add(&mut self, value: Option<&Value>) -> Result<(), String> {
        let Some(value) = value else {
            if let Accumulator::Count(n) = self {
                *n += 1;
            }
            return Ok(());
        };
        if value.is_null() {
            return Ok(());
        }
        match self {
            Accumulator::Count(n) => *n += 1,
            Accumulator::Distinct(seen) => {
                seen.insert(value.key(false));
            }
            Accumulator::SumInt(sum) => {
                let v = value
                    .as_i64()
                    .ok_or_else(|| format!("cannot sum {} value '{}'", value.value_type(), value))?;
                *sum = Some(sum.unwrap_or(0).saturating_add(v));
            }
            Accumulator::SumNum(sum) => {
                let v = value
                    .as_f64()
                    .ok_or_else(|| format!("cannot sum {} value '{}'", value.value_type(), value))?;
                *sum = Some(sum.unwrap_or(0.0) + v);
            }
            Accumulator::Avg { sum, count } => {
                let v = value
                    .as_f64()
                    .ok_or_else(|| format!("cannot average {} value '{}'", value.value_type(), value))?;
                *sum += v;
                *count += 1;
            }
            Accumulator::Min(current) => {
                if current
                    .as_ref()
                    .map_or(true, |c| value.sort_cmp(c, true) == Ordering::Less)
                {
                    *current = Some(value.clone());
                }
            }
            Accumulator::Max(current) => {
                if current
                    .as_ref()
                    .map_or(true, |c| value.sort_cmp(c, true) == Ordering::Greater)
                {
                    *current = Some(value.clone());
                }
            }
        }
        Ok(())
    }

    fn finish(self) -> Value {
        match self {
            Accumulator::Count(n) => Value::Integer(n),
            Accumulator::Distinct(seen) => Value::Integer(seen.len() as i64),
            Accumulator::SumInt(sum) => sum.map_or(Value::Null, Value::Integer),
            Accumulator::SumNum(sum) => sum.map_or(Value::Null, Value::Number),
            Accumulator::Avg { count: 0, .. } => Value::Null,
            Accumulator::Avg { sum, count } => Value::Number(sum / count as f64),
            Accumulator::Min(v) | Accumulator::Max(v) => v.unwrap_or(Value::Null),
        }
    }
}

struct Layout {
    group: Vec<usize>,
    /// Input index per aggregate, `None` for `count_all`.
    inputs: Vec<Option<usize>>,
    input_types: Vec<ValueType>,
    output: Arc<Schema>,
}

struct Group {
    values: Row,
    accumulators: Vec<Accumulator>,
}

pub struct GroupByStep {
    config: GroupByConfig,
    layout: Option<Layout>,
    index: HashMap<Vec<ValueKey>, usize>,
    groups: Vec<Group>,
    results: Option<(Arc<Schema>, std::vec::IntoIter<Row>)>,
}

impl GroupByStep {
    pub fn new(config: GroupByConfig) -> Self {
        Self {
            config,
            layout: None,
            index: HashMap::new(),
            groups: Vec::new(),
            results: None,
        }
    }

    /// Output schema for a given input schema.
    pub fn output_schema(config: &GroupByConfig, input: &Schema) -> StepResult<Schema> {
        Ok(Self::build_layout(config, input)?.output.as_ref().clone())
    }

    fn build_layout(config: &GroupByConfig, schema: &Schema) -> StepResult<Layout> {
        let group = config
            .group
            .iter()
            .map(|name| field_index(schema, name))
            .collect::<StepResult<Vec<_>>>()?;
        let mut fields: Vec<FieldMeta> = group
            .iter()
            .filter_map(|&i| schema.field(i).cloned())
            .collect();
        let mut inputs = Vec::with_capacity(config.aggregates.len());
        let mut input_types = Vec::with_capacity(config.aggregates.len());
        for aggregate in &config.aggregates {
            let input = match (&aggregate.field, aggregate.function.needs_field()) {
                (Some(name), true) => Some(field_index(schema, name)?),
                (None, true) => {
                    return Err(StepError::Config(format!(
                        "aggregate '{}' ({}) needs an input field",
                        aggregate.name, aggregate.function
                    )))
                }
                (_, false) => None,
            };
            let input_type = input
                .and_then(|i| schema.field(i))
                .map_or(ValueType::Integer, |f| f.value_type);
            fields.push(FieldMeta::new(
                aggregate.name.clone(),
                aggregate.function.result_type(input_type),
            ));
            inputs.push(input);
            input_types.push(input_type);
        }
        Ok(Layout {
            group,
            inputs,
            input_types,
            output: Arc::new(Schema::new(fields)),
        })
    }

    fn new_group(&self, layout: &Layout, values: Row) -> Group {
        Group {
            values,
            accumulators: self
                .config
                .aggregates
                .iter()
                .zip(&layout.input_types)
                .map(|(a, &t)| Accumulator::new(a.function, t))
                .collect(),
        }
    }

    fn accumulate(&mut self, schema: &Arc<Schema>, row: Row) -> StepResult<()> {
        if self.layout.is_none() {
            self.layout = Some(Self::build_layout(&self.config, schema)?);
        }
        let Some(layout) = self.layout.take() else {
            return Ok(());
        };
        let key: Vec<ValueKey> = layout.group.iter().map(|&i| row[i].key(false)).collect();
        let slot = match self.index.get(&key) {
            Some(&slot) => slot,
            None => {
                let values = layout.group.iter().map(|&i| row[i].clone()).collect();
                let group = self.new_group(&layout, values);
                self.groups.push(group);
                self.index.insert(key, self.groups.len() - 1);
                self.groups.len() - 1
            }
        };
        let mut failure = None;
        for (acc, input) in self.groups[slot].accumulators.iter_mut().zip(&layout.inputs) {
            if let Err(message) = acc.add(input.map(|i| &row[i])) {
                failure = Some(message);
                break;
            }
        }
        self.layout = Some(layout);
        match failure {
            Some(message) => Err(StepError::Fatal(message)),
            None => Ok(()),
        }
    }

    fn finish(&mut self) -> StepResult<Option<(Arc<Schema>, Vec<Row>)>> {
        let layout = match self.layout.take() {
            Some(layout) => layout,
            // Without group fields an empty input still yields one row.
            None if self.config.group.is_empty() => {
                let layout = self.layout_without_input();
                let group = self.new_group(&layout, Vec::new());
                self.groups.push(group);
                layout
            }
            None => return Ok(None),
        };
        let rows = std::mem::take(&mut self.groups)
            .into_iter()
            .map(|group| {
                let mut row = group.values;
                row.extend(group.accumulators.into_iter().map(Accumulator::finish));
                row
            })
            .collect();
        Ok(Some((layout.output, rows)))
    }

    /// Layout used when no row ever arrived: inputs are unknown, so every
    /// aggregate is typed from its function alone.
    fn layout_without_input(&self) -> Layout {
        let fields = self
            .config
            .aggregates
            .iter()
            .map(|a| FieldMeta::new(a.name.clone(), a.function.result_type(ValueType::None)))
            .collect();
        Layout {
            group: Vec::new(),
            inputs: vec![None; self.config.aggregates.len()],
            input_types: vec![ValueType::None; self.config.aggregates.len()],
            output: Arc::new(Schema::new(fields)),
        }
    }
}

impl Step for GroupByStep {
    fn process_row(&mut self, ctx: &mut StepContext) -> StepResult<ProcessOutcome> {
        if let Some((schema, rows)) = &mut self.results {
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
                let schema = row_schema(ctx)?;
                self.accumulate(&schema, row)?;
                Ok(ProcessOutcome::Continue)
            }
            None => match self.finish()? {
                Some((schema, rows)) => {
                    tracing::debug!("Step '{}' produced {} groups", ctx.name(), rows.len());
                    self.results = Some((schema, rows.into_iter()));
                    Ok(ProcessOutcome::Continue)
                }
                None => Ok(ProcessOutcome::Finished),
            },
        }
    }
}
