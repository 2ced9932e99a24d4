//! Built-in step implementations.

pub mod add_constants;
pub mod data_grid;
pub mod filter_rows;
pub mod group_by;
pub mod limit;
pub mod mapping;
pub mod pass_through;
pub mod select_values;
pub mod sort_rows;
pub mod unique_rows;

pub use add_constants::{AddConstantsConfig, AddConstantsStep, ConstantField};
pub use data_grid::{DataGridConfig, DataGridStep};
pub use filter_rows::{FilterRowsConfig, FilterRowsStep};
pub use group_by::{AggregateField, AggregateFunction, GroupByConfig, GroupByStep};
pub use limit::{LimitConfig, LimitStep};
pub use mapping::{FieldRename, InputBoundary, MappingConfig, MappingStep, OutputBoundary};
pub use pass_through::PassThroughStep;
pub use select_values::{SelectField, SelectValuesConfig, SelectValuesStep};
pub use sort_rows::{SortField, SortRowsConfig, SortRowsStep};
pub use unique_rows::{UniqueField, UniqueRowsConfig, UniqueRowsStep};

use crate::pipeline::error::PipelineResult;
use crate::pipeline::graph::StepNode;
use crate::pipeline::schema::Schema;
use crate::pipeline::step::{ProcessOutcome, Step, StepContext, StepError, StepResult};
use crate::pipeline::step_kind::BuiltinKind;
use std::sync::Arc;

/// Enum dispatch for built-in steps.
pub enum BuiltinStep {
    PassThrough(PassThroughStep),
    DataGrid(DataGridStep),
    FilterRows(FilterRowsStep),
    UniqueRows(UniqueRowsStep),
    SortRows(SortRowsStep),
    GroupBy(GroupByStep),
    Limit(LimitStep),
    SelectValues(SelectValuesStep),
    AddConstants(AddConstantsStep),
    Mapping(Box<MappingStep>),
}

impl BuiltinStep {
    /// Build a step of `kind` from the node's parameters.
    pub fn create(kind: BuiltinKind, node: &StepNode) -> PipelineResult<Self> {
        Ok(match kind {
            BuiltinKind::Injector
            | BuiltinKind::Dummy
            | BuiltinKind::MappingInput
            | BuiltinKind::MappingOutput => BuiltinStep::PassThrough(PassThroughStep::new(kind)),
            BuiltinKind::DataGrid => BuiltinStep::DataGrid(DataGridStep::new(node.config()?)),
            BuiltinKind::FilterRows => BuiltinStep::FilterRows(FilterRowsStep::new(node.config()?)),
            BuiltinKind::UniqueRows => BuiltinStep::UniqueRows(UniqueRowsStep::new(node.config()?)),
            BuiltinKind::SortRows => BuiltinStep::SortRows(SortRowsStep::new(node.config()?)),
            BuiltinKind::GroupBy => BuiltinStep::GroupBy(GroupByStep::new(node.config()?)),
            BuiltinKind::Limit => BuiltinStep::Limit(LimitStep::new(node.config()?)),
            BuiltinKind::SelectValues => {
                BuiltinStep::SelectValues(SelectValuesStep::new(node.config()?))
            }
            BuiltinKind::AddConstants => {
                BuiltinStep::AddConstants(AddConstantsStep::new(node.config()?))
            }
            BuiltinKind::Mapping => BuiltinStep::Mapping(Box::new(MappingStep::new(node.config()?))),
        })
    }
}

impl Step for BuiltinStep {
    fn init(&mut self, ctx: &mut StepContext) -> StepResult<()> {
        match self {
            BuiltinStep::PassThrough(s) => s.init(ctx),
            BuiltinStep::DataGrid(s) => s.init(ctx),
            BuiltinStep::FilterRows(s) => s.init(ctx),
            BuiltinStep::UniqueRows(s) => s.init(ctx),
            BuiltinStep::SortRows(s) => s.init(ctx),
            BuiltinStep::GroupBy(s) => s.init(ctx),
            BuiltinStep::Limit(s) => s.init(ctx),
            BuiltinStep::SelectValues(s) => s.init(ctx),
            BuiltinStep::AddConstants(s) => s.init(ctx),
            BuiltinStep::Mapping(s) => s.init(ctx),
        }
    }

    fn process_row(&mut self, ctx: &mut StepContext) -> StepResult<ProcessOutcome> {
        match self {
            BuiltinStep::PassThrough(s) => s.process_row(ctx),
            BuiltinStep::DataGrid(s) => s.process_row(ctx),
            BuiltinStep::FilterRows(s) => s.process_row(ctx),
            BuiltinStep::UniqueRows(s) => s.process_row(ctx),
            BuiltinStep::SortRows(s) => s.process_row(ctx),
            BuiltinStep::GroupBy(s) => s.process_row(ctx),
            BuiltinStep::Limit(s) => s.process_row(ctx),
            BuiltinStep::SelectValues(s) => s.process_row(ctx),
            BuiltinStep::AddConstants(s) => s.process_row(ctx),
            BuiltinStep::Mapping(s) => s.process_row(ctx),
        }
    }

    fn dispose(&mut self, ctx: &mut StepContext) {
        match self {
            BuiltinStep::PassThrough(s) => s.dispose(ctx),
            BuiltinStep::DataGrid(s) => s.dispose(ctx),
            BuiltinStep::FilterRows(s) => s.dispose(ctx),
            BuiltinStep::UniqueRows(s) => s.dispose(ctx),
            BuiltinStep::SortRows(s) => s.dispose(ctx),
            BuiltinStep::GroupBy(s) => s.dispose(ctx),
            BuiltinStep::Limit(s) => s.dispose(ctx),
            BuiltinStep::SelectValues(s) => s.dispose(ctx),
            BuiltinStep::AddConstants(s) => s.dispose(ctx),
            BuiltinStep::Mapping(s) => s.dispose(ctx),
        }
    }

    fn stop_running(&mut self, ctx: &mut StepContext) {
        match self {
            BuiltinStep::PassThrough(s) => s.stop_running(ctx),
            BuiltinStep::DataGrid(s) => s.stop_running(ctx),
            BuiltinStep::FilterRows(s) => s.stop_running(ctx),
            BuiltinStep::UniqueRows(s) => s.stop_running(ctx),
            BuiltinStep::SortRows(s) => s.stop_running(ctx),
            BuiltinStep::GroupBy(s) => s.stop_running(ctx),
            BuiltinStep::Limit(s) => s.stop_running(ctx),
            BuiltinStep::SelectValues(s) => s.stop_running(ctx),
            BuiltinStep::AddConstants(s) => s.stop_running(ctx),
            BuiltinStep::Mapping(s) => s.stop_running(ctx),
        }
    }
}

// ─── Shared helpers ─────────────────────────────────────────────────────────

/// Schema of the row just read.
pub(crate) fn row_schema(ctx: &StepContext) -> StepResult<Arc<Schema>> {
    ctx.input_schema().cloned().ok_or_else(|| {
        StepError::fatal(format!("step '{}' received a row without a schema", ctx.name()))
    })
}

/// Position of `name` in `schema`, or a configuration error.
pub(crate) fn field_index(schema: &Schema, name: &str) -> StepResult<usize> {
    schema
        .index_of(name)
        .ok_or_else(|| StepError::Config(format!("field '{}' not found in {}", name, schema)))
}

/// Value derived from an input schema, recomputed when the schema changes.
pub(crate) struct SchemaBound<T> {
    cached: Option<(Arc<Schema>, T)>,
}

impl<T> SchemaBound<T> {
    pub(crate) fn new() -> Self {
        Self { cached: None }
    }

    pub(crate) fn get_or_try_init<F>(&mut self, schema: &Arc<Schema>, f: F) -> StepResult<&T>
    where
        F: FnOnce(&Arc<Schema>) -> StepResult<T>,
    {
        let hit = matches!(&self.cached, Some((source, _)) if Arc::ptr_eq(source, schema));
        if !hit {
            let value = f(schema)?;
            self.cached = Some((Arc::clone(schema), value));
        }
        match &self.cached {
            Some((_, value)) => Ok(value),
            None => Err(StepError::fatal("schema-derived state missing")),
        }
    }
}

impl<T> Default for SchemaBound<T> {
    fn default() -> Self {
        Self::new()
    }
}
