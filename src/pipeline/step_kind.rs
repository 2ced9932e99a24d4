//! Built-in step kinds.
//!
//! Each kind has a stable string id used in [`StepNode::kind`] and in
//! serialized graphs.
//!
//! [`StepNode::kind`]: crate::pipeline::graph::StepNode

use serde::{Deserialize, Serialize};

/// Kinds of steps the registry can create without registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinKind {
    // Boundaries
    /// Entry point fed by an external producer.
    Injector,
    /// Pass-through; also used as the result boundary.
    Dummy,
    /// Input boundary of a sub-pipeline.
    MappingInput,
    /// Output boundary of a sub-pipeline.
    MappingOutput,

    // Sources
    DataGrid,

    // Transforms
    FilterRows,
    UniqueRows,
    SortRows,
    GroupBy,
    Limit,
    SelectValues,
    AddConstants,

    // Composition
    /// Runs a nested pipeline per copy.
    Mapping,
}

impl BuiltinKind {
    /// Registry id of this kind.
    pub fn id(&self) -> &'static str {
        match self {
            BuiltinKind::Injector => "injector",
            BuiltinKind::Dummy => "dummy",
            BuiltinKind::MappingInput => "mapping_input",
            BuiltinKind::MappingOutput => "mapping_output",
            BuiltinKind::DataGrid => "data_grid",
            BuiltinKind::FilterRows => "filter_rows",
            BuiltinKind::UniqueRows => "unique_rows",
            BuiltinKind::SortRows => "sort_rows",
            BuiltinKind::GroupBy => "group_by",
            BuiltinKind::Limit => "limit",
            BuiltinKind::SelectValues => "select_values",
            BuiltinKind::AddConstants => "add_constants",
            BuiltinKind::Mapping => "mapping",
        }
    }

    pub fn from_id(id: &str) -> Option<BuiltinKind> {
        Self::all().iter().copied().find(|k| k.id() == id)
    }

    /// Get the display name for this kind.
    pub fn display_name(&self) -> &'static str {
        match self {
            BuiltinKind::Injector => "Injector",
            BuiltinKind::Dummy => "Dummy",
            BuiltinKind::MappingInput => "Mapping Input",
            BuiltinKind::MappingOutput => "Mapping Output",
            BuiltinKind::DataGrid => "Data Grid",
            BuiltinKind::FilterRows => "Filter Rows",
            BuiltinKind::UniqueRows => "Unique Rows",
            BuiltinKind::SortRows => "Sort Rows",
            BuiltinKind::GroupBy => "Group By",
            BuiltinKind::Limit => "Limit",
            BuiltinKind::SelectValues => "Select Values",
            BuiltinKind::AddConstants => "Add Constants",
            BuiltinKind::Mapping => "Mapping",
        }
    }

    /// Get all built-in kinds.
    pub fn all() -> &'static [BuiltinKind] {
        &[
            BuiltinKind::Injector,
            BuiltinKind::Dummy,
            BuiltinKind::MappingInput,
            BuiltinKind::MappingOutput,
            BuiltinKind::DataGrid,
            BuiltinKind::FilterRows,
            BuiltinKind::UniqueRows,
            BuiltinKind::SortRows,
            BuiltinKind::GroupBy,
            BuiltinKind::Limit,
            BuiltinKind::SelectValues,
            BuiltinKind::AddConstants,
            BuiltinKind::Mapping,
        ]
    }

    /// Kinds that only forward their input unchanged.
    pub fn is_pass_through(&self) -> bool {
        matches!(
            self,
            BuiltinKind::Injector
                | BuiltinKind::Dummy
                | BuiltinKind::MappingInput
                | BuiltinKind::MappingOutput
        )
    }

    /// Get a detailed description of what this step does.
    pub fn description(&self) -> &'static str {
        match self {
            BuiltinKind::Injector =>
                "Receives rows from an external producer.\n\
                 Forwards them unchanged downstream.",

            BuiltinKind::Dummy =>
                "Forwards rows unchanged.\n\
                 Useful as a result boundary for listeners.",

            BuiltinKind::MappingInput =>
                "Input boundary of a sub-pipeline.\n\
                 Receives the rows of the calling mapping step.",

            BuiltinKind::MappingOutput =>
                "Output boundary of a sub-pipeline.\n\
                 Rows leave through the calling step's hops.",

            BuiltinKind::DataGrid =>
                "Emits a fixed set of rows.\n\
                 Fields and values are part of the configuration.",

            BuiltinKind::FilterRows =>
                "Keeps rows matching a condition.\n\
                 Comparison failures are rejected rows.",

            BuiltinKind::UniqueRows =>
                "Removes adjacent duplicate rows.\n\
                 Input should be sorted on the compared fields.\n\
                 Can count or reject duplicates.",

            BuiltinKind::SortRows =>
                "Sorts all rows in memory.\n\
                 Stable; per-field direction and case sensitivity.",

            BuiltinKind::GroupBy =>
                "Aggregates rows per group in memory.\n\
                 COUNT, SUM, AVG, MIN, MAX and distinct counts.",

            BuiltinKind::Limit =>
                "Passes at most N rows after skipping an offset.\n\
                 Keeps draining its input.",

            BuiltinKind::SelectValues =>
                "Selects, reorders, renames and converts fields.\n\
                 Failed conversions are rejected rows.",

            BuiltinKind::AddConstants =>
                "Appends constant fields to every row.\n\
                 Values may reference ${variables}.",

            BuiltinKind::Mapping =>
                "Runs a nested pipeline for its rows.\n\
                 Renames fields at the boundaries.",
        }
    }
}

impl std::fmt::Display for BuiltinKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}
