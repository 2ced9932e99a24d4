//! Service pipelines queryable as virtual tables.
//!
//! A [`ServiceDescriptor`] names a pipeline graph and the step whose output
//! is the table. Field mappings let a query push conditions into the
//! service's variables, so a source step can filter at the origin.

use crate::pipeline::graph::PipelineGraph;
use crate::pipeline::schema::Schema;
use crate::sql::error::{SqlError, SqlResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// How a pushed-down condition is written into its variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushDownKind {
    /// `WHERE <fragment>`
    Sql,
    /// `{ <fragment> }`
    Json,
}

/// Binds a table field to a service variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    /// Field name as used in queries.
    pub field: String,
    /// Field name written into the fragment; defaults to `field`.
    #[serde(default)]
    pub target_field: Option<String>,
    pub variable: String,
    pub kind: PushDownKind,
}

impl FieldMapping {
    pub fn new(field: impl Into<String>, variable: impl Into<String>, kind: PushDownKind) -> Self {
        Self {
            field: field.into(),
            target_field: None,
            variable: variable.into(),
            kind,
        }
    }

    pub fn with_target_field(mut self, target: impl Into<String>) -> Self {
        self.target_field = Some(target.into());
        self
    }

    pub fn target(&self) -> &str {
        self.target_field.as_deref().unwrap_or(&self.field)
    }
}

/// A virtual table backed by a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub name: String,
    pub graph: PipelineGraph,
    /// Step whose rows form the table.
    pub output_step: String,
    /// Schema of the output step's rows.
    pub schema: Schema,
    #[serde(default)]
    pub mappings: Vec<FieldMapping>,
}

impl ServiceDescriptor {
    pub fn new(
        name: impl Into<String>,
        graph: PipelineGraph,
        output_step: impl Into<String>,
        schema: Schema,
    ) -> Self {
        Self {
            name: name.into(),
            graph,
            output_step: output_step.into(),
            schema,
            mappings: Vec::new(),
        }
    }

    pub fn with_mapping(mut self, mapping: FieldMapping) -> Self {
        self.mappings.push(mapping);
        self
    }

    pub fn mapping_for(&self, field: &str) -> Option<&FieldMapping> {
        self.mappings.iter().find(|m| m.field == field)
    }

    /// Check that the output step and every mapped field exist.
    pub fn validate(&self) -> SqlResult<()> {
        if self.graph.find(&self.output_step).is_none() {
            return Err(SqlError::UnknownField {
                field: self.output_step.clone(),
                table: self.name.clone(),
            });
        }
        if let Some(m) = self
            .mappings
            .iter()
            .find(|m| self.schema.index_of(&m.field).is_none())
        {
            return Err(SqlError::UnknownField {
                field: m.field.clone(),
                table: self.name.clone(),
            });
        }
        Ok(())
    }
}

/// Variables to start a service with.
///
/// Every mapped variable defaults to the empty string, caller parameters
/// override the defaults and pushed-down fragments override both.
pub fn service_parameters(
    service: &ServiceDescriptor,
    caller: &BTreeMap<String, String>,
    pushed: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut parameters: BTreeMap<String, String> = service
        .mappings
        .iter()
        .map(|m| (m.variable.clone(), String::new()))
        .collect();
    parameters.extend(caller.iter().map(|(k, v)| (k.clone(), v.clone())));
    parameters.extend(pushed.iter().map(|(k, v)| (k.clone(), v.clone())));
    parameters
}

/// Registered services by name; lookups ignore ASCII case.
#[derive(Debug, Clone, Default)]
pub struct ServiceCatalog {
    services: HashMap<String, ServiceDescriptor>,
}

impl ServiceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a service.
    pub fn register(&mut self, service: ServiceDescriptor) -> SqlResult<()> {
        service.validate()?;
        tracing::debug!("Registered service '{}'", service.name);
        self.services.insert(service.name.to_ascii_lowercase(), service);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ServiceDescriptor> {
        self.services.get(&name.to_ascii_lowercase())
    }

    pub fn resolve(&self, name: &str) -> SqlResult<&ServiceDescriptor> {
        self.get(name)
            .ok_or_else(|| SqlError::UnknownService(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.services.values().map(|s| s.name.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}
