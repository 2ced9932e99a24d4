//! Test data builders for graphs and services

use rowflow_rs::pipeline::steps::DataGridConfig;
use rowflow_rs::pipeline::{FieldMeta, PipelineGraph, Schema, StepNode, ValueType};
use rowflow_rs::sql::{FieldMapping, ServiceDescriptor};

/// Builder for `data_grid` steps
pub struct GridBuilder {
    name: String,
    config: DataGridConfig,
}

impl GridBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            config: DataGridConfig::default(),
        }
    }

    pub fn field(mut self, name: &str, value_type: ValueType) -> Self {
        self.config.fields.push(FieldMeta::new(name, value_type));
        self
    }

    pub fn row(mut self, cells: Vec<serde_json::Value>) -> Self {
        self.config.rows.push(cells);
        self
    }

    pub fn schema(&self) -> Schema {
        Schema::new(self.config.fields.clone())
    }

    pub fn build(self) -> StepNode {
        StepNode::new(self.name, "data_grid")
            .with_config(&self.config)
            .expect("grid config serializes")
    }
}

/// Builder for services reading a grid, optionally through extra steps
pub struct ServiceBuilder {
    name: String,
    grid: GridBuilder,
    steps: Vec<StepNode>,
    schema: Option<Schema>,
    mappings: Vec<FieldMapping>,
}

impl ServiceBuilder {
    pub fn new(name: &str, grid: GridBuilder) -> Self {
        Self {
            name: name.to_string(),
            grid,
            steps: Vec::new(),
            schema: None,
            mappings: Vec::new(),
        }
    }

    /// Insert a step between the grid and the output step.
    pub fn step(mut self, node: StepNode) -> Self {
        self.steps.push(node);
        self
    }

    /// Output schema, when the extra steps change the grid's.
    pub fn schema(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn mapping(mut self, mapping: FieldMapping) -> Self {
        self.mappings.push(mapping);
        self
    }

    pub fn build(self) -> ServiceDescriptor {
        let schema = self.schema.unwrap_or_else(|| self.grid.schema());
        let mut graph = PipelineGraph::new(self.name.clone());
        let mut nodes = vec![self.grid.build()];
        nodes.extend(self.steps);
        nodes.push(StepNode::new("out", "dummy"));
        graph.chain(nodes);

        let mut service = ServiceDescriptor::new(self.name, graph, "out", schema);
        for mapping in self.mappings {
            service = service.with_mapping(mapping);
        }
        service
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_builder() {
        let grid = GridBuilder::new("grid")
            .field("id", ValueType::Integer)
            .row(vec![serde_json::json!(1)]);
        let service = ServiceBuilder::new("ids", grid).build();

        assert_eq!(service.output_step, "out");
        assert_eq!(service.graph.nodes.len(), 2);
        assert!(service.validate().is_ok());
    }
}
