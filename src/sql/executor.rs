//! Query execution: ties a generated query pipeline to the service it reads.
//!
//! ```text
//!   service pipeline                      query pipeline
//! ┌──────────────────────┐  listener   ┌───────────────────────────────┐
//! │ ... -> output_step ──┼────────────▶│ injector -> ... -> result ──┼──▶ rows
//! └──────────────────────┘   queue     └───────────────────────────────┘
//! ```
//!
//! Queries over `dual` have no service pipeline; a single empty row is fed
//! into the injector instead.

use crate::config::EngineConfig;
use crate::pipeline::cache::BoundedCache;
use crate::pipeline::orchestrator::{Pipeline, RowListener, RowProducer, RunResult};
use crate::pipeline::registry::StepRegistry;
use crate::pipeline::schema::{Row, Schema};
use crate::sql::error::{SqlError, SqlResult};
use crate::sql::generator::{self, GeneratedQuery, INJECTOR_STEP, RESULT_STEP};
use crate::sql::parser::{self, Query, DUAL};
use crate::sql::pushdown::{push_down, PushDown};
use crate::sql::service::{service_parameters, ServiceCatalog, ServiceDescriptor};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Lifecycle state of a [`QueryExecution`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    Parsed,
    Resolved,
    Generated,
    Running,
    Finished,
}

impl QueryState {
    pub fn name(&self) -> &'static str {
        match self {
            QueryState::Parsed => "Parsed",
            QueryState::Resolved => "Resolved",
            QueryState::Generated => "Generated",
            QueryState::Running => "Running",
            QueryState::Finished => "Finished",
        }
    }
}

/// Outcome of a finished query.
#[derive(Debug, Clone)]
pub struct QueryResult {
    /// True when neither pipeline reported an error.
    pub success: bool,
    pub errors: u64,
    /// Run of the service pipeline; `None` for `dual`.
    pub service: Option<RunResult>,
    pub query: RunResult,
}

/// Rows and outcome of a query run to completion.
#[derive(Debug, Clone)]
pub struct QueryOutput {
    pub schema: Arc<Schema>,
    pub rows: Vec<Row>,
    pub result: QueryResult,
}

/// Compiles SQL into pipelines over a catalog of services.
///
/// Parsed queries and generated graphs are cached per executor.
pub struct SqlExecutor {
    catalog: Arc<ServiceCatalog>,
    registry: Arc<StepRegistry>,
    config: Arc<EngineConfig>,
    parsed: BoundedCache<String, Arc<Query>>,
    generated: BoundedCache<String, Arc<GeneratedQuery>>,
}

impl SqlExecutor {
    pub fn new(
        catalog: Arc<ServiceCatalog>,
        registry: Arc<StepRegistry>,
        config: Arc<EngineConfig>,
    ) -> Self {
        let capacity = config.cache_capacity;
        Self {
            catalog,
            registry,
            config,
            parsed: BoundedCache::new(capacity),
            generated: BoundedCache::new(capacity),
        }
    }

    pub fn catalog(&self) -> &ServiceCatalog {
        &self.catalog
    }

    /// Parse, resolve and generate `sql`. The returned execution is ready
    /// to [`start`](QueryExecution::start).
    ///
    /// `parameters` are passed to the service pipeline; pushed-down
    /// conditions override them.
    pub fn execute(
        &self,
        sql: &str,
        parameters: &BTreeMap<String, String>,
    ) -> SqlResult<QueryExecution> {
        let parsed = self
            .parsed
            .get_or_try_insert(sql.to_string(), || parser::parse(sql).map(Arc::new))?;
        tracing::debug!("Query {}: {}", QueryState::Parsed.name(), parsed);

        let service = parsed
            .table
            .as_deref()
            .map(|name| self.catalog.resolve(name).cloned())
            .transpose()?;
        let (schema, table) = match &service {
            Some(service) => (service.schema.clone(), service.name.as_str()),
            None => (Schema::empty(), DUAL),
        };
        let resolved = generator::resolve(&parsed, &schema, table)?;
        tracing::debug!("Query {}: {}", QueryState::Resolved.name(), resolved);

        let PushDown {
            parameters: pushed,
            residual,
            ..
        } = match &service {
            Some(service) => push_down(resolved.condition.clone(), service)?,
            None => PushDown {
                residual: resolved.condition.clone(),
                ..PushDown::default()
            },
        };
        let service_parameters = service
            .as_ref()
            .map(|s| service_parameters(s, parameters, &pushed))
            .unwrap_or_default();
        for (variable, value) in &pushed {
            tracing::debug!("Pushed down {} = {}", variable, value);
        }

        let local = Query {
            condition: residual,
            ..resolved
        };
        let name = format!("sql: {}", local);
        let generated = self.generated.get_or_try_insert(name.clone(), || {
            generator::generate(&name, &local, local.condition.as_ref(), &schema).map(Arc::new)
        })?;
        tracing::debug!("Query {}: {}", QueryState::Generated.name(), name);

        Ok(QueryExecution {
            sql: sql.to_string(),
            state: QueryState::Generated,
            schema: Arc::new(generated.schema.clone()),
            generated,
            service,
            service_parameters,
            registry: Arc::clone(&self.registry),
            config: Arc::clone(&self.config),
            service_pipeline: None,
            pipeline: None,
            results: None,
            result: None,
        })
    }

    /// Run `sql` to completion and collect its rows.
    pub fn query(
        &self,
        sql: &str,
        parameters: &BTreeMap<String, String>,
    ) -> SqlResult<QueryOutput> {
        let mut execution = self.execute(sql, parameters)?;
        execution.start()?;
        let rows = execution.collect_rows();
        let result = execution.wait_until_finished()?;
        Ok(QueryOutput {
            schema: Arc::clone(execution.schema()),
            rows: rows?,
            result,
        })
    }
}

/// One run of a generated query.
pub struct QueryExecution {
    sql: String,
    state: QueryState,
    schema: Arc<Schema>,
    generated: Arc<GeneratedQuery>,
    service: Option<ServiceDescriptor>,
    service_parameters: BTreeMap<String, String>,
    registry: Arc<StepRegistry>,
    config: Arc<EngineConfig>,
    service_pipeline: Option<Pipeline>,
    pipeline: Option<Pipeline>,
    results: Option<RowListener>,
    result: Option<QueryResult>,
}

impl QueryExecution {
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn state(&self) -> QueryState {
        self.state
    }

    /// Schema of the result rows.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// The generated query graph.
    pub fn generated(&self) -> &GeneratedQuery {
        &self.generated
    }

    /// Variables the service pipeline is started with.
    pub fn service_parameters(&self) -> &BTreeMap<String, String> {
        &self.service_parameters
    }

    /// Prepare and start the service and query pipelines.
    pub fn start(&mut self) -> SqlResult<()> {
        self.expect_state(QueryState::Generated)?;
        let graph = &self.generated.graph;
        let mut pipeline = Pipeline::new(
            graph.name.clone(),
            Arc::clone(&self.registry),
            Arc::clone(&self.config),
        );
        pipeline.prepare(graph)?;

        let mut service_pipeline = None;
        let mut producer = None;
        match &self.service {
            Some(service) => {
                let mut upstream = Pipeline::new(
                    service.name.clone(),
                    Arc::clone(&self.registry),
                    Arc::clone(&self.config),
                );
                upstream.set_variables(self.service_parameters.clone());
                upstream.prepare(&service.graph)?;
                let listener = upstream.add_listener(&service.output_step)?;
                pipeline.attach_input(INJECTOR_STEP, listener)?;
                upstream.stop_signal().link(pipeline.stop_signal());
                pipeline.stop_signal().link(upstream.stop_signal());
                service_pipeline = Some(upstream);
            }
            None => producer = Some(pipeline.add_external_producer(INJECTOR_STEP)?),
        }
        self.results = Some(pipeline.add_listener(RESULT_STEP)?);

        pipeline.start()?;
        self.pipeline = Some(pipeline);
        if let Some(upstream) = service_pipeline.as_mut() {
            if let Err(e) = upstream.start() {
                self.stop_all();
                return Err(e.into());
            }
        }
        self.service_pipeline = service_pipeline;
        self.state = QueryState::Running;
        tracing::info!("Query running: {}", self.sql);

        if let Some(producer) = producer {
            Self::inject_dual_row(producer)?;
        }
        Ok(())
    }

    fn inject_dual_row(mut producer: RowProducer) -> SqlResult<()> {
        producer.put(&Arc::new(Schema::empty()), Row::new())?;
        producer.finish();
        Ok(())
    }

    /// Next result row, `Ok(None)` once the query has produced everything.
    pub fn next_row(&mut self) -> SqlResult<Option<Row>> {
        self.expect_state(QueryState::Running)?;
        match self.results.as_mut() {
            Some(results) => Ok(results.next_row()?),
            None => Ok(None),
        }
    }

    /// Drain every remaining result row.
    pub fn collect_rows(&mut self) -> SqlResult<Vec<Row>> {
        let mut rows = Vec::new();
        self.for_each_row(|row| rows.push(row))?;
        Ok(rows)
    }

    /// Call `f` for every remaining result row.
    pub fn for_each_row<F>(&mut self, f: F) -> SqlResult<()>
    where
        F: FnMut(Row),
    {
        self.expect_state(QueryState::Running)?;
        if let Some(results) = self.results.as_mut() {
            results.for_each_row(f)?;
        }
        Ok(())
    }

    /// Wait for both pipelines. Unread result rows are discarded.
    pub fn wait_until_finished(&mut self) -> SqlResult<QueryResult> {
        if let Some(result) = &self.result {
            return Ok(result.clone());
        }
        self.expect_state(QueryState::Running)?;

        if let Some(mut results) = self.results.take() {
            if let Err(e) = results.for_each_row(drop) {
                tracing::debug!("Result stream ended early: {}", e);
            }
        }
        let service = match self.service_pipeline.as_mut() {
            Some(upstream) => Some(upstream.wait_until_finished()?),
            None => None,
        };
        let query = match self.pipeline.as_mut() {
            Some(pipeline) => pipeline.wait_until_finished()?,
            None => {
                return Err(SqlError::InvalidState {
                    expected: QueryState::Running.name(),
                    actual: self.state.name(),
                })
            }
        };

        let errors = query.errors + service.as_ref().map_or(0, |s| s.errors);
        let result = QueryResult {
            success: errors == 0,
            errors,
            service,
            query,
        };
        if result.success {
            tracing::info!("Query finished: {}", self.sql);
        } else {
            tracing::warn!("Query finished with {} error(s): {}", errors, self.sql);
        }
        self.state = QueryState::Finished;
        self.result = Some(result.clone());
        Ok(result)
    }

    /// Stop both pipelines.
    pub fn stop_all(&self) {
        if let Some(pipeline) = &self.pipeline {
            pipeline.stop_all();
        }
        if let Some(upstream) = &self.service_pipeline {
            upstream.stop_all();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state == QueryState::Finished
            || (self.pipeline.as_ref().is_some_and(Pipeline::is_finished)
                && self
                    .service_pipeline
                    .as_ref()
                    .map_or(true, Pipeline::is_finished))
    }

    fn expect_state(&self, expected: QueryState) -> SqlResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(SqlError::InvalidState {
                expected: expected.name(),
                actual: self.state.name(),
            })
        }
    }
}

impl Drop for QueryExecution {
    fn drop(&mut self) {
        if self.state == QueryState::Running {
            self.stop_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::graph::{PipelineGraph, StepNode};
    use crate::pipeline::steps::DataGridConfig;
    use crate::pipeline::value::{Value, ValueType};
    use crate::sql::service::{FieldMapping, PushDownKind};

    fn executor() -> SqlExecutor {
        let schema = Schema::of(&[("id", ValueType::Integer), ("name", ValueType::String)]);
        let grid = DataGridConfig {
            fields: schema.fields().to_vec(),
            rows: vec![
                vec![serde_json::json!(1), serde_json::json!("a")],
                vec![serde_json::json!(2), serde_json::json!("b")],
                vec![serde_json::json!(3), serde_json::json!("c")],
            ],
        };
        let mut graph = PipelineGraph::new("people");
        graph.chain([
            StepNode::new("grid", "data_grid").with_config(&grid).unwrap(),
            StepNode::new("out", "dummy"),
        ]);
        let service = ServiceDescriptor::new("people", graph, "out", schema)
            .with_mapping(FieldMapping::new("id", "ID_FILTER", PushDownKind::Sql));
        let mut catalog = ServiceCatalog::new();
        catalog.register(service).unwrap();
        SqlExecutor::new(
            Arc::new(catalog),
            Arc::new(StepRegistry::new()),
            Arc::new(EngineConfig::default()),
        )
    }

    #[test]
    fn test_state_transitions() {
        let exec = executor();
        let mut q = exec.execute("SELECT name FROM people", &BTreeMap::new()).unwrap();
        assert_eq!(q.state(), QueryState::Generated);
        assert!(matches!(q.next_row(), Err(SqlError::InvalidState { .. })));

        q.start().unwrap();
        assert_eq!(q.state(), QueryState::Running);
        let rows = q.collect_rows().unwrap();
        assert_eq!(rows.len(), 3);
        let result = q.wait_until_finished().unwrap();
        assert!(result.success);
        assert_eq!(q.state(), QueryState::Finished);
        assert!(matches!(q.start(), Err(SqlError::InvalidState { .. })));
    }

    #[test]
    fn test_pushdown_sets_service_parameter() {
        let exec = executor();
        let q = exec
            .execute("SELECT * FROM people WHERE id = 2", &BTreeMap::new())
            .unwrap();
        assert_eq!(q.service_parameters()["ID_FILTER"], "WHERE id = 2");
        // The condition went to the service; nothing is left to filter locally.
        assert!(q.generated().graph.find("where").is_none());
    }

    #[test]
    fn test_caches_are_reused() {
        let exec = executor();
        exec.execute("SELECT id FROM people", &BTreeMap::new()).unwrap();
        exec.execute("SELECT id FROM people", &BTreeMap::new()).unwrap();
        assert_eq!(exec.parsed.len(), 1);
        assert_eq!(exec.generated.len(), 1);
    }

    #[test]
    fn test_unknown_service() {
        let exec = executor();
        assert!(matches!(
            exec.execute("SELECT * FROM nobody", &BTreeMap::new()),
            Err(SqlError::UnknownService(_))
        ));
    }

    #[test]
    fn test_dual_literals() {
        let out = executor()
            .query("SELECT 1 AS one, 'x' AS s FROM dual", &BTreeMap::new())
            .unwrap();
        assert!(out.result.success);
        assert!(out.result.service.is_none());
        assert_eq!(out.rows, vec![vec![Value::Integer(1), Value::String("x".into())]]);
    }
}
