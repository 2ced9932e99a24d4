//! MappingStep: runs a nested pipeline as a single step.
//!
//! The nested graph exchanges rows with the enclosing step through two
//! boundary nodes:
//! - the `mapping_input` node receives every row the mapping step reads,
//!   with input renames applied;
//! - the `mapping_output` node writes directly into the mapping step's
//!   output queues, with output renames applied.
//!
//! Further boundaries can be bound to named parent steps: an
//! [`InputBoundary`] receives only the rows coming from one parent step, an
//! [`OutputBoundary`] writes only to one parent step. The main boundaries
//! handle every other input and output.
//!
//! The nested pipeline shares the parent's stop and pause signals (a parent
//! stop stops the child) and sees the parent's variables through its own
//! space. Errors in the child surface in the parent as a single `Bridge`
//! failure carrying the child's error count.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::graph::PipelineGraph;
use crate::pipeline::orchestrator::{Pipeline, RowProducer};
use crate::pipeline::schema::Schema;
use crate::pipeline::step::{ProcessOutcome, Step, StepContext, StepError, StepResult};
use crate::pipeline::step_kind::BuiltinKind;
use crate::pipeline::steps::{row_schema, SchemaBound};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRename {
    pub from: String,
    pub to: String,
}

impl FieldRename {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// A nested input boundary fed by one parent step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputBoundary {
    /// Parent step whose rows this boundary receives.
    pub source_step: String,
    /// Boundary step in the nested graph.
    pub target_step: String,
    /// Parent field -> child field.
    #[serde(default)]
    pub renames: Vec<FieldRename>,
}

impl InputBoundary {
    pub fn new(source_step: impl Into<String>, target_step: impl Into<String>) -> Self {
        Self {
            source_step: source_step.into(),
            target_step: target_step.into(),
            renames: Vec::new(),
        }
    }

    pub fn renamed(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.renames.push(FieldRename::new(from, to));
        self
    }
}

/// A nested output boundary writing to one parent step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputBoundary {
    /// Boundary step in the nested graph.
    pub source_step: String,
    /// Parent step receiving the rows; must follow the mapping step.
    pub target_step: String,
    /// Child field -> parent field.
    #[serde(default)]
    pub renames: Vec<FieldRename>,
}

impl OutputBoundary {
    pub fn new(source_step: impl Into<String>, target_step: impl Into<String>) -> Self {
        Self {
            source_step: source_step.into(),
            target_step: target_step.into(),
            renames: Vec::new(),
        }
    }

    pub fn renamed(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.renames.push(FieldRename::new(from, to));
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingConfig {
    pub graph: PipelineGraph,
    /// Name of the main input boundary; found by kind when absent.
    pub input_step: Option<String>,
    /// Name of the main output boundary; found by kind when absent.
    pub output_step: Option<String>,
    /// Parent field -> child field, on the main input.
    pub input_renames: Vec<FieldRename>,
    /// Child field -> parent field, on the main output.
    pub output_renames: Vec<FieldRename>,
    /// Input boundaries bound to named parent steps.
    pub inputs: Vec<InputBoundary>,
    /// Output boundaries bound to named parent steps.
    pub outputs: Vec<OutputBoundary>,
    /// Variables set in the child, `${var}` substituted in the parent.
    pub parameters: BTreeMap<String, String>,
}

fn pairs(renames: &[FieldRename]) -> Vec<(String, String)> {
    renames
        .iter()
        .map(|r| (r.from.clone(), r.to.clone()))
        .collect()
}

/// One wired input boundary of a running child.
struct Feed {
    producer: RowProducer,
    renames: Vec<FieldRename>,
    schema: SchemaBound<Arc<Schema>>,
}

impl Feed {
    fn new(producer: RowProducer, renames: &[FieldRename]) -> Self {
        Self {
            producer,
            renames: renames.to_vec(),
            schema: SchemaBound::new(),
        }
    }

    fn renamed(&mut self, schema: &Arc<Schema>) -> StepResult<Arc<Schema>> {
        let renames = &self.renames;
        let renamed = self.schema.get_or_try_init(schema, |s| {
            if let Some(missing) = renames.iter().find(|r| s.index_of(&r.from).is_none()) {
                return Err(StepError::fatal(format!(
                    "mapping input field '{}' not found in {}",
                    missing.from, s
                )));
            }
            Ok(Arc::new(s.renamed(&pairs(renames))))
        })?;
        Ok(Arc::clone(renamed))
    }
}

pub struct MappingStep {
    config: MappingConfig,
    child: Option<Pipeline>,
    feeds: Vec<Feed>,
    /// Feed index of each parent input.
    routes: Vec<usize>,
}

impl MappingStep {
    pub fn new(config: MappingConfig) -> Self {
        Self {
            config,
            child: None,
            feeds: Vec::new(),
            routes: Vec::new(),
        }
    }

    /// Locate a main boundary by configured name, else by kind among the
    /// steps no named boundary claims.
    fn boundary(
        &self,
        configured: Option<&str>,
        kind: BuiltinKind,
        claimed: &[&str],
    ) -> StepResult<Option<String>> {
        let graph = &self.config.graph;
        if let Some(name) = configured {
            return match graph.find(name) {
                Some(_) => Ok(Some(name.to_string())),
                None => Err(StepError::Config(format!(
                    "mapping boundary '{}' not found in '{}'",
                    name, graph.name
                ))),
            };
        }
        let found: Vec<&str> = graph
            .find_by_kind(kind.id())
            .into_iter()
            .filter_map(|id| graph.node(id).map(|n| n.name.as_str()))
            .filter(|name| !claimed.contains(name))
            .collect();
        match found.as_slice() {
            [] => Ok(None),
            [name] => Ok(Some(name.to_string())),
            _ => Err(StepError::Config(format!(
                "'{}' has {} {} steps; name the one to use",
                graph.name,
                found.len(),
                kind.id()
            ))),
        }
    }

    /// Assign every parent input to a feed: a named boundary for its source
    /// step, the main boundary otherwise.
    fn route_inputs(&self, ctx: &StepContext, main: Option<usize>) -> StepResult<Vec<usize>> {
        for input in &self.config.inputs {
            let source = Some(input.source_step.as_str());
            let connected = (0..ctx.input_count()).any(|i| ctx.input_source(i) == source);
            if !connected {
                return Err(StepError::Config(format!(
                    "mapping input source '{}' does not feed '{}'",
                    input.source_step,
                    ctx.name()
                )));
            }
        }
        (0..ctx.input_count())
            .map(|i| {
                let source = ctx.input_source(i);
                let named = self
                    .config
                    .inputs
                    .iter()
                    .position(|input| source == Some(input.source_step.as_str()));
                named.or(main).ok_or_else(|| {
                    StepError::Config(format!(
                        "'{}' has no {} step for the rows of '{}'",
                        self.config.graph.name,
                        BuiltinKind::MappingInput.id(),
                        source.unwrap_or(ctx.name())
                    ))
                })
            })
            .collect()
    }

    /// Prepare the child, wire every boundary and start it. Returns the
    /// feeds, named inputs first and the main input last.
    fn start_child(
        &self,
        child: &mut Pipeline,
        ctx: &mut StepContext,
        input: Option<&str>,
        output: Option<&str>,
    ) -> PipelineResult<Vec<Feed>> {
        child.prepare(&self.config.graph)?;
        let mut feeds = Vec::new();
        for boundary in &self.config.inputs {
            let producer = child.add_external_producer(&boundary.target_step)?;
            feeds.push(Feed::new(producer, &boundary.renames));
        }
        if let Some(step) = input {
            let producer = child.add_external_producer(step)?;
            feeds.push(Feed::new(producer, &self.config.input_renames));
        }

        let mut router = ctx.take_outputs();
        for boundary in &self.config.outputs {
            let split = router.split_targets(&boundary.target_step);
            if split.target_count() == 0 {
                return Err(PipelineError::Step {
                    name: ctx.name().to_string(),
                    message: format!("output step '{}' does not follow it", boundary.target_step),
                });
            }
            let split = split.with_renames(pairs(&boundary.renames));
            child.forward_output(&boundary.source_step, split)?;
        }
        if let Some(step) = output {
            child.forward_output(step, router.with_renames(pairs(&self.config.output_renames)))?;
        }
        child.start()?;
        Ok(feeds)
    }

    /// Wait for the child and turn its outcome into the step result.
    fn finish_child(&mut self) -> StepResult<ProcessOutcome> {
        for mut feed in self.feeds.drain(..) {
            feed.producer.finish();
        }
        let Some(child) = self.child.as_mut() else {
            return Ok(ProcessOutcome::Finished);
        };
        let result = child
            .wait_until_finished()
            .map_err(|e| StepError::fatal(e.to_string()))?;
        if result.errors > 0 {
            return Err(StepError::Bridge {
                pipeline: result.pipeline,
                errors: result.errors,
            });
        }
        if result.stopped {
            return Err(StepError::Stopped);
        }
        Ok(ProcessOutcome::Finished)
    }
}

impl Step for MappingStep {
    fn init(&mut self, ctx: &mut StepContext) -> StepResult<()> {
        let claimed_inputs: Vec<&str> =
            self.config.inputs.iter().map(|b| b.target_step.as_str()).collect();
        let claimed_outputs: Vec<&str> =
            self.config.outputs.iter().map(|b| b.source_step.as_str()).collect();
        let input = self.boundary(
            self.config.input_step.as_deref(),
            BuiltinKind::MappingInput,
            &claimed_inputs,
        )?;
        let output = self.boundary(
            self.config.output_step.as_deref(),
            BuiltinKind::MappingOutput,
            &claimed_outputs,
        )?;
        let main = input.as_ref().map(|_| self.config.inputs.len());
        let routes = self.route_inputs(ctx, main)?;

        let name = format!("{}/{}", ctx.pipeline_name(), self.config.graph.name);
        let mut child = Pipeline::new(name, Arc::clone(ctx.registry()), Arc::clone(ctx.config()));
        child.set_parent_variables(Arc::clone(ctx.variables()));
        for (key, value) in &self.config.parameters {
            child.set_variable(key.clone(), ctx.substitute(value));
        }
        child.share_pause_signal(ctx.pause_signal().clone());
        ctx.stop_signal().link(child.stop_signal());

        let feeds = self
            .start_child(&mut child, ctx, input.as_deref(), output.as_deref())
            .map_err(|e| StepError::Config(format!("mapping '{}': {}", ctx.name(), e)))?;

        tracing::debug!(
            "Step '{}' started sub-pipeline '{}' with {} input(s)",
            ctx.name(),
            child.name(),
            feeds.len()
        );
        self.feeds = feeds;
        self.routes = routes;
        self.child = Some(child);
        Ok(())
    }

    fn process_row(&mut self, ctx: &mut StepContext) -> StepResult<ProcessOutcome> {
        let Some((input, row)) = ctx.get_row_with_input()? else {
            return self.finish_child();
        };
        let schema = row_schema(ctx)?;
        let Some(feed) = self.routes.get(input).and_then(|&i| self.feeds.get_mut(i)) else {
            return Err(StepError::fatal(format!(
                "input {} of '{}' has no boundary",
                input,
                ctx.name()
            )));
        };
        let schema = feed.renamed(&schema)?;
        if let Err(err) = feed.producer.put(&schema, row) {
            // The child ended on its own; its outcome explains why.
            if !ctx.is_stopped() {
                self.finish_child()?;
            }
            return Err(err.into());
        }
        Ok(ProcessOutcome::Continue)
    }

    fn stop_running(&mut self, _ctx: &mut StepContext) {
        if let Some(child) = &self.child {
            child.stop_all();
        }
    }

    fn dispose(&mut self, _ctx: &mut StepContext) {
        self.feeds.clear();
        if let Some(mut child) = self.child.take() {
            if !child.is_finished() {
                child.stop_all();
            }
            let _ = child.wait_until_finished();
        }
    }
}
