//! Pipeline orchestrator: prepares a graph into step copies and queues,
//! runs every copy on its own named thread and collects the outcome.
//!
//! Lifecycle: `Idle --prepare--> Prepared --start--> Running
//! --wait_until_finished--> Finished`. External producers, listeners and
//! cross-pipeline attachments are wired between `prepare` and `start`.

use crate::config::EngineConfig;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::graph::{Distribution, PipelineGraph};
use crate::pipeline::id::{NodeId, RuntimeId};
use crate::pipeline::listener::{PipelineListener, StepListener};
use crate::pipeline::queue::{
    receive_any, PauseSignal, QueueError, RowQueue, RowReceiver, StopSignal,
};
use crate::pipeline::registry::StepRegistry;
use crate::pipeline::runtime::StepRuntime;
use crate::pipeline::schema::{Row, Schema};
use crate::pipeline::step::{
    AnyStep, OutputRouter, StepContext, StepState, StepStatus, StepStatusSnapshot,
};
use crate::pipeline::variables::VariableSpace;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Lifecycle state of a [`Pipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Prepared,
    Running,
    Finished,
}

impl PipelineState {
    fn name(&self) -> &'static str {
        match self {
            PipelineState::Idle => "Idle",
            PipelineState::Prepared => "Prepared",
            PipelineState::Running => "Running",
            PipelineState::Finished => "Finished",
        }
    }
}

/// Outcome of a finished run.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub pipeline: String,
    /// Sum of the error counts of every step copy.
    pub errors: u64,
    /// True when no step reported an error.
    pub success: bool,
    /// True when at least one step copy ended because of a stop.
    pub stopped: bool,
    pub steps: Vec<StepStatusSnapshot>,
    pub duration: Duration,
}

struct PreparedStep {
    node: NodeId,
    step: AnyStep,
    ctx: StepContext,
}

/// A runnable instance of a [`PipelineGraph`].
pub struct Pipeline {
    name: String,
    registry: Arc<StepRegistry>,
    config: Arc<EngineConfig>,
    variables: VariableSpace,
    stop: StopSignal,
    pause: PauseSignal,
    listeners: Vec<Arc<dyn PipelineListener>>,
    state: PipelineState,
    graph: Option<PipelineGraph>,
    /// Runtime ids of each node's copies, indexed by node.
    copies: Vec<Vec<RuntimeId>>,
    prepared: Vec<PreparedStep>,
    statuses: Vec<Arc<StepStatus>>,
    handles: Vec<JoinHandle<StepState>>,
    started_at: Option<Instant>,
    result: Option<RunResult>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>, registry: Arc<StepRegistry>, config: Arc<EngineConfig>) -> Self {
        Self {
            name: name.into(),
            registry,
            config,
            variables: VariableSpace::new(),
            stop: StopSignal::new(),
            pause: PauseSignal::new(),
            listeners: Vec::new(),
            state: PipelineState::Idle,
            graph: None,
            copies: Vec::new(),
            prepared: Vec::new(),
            statuses: Vec::new(),
            handles: Vec::new(),
            started_at: None,
            result: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn config(&self) -> &Arc<EngineConfig> {
        &self.config
    }

    pub fn graph(&self) -> Option<&PipelineGraph> {
        self.graph.as_ref()
    }

    // ── Variables ──

    /// Set a variable. Takes effect for steps created by the next `prepare`.
    pub fn set_variable(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.variables.set(name, value);
    }

    pub fn set_variables<K, V>(&mut self, vars: impl IntoIterator<Item = (K, V)>)
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.variables.extend(vars);
    }

    /// Fall back to `parent` for variables not set on this pipeline.
    pub fn set_parent_variables(&mut self, parent: Arc<VariableSpace>) {
        let mut space = VariableSpace::with_parent(parent);
        for name in self.variables.local_names().map(str::to_string).collect::<Vec<_>>() {
            if let Some(value) = self.variables.get(&name).map(str::to_string) {
                space.set(name, value);
            }
        }
        self.variables = space;
    }

    pub fn variable(&self, name: &str) -> Option<&str> {
        self.variables.get(name)
    }

    // ── Preparation ──

    /// Validate `graph` and build every step copy and queue.
    pub fn prepare(&mut self, graph: &PipelineGraph) -> PipelineResult<()> {
        self.expect_state(PipelineState::Idle)?;
        graph.validate()?;

        let variables = Arc::new(self.variables.clone());
        let mut copies = vec![Vec::new(); graph.nodes.len()];
        let mut prepared = Vec::new();
        let mut statuses = Vec::new();

        for node_id in graph.node_ids() {
            let node = &graph.nodes[node_id.index()];
            for copy in 0..node.copies {
                let step = self.registry.create(node)?;
                let status = Arc::new(StepStatus::new(node.name.clone(), copy));
                let mut ctx = StepContext::new(
                    self.name.clone(),
                    node.name.clone(),
                    copy,
                    node.distribution,
                    self.stop.clone(),
                    Arc::clone(&variables),
                    Arc::clone(&self.registry),
                    Arc::clone(&self.config),
                    Arc::clone(&status),
                );
                ctx.set_pause_signal(self.pause.clone());
                copies[node_id.index()].push(RuntimeId(prepared.len() as u32));
                prepared.push(PreparedStep {
                    node: node_id,
                    step,
                    ctx,
                });
                statuses.push(status);
            }
        }

        let mut queue_count = 0;
        for hop in &graph.hops {
            let from = &graph.nodes[hop.from.index()];
            let to = &graph.nodes[hop.to.index()];
            let capacity = hop.capacity.unwrap_or(self.config.queue_capacity);
            for (consumer_copy, consumer) in copies[hop.to.index()].iter().enumerate() {
                let queue = RowQueue::new(
                    format!("{}->{}.{}", from.name, to.name, consumer_copy),
                    capacity,
                    &self.stop,
                )
                .with_safe_mode(self.config.safe_mode);
                for producer in &copies[hop.from.index()] {
                    let ctx = &mut prepared[producer.index()].ctx;
                    if hop.error {
                        ctx.error_output_mut().add_target(queue.sender());
                    } else {
                        ctx.outputs_mut().add_step_target(to.name.clone(), queue.sender());
                    }
                }
                prepared[consumer.index()]
                    .ctx
                    .add_input(Some(&from.name), queue.receiver());
                queue_count += 1;
            }
        }

        tracing::info!(
            "Pipeline '{}' prepared: {} steps, {} copies, {} queues",
            self.name,
            graph.nodes.len(),
            prepared.len(),
            queue_count
        );

        self.copies = copies;
        self.prepared = prepared;
        self.statuses = statuses;
        self.graph = Some(graph.clone());
        self.state = PipelineState::Prepared;
        Ok(())
    }

    fn resolve(&self, step: &str) -> PipelineResult<NodeId> {
        self.graph
            .as_ref()
            .and_then(|g| g.find(step))
            .ok_or_else(|| PipelineError::UnknownStep(step.to_string()))
    }

    fn contexts_of(&mut self, node: NodeId) -> impl Iterator<Item = &mut StepContext> {
        self.prepared
            .iter_mut()
            .filter(move |p| p.node == node)
            .map(|p| &mut p.ctx)
    }

    /// Feed rows into `step` from outside the pipeline.
    ///
    /// Rows are distributed round-robin over the step's copies.
    pub fn add_external_producer(&mut self, step: &str) -> PipelineResult<RowProducer> {
        self.expect_state(PipelineState::Prepared)?;
        let node = self.resolve(step)?;
        let capacity = self.config.queue_capacity;
        let safe_mode = self.config.safe_mode;
        let stop = self.stop.clone();
        let mut router = OutputRouter::new(Distribution::Distribute);
        for (copy, ctx) in self.contexts_of(node).enumerate() {
            let queue = RowQueue::new(format!("producer->{}.{}", step, copy), capacity, &stop)
                .with_safe_mode(safe_mode);
            router.add_target(queue.sender());
            ctx.add_input(None, queue.receiver());
        }
        Ok(RowProducer { router, stop })
    }

    /// Observe every row `step` writes, from outside the pipeline.
    ///
    /// The listener must be drained, otherwise the step blocks once the
    /// listener queue is full.
    pub fn add_listener(&mut self, step: &str) -> PipelineResult<RowListener> {
        self.expect_state(PipelineState::Prepared)?;
        let node = self.resolve(step)?;
        let capacity = self.config.queue_capacity;
        let stop = self.stop.clone();
        let mut inputs = Vec::new();
        for (copy, ctx) in self.contexts_of(node).enumerate() {
            let queue = RowQueue::new(format!("{}.{}->listener", step, copy), capacity, &stop);
            ctx.outputs_mut().add_listener(queue.sender());
            inputs.push(queue.receiver());
        }
        Ok(RowListener { inputs, stop })
    }

    /// Use another pipeline's listener as an input of the first copy of `step`.
    pub fn attach_input(&mut self, step: &str, listener: RowListener) -> PipelineResult<()> {
        self.expect_state(PipelineState::Prepared)?;
        let node = self.resolve(step)?;
        let ctx = self
            .contexts_of(node)
            .next()
            .ok_or(PipelineError::NodeNotFound { node_id: node })?;
        for receiver in listener.inputs {
            ctx.add_input(None, receiver);
        }
        Ok(())
    }

    /// Merge `router` into the outputs of every copy of `step`.
    ///
    /// Each extra copy gets a fork of the router, so the downstream queues
    /// end only after every copy has finished.
    pub fn forward_output(&mut self, step: &str, router: OutputRouter) -> PipelineResult<()> {
        self.expect_state(PipelineState::Prepared)?;
        let node = self.resolve(step)?;
        let mut contexts: Vec<&mut StepContext> = self.contexts_of(node).collect();
        let Some((last, rest)) = contexts.split_last_mut() else {
            return Err(PipelineError::NodeNotFound { node_id: node });
        };
        for ctx in rest {
            ctx.forward_output(router.fork());
        }
        last.forward_output(router);
        Ok(())
    }

    /// Observe start and end of this run.
    pub fn add_pipeline_listener(&mut self, listener: Arc<dyn PipelineListener>) {
        self.listeners.push(listener);
    }

    /// Observe start and end of every copy of `step`.
    pub fn add_step_listener(
        &mut self,
        step: &str,
        listener: Arc<dyn StepListener>,
    ) -> PipelineResult<()> {
        self.expect_state(PipelineState::Prepared)?;
        let node = self.resolve(step)?;
        for ctx in self.contexts_of(node) {
            ctx.add_step_listener(Arc::clone(&listener));
        }
        Ok(())
    }

    // ── Execution ──

    /// Spawn one thread per step copy.
    pub fn start(&mut self) -> PipelineResult<()> {
        self.expect_state(PipelineState::Prepared)?;
        self.state = PipelineState::Running;
        self.started_at = Some(Instant::now());
        tracing::info!(
            "Pipeline '{}' starting {} step copies",
            self.name,
            self.prepared.len()
        );

        for prepared in std::mem::take(&mut self.prepared) {
            let thread_name = format!(
                "{}:{}.{}",
                self.name,
                prepared.ctx.name(),
                prepared.ctx.copy()
            );
            let step_name = prepared.ctx.name().to_string();
            let runtime = StepRuntime::new(prepared.step, prepared.ctx);
            match thread::Builder::new()
                .name(thread_name)
                .spawn(move || runtime.run())
            {
                Ok(handle) => self.handles.push(handle),
                Err(source) => {
                    tracing::error!(
                        "Pipeline '{}' failed to spawn step '{}': {}",
                        self.name,
                        step_name,
                        source
                    );
                    self.stop_all();
                    return Err(PipelineError::Spawn {
                        name: step_name,
                        source,
                    });
                }
            }
        }
        for listener in &self.listeners {
            listener.pipeline_started(&self.name);
        }
        Ok(())
    }

    /// Block until every step copy has ended.
    pub fn wait_until_finished(&mut self) -> PipelineResult<RunResult> {
        if let Some(result) = &self.result {
            return Ok(result.clone());
        }
        self.expect_state(PipelineState::Running)?;

        let mut lost = 0;
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                lost += 1;
            }
        }

        let steps = self.step_statuses();
        let errors = steps.iter().map(|s| s.errors).sum::<u64>() + lost;
        let stopped = steps.iter().any(|s| s.state == StepState::Stopped);
        let duration = self.started_at.map(|t| t.elapsed()).unwrap_or_default();
        let result = RunResult {
            pipeline: self.name.clone(),
            errors,
            success: errors == 0,
            stopped,
            steps,
            duration,
        };

        if result.success {
            tracing::info!("Pipeline '{}' finished in {:?}", self.name, duration);
        } else {
            tracing::warn!(
                "Pipeline '{}' finished in {:?} with {} error(s)",
                self.name,
                duration,
                errors
            );
        }

        self.state = PipelineState::Finished;
        for listener in &self.listeners {
            listener.pipeline_finished(&result);
        }
        self.result = Some(result.clone());
        Ok(result)
    }

    /// Prepare, start and wait in one call.
    pub fn run(&mut self, graph: &PipelineGraph) -> PipelineResult<RunResult> {
        self.prepare(graph)?;
        self.start()?;
        self.wait_until_finished()
    }

    /// Stop every step copy. Idempotent and callable from any thread holding
    /// the stop signal.
    pub fn stop_all(&self) {
        if !self.stop.is_stopped() {
            tracing::warn!("Stopping pipeline '{}'", self.name);
        }
        self.stop.stop();
    }

    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    /// Hold every step copy before its next unit of work.
    ///
    /// Rows already queued stay queued. Copies blocked on a queue finish
    /// that operation first. A stop ends the pause.
    pub fn pause_running(&self) {
        if !self.pause.is_paused() {
            tracing::info!("Pausing pipeline '{}'", self.name);
        }
        self.pause.pause();
    }

    pub fn resume_running(&self) {
        if self.pause.is_paused() {
            tracing::info!("Resuming pipeline '{}'", self.name);
        }
        self.pause.resume();
    }

    pub fn is_paused(&self) -> bool {
        self.pause.is_paused()
    }

    /// Pause and resume together with `pause`. Must be called before `prepare`.
    pub fn share_pause_signal(&mut self, pause: PauseSignal) {
        self.pause = pause;
    }

    /// True once every step copy has ended.
    pub fn is_finished(&self) -> bool {
        match self.state {
            PipelineState::Finished => true,
            PipelineState::Running => self.handles.iter().all(JoinHandle::is_finished),
            _ => false,
        }
    }

    /// Current counters of every step copy.
    pub fn step_statuses(&self) -> Vec<StepStatusSnapshot> {
        self.statuses.iter().map(|s| s.snapshot()).collect()
    }

    /// Counters of the copies of one step.
    pub fn step_status(&self, step: &str) -> Vec<StepStatusSnapshot> {
        self.statuses
            .iter()
            .filter(|s| s.name() == step)
            .map(|s| s.snapshot())
            .collect()
    }

    pub fn copies_of(&self, step: &str) -> usize {
        self.resolve(step)
            .ok()
            .and_then(|node| self.copies.get(node.index()))
            .map_or(0, Vec::len)
    }

    fn expect_state(&self, expected: PipelineState) -> PipelineResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(PipelineError::InvalidState {
                pipeline: self.name.clone(),
                expected: expected.name(),
                actual: self.state.name(),
            })
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if self.handles.is_empty() {
            return;
        }
        self.stop.stop();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

// ─── External endpoints ─────────────────────────────────────────────────────

/// Feeds rows into a pipeline step from outside.
///
/// Dropping the producer finishes it.
pub struct RowProducer {
    router: OutputRouter,
    stop: StopSignal,
}

impl RowProducer {
    /// Put one row, blocking while the target queue is full.
    pub fn put(&mut self, schema: &Arc<Schema>, row: Row) -> Result<(), QueueError> {
        self.router.put(schema, row, &self.stop)
    }

    /// Signal that no more rows follow.
    pub fn finish(&mut self) {
        self.router.finish();
    }
}

/// Receives a copy of every row a step writes.
pub struct RowListener {
    inputs: Vec<RowReceiver>,
    stop: StopSignal,
}

impl RowListener {
    /// Next row, `Ok(None)` once the step has finished.
    pub fn next_row(&mut self) -> Result<Option<Row>, QueueError> {
        Ok(receive_any(&mut self.inputs, &self.stop)?.map(|(_, row)| row))
    }

    /// Schema of the rows seen so far.
    pub fn schema(&self) -> Option<Arc<Schema>> {
        self.inputs.iter().find_map(RowReceiver::schema)
    }

    /// Drain every remaining row.
    pub fn collect_rows(&mut self) -> Result<Vec<Row>, QueueError> {
        let mut rows = Vec::new();
        while let Some(row) = self.next_row()? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Call `f` for every remaining row.
    pub fn for_each_row<F>(&mut self, mut f: F) -> Result<(), QueueError>
    where
        F: FnMut(Row),
    {
        while let Some(row) = self.next_row()? {
            f(row);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::graph::StepNode;
    use crate::pipeline::step::{ProcessOutcome, Step, StepError, StepResult};
    use crate::pipeline::value::{Value, ValueType};

    fn pipeline(name: &str) -> Pipeline {
        Pipeline::new(name, Arc::new(StepRegistry::new()), Arc::new(EngineConfig::default()))
    }

    fn int_schema() -> Arc<Schema> {
        Arc::new(Schema::of(&[("n", ValueType::Integer)]))
    }

    #[test]
    fn test_producer_to_listener() {
        let mut graph = PipelineGraph::new("pass");
        graph.chain([StepNode::new("in", "injector"), StepNode::new("out", "dummy")]);

        let mut p = pipeline("pass");
        p.prepare(&graph).unwrap();
        let mut producer = p.add_external_producer("in").unwrap();
        let mut listener = p.add_listener("out").unwrap();
        p.start().unwrap();

        let schema = int_schema();
        for i in 0..5 {
            producer.put(&schema, vec![Value::Integer(i)]).unwrap();
        }
        producer.finish();

        let rows = listener.collect_rows().unwrap();
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[4], vec![Value::Integer(4)]);
        assert_eq!(listener.schema().unwrap().index_of("n"), Some(0));

        let result = p.wait_until_finished().unwrap();
        assert!(result.success);
        assert!(!result.stopped);
        assert!(p.is_finished());
        assert!(result.steps.iter().all(|s| s.state == StepState::Done));
    }

    #[test]
    fn test_state_machine_is_enforced() {
        let mut p = pipeline("p");
        assert!(matches!(p.start(), Err(PipelineError::InvalidState { .. })));
        assert!(p.wait_until_finished().is_err());

        let mut graph = PipelineGraph::new("g");
        graph.add_step(StepNode::new("a", "dummy"));
        p.prepare(&graph).unwrap();
        assert!(p.prepare(&graph).is_err());
        assert!(p.add_listener("missing").is_err());
        p.start().unwrap();
        assert!(p.start().is_err());
        assert!(p.wait_until_finished().unwrap().success);
    }

    struct Boom;

    impl Step for Boom {
        fn process_row(&mut self, _ctx: &mut StepContext) -> StepResult<ProcessOutcome> {
            Err(StepError::fatal("boom"))
        }
    }

    struct Panics;

    impl Step for Panics {
        fn process_row(&mut self, _ctx: &mut StepContext) -> StepResult<ProcessOutcome> {
            panic!("kaboom");
        }
    }

    #[test]
    fn test_fatal_step_stops_pipeline() {
        let mut registry = StepRegistry::new();
        registry.register("boom", |_: &StepNode| Ok(Box::new(Boom) as Box<dyn Step>));
        registry.register("panics", |_: &StepNode| Ok(Box::new(Panics) as Box<dyn Step>));

        for kind in ["boom", "panics"] {
            let mut graph = PipelineGraph::new("g");
            graph.chain([StepNode::new("in", "injector"), StepNode::new("bad", kind)]);
            let mut p = Pipeline::new("g", Arc::new(registry.clone()), Arc::new(EngineConfig::default()));
            p.prepare(&graph).unwrap();
            // Never finished: only the stop can end the injector.
            let _producer = p.add_external_producer("in").unwrap();
            p.start().unwrap();

            let result = p.wait_until_finished().unwrap();
            assert!(!result.success);
            assert_eq!(result.errors, 1);
            assert!(result.stopped);
            let bad = p.step_status("bad");
            assert_eq!(bad[0].state, StepState::Errored);
        }
    }

    #[test]
    fn test_copies_share_rows() {
        let mut graph = PipelineGraph::new("copies");
        graph.chain([
            StepNode::new("in", "injector"),
            StepNode::new("work", "dummy").with_copies(3),
            StepNode::new("out", "dummy"),
        ]);
        let mut p = pipeline("copies");
        p.prepare(&graph).unwrap();
        assert_eq!(p.copies_of("work"), 3);
        let mut producer = p.add_external_producer("in").unwrap();
        let mut listener = p.add_listener("out").unwrap();
        p.start().unwrap();

        let schema = int_schema();
        for i in 0..30 {
            producer.put(&schema, vec![Value::Integer(i)]).unwrap();
        }
        drop(producer);

        let mut values: Vec<i64> = listener
            .collect_rows()
            .unwrap()
            .into_iter()
            .filter_map(|r| r[0].as_i64())
            .collect();
        values.sort();
        assert_eq!(values, (0..30).collect::<Vec<_>>());
        let result = p.wait_until_finished().unwrap();
        assert!(result.success);
        assert!(p
            .step_status("work")
            .iter()
            .all(|s| s.lines_read == 10 && s.state == StepState::Done));
    }

    #[test]
    fn test_listener_reports_cancellation() {
        let mut graph = PipelineGraph::new("cut");
        graph.chain([StepNode::new("in", "injector"), StepNode::new("out", "dummy")]);
        let mut p = pipeline("cut");
        p.prepare(&graph).unwrap();
        let mut producer = p.add_external_producer("in").unwrap();
        let mut listener = p.add_listener("out").unwrap();
        p.start().unwrap();
        producer.put(&int_schema(), vec![Value::Integer(1)]).unwrap();
        assert_eq!(listener.next_row().unwrap(), Some(vec![Value::Integer(1)]));

        p.stop_all();
        assert_eq!(listener.next_row(), Err(QueueError::Cancelled));
        assert_eq!(listener.collect_rows(), Err(QueueError::Cancelled));
        assert!(p.wait_until_finished().unwrap().stopped);
    }

    fn wait_for_state(p: &Pipeline, step: &str, state: StepState) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while p.step_status(step).iter().any(|s| s.state != state) {
            assert!(Instant::now() < deadline, "'{}' never reached {:?}", step, state);
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_pause_holds_rows_until_resume() {
        let mut graph = PipelineGraph::new("paused");
        graph.chain([StepNode::new("in", "injector"), StepNode::new("out", "dummy")]);
        let mut p = pipeline("paused");
        p.prepare(&graph).unwrap();
        let mut producer = p.add_external_producer("in").unwrap();
        let mut listener = p.add_listener("out").unwrap();
        p.pause_running();
        p.start().unwrap();
        wait_for_state(&p, "in", StepState::Paused);
        wait_for_state(&p, "out", StepState::Paused);

        let schema = int_schema();
        for i in 0..3 {
            producer.put(&schema, vec![Value::Integer(i)]).unwrap();
        }
        producer.finish();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(p.step_status("in")[0].lines_read, 0);
        assert!(p.is_paused());

        p.resume_running();
        assert!(!p.is_paused());
        assert_eq!(listener.collect_rows().unwrap().len(), 3);
        let result = p.wait_until_finished().unwrap();
        assert!(result.success);
        assert!(result.steps.iter().all(|s| s.state == StepState::Done));
    }

    #[test]
    fn test_stop_ends_pause() {
        let mut graph = PipelineGraph::new("paused");
        graph.chain([StepNode::new("in", "injector"), StepNode::new("out", "dummy")]);
        let mut p = pipeline("paused");
        p.prepare(&graph).unwrap();
        let _producer = p.add_external_producer("in").unwrap();
        p.pause_running();
        p.start().unwrap();
        wait_for_state(&p, "out", StepState::Paused);

        p.stop_all();
        let result = p.wait_until_finished().unwrap();
        assert!(result.stopped);
        assert!(result.steps.iter().all(|s| s.state == StepState::Stopped));
    }

    #[derive(Default)]
    struct Recorder {
        events: std::sync::Mutex<Vec<String>>,
    }

    impl Recorder {
        fn push(&self, event: String) {
            self.events.lock().unwrap().push(event);
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    impl PipelineListener for Recorder {
        fn pipeline_started(&self, pipeline: &str) {
            self.push(format!("started {pipeline}"));
        }

        fn pipeline_finished(&self, result: &RunResult) {
            self.push(format!("finished {} success={}", result.pipeline, result.success));
        }
    }

    impl StepListener for Recorder {
        fn step_started(&self, status: &StepStatusSnapshot) {
            self.push(format!("step started {}.{}", status.name, status.copy));
        }

        fn step_finished(&self, status: &StepStatusSnapshot) {
            self.push(format!(
                "step finished {}.{} {:?} read={}",
                status.name, status.copy, status.state, status.lines_read
            ));
        }
    }

    #[test]
    fn test_listeners_see_lifecycle() {
        let mut graph = PipelineGraph::new("observed");
        graph.chain([
            StepNode::new("in", "injector"),
            StepNode::new("work", "dummy").with_copies(2),
        ]);
        let recorder = Arc::new(Recorder::default());
        let mut p = pipeline("observed");
        p.add_pipeline_listener(recorder.clone());
        p.prepare(&graph).unwrap();
        p.add_step_listener("work", recorder.clone()).unwrap();
        assert!(p.add_step_listener("missing", recorder.clone()).is_err());
        let mut producer = p.add_external_producer("in").unwrap();
        p.start().unwrap();

        let schema = int_schema();
        for i in 0..4 {
            producer.put(&schema, vec![Value::Integer(i)]).unwrap();
        }
        producer.finish();
        assert!(p.wait_until_finished().unwrap().success);

        let events = recorder.events();
        assert_eq!(events.len(), 6);
        assert!(events.contains(&"started observed".to_string()));
        assert!(events.contains(&"step started work.0".to_string()));
        assert!(events.contains(&"step started work.1".to_string()));
        assert!(events.contains(&"step finished work.0 Done read=2".to_string()));
        assert!(events.contains(&"step finished work.1 Done read=2".to_string()));
        assert_eq!(events.last().unwrap(), "finished observed success=true");
    }

    #[test]
    fn test_stop_all_unblocks_waiting_steps() {
        let mut graph = PipelineGraph::new("idle");
        graph.chain([StepNode::new("in", "injector"), StepNode::new("out", "dummy")]);
        let mut p = pipeline("idle");
        p.prepare(&graph).unwrap();
        let _producer = p.add_external_producer("in").unwrap();
        p.start().unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert!(!p.is_finished());

        p.stop_all();
        p.stop_all();
        let result = p.wait_until_finished().unwrap();
        assert!(result.stopped);
        assert!(result.success);
    }
}
