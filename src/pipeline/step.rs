//! Step abstraction for the pipeline.
//!
//! Two-layer design:
//! - **`Step` trait**: implemented by every step kind, including custom
//!   kinds registered at runtime.
//! - **`BuiltinStep` enum**: dispatch over the built-in steps without a
//!   trait object on the per-row path.
//!
//! `AnyStep` wraps either variant so the runtime can handle both uniformly.
//!
//! A step sees the rest of the pipeline only through its [`StepContext`]:
//! the input queues, the output router, the error output, the stop signal,
//! the variable space and the engine configuration.

use crate::config::EngineConfig;
use crate::pipeline::graph::Distribution;
use crate::pipeline::listener::StepListener;
use crate::pipeline::queue::{receive_any, PauseSignal, QueueError, RowReceiver, RowSender, StopSignal};
use crate::pipeline::registry::StepRegistry;
use crate::pipeline::schema::{FieldMeta, Row, Schema};
use crate::pipeline::steps::BuiltinStep;
use crate::pipeline::value::{Value, ValueType};
use crate::pipeline::variables::VariableSpace;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Result of one `process_row` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Call `process_row` again.
    Continue,
    /// The step has no more work.
    Finished,
}

/// A row that failed processing, routed to the error hop when one exists.
#[derive(Debug, Clone)]
pub struct RowError {
    pub schema: Arc<Schema>,
    pub row: Row,
    pub code: String,
    pub message: String,
    pub field: Option<String>,
}

impl fmt::Display for RowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)?;
        if let Some(field) = &self.field {
            write!(f, " (field '{}')", field)?;
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum StepError {
    /// Row-level failure; the step keeps running when it has an error hop.
    #[error("row rejected: {0}")]
    Row(Box<RowError>),

    #[error("{0}")]
    Fatal(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// A nested pipeline finished with errors.
    #[error("sub-pipeline '{pipeline}' finished with {errors} error(s)")]
    Bridge { pipeline: String, errors: u64 },

    #[error("queue error: {0}")]
    Queue(QueueError),

    /// The pipeline was stopped while the step was blocked.
    #[error("step stopped")]
    Stopped,
}

impl StepError {
    /// Build a row-level failure.
    pub fn row(
        schema: &Arc<Schema>,
        row: Row,
        code: impl Into<String>,
        message: impl Into<String>,
        field: Option<&str>,
    ) -> Self {
        StepError::Row(Box::new(RowError {
            schema: Arc::clone(schema),
            row,
            code: code.into(),
            message: message.into(),
            field: field.map(str::to_string),
        }))
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        StepError::Fatal(message.into())
    }

    pub fn is_row_level(&self) -> bool {
        matches!(self, StepError::Row(_))
    }

    /// Number of errors this failure adds to the step's error count.
    pub fn error_count(&self) -> u64 {
        match self {
            StepError::Bridge { errors, .. } => (*errors).max(1),
            StepError::Stopped => 0,
            _ => 1,
        }
    }
}

impl From<QueueError> for StepError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Cancelled => StepError::Stopped,
            other => StepError::Queue(other),
        }
    }
}

pub type StepResult<T> = std::result::Result<T, StepError>;

/// Trait for step implementations.
pub trait Step: Send {
    /// Called once on the step's own thread before the first row.
    fn init(&mut self, _ctx: &mut StepContext) -> StepResult<()> {
        Ok(())
    }

    /// Do one unit of work, usually reading one row and writing zero or more.
    fn process_row(&mut self, ctx: &mut StepContext) -> StepResult<ProcessOutcome>;

    /// Release resources. Runs on every exit path.
    fn dispose(&mut self, _ctx: &mut StepContext) {}

    /// Called once when the runtime observes a stop.
    fn stop_running(&mut self, _ctx: &mut StepContext) {}
}

/// Wrapper that holds either a built-in step (enum dispatch) or a plugin (trait object).
pub enum AnyStep {
    Builtin(BuiltinStep),
    Plugin(Box<dyn Step>),
}

impl Step for AnyStep {
    fn init(&mut self, ctx: &mut StepContext) -> StepResult<()> {
        match self {
            AnyStep::Builtin(s) => s.init(ctx),
            AnyStep::Plugin(s) => s.init(ctx),
        }
    }

    fn process_row(&mut self, ctx: &mut StepContext) -> StepResult<ProcessOutcome> {
        match self {
            AnyStep::Builtin(s) => s.process_row(ctx),
            AnyStep::Plugin(s) => s.process_row(ctx),
        }
    }

    fn dispose(&mut self, ctx: &mut StepContext) {
        match self {
            AnyStep::Builtin(s) => s.dispose(ctx),
            AnyStep::Plugin(s) => s.dispose(ctx),
        }
    }

    fn stop_running(&mut self, ctx: &mut StepContext) {
        match self {
            AnyStep::Builtin(s) => s.stop_running(ctx),
            AnyStep::Plugin(s) => s.stop_running(ctx),
        }
    }
}

// ─── Status ─────────────────────────────────────────────────────────────────

/// Lifecycle state of one step copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StepState {
    Init,
    Running,
    Paused,
    Done,
    Stopped,
    Errored,
}

impl StepState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => StepState::Init,
            1 => StepState::Running,
            2 => StepState::Done,
            3 => StepState::Stopped,
            5 => StepState::Paused,
            _ => StepState::Errored,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            StepState::Init => 0,
            StepState::Running => 1,
            StepState::Done => 2,
            StepState::Stopped => 3,
            StepState::Errored => 4,
            StepState::Paused => 5,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, StepState::Done | StepState::Stopped | StepState::Errored)
    }
}

/// Live counters of one step copy, shared between its thread and observers.
#[derive(Debug)]
pub struct StepStatus {
    name: String,
    copy: usize,
    state: AtomicU8,
    lines_read: AtomicU64,
    lines_written: AtomicU64,
    lines_rejected: AtomicU64,
    errors: AtomicU64,
}

impl StepStatus {
    pub fn new(name: impl Into<String>, copy: usize) -> Self {
        Self {
            name: name.into(),
            copy,
            state: AtomicU8::new(StepState::Init.as_u8()),
            lines_read: AtomicU64::new(0),
            lines_written: AtomicU64::new(0),
            lines_rejected: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn copy(&self) -> usize {
        self.copy
    }

    pub fn state(&self) -> StepState {
        StepState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: StepState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn add_errors(&self, n: u64) {
        self.errors.fetch_add(n, Ordering::Relaxed);
    }

    pub fn lines_rejected(&self) -> u64 {
        self.lines_rejected.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StepStatusSnapshot {
        StepStatusSnapshot {
            name: self.name.clone(),
            copy: self.copy,
            state: self.state(),
            lines_read: self.lines_read.load(Ordering::Relaxed),
            lines_written: self.lines_written.load(Ordering::Relaxed),
            lines_rejected: self.lines_rejected(),
            errors: self.errors(),
        }
    }
}

/// Point-in-time copy of a [`StepStatus`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepStatusSnapshot {
    pub name: String,
    pub copy: usize,
    pub state: StepState,
    pub lines_read: u64,
    pub lines_written: u64,
    pub lines_rejected: u64,
    pub errors: u64,
}

// ─── Output routing ─────────────────────────────────────────────────────────

/// Fan-out of a step's rows to its output queues and listeners.
///
/// Listeners receive every row. Targets receive rows according to the
/// distribution mode. Optional renames are applied to the schema of every
/// row passing through. A router handed to another step can keep counting
/// its rows as written by the step it came from.
pub struct OutputRouter {
    targets: Vec<RowSender>,
    /// Consuming step of each target, when known.
    target_steps: Vec<Option<String>>,
    listeners: Vec<RowSender>,
    distribution: Distribution,
    next: usize,
    renames: Vec<(String, String)>,
    renamed: Option<(Arc<Schema>, Arc<Schema>)>,
    written: Option<Arc<StepStatus>>,
}

impl OutputRouter {
    pub fn new(distribution: Distribution) -> Self {
        Self {
            targets: Vec::new(),
            target_steps: Vec::new(),
            listeners: Vec::new(),
            distribution,
            next: 0,
            renames: Vec::new(),
            renamed: None,
            written: None,
        }
    }

    pub fn add_target(&mut self, sender: RowSender) {
        self.targets.push(sender);
        self.target_steps.push(None);
    }

    /// Add a target feeding the step named `step`.
    pub fn add_step_target(&mut self, step: impl Into<String>, sender: RowSender) {
        self.targets.push(sender);
        self.target_steps.push(Some(step.into()));
    }

    /// Move the targets feeding `step` into a router of their own.
    ///
    /// The split router keeps the distribution mode and the written counter
    /// but none of the listeners.
    pub fn split_targets(&mut self, step: &str) -> OutputRouter {
        let mut split = OutputRouter::new(self.distribution);
        split.written = self.written.clone();
        let mut kept = Vec::new();
        let mut kept_steps = Vec::new();
        for (sender, target) in self.targets.drain(..).zip(self.target_steps.drain(..)) {
            if target.as_deref() == Some(step) {
                split.targets.push(sender);
                split.target_steps.push(target);
            } else {
                kept.push(sender);
                kept_steps.push(target);
            }
        }
        self.targets = kept;
        self.target_steps = kept_steps;
        split
    }

    pub fn add_listener(&mut self, sender: RowSender) {
        self.listeners.push(sender);
    }

    /// Rename fields `(from, to)` in the schema of every routed row.
    pub fn with_renames(mut self, renames: Vec<(String, String)>) -> Self {
        self.renames = renames;
        self.renamed = None;
        self
    }

    /// Count every routed row in `status` as written.
    pub fn counting_into(mut self, status: Arc<StepStatus>) -> Self {
        self.written = Some(status);
        self
    }

    /// Move every target and listener of `other` into this router.
    pub fn absorb(&mut self, mut other: OutputRouter) {
        self.targets.append(&mut other.targets);
        self.target_steps.append(&mut other.target_steps);
        self.listeners.append(&mut other.listeners);
        if self.renames.is_empty() {
            self.renames = std::mem::take(&mut other.renames);
        }
        if self.written.is_none() {
            self.written = other.written.take();
        }
    }

    /// A router onto the same queues through newly registered producers.
    ///
    /// Must be called before this router finishes; each fork finishes
    /// independently.
    pub fn fork(&self) -> OutputRouter {
        OutputRouter {
            targets: self.targets.iter().map(RowSender::fork).collect(),
            target_steps: self.target_steps.clone(),
            listeners: self.listeners.iter().map(RowSender::fork).collect(),
            distribution: self.distribution,
            next: 0,
            renames: self.renames.clone(),
            renamed: None,
            written: self.written.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty() && self.listeners.is_empty()
    }

    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    fn output_schema(&mut self, schema: &Arc<Schema>) -> Arc<Schema> {
        if self.renames.is_empty() {
            return Arc::clone(schema);
        }
        if let Some((source, renamed)) = &self.renamed {
            if Arc::ptr_eq(source, schema) {
                return Arc::clone(renamed);
            }
        }
        let renamed = Arc::new(schema.renamed(&self.renames));
        self.renamed = Some((Arc::clone(schema), Arc::clone(&renamed)));
        renamed
    }

    /// Route one row. Blocks while a target queue is full.
    pub fn put(&mut self, schema: &Arc<Schema>, row: Row, stop: &StopSignal) -> Result<(), QueueError> {
        let schema = self.output_schema(schema);
        for listener in &self.listeners {
            listener.put(&schema, row.clone(), stop)?;
        }
        match (self.targets.len(), self.distribution) {
            (0, _) => {}
            (1, _) => self.targets[0].put(&schema, row, stop)?,
            (n, Distribution::Distribute) => {
                let target = self.next % n;
                self.next = self.next.wrapping_add(1);
                self.targets[target].put(&schema, row, stop)?
            }
            (n, Distribution::Copy) => {
                for target in &self.targets[..n - 1] {
                    target.put(&schema, row.clone(), stop)?;
                }
                self.targets[n - 1].put(&schema, row, stop)?
            }
        }
        if let Some(status) = &self.written {
            status.lines_written.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Finish every sender. Safe to call more than once.
    pub fn finish(&mut self) {
        for sender in self.targets.iter_mut().chain(self.listeners.iter_mut()) {
            sender.finish();
        }
    }
}

impl Default for OutputRouter {
    fn default() -> Self {
        Self::new(Distribution::Distribute)
    }
}

// ─── Context ────────────────────────────────────────────────────────────────

/// Everything a step copy can reach while it runs.
pub struct StepContext {
    name: String,
    copy: usize,
    pipeline: String,
    inputs: Vec<RowReceiver>,
    /// Producing step of each input, when it is part of the pipeline.
    input_sources: Vec<Option<String>>,
    input_schema: Option<Arc<Schema>>,
    outputs: OutputRouter,
    error_output: Option<OutputRouter>,
    error_schema: Option<(Arc<Schema>, Arc<Schema>)>,
    stop: StopSignal,
    pause: PauseSignal,
    listeners: Vec<Arc<dyn StepListener>>,
    variables: Arc<VariableSpace>,
    registry: Arc<StepRegistry>,
    config: Arc<EngineConfig>,
    status: Arc<StepStatus>,
}

impl StepContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pipeline: impl Into<String>,
        name: impl Into<String>,
        copy: usize,
        distribution: Distribution,
        stop: StopSignal,
        variables: Arc<VariableSpace>,
        registry: Arc<StepRegistry>,
        config: Arc<EngineConfig>,
        status: Arc<StepStatus>,
    ) -> Self {
        Self {
            name: name.into(),
            copy,
            pipeline: pipeline.into(),
            inputs: Vec::new(),
            input_sources: Vec::new(),
            input_schema: None,
            outputs: OutputRouter::new(distribution),
            error_output: None,
            error_schema: None,
            stop,
            pause: PauseSignal::new(),
            listeners: Vec::new(),
            variables,
            registry,
            config,
            status,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn copy(&self) -> usize {
        self.copy
    }

    pub fn pipeline_name(&self) -> &str {
        &self.pipeline
    }

    // ── Wiring (before the step thread starts) ──

    pub(crate) fn add_input(&mut self, source: Option<&str>, receiver: RowReceiver) {
        self.inputs.push(receiver);
        self.input_sources.push(source.map(str::to_string));
    }

    pub(crate) fn set_pause_signal(&mut self, pause: PauseSignal) {
        self.pause = pause;
    }

    pub(crate) fn add_step_listener(&mut self, listener: Arc<dyn StepListener>) {
        self.listeners.push(listener);
    }

    pub(crate) fn outputs_mut(&mut self) -> &mut OutputRouter {
        &mut self.outputs
    }

    pub(crate) fn error_output_mut(&mut self) -> &mut OutputRouter {
        self.error_output
            .get_or_insert_with(|| OutputRouter::new(Distribution::Distribute))
    }

    /// Merge an externally built router into this step's outputs.
    pub fn forward_output(&mut self, router: OutputRouter) {
        self.outputs.absorb(router);
    }

    /// Take this step's output router, leaving an empty one behind.
    ///
    /// Whoever holds the returned router becomes responsible for finishing it.
    /// Rows sent through it still count as written by this step.
    pub fn take_outputs(&mut self) -> OutputRouter {
        let distribution = self.outputs.distribution;
        std::mem::replace(&mut self.outputs, OutputRouter::new(distribution))
            .counting_into(Arc::clone(&self.status))
    }

    // ── Rows ──

    /// Next row from any input, or `None` once every input has ended.
    ///
    /// A step without inputs sees end of stream immediately.
    pub fn get_row(&mut self) -> StepResult<Option<Row>> {
        Ok(self.get_row_with_input()?.map(|(_, row)| row))
    }

    /// Like [`get_row`](Self::get_row), also returning the index of the
    /// input the row came from.
    pub fn get_row_with_input(&mut self) -> StepResult<Option<(usize, Row)>> {
        match receive_any(&mut self.inputs, &self.stop)? {
            Some((input, row)) => {
                let current = self.input_schema.as_ref();
                let source = self.inputs[input].schema();
                if let Some(source) = source {
                    if current.map_or(true, |c| !Arc::ptr_eq(c, &source)) {
                        self.input_schema = Some(source);
                    }
                }
                self.status.lines_read.fetch_add(1, Ordering::Relaxed);
                Ok(Some((input, row)))
            }
            None => Ok(None),
        }
    }

    /// Schema of the most recently read row.
    pub fn input_schema(&self) -> Option<&Arc<Schema>> {
        self.input_schema.as_ref()
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    /// Name of the step feeding input `index`; `None` for external producers.
    pub fn input_source(&self, index: usize) -> Option<&str> {
        self.input_sources.get(index).and_then(|s| s.as_deref())
    }

    /// Send a row downstream. Blocks while an output queue is full.
    pub fn put_row(&mut self, schema: &Arc<Schema>, row: Row) -> StepResult<()> {
        self.outputs.put(schema, row, &self.stop)?;
        self.status.lines_written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn has_error_output(&self) -> bool {
        self.error_output.is_some()
    }

    /// Send a rejected row to the error hop with the error fields appended.
    pub(crate) fn put_error(&mut self, err: RowError) -> StepResult<()> {
        let Some(router) = self.error_output.as_mut() else {
            return Err(StepError::Fatal(err.to_string()));
        };
        let schema = match &self.error_schema {
            Some((source, extended)) if Arc::ptr_eq(source, &err.schema) => Arc::clone(extended),
            _ => {
                let names = &self.config.error_fields;
                let extended = Arc::new(err.schema.extended([
                    FieldMeta::new(names.count.clone(), ValueType::Integer),
                    FieldMeta::new(names.descriptions.clone(), ValueType::String),
                    FieldMeta::new(names.fields.clone(), ValueType::String),
                    FieldMeta::new(names.codes.clone(), ValueType::String),
                ]));
                self.error_schema = Some((Arc::clone(&err.schema), Arc::clone(&extended)));
                extended
            }
        };
        let mut row = err.row;
        row.resize(err.schema.len(), Value::Null);
        row.push(Value::Integer(1));
        row.push(Value::String(err.message));
        row.push(Value::String(err.field.unwrap_or_default()));
        row.push(Value::String(err.code));
        router.put(&schema, row, &self.stop)?;
        self.status.lines_rejected.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub(crate) fn finish_outputs(&mut self) {
        self.outputs.finish();
        if let Some(errors) = self.error_output.as_mut() {
            errors.finish();
        }
    }

    // ── Environment ──

    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    /// Stop the whole pipeline this step belongs to.
    pub fn stop_all(&self) {
        self.stop.stop();
    }

    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    pub fn pause_signal(&self) -> &PauseSignal {
        &self.pause
    }

    /// Block while the pipeline is paused, reporting the copy as `Paused`.
    ///
    /// Returns `false` when a stop ends the wait.
    pub(crate) fn wait_while_paused(&self) -> bool {
        if !self.pause.is_paused() {
            return true;
        }
        tracing::debug!("Step '{}' copy {} paused", self.name, self.copy);
        self.status.set_state(StepState::Paused);
        let resumed = self.pause.wait(&self.stop);
        if resumed {
            self.status.set_state(StepState::Running);
            tracing::debug!("Step '{}' copy {} resumed", self.name, self.copy);
        }
        resumed
    }

    pub(crate) fn notify_started(&self) {
        let status = self.status.snapshot();
        for listener in &self.listeners {
            listener.step_started(&status);
        }
    }

    pub(crate) fn notify_finished(&self) {
        let status = self.status.snapshot();
        for listener in &self.listeners {
            listener.step_finished(&status);
        }
    }

    pub fn variable(&self, name: &str) -> Option<&str> {
        self.variables.get(name)
    }

    /// Replace `${name}` references with variable values.
    pub fn substitute(&self, text: &str) -> String {
        self.variables.substitute(text)
    }

    pub fn variables(&self) -> &Arc<VariableSpace> {
        &self.variables
    }

    pub fn registry(&self) -> &Arc<StepRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &Arc<EngineConfig> {
        &self.config
    }

    pub fn status(&self) -> &Arc<StepStatus> {
        &self.status
    }
}
