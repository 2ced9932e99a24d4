//! Multi-threaded row pipeline engine.
//!
//! A [`PipelineGraph`] names steps and the hops between them. Preparing it
//! in a [`Pipeline`] creates one [`StepRuntime`] per step copy and one
//! bounded [`RowQueue`] per hop and consumer copy; starting it runs every
//! copy on its own thread.
//!
//! # Architecture
//!
//! ```text
//! [injector] ──► [filter_rows] ──► [sort_rows] ──► [dummy]
//!                      │
//!                      └─(error hop)──► [dummy]
//! ```
//!
//! # Design
//!
//! - **Enum dispatch for built-ins**: `BuiltinStep` covers every built-in
//!   kind; custom kinds go through the `Step` trait and the registry.
//! - **Bounded queues**: producers block while a queue is full; the stop
//!   signal wakes every blocked put and get.
//! - **Schema on the edge**: the first row on a queue fixes its schema and
//!   every later row must conform.
//! - **Nesting**: the `mapping` step runs a whole graph as one step.
//! - **Pause and listeners**: a shared pause gate holds every copy between
//!   units of work; lifecycle listeners observe pipelines and step copies.

pub mod cache;
pub mod condition;
pub mod error;
pub mod graph;
pub mod id;
pub mod listener;
pub mod orchestrator;
pub mod queue;
pub mod registry;
pub mod runtime;
pub mod schema;
pub mod step;
pub mod step_kind;
pub mod steps;
pub mod value;
pub mod variables;

pub use cache::BoundedCache;
pub use condition::{BoundCondition, Condition, ConditionError, Operand, Operator};
pub use error::{PipelineError, PipelineResult};
pub use graph::{Distribution, Hop, PipelineGraph, StepNode};
pub use id::{HopId, NodeId, RuntimeId};
pub use listener::{PipelineListener, StepListener};
pub use orchestrator::{Pipeline, PipelineState, RowListener, RowProducer, RunResult};
pub use queue::{PauseSignal, QueueError, RowQueue, RowReceiver, RowSender, StopSignal};
pub use registry::{StepConstructor, StepRegistry};
pub use runtime::StepRuntime;
pub use schema::{FieldMeta, Row, Schema};
pub use step::{
    AnyStep, OutputRouter, ProcessOutcome, RowError, Step, StepContext, StepError, StepResult,
    StepState, StepStatus, StepStatusSnapshot,
};
pub use step_kind::BuiltinKind;
pub use steps::BuiltinStep;
pub use value::{Value, ValueKey, ValueType};
pub use variables::VariableSpace;
