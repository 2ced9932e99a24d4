//! # rowflow-rs: embeddable row pipeline engine
//!
//! Runs graphs of row-processing steps, one thread per step copy, connected
//! by bounded queues. Whole graphs can be nested inside a step (`mapping`)
//! and a small SQL dialect can be compiled into a pipeline that reads from a
//! registered service pipeline.
//!
//! ## Architecture
//!
//! - **Pipeline**: graph, queues, step runtimes and the orchestrator
//! - **Steps**: built-in kinds plus custom kinds from a registry
//! - **SQL**: parse, resolve against service pipelines, push conditions down
//!   into service parameters, generate and run the query pipeline
//! - **Communication**: crossbeam channels between step threads
//!
//! ## Example
//!
//! ```ignore
//! use rowflow_rs::config::EngineConfig;
//! use rowflow_rs::pipeline::{Pipeline, PipelineGraph, StepNode, StepRegistry};
//! use std::sync::Arc;
//!
//! let mut graph = PipelineGraph::new("copy");
//! graph.chain([StepNode::new("in", "injector"), StepNode::new("out", "dummy")]);
//!
//! let mut pipeline = Pipeline::new(
//!     "copy",
//!     Arc::new(StepRegistry::new()),
//!     Arc::new(EngineConfig::default()),
//! );
//! pipeline.prepare(&graph)?;
//! let mut producer = pipeline.add_external_producer("in")?;
//! let mut listener = pipeline.add_listener("out")?;
//! pipeline.start()?;
//! // put rows, finish the producer, drain the listener...
//! let result = pipeline.wait_until_finished()?;
//! assert!(result.success);
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod sql;

pub use config::EngineConfig;
pub use error::{EngineError, Result, ResultExt};
pub use pipeline::{Pipeline, PipelineGraph, StepNode, StepRegistry};
pub use sql::{QueryResult, ServiceCatalog, ServiceDescriptor, SqlExecutor};
