//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;

use rowflow_rs::config::EngineConfig;
use rowflow_rs::pipeline::{
    Pipeline, PipelineGraph, Row, RunResult, Schema, StepRegistry, Value, ValueType,
};
use std::sync::Arc;
use std::time::Duration;

/// Create a test timeout duration
pub fn test_timeout() -> Duration {
    Duration::from_millis(100)
}

/// Assert two floats are approximately equal
pub fn assert_float_eq(a: f64, b: f64, epsilon: f64) {
    assert!(
        (a - b).abs() < epsilon,
        "Expected {} to be approximately equal to {} (epsilon: {})",
        a,
        b,
        epsilon
    );
}

pub fn pipeline(name: &str) -> Pipeline {
    Pipeline::new(
        name,
        Arc::new(StepRegistry::new()),
        Arc::new(EngineConfig::default()),
    )
}

/// Single-field string schema.
pub fn text_schema(name: &str) -> Arc<Schema> {
    Arc::new(Schema::of(&[(name, ValueType::String)]))
}

pub fn text_rows(values: &[&str]) -> Vec<Row> {
    values.iter().map(|v| vec![Value::from(*v)]).collect()
}

/// Feed `rows` into step `input` of `graph` and collect what step `output`
/// writes.
pub fn run_rows(
    graph: &PipelineGraph,
    input: &str,
    output: &str,
    schema: &Arc<Schema>,
    rows: Vec<Row>,
) -> (Vec<Row>, RunResult) {
    run_rows_with(pipeline(&graph.name), graph, input, output, schema, rows)
}

/// Like [`run_rows`], on a caller-configured pipeline.
pub fn run_rows_with(
    mut p: Pipeline,
    graph: &PipelineGraph,
    input: &str,
    output: &str,
    schema: &Arc<Schema>,
    rows: Vec<Row>,
) -> (Vec<Row>, RunResult) {
    p.prepare(graph).expect("prepare");
    let mut producer = p.add_external_producer(input).expect("producer");
    let mut listener = p.add_listener(output).expect("listener");
    p.start().expect("start");

    let schema = Arc::clone(schema);
    let feeder = std::thread::spawn(move || {
        for row in rows {
            if producer.put(&schema, row).is_err() {
                break;
            }
        }
        producer.finish();
    });
    let out = listener.collect_rows().unwrap_or_default();
    feeder.join().expect("feeder thread");
    let result = p.wait_until_finished().expect("wait");
    (out, result)
}
