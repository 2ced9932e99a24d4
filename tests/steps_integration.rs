//! Integration tests for the built-in steps
//!
//! Each test runs a step between an injector and a dummy step and checks
//! the rows that come out.

mod common;

use common::builders::GridBuilder;
use common::{pipeline, run_rows, text_rows, text_schema};
use rowflow_rs::pipeline::steps::{
    AddConstantsConfig, AggregateField, AggregateFunction, ConstantField, GroupByConfig,
    LimitConfig, SelectField, SelectValuesConfig, SortField, SortRowsConfig, UniqueField,
    UniqueRowsConfig,
};
use rowflow_rs::pipeline::{PipelineGraph, Row, Schema, StepNode, Value, ValueType};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

fn step<T: Serialize>(name: &str, kind: &str, config: &T) -> StepNode {
    StepNode::new(name, kind).with_config(config).unwrap()
}

/// `injector -> node -> out`
fn around(node: StepNode) -> PipelineGraph {
    let mut graph = PipelineGraph::new(format!("around-{}", node.name));
    graph.chain([StepNode::new("in", "injector"), node, StepNode::new("out", "dummy")]);
    graph
}

fn sales_schema() -> Arc<Schema> {
    Arc::new(Schema::of(&[
        ("region", ValueType::String),
        ("amount", ValueType::Integer),
    ]))
}

fn sale(region: &str, amount: i64) -> Row {
    vec![Value::from(region), Value::Integer(amount)]
}

// ─── unique_rows ────────────────────────────────────────────────────────────

fn unique_on_k(case_insensitive: bool) -> PipelineGraph {
    around(step(
        "unique",
        "unique_rows",
        &UniqueRowsConfig {
            fields: vec![UniqueField::new("K", case_insensitive)],
            ..Default::default()
        },
    ))
}

#[test]
fn test_unique_rows_case_insensitive() {
    let input = text_rows(&["abc", "ABC", "abc", "ABC"]);
    let (out, result) = run_rows(&unique_on_k(true), "in", "out", &text_schema("K"), input);
    assert!(result.success);
    assert_eq!(out, text_rows(&["abc"]));
}

#[test]
fn test_unique_rows_case_sensitive() {
    let input = text_rows(&["abc", "ABC", "abc", "ABC"]);
    let (out, result) = run_rows(&unique_on_k(false), "in", "out", &text_schema("K"), input.clone());
    assert!(result.success);
    assert_eq!(out, input);
}

#[test]
fn test_unique_rows_counts_runs() {
    let graph = around(step(
        "unique",
        "unique_rows",
        &UniqueRowsConfig {
            count_field: Some("n".into()),
            ..Default::default()
        },
    ));
    let input = text_rows(&["a", "a", "b", "a", "a", "a"]);
    let (out, _) = run_rows(&graph, "in", "out", &text_schema("K"), input);
    assert_eq!(
        out,
        vec![
            vec![Value::from("a"), Value::Integer(2)],
            vec![Value::from("b"), Value::Integer(1)],
            vec![Value::from("a"), Value::Integer(3)],
        ]
    );
}

#[test]
fn test_unique_rows_rejects_duplicates_to_error_hop() {
    let mut graph = PipelineGraph::new("reject");
    let input = graph.add_step(StepNode::new("in", "injector"));
    let unique = graph.add_step(step(
        "unique",
        "unique_rows",
        &UniqueRowsConfig {
            reject_duplicates: true,
            error_description: Some("seen before".into()),
            ..Default::default()
        },
    ));
    let out = graph.add_step(StepNode::new("out", "dummy"));
    let dupes = graph.add_step(StepNode::new("dupes", "dummy"));
    graph.add_hop(input, unique);
    graph.add_hop(unique, out);
    graph.add_error_hop(unique, dupes);

    let mut p = pipeline("reject");
    p.prepare(&graph).unwrap();
    let mut producer = p.add_external_producer("in").unwrap();
    let mut kept = p.add_listener("out").unwrap();
    let mut rejected = p.add_listener("dupes").unwrap();
    p.start().unwrap();

    let schema = text_schema("K");
    for row in text_rows(&["a", "a", "b"]) {
        producer.put(&schema, row).unwrap();
    }
    producer.finish();

    assert_eq!(kept.collect_rows().unwrap(), text_rows(&["a", "b"]));
    let rejected = rejected.collect_rows().unwrap();
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0][2], Value::from("seen before"));
    assert_eq!(rejected[0][4], Value::from("UNIQUE001"));
    assert!(p.wait_until_finished().unwrap().success);
}

// ─── sort_rows ──────────────────────────────────────────────────────────────

#[test]
fn test_sort_rows_is_stable_on_multiple_fields() {
    let graph = around(step(
        "sort",
        "sort_rows",
        &SortRowsConfig {
            fields: vec![SortField::ascending("region"), SortField::descending("amount")],
        },
    ));
    let input = vec![
        sale("south", 1),
        sale("north", 5),
        sale("south", 7),
        sale("north", 5),
        sale("north", 9),
    ];
    let (out, result) = run_rows(&graph, "in", "out", &sales_schema(), input);
    assert!(result.success);
    assert_eq!(
        out,
        vec![
            sale("north", 9),
            sale("north", 5),
            sale("north", 5),
            sale("south", 7),
            sale("south", 1),
        ]
    );
}

#[test]
fn test_sort_rows_unknown_field_fails() {
    let graph = around(step(
        "sort",
        "sort_rows",
        &SortRowsConfig {
            fields: vec![SortField::ascending("missing")],
        },
    ));
    let (out, result) = run_rows(&graph, "in", "out", &sales_schema(), vec![sale("x", 1)]);
    assert!(out.is_empty());
    assert!(!result.success);
}

// ─── group_by ───────────────────────────────────────────────────────────────

#[test]
fn test_group_by_aggregates_in_first_seen_order() {
    let graph = around(step(
        "group",
        "group_by",
        &GroupByConfig {
            group: vec!["region".into()],
            aggregates: vec![
                AggregateField::new("rows", AggregateFunction::CountAll, None),
                AggregateField::new("total", AggregateFunction::Sum, Some("amount")),
                AggregateField::new("mean", AggregateFunction::Avg, Some("amount")),
                AggregateField::new("kinds", AggregateFunction::CountDistinct, Some("amount")),
                AggregateField::new("top", AggregateFunction::Max, Some("amount")),
            ],
        },
    ));
    let input = vec![
        sale("south", 2),
        sale("north", 4),
        sale("south", 2),
        sale("south", 8),
    ];
    let (out, result) = run_rows(&graph, "in", "out", &sales_schema(), input);
    assert!(result.success);
    assert_eq!(out.len(), 2);
    assert_eq!(out[0][0], Value::from("south"));
    assert_eq!(out[0][1], Value::Integer(3));
    assert_eq!(out[0][2], Value::Integer(12));
    common::assert_float_eq(out[0][3].as_f64().unwrap(), 4.0, 1e-9);
    assert_eq!(out[0][4], Value::Integer(2));
    assert_eq!(out[0][5], Value::Integer(8));
    assert_eq!(out[1], vec![
        Value::from("north"),
        Value::Integer(1),
        Value::Integer(4),
        Value::Number(4.0),
        Value::Integer(1),
        Value::Integer(4),
    ]);
}

#[test]
fn test_group_by_without_groups_on_empty_input() {
    let graph = around(step(
        "group",
        "group_by",
        &GroupByConfig {
            group: Vec::new(),
            aggregates: vec![
                AggregateField::new("rows", AggregateFunction::CountAll, None),
                AggregateField::new("total", AggregateFunction::Sum, Some("amount")),
            ],
        },
    ));
    let (out, result) = run_rows(&graph, "in", "out", &sales_schema(), Vec::new());
    assert!(result.success);
    assert_eq!(out, vec![vec![Value::Integer(0), Value::Null]]);
}

// ─── limit ──────────────────────────────────────────────────────────────────

#[test]
fn test_limit_with_offset() {
    let graph = around(step(
        "limit",
        "limit",
        &LimitConfig {
            limit: Some(2),
            offset: 1,
        },
    ));
    let input = text_rows(&["a", "b", "c", "d"]);
    let (out, result) = run_rows(&graph, "in", "out", &text_schema("k"), input);
    assert!(result.success);
    assert_eq!(out, text_rows(&["b", "c"]));
    let limit = result.steps.iter().find(|s| s.name == "limit").unwrap();
    assert_eq!(limit.lines_read, 4);
    assert_eq!(limit.lines_written, 2);
}

// ─── select_values ──────────────────────────────────────────────────────────

#[test]
fn test_select_values_reorders_renames_and_converts() {
    let graph = around(step(
        "select",
        "select_values",
        &SelectValuesConfig {
            fields: vec![
                SelectField::new("amount").converted(ValueType::String),
                SelectField::new("region").renamed("area"),
            ],
            remove: Vec::new(),
        },
    ));
    let mut p = pipeline("select");
    p.prepare(&graph).unwrap();
    let mut producer = p.add_external_producer("in").unwrap();
    let mut listener = p.add_listener("out").unwrap();
    p.start().unwrap();
    producer.put(&sales_schema(), sale("north", 3)).unwrap();
    producer.finish();

    let rows = listener.collect_rows().unwrap();
    assert_eq!(rows, vec![vec![Value::from("3"), Value::from("north")]]);
    let schema = listener.schema().unwrap();
    assert_eq!(
        *schema,
        Schema::of(&[("amount", ValueType::String), ("area", ValueType::String)])
    );
    assert!(p.wait_until_finished().unwrap().success);
}

#[test]
fn test_select_values_remove_only() {
    let graph = around(step(
        "select",
        "select_values",
        &SelectValuesConfig {
            fields: Vec::new(),
            remove: vec!["amount".into()],
        },
    ));
    let (out, _) = run_rows(&graph, "in", "out", &sales_schema(), vec![sale("east", 1)]);
    assert_eq!(out, vec![vec![Value::from("east")]]);
}

#[test]
fn test_select_values_conversion_failure_is_row_error() {
    let graph = around(step(
        "select",
        "select_values",
        &SelectValuesConfig {
            fields: vec![SelectField::new("region").converted(ValueType::Integer)],
            remove: Vec::new(),
        },
    ));
    let (out, result) = run_rows(&graph, "in", "out", &sales_schema(), vec![sale("east", 1)]);
    // No error hop: the rejected row fails the step.
    assert!(out.is_empty());
    assert!(!result.success);
}

// ─── add_constants ──────────────────────────────────────────────────────────

#[test]
fn test_add_constants_appends_typed_values() {
    let graph = around(step(
        "constants",
        "add_constants",
        &AddConstantsConfig {
            constants: vec![
                ConstantField::new("source", ValueType::String, Some("${ORIGIN}")).substituted(),
                ConstantField::new("weight", ValueType::Number, Some("1.5")),
                ConstantField::new("nothing", ValueType::Integer, None),
            ],
        },
    ));
    let mut p = pipeline("constants");
    p.set_variable("ORIGIN", "ledger");
    let (out, result) =
        common::run_rows_with(p, &graph, "in", "out", &text_schema("k"), text_rows(&["a"]));
    assert!(result.success);
    assert_eq!(
        out,
        vec![vec![
            Value::from("a"),
            Value::from("ledger"),
            Value::Number(1.5),
            Value::Null,
        ]]
    );
}

#[test]
fn test_add_constants_without_input_emits_one_row() {
    let mut graph = PipelineGraph::new("source");
    graph.chain([
        step(
            "constants",
            "add_constants",
            &AddConstantsConfig {
                constants: vec![ConstantField::new("n", ValueType::Integer, Some("7"))],
            },
        ),
        StepNode::new("out", "dummy"),
    ]);
    let mut p = pipeline("source");
    p.prepare(&graph).unwrap();
    let mut listener = p.add_listener("out").unwrap();
    p.start().unwrap();
    assert_eq!(listener.collect_rows().unwrap(), vec![vec![Value::Integer(7)]]);
    assert!(p.wait_until_finished().unwrap().success);
}

#[test]
fn test_add_constants_bad_value_fails_init() {
    let graph = around(step(
        "constants",
        "add_constants",
        &AddConstantsConfig {
            constants: vec![ConstantField::new("n", ValueType::Integer, Some("seven"))],
        },
    ));
    let (_, result) = run_rows(&graph, "in", "out", &text_schema("k"), text_rows(&["a"]));
    assert!(!result.success);
}

// ─── data_grid ──────────────────────────────────────────────────────────────

#[test]
fn test_data_grid_converts_cells() {
    let grid = GridBuilder::new("grid")
        .field("id", ValueType::Integer)
        .field("day", ValueType::Date)
        .field("flag", ValueType::Boolean)
        .row(vec![json!(1), json!("2024-03-01"), json!(true)])
        .row(vec![json!("2"), json!(null), json!("N")]);
    let mut graph = PipelineGraph::new("grid");
    graph.chain([grid.build(), StepNode::new("out", "dummy")]);

    let mut p = pipeline("grid");
    p.prepare(&graph).unwrap();
    let mut listener = p.add_listener("out").unwrap();
    p.start().unwrap();
    let rows = listener.collect_rows().unwrap();
    assert!(p.wait_until_finished().unwrap().success);

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0][0], Value::Integer(1));
    assert!(matches!(rows[0][1], Value::Date(_)));
    assert_eq!(rows[0][2], Value::Boolean(true));
    assert_eq!(rows[1], vec![Value::Integer(2), Value::Null, Value::Boolean(false)]);
}
