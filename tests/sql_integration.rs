//! Integration tests for SQL queries over service pipelines
//!
//! Services are small grid-backed pipelines. Some of them echo a pushed-down
//! variable into a field so the tests can see what the service received.

mod common;

use common::builders::{GridBuilder, ServiceBuilder};
use rowflow_rs::config::EngineConfig;
use rowflow_rs::pipeline::steps::{AddConstantsConfig, ConstantField};
use rowflow_rs::pipeline::{Schema, StepNode, StepRegistry, Value, ValueType};
use rowflow_rs::sql::{
    FieldMapping, PushDownKind, QueryState, ServiceCatalog, SqlError, SqlExecutor,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

fn echo(field: &str, variable: &str) -> StepNode {
    let config = AddConstantsConfig {
        constants: vec![
            ConstantField::new(field, ValueType::String, Some(&format!("${{{}}}", variable)))
                .substituted(),
        ],
    };
    StepNode::new("echo", "add_constants").with_config(&config).unwrap()
}

fn catalog() -> ServiceCatalog {
    let mut catalog = ServiceCatalog::new();

    let numbers = GridBuilder::new("grid")
        .field("x", ValueType::Integer)
        .field("name", ValueType::String)
        .row(vec![json!(1), json!("a")])
        .row(vec![json!(2), json!("b")])
        .row(vec![json!(3), json!("c")]);
    let numbers_schema = numbers.schema().extended([rowflow_rs::pipeline::FieldMeta::new(
        "filter",
        ValueType::String,
    )]);
    catalog
        .register(
            ServiceBuilder::new("numbers", numbers)
                .step(echo("filter", "P"))
                .schema(numbers_schema)
                .mapping(FieldMapping::new("x", "P", PushDownKind::Sql))
                .build(),
        )
        .unwrap();

    let docs = GridBuilder::new("grid")
        .field("x", ValueType::Integer)
        .field("name", ValueType::String)
        .row(vec![json!(1), json!("b")])
        .row(vec![json!(2), json!("b")])
        .row(vec![json!(3), json!("b")]);
    let docs_schema = docs
        .schema()
        .extended([rowflow_rs::pipeline::FieldMeta::new("query", ValueType::String)]);
    catalog
        .register(
            ServiceBuilder::new("docs", docs)
                .step(echo("query", "Q"))
                .schema(docs_schema)
                .mapping(FieldMapping::new("name", "Q", PushDownKind::Json))
                .build(),
        )
        .unwrap();

    let sales = GridBuilder::new("grid")
        .field("region", ValueType::String)
        .field("amount", ValueType::Integer)
        .row(vec![json!("north"), json!(5)])
        .row(vec![json!("south"), json!(2)])
        .row(vec![json!("north"), json!(1)])
        .row(vec![json!("east"), json!(9)])
        .row(vec![json!("south"), json!(4)]);
    catalog
        .register(ServiceBuilder::new("Sales", sales).build())
        .unwrap();

    catalog
}

fn executor() -> SqlExecutor {
    SqlExecutor::new(
        Arc::new(catalog()),
        Arc::new(StepRegistry::new()),
        Arc::new(EngineConfig::default()),
    )
}

fn no_params() -> BTreeMap<String, String> {
    BTreeMap::new()
}

#[test]
fn test_select_star_from_dual() {
    let exec = executor();
    let mut query = exec.execute("SELECT * FROM dual", &no_params()).unwrap();
    query.start().unwrap();
    let rows = query.collect_rows().unwrap();
    let result = query.wait_until_finished().unwrap();

    assert_eq!(rows, vec![Vec::<Value>::new()]);
    assert_eq!(**query.schema(), Schema::empty());
    assert!(result.success);
    assert!(result.service.is_none());
}

#[test]
fn test_where_is_pushed_into_service_parameter() {
    let exec = executor();
    let mut query = exec
        .execute("SELECT filter FROM numbers WHERE x = 5", &no_params())
        .unwrap();
    assert_eq!(query.service_parameters()["P"], "WHERE x = 5");

    query.start().unwrap();
    let rows = query.collect_rows().unwrap();
    let result = query.wait_until_finished().unwrap();
    assert!(result.success);
    // The service ignores its filter, so every row shows what it received.
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|r| r[0] == Value::from("WHERE x = 5")));
}

#[test]
fn test_bridged_service_with_limit() {
    let exec = executor();
    let mut query = exec
        .execute("SELECT x FROM numbers LIMIT 2", &no_params())
        .unwrap();
    query.start().unwrap();
    let mut rows = Vec::new();
    while let Some(row) = query.next_row().unwrap() {
        rows.push(row);
    }
    let result = query.wait_until_finished().unwrap();

    assert_eq!(rows, vec![vec![Value::Integer(1)], vec![Value::Integer(2)]]);
    assert!(result.success);
    assert_eq!(query.state(), QueryState::Finished);
    let service = result.service.unwrap();
    assert!(service.success);
}

#[test]
fn test_caller_parameters_reach_service() {
    let exec = executor();
    let params = BTreeMap::from([("P".to_string(), "caller".to_string())]);
    let out = exec.query("SELECT filter FROM numbers LIMIT 1", &params).unwrap();
    assert_eq!(out.rows, vec![vec![Value::from("caller")]]);

    // Mapped variables default to empty text.
    let out = exec.query("SELECT filter FROM numbers LIMIT 1", &no_params()).unwrap();
    assert_eq!(out.rows, vec![vec![Value::from("")]]);
}

#[test]
fn test_json_push_down_with_residual() {
    let exec = executor();
    let out = exec
        .query(
            "SELECT x, query FROM docs WHERE name = 'b' AND x > 1",
            &no_params(),
        )
        .unwrap();
    assert!(out.result.success);
    assert_eq!(
        out.rows,
        vec![
            vec![Value::Integer(2), Value::from("{ 'name' : 'b' }")],
            vec![Value::Integer(3), Value::from("{ 'name' : 'b' }")],
        ]
    );
}

#[test]
fn test_json_push_down_rejects_not() {
    let err = executor()
        .execute("SELECT x FROM docs WHERE NOT name = 'b'", &no_params())
        .err()
        .unwrap();
    assert!(matches!(err, SqlError::PushDown(_)));
}

#[test]
fn test_group_having_order() {
    let out = executor()
        .query(
            "SELECT region, SUM(amount) AS total, COUNT(*) AS n FROM sales \
             GROUP BY region HAVING COUNT(*) > 1 ORDER BY total DESC",
            &no_params(),
        )
        .unwrap();
    assert!(out.result.success);
    assert_eq!(
        out.rows,
        vec![
            vec![Value::from("north"), Value::Integer(6), Value::Integer(2)],
            vec![Value::from("south"), Value::Integer(6), Value::Integer(2)],
        ]
    );
    assert_eq!(
        *out.schema,
        Schema::of(&[
            ("region", ValueType::String),
            ("total", ValueType::Integer),
            ("n", ValueType::Integer),
        ])
    );
}

#[test]
fn test_distinct_and_order() -> anyhow::Result<()> {
    let out = executor().query("SELECT DISTINCT region FROM sales ORDER BY region", &no_params())?;
    assert_eq!(
        out.rows,
        vec![
            vec![Value::from("east")],
            vec![Value::from("north")],
            vec![Value::from("south")],
        ]
    );
    Ok(())
}

#[test]
fn test_order_by_field_outside_select_list() -> anyhow::Result<()> {
    let out = executor().query("SELECT region FROM sales ORDER BY amount DESC", &no_params())?;
    let names: Vec<&str> = out.schema.fields().iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["region"]);
    assert_eq!(
        out.rows,
        ["east", "north", "south", "south", "north"]
            .iter()
            .map(|r| vec![Value::from(*r)])
            .collect::<Vec<_>>()
    );
    Ok(())
}

#[test]
fn test_residual_where_and_offset() {
    let out = executor()
        .query(
            "SELECT amount AS a FROM sales WHERE region LIKE 's%' OR amount >= 9 \
             ORDER BY a LIMIT 2 OFFSET 1",
            &no_params(),
        )
        .unwrap();
    // Matches 2, 9, 4; sorted 2, 4, 9.
    assert_eq!(out.rows, vec![vec![Value::Integer(4)], vec![Value::Integer(9)]]);
}

#[test]
fn test_aggregate_over_dual() {
    let out = executor()
        .query("SELECT COUNT(*) AS n, 'x' AS tag FROM dual", &no_params())
        .unwrap();
    assert_eq!(out.rows, vec![vec![Value::Integer(1), Value::from("x")]]);
}

#[test]
fn test_resolution_errors() {
    let exec = executor();
    assert!(matches!(
        exec.execute("SELECT * FROM nowhere", &no_params()),
        Err(SqlError::UnknownService(name)) if name == "nowhere"
    ));
    assert!(matches!(
        exec.execute("SELECT nope FROM sales", &no_params()),
        Err(SqlError::UnknownField { .. })
    ));
    assert!(matches!(
        exec.execute("SELECT * FROM sales WHERE amount = 'lots'", &no_params()),
        Err(SqlError::InvalidLiteral { .. })
    ));
    assert!(matches!(
        exec.execute("SELECT FROM sales", &no_params()),
        Err(SqlError::Syntax(_) | SqlError::Parse(_))
    ));
}

#[test]
fn test_stop_ends_running_query() {
    let exec = executor();
    let mut query = exec.execute("SELECT * FROM sales", &no_params()).unwrap();
    query.start().unwrap();
    query.stop_all();
    let result = query.wait_until_finished().unwrap();
    assert_eq!(query.state(), QueryState::Finished);
    assert!(result.service.is_some());
    assert!(query.is_finished());
}
