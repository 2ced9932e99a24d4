//! Query resolution and pipeline generation.
//!
//! Resolution checks every field a query mentions against the table schema
//! (matching names exactly, then ignoring ASCII case) and coerces WHERE
//! literals to the type of the field they are compared with. Generation
//! then turns the resolved query into a linear pipeline:
//!
//! ```text
//! injector -> [where] -> [group] -> [having] -> [constants] -> [select]
//!          -> [distinct_sort -> distinct] -> [order -> order_drop] -> [limit]
//!          -> result
//! ```
//!
//! An ORDER BY field missing from the select list is carried through the
//! select step under an internal name and removed again after sorting.
//! The schema of the result rows is computed alongside, step by step.

use crate::pipeline::condition::{Condition, Operand, Operator};
use crate::pipeline::graph::{PipelineGraph, StepNode};
use crate::pipeline::schema::{FieldMeta, Schema};
use crate::pipeline::step_kind::BuiltinKind;
use crate::pipeline::steps::{
    AddConstantsConfig, AggregateField, ConstantField, FilterRowsConfig, GroupByConfig, GroupByStep,
    LimitConfig, SelectField, SelectValuesConfig, SelectValuesStep, SortField, SortRowsConfig,
    UniqueRowsConfig,
};
use crate::pipeline::value::{Value, ValueType};
use crate::sql::error::{SqlError, SqlResult};
use crate::sql::parser::{aggregate_name, Projection, Query, DUAL};
use serde::Serialize;

/// Name of the step the query rows enter through.
pub const INJECTOR_STEP: &str = "injector";

/// Name of the step whose output is the query result.
pub const RESULT_STEP: &str = "result";

/// A generated query pipeline and the schema of its result rows.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedQuery {
    pub graph: PipelineGraph,
    pub schema: Schema,
}

// ─── Resolution ─────────────────────────────────────────────────────────────

fn resolve_name(schema: &Schema, name: &str, table: &str) -> SqlResult<String> {
    schema
        .index_of(name)
        .or_else(|| schema.index_of_ignore_case(name))
        .and_then(|i| schema.field(i))
        .map(|f| f.name.clone())
        .ok_or_else(|| SqlError::UnknownField {
            field: name.to_string(),
            table: table.to_string(),
        })
}

fn coerce(value: &Value, target: ValueType, field: &str) -> SqlResult<Value> {
    value.convert_to(target).map_err(|e| SqlError::InvalidLiteral {
        field: field.to_string(),
        message: e.to_string(),
    })
}

/// Resolve field names in `condition` against `schema`, coercing literals.
fn resolve_condition(condition: &Condition, schema: &Schema, table: &str) -> SqlResult<Condition> {
    Ok(match condition {
        Condition::Comparison { field, op, operand } => {
            let name = resolve_name(schema, field, table)?;
            let field_type = schema
                .index_of(&name)
                .and_then(|i| schema.field(i))
                .map_or(ValueType::None, |f| f.value_type);
            let target = match op {
                Operator::Like => ValueType::String,
                _ => field_type,
            };
            let operand = match operand {
                Operand::None => Operand::None,
                Operand::Literal(v) => Operand::Literal(coerce(v, target, &name)?),
                Operand::List(values) => Operand::List(
                    values
                        .iter()
                        .map(|v| coerce(v, target, &name))
                        .collect::<SqlResult<_>>()?,
                ),
                Operand::Field(other) => Operand::Field(resolve_name(schema, other, table)?),
            };
            Condition::compare(name, *op, operand)
        }
        Condition::And(children) => Condition::And(
            children
                .iter()
                .map(|c| resolve_condition(c, schema, table))
                .collect::<SqlResult<_>>()?,
        ),
        Condition::Or(children) => Condition::Or(
            children
                .iter()
                .map(|c| resolve_condition(c, schema, table))
                .collect::<SqlResult<_>>()?,
        ),
        Condition::Not(inner) => resolve_condition(inner, schema, table)?.negate(),
    })
}

/// Check a parsed query against the schema of `table`.
///
/// Returns a copy with canonical field names and WHERE literals converted
/// to their fields' types. HAVING and ORDER BY refer to output fields and
/// are checked during generation.
pub fn resolve(query: &Query, schema: &Schema, table: &str) -> SqlResult<Query> {
    let mut resolved = query.clone();
    for projection in &mut resolved.projections {
        match projection {
            Projection::Field { name, .. } => *name = resolve_name(schema, name, table)?,
            Projection::Aggregate {
                field: Some(field), ..
            } => *field = resolve_name(schema, field, table)?,
            _ => {}
        }
    }
    for name in &mut resolved.group_by {
        *name = resolve_name(schema, name, table)?;
    }
    resolved.condition = query
        .condition
        .as_ref()
        .map(|c| resolve_condition(c, schema, table))
        .transpose()?;

    if resolved.is_grouped() {
        for projection in &resolved.projections {
            match projection {
                Projection::All => {
                    return Err(SqlError::Unsupported(
                        "'*' cannot be combined with GROUP BY or aggregates".to_string(),
                    ))
                }
                Projection::Field { name, .. } if !resolved.group_by.contains(name) => {
                    return Err(SqlError::Unsupported(format!(
                        "field '{}' must appear in GROUP BY",
                        name
                    )))
                }
                _ => {}
            }
        }
    }
    Ok(resolved)
}

// ─── Generation ─────────────────────────────────────────────────────────────

fn node<T: Serialize>(name: &str, kind: BuiltinKind, config: &T) -> SqlResult<StepNode> {
    Ok(StepNode::new(name, kind.id()).with_config(config)?)
}

fn step_error(e: crate::pipeline::step::StepError) -> SqlError {
    SqlError::Unsupported(e.to_string())
}

/// Map a HAVING or ORDER BY reference to an output field of `schema`.
///
/// An aggregate expression such as `COUNT(*)` also matches the alias the
/// select list gave it.
fn output_name(query: &Query, schema: &Schema, name: &str) -> SqlResult<String> {
    if let Ok(found) = resolve_name(schema, name, RESULT_STEP) {
        return Ok(found);
    }
    for projection in &query.projections {
        if let Projection::Aggregate {
            function,
            field,
            alias: Some(alias),
        } = projection
        {
            if aggregate_name(*function, field.as_deref()).eq_ignore_ascii_case(name) {
                return Ok(alias.clone());
            }
        }
        if let Projection::Field {
            name: source,
            alias: Some(alias),
        } = projection
        {
            if source.eq_ignore_ascii_case(name) {
                return Ok(alias.clone());
            }
        }
    }
    Err(SqlError::UnknownField {
        field: name.to_string(),
        table: query.table.clone().unwrap_or_else(|| "dual".to_string()),
    })
}

fn rename_fields(condition: &Condition, query: &Query, schema: &Schema) -> SqlResult<Condition> {
    Ok(match condition {
        Condition::Comparison { field, op, operand } => {
            let operand = match operand {
                Operand::Field(other) => Operand::Field(output_name(query, schema, other)?),
                other => other.clone(),
            };
            Condition::compare(output_name(query, schema, field)?, *op, operand)
        }
        Condition::And(c) => Condition::And(
            c.iter()
                .map(|c| rename_fields(c, query, schema))
                .collect::<SqlResult<_>>()?,
        ),
        Condition::Or(c) => Condition::Or(
            c.iter()
                .map(|c| rename_fields(c, query, schema))
                .collect::<SqlResult<_>>()?,
        ),
        Condition::Not(inner) => rename_fields(inner, query, schema)?.negate(),
    })
}

/// Internal name of the `i`-th literal of the select list.
fn constant_name(i: usize) -> String {
    format!("__constant_{}", i)
}

/// Internal name of the `i`-th ORDER BY field when it is not selected.
fn order_name(i: usize) -> String {
    format!("__order_{}", i)
}

/// Build the pipeline evaluating a resolved `query` over rows of `input`.
///
/// `residual` replaces the query's WHERE condition: it is what is left
/// after push-down.
pub fn generate(
    name: &str,
    query: &Query,
    residual: Option<&Condition>,
    input: &Schema,
) -> SqlResult<GeneratedQuery> {
    let mut steps = vec![StepNode::new(INJECTOR_STEP, BuiltinKind::Injector.id())];
    let mut schema = input.clone();

    if let Some(condition) = residual {
        steps.push(node(
            "where",
            BuiltinKind::FilterRows,
            &FilterRowsConfig {
                condition: Some(condition.clone()),
            },
        )?);
    }

    if query.is_grouped() {
        let config = GroupByConfig {
            group: query.group_by.clone(),
            aggregates: query
                .projections
                .iter()
                .filter_map(|p| match p {
                    Projection::Aggregate {
                        function, field, ..
                    } => Some(AggregateField {
                        name: p.output_name().unwrap_or_default(),
                        field: field.clone(),
                        function: *function,
                    }),
                    _ => None,
                })
                .collect(),
        };
        schema = GroupByStep::output_schema(&config, &schema).map_err(step_error)?;
        steps.push(node("group", BuiltinKind::GroupBy, &config)?);
    }

    if let Some(having) = &query.having {
        let condition = rename_fields(having, query, &schema)?;
        condition
            .bind(&schema)
            .map_err(|e| SqlError::Unsupported(format!("HAVING {}: {}", having, e)))?;
        steps.push(node(
            "having",
            BuiltinKind::FilterRows,
            &FilterRowsConfig {
                condition: Some(condition),
            },
        )?);
    }

    // Literals are appended under internal names, then the select step puts
    // every output field in place and gives it its final name.
    let constants: Vec<ConstantField> = query
        .projections
        .iter()
        .enumerate()
        .filter_map(|(i, p)| match p {
            Projection::Literal { value, .. } => Some(ConstantField {
                name: constant_name(i),
                value_type: value.value_type(),
                value: (!value.is_null()).then(|| value.to_string()),
                substitute: false,
            }),
            _ => None,
        })
        .collect();
    let source_fields: Vec<String> = schema.field_names().map(str::to_string).collect();
    if !constants.is_empty() {
        let config = AddConstantsConfig { constants };
        schema = schema.extended(
            config
                .constants
                .iter()
                .map(|c| FieldMeta::new(c.name.clone(), c.value_type)),
        );
        steps.push(node("constants", BuiltinKind::AddConstants, &config)?);
    }

    let plain_star = matches!(query.projections.as_slice(), [Projection::All]);
    let mut carried: Vec<(usize, String)> = Vec::new();
    if !plain_star {
        let mut fields = Vec::new();
        for (i, projection) in query.projections.iter().enumerate() {
            match projection {
                Projection::All => fields.extend(source_fields.iter().map(SelectField::new)),
                Projection::Field { name, alias } => {
                    let mut field = SelectField::new(name.clone());
                    field.rename = alias.clone();
                    fields.push(field);
                }
                Projection::Aggregate { .. } => {
                    fields.push(SelectField::new(projection.output_name().unwrap_or_default()))
                }
                Projection::Literal { .. } => fields.push(
                    SelectField::new(constant_name(i))
                        .renamed(projection.output_name().unwrap_or_default()),
                ),
            }
        }

        let visible = SelectValuesStep::output_schema(
            &SelectValuesConfig {
                fields: fields.clone(),
                remove: Vec::new(),
            },
            &schema,
        )
        .map_err(step_error)?;
        let table = query.table.as_deref().unwrap_or(DUAL);
        for (i, order) in query.order_by.iter().enumerate() {
            if output_name(query, &visible, &order.name).is_ok() {
                continue;
            }
            let source = resolve_name(&schema, &order.name, table)?;
            if query.distinct {
                return Err(SqlError::Unsupported(format!(
                    "ORDER BY field '{}' must be selected in a DISTINCT query",
                    order.name
                )));
            }
            fields.push(SelectField::new(source).renamed(order_name(i)));
            carried.push((i, order_name(i)));
        }

        let config = SelectValuesConfig {
            fields,
            remove: Vec::new(),
        };
        schema = SelectValuesStep::output_schema(&config, &schema).map_err(step_error)?;
        steps.push(node("select", BuiltinKind::SelectValues, &config)?);
    }

    if query.distinct {
        let sort = SortRowsConfig {
            fields: schema.field_names().map(SortField::ascending).collect(),
        };
        steps.push(node("distinct_sort", BuiltinKind::SortRows, &sort)?);
        steps.push(node("distinct", BuiltinKind::UniqueRows, &UniqueRowsConfig::default())?);
    }

    if !query.order_by.is_empty() {
        let fields = query
            .order_by
            .iter()
            .enumerate()
            .map(|(i, o)| {
                let name = match carried.iter().find(|(j, _)| *j == i) {
                    Some((_, hidden)) => hidden.clone(),
                    None => output_name(query, &schema, &o.name)?,
                };
                Ok(if o.ascending {
                    SortField::ascending(name)
                } else {
                    SortField::descending(name)
                })
            })
            .collect::<SqlResult<Vec<_>>>()?;
        steps.push(node("order", BuiltinKind::SortRows, &SortRowsConfig { fields })?);

        if !carried.is_empty() {
            let config = SelectValuesConfig {
                fields: Vec::new(),
                remove: carried.into_iter().map(|(_, hidden)| hidden).collect(),
            };
            schema = SelectValuesStep::output_schema(&config, &schema).map_err(step_error)?;
            steps.push(node("order_drop", BuiltinKind::SelectValues, &config)?);
        }
    }

    if query.limit.is_some() || query.offset > 0 {
        let config = LimitConfig {
            limit: query.limit,
            offset: query.offset,
        };
        steps.push(node("limit", BuiltinKind::Limit, &config)?);
    }

    steps.push(StepNode::new(RESULT_STEP, BuiltinKind::Dummy.id()));

    let mut graph = PipelineGraph::new(name);
    graph.chain(steps);
    graph.validate()?;
    Ok(GeneratedQuery { graph, schema })
}
