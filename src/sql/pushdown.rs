//! Condition push-down into service variables.
//!
//! The WHERE condition is split into its top-level conjuncts. A conjunct
//! whose fields all map to the same service variable, and which compares
//! them only with literals, is translated into that variable and removed
//! from the condition the generated pipeline evaluates.
//!
//! ```text
//! x = 5 AND y LIKE 'a%'       x -> P (sql), y unmapped
//! P = "WHERE x = 5"           residual: y LIKE 'a%'
//! ```

use crate::pipeline::condition::{Condition, Operand, Operator};
use crate::pipeline::value::Value;
use crate::sql::error::{SqlError, SqlResult};
use crate::sql::service::{FieldMapping, PushDownKind, ServiceDescriptor};
use std::collections::BTreeMap;

/// Outcome of splitting a condition between a service and the query pipeline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PushDown {
    /// Variable name to pushed-down text.
    pub parameters: BTreeMap<String, String>,
    /// Conjuncts translated into variables.
    pub pushed: Vec<Condition>,
    /// What the query pipeline still has to evaluate.
    pub residual: Option<Condition>,
}

/// Split `condition` between `service`'s mapped variables and a residual.
pub fn push_down(condition: Option<Condition>, service: &ServiceDescriptor) -> SqlResult<PushDown> {
    let Some(condition) = condition else {
        return Ok(PushDown::default());
    };

    let mut fragments: Vec<(String, PushDownKind, Vec<String>)> = Vec::new();
    let mut pushed = Vec::new();
    let mut residual = Vec::new();

    for conjunct in condition.into_conjuncts() {
        let Some(target) = single_target(&conjunct, service) else {
            residual.push(conjunct);
            continue;
        };
        let fragment = match target.kind {
            PushDownKind::Sql => sql_fragment(&conjunct, service),
            PushDownKind::Json => json_fragment(&conjunct, service)?,
        };
        match fragments
            .iter_mut()
            .find(|(variable, _, _)| *variable == target.variable)
        {
            Some((_, _, list)) => list.push(fragment),
            None => fragments.push((target.variable.clone(), target.kind, vec![fragment])),
        }
        pushed.push(conjunct);
    }

    let parameters = fragments
        .into_iter()
        .map(|(variable, kind, list)| {
            let text = match kind {
                PushDownKind::Sql => format!("WHERE {}", list.join(" AND ")),
                PushDownKind::Json if list.len() == 1 => format!("{{ {} }}", list[0]),
                PushDownKind::Json => {
                    let items: Vec<String> = list.iter().map(|f| format!("{{ {} }}", f)).collect();
                    format!("{{ '$and' : [ {} ] }}", items.join(", "))
                }
            };
            (variable, text)
        })
        .collect();

    Ok(PushDown {
        parameters,
        pushed,
        residual: Condition::from_conjuncts(residual),
    })
}

/// The mapping every field of `conjunct` shares, when it can be pushed.
fn single_target<'a>(conjunct: &Condition, service: &'a ServiceDescriptor) -> Option<&'a FieldMapping> {
    if !literal_only(conjunct) {
        return None;
    }
    let mut target: Option<&FieldMapping> = None;
    for field in conjunct.fields() {
        let mapping = service.mapping_for(field)?;
        match target {
            Some(t) if t.variable != mapping.variable || t.kind != mapping.kind => return None,
            _ => target = Some(mapping),
        }
    }
    target
}

fn literal_only(condition: &Condition) -> bool {
    match condition {
        Condition::Comparison { operand, .. } => !matches!(operand, Operand::Field(_)),
        Condition::And(children) | Condition::Or(children) => children.iter().all(literal_only),
        Condition::Not(inner) => literal_only(inner),
    }
}

fn target_name<'a>(field: &'a str, service: &'a ServiceDescriptor) -> &'a str {
    service.mapping_for(field).map_or(field, FieldMapping::target)
}

// ─── SQL fragments ──────────────────────────────────────────────────────────

/// Literal in SQL syntax.
pub fn sql_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        Value::Boolean(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        Value::Date(_) => format!("'{}'", value),
        Value::Integer(_) | Value::Number(_) => value.to_string(),
    }
}

fn sql_fragment(condition: &Condition, service: &ServiceDescriptor) -> String {
    match condition {
        Condition::Comparison { field, op, operand } => {
            let field = target_name(field, service);
            match operand {
                Operand::None => format!("{} {}", field, op),
                Operand::Literal(v) => format!("{} {} {}", field, op, sql_literal(v)),
                Operand::List(values) => {
                    let items: Vec<String> = values.iter().map(sql_literal).collect();
                    format!("{} {} ({})", field, op, items.join(", "))
                }
                Operand::Field(other) => format!("{} {} {}", field, op, target_name(other, service)),
            }
        }
        Condition::And(children) => children
            .iter()
            .map(|c| nested_sql(c, service))
            .collect::<Vec<_>>()
            .join(" AND "),
        Condition::Or(children) => format!(
            "({})",
            children
                .iter()
                .map(|c| nested_sql(c, service))
                .collect::<Vec<_>>()
                .join(" OR ")
        ),
        Condition::Not(inner) => format!("NOT ({})", sql_fragment(inner, service)),
    }
}

fn nested_sql(condition: &Condition, service: &ServiceDescriptor) -> String {
    match condition {
        Condition::And(_) => format!("({})", sql_fragment(condition, service)),
        _ => sql_fragment(condition, service),
    }
}

// ─── JSON fragments ─────────────────────────────────────────────────────────

/// Literal in the single-quoted JSON dialect used by document stores.
pub fn json_literal(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Integer(_) | Value::Number(_) => value.to_string(),
        Value::String(_) | Value::Date(_) => json_string(&value.to_string()),
    }
}

fn json_string(text: &str) -> String {
    format!("'{}'", text.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// Anchored regular expression equivalent to a LIKE pattern.
pub fn like_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 2);
    out.push('^');
    for ch in pattern.chars() {
        match ch {
            '%' => out.push_str(".*"),
            '_' => out.push('.'),
            '.' | '*' | '+' | '?' | '(' | ')' | '[' | ']' | '{' | '}' | '^' | '$' | '|' | '\\' => {
                out.push('\\');
                out.push(ch);
            }
            other => out.push(other),
        }
    }
    out.push('$');
    out
}

fn json_operator(op: Operator) -> Option<&'static str> {
    match op {
        Operator::NotEq => Some("$ne"),
        Operator::Gt => Some("$gt"),
        Operator::Ge => Some("$gte"),
        Operator::Lt => Some("$lt"),
        Operator::Le => Some("$lte"),
        Operator::Like => Some("$regex"),
        Operator::InList => Some("$in"),
        Operator::Eq | Operator::IsNull | Operator::IsNotNull => None,
    }
}

fn json_fragment(condition: &Condition, service: &ServiceDescriptor) -> SqlResult<String> {
    match condition {
        Condition::Comparison { field, op, operand } => {
            let key = json_string(target_name(field, service));
            let value = match (op, operand) {
                (Operator::IsNull, _) => "null".to_string(),
                (Operator::IsNotNull, _) => "{ '$ne' : null }".to_string(),
                (Operator::Eq, Operand::Literal(v)) => json_literal(v),
                (Operator::Like, Operand::Literal(v)) => {
                    format!("{{ '$regex' : {} }}", json_string(&like_to_regex(&v.to_string())))
                }
                (op, Operand::List(values)) => {
                    let items: Vec<String> = values.iter().map(json_literal).collect();
                    let name = json_operator(*op).unwrap_or("$in");
                    format!("{{ '{}' : [ {} ] }}", name, items.join(", "))
                }
                (op, Operand::Literal(v)) => match json_operator(*op) {
                    Some(name) => format!("{{ '{}' : {} }}", name, json_literal(v)),
                    None => json_literal(v),
                },
                (op, _) => {
                    return Err(SqlError::PushDown(format!(
                        "'{} {}' has no literal operand",
                        field, op
                    )))
                }
            };
            Ok(format!("{} : {}", key, value))
        }
        Condition::And(children) => json_list("$and", children, service),
        Condition::Or(children) => json_list("$or", children, service),
        Condition::Not(_) => Err(SqlError::PushDown(format!(
            "NOT cannot be expressed in a JSON filter: {}",
            condition
        ))),
    }
}

fn json_list(name: &str, children: &[Condition], service: &ServiceDescriptor) -> SqlResult<String> {
    let items = children
        .iter()
        .map(|c| json_fragment(c, service).map(|f| format!("{{ {} }}", f)))
        .collect::<SqlResult<Vec<_>>>()?;
    Ok(format!("'{}' : [ {} ]", name, items.join(", ")))
}
