//! Row predicates.
//!
//! A [`Condition`] is an immutable tree of field comparisons combined with
//! `AND`, `OR` and `NOT`. Before evaluation it is bound against a schema,
//! which resolves field names to positions once per stream.

use crate::pipeline::schema::{Row, Schema};
use crate::pipeline::value::{Value, ValueType};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConditionError {
    #[error("unknown field '{0}' in condition")]
    UnknownField(String),

    #[error("cannot compare field '{field}' ({left}) with a {right} value")]
    Incomparable {
        field: String,
        left: ValueType,
        right: ValueType,
    },

    #[error("operator {op} on field '{field}' has an invalid operand")]
    InvalidOperand { field: String, op: Operator },
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    NotEq,
    Gt,
    Ge,
    Lt,
    Le,
    IsNull,
    IsNotNull,
    Like,
    InList,
}

impl Operator {
    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::NotEq => "<>",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::IsNull => "IS NULL",
            Operator::IsNotNull => "IS NOT NULL",
            Operator::Like => "LIKE",
            Operator::InList => "IN",
        }
    }

    /// The operator that holds with both sides swapped.
    pub fn flipped(self) -> Operator {
        match self {
            Operator::Gt => Operator::Lt,
            Operator::Ge => Operator::Le,
            Operator::Lt => Operator::Gt,
            Operator::Le => Operator::Ge,
            other => other,
        }
    }

    /// True for operators that take no right-hand side.
    pub fn is_unary(&self) -> bool {
        matches!(self, Operator::IsNull | Operator::IsNotNull)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    None,
    Literal(Value),
    Field(String),
    List(Vec<Value>),
}

/// A predicate over a row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Comparison {
        field: String,
        op: Operator,
        operand: Operand,
    },
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
}

impl Condition {
    pub fn compare(field: impl Into<String>, op: Operator, operand: Operand) -> Self {
        Condition::Comparison {
            field: field.into(),
            op,
            operand,
        }
    }

    /// `field <op> literal`
    pub fn literal(field: impl Into<String>, op: Operator, value: impl Into<Value>) -> Self {
        Self::compare(field, op, Operand::Literal(value.into()))
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::literal(field, Operator::Eq, value)
    }

    pub fn is_null(field: impl Into<String>) -> Self {
        Self::compare(field, Operator::IsNull, Operand::None)
    }

    pub fn negate(self) -> Self {
        Condition::Not(Box::new(self))
    }

    /// Every field name referenced anywhere in the tree, in first-seen order.
    pub fn fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        fn add<'a>(out: &mut Vec<&'a str>, name: &'a str) {
            if !out.contains(&name) {
                out.push(name);
            }
        }
        match self {
            Condition::Comparison { field, operand, .. } => {
                add(out, field);
                if let Operand::Field(other) = operand {
                    add(out, other);
                }
            }
            Condition::And(children) | Condition::Or(children) => {
                for child in children {
                    child.collect_fields(out);
                }
            }
            Condition::Not(inner) => inner.collect_fields(out),
        }
    }

    /// Split into top-level conjuncts (nested ANDs are flattened).
    pub fn into_conjuncts(self) -> Vec<Condition> {
        match self {
            Condition::And(children) => children
                .into_iter()
                .flat_map(Condition::into_conjuncts)
                .collect(),
            other => vec![other],
        }
    }

    /// Rebuild a condition from conjuncts. `None` when there are none.
    pub fn from_conjuncts(mut conjuncts: Vec<Condition>) -> Option<Condition> {
        match conjuncts.len() {
            0 => None,
            1 => conjuncts.pop(),
            _ => Some(Condition::And(conjuncts)),
        }
    }

    /// Resolve field names against `schema`.
    pub fn bind(&self, schema: &Schema) -> Result<BoundCondition, ConditionError> {
        let resolve = |name: &str| {
            schema
                .index_of(name)
                .ok_or_else(|| ConditionError::UnknownField(name.to_string()))
        };
        let node = match self {
            Condition::Comparison { field, op, operand } => {
                let operand = match (op, operand) {
                    (op, Operand::None) if op.is_unary() => BoundOperand::None,
                    (Operator::Like, Operand::Literal(Value::String(p))) => {
                        BoundOperand::Pattern(p.clone())
                    }
                    (Operator::InList, Operand::List(values)) => BoundOperand::List(values.clone()),
                    (Operator::InList, Operand::Literal(value)) => {
                        BoundOperand::List(vec![value.clone()])
                    }
                    (op, Operand::Literal(value)) if !op.is_unary() && *op != Operator::Like => {
                        BoundOperand::Literal(value.clone())
                    }
                    (op, Operand::Field(other))
                        if !op.is_unary() && *op != Operator::InList =>
                    {
                        BoundOperand::Field(resolve(other)?)
                    }
                    _ => {
                        return Err(ConditionError::InvalidOperand {
                            field: field.clone(),
                            op: *op,
                        })
                    }
                };
                BoundNode::Comparison {
                    index: resolve(field)?,
                    field: field.clone(),
                    op: *op,
                    operand,
                }
            }
            Condition::And(children) => BoundNode::And(
                children
                    .iter()
                    .map(|c| c.bind(schema).map(|b| b.node))
                    .collect::<Result<_, _>>()?,
            ),
            Condition::Or(children) => BoundNode::Or(
                children
                    .iter()
                    .map(|c| c.bind(schema).map(|b| b.node))
                    .collect::<Result<_, _>>()?,
            ),
            Condition::Not(inner) => BoundNode::Not(Box::new(inner.bind(schema)?.node)),
        };
        Ok(BoundCondition { node })
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Comparison { field, op, operand } => {
                write!(f, "{} {}", field, op)?;
                match operand {
                    Operand::None => Ok(()),
                    Operand::Literal(v) => write!(f, " {}", display_literal(v)),
                    Operand::Field(other) => write!(f, " {}", other),
                    Operand::List(values) => {
                        let items: Vec<String> = values.iter().map(display_literal).collect();
                        write!(f, " ({})", items.join(", "))
                    }
                }
            }
            Condition::And(children) => write_joined(f, children, " AND "),
            Condition::Or(children) => write_joined(f, children, " OR "),
            Condition::Not(inner) => write!(f, "NOT ({})", inner),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, children: &[Condition], sep: &str) -> fmt::Result {
    for (i, child) in children.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        match child {
            Condition::Comparison { .. } | Condition::Not(_) => write!(f, "{}", child)?,
            _ => write!(f, "({})", child)?,
        }
    }
    Ok(())
}

fn display_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        Value::Date(_) => format!("'{}'", value),
        Value::Boolean(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone)]
enum BoundOperand {
    None,
    Literal(Value),
    Field(usize),
    List(Vec<Value>),
    Pattern(String),
}

#[derive(Debug, Clone)]
enum BoundNode {
    Comparison {
        index: usize,
        field: String,
        op: Operator,
        operand: BoundOperand,
    },
    And(Vec<BoundNode>),
    Or(Vec<BoundNode>),
    Not(Box<BoundNode>),
}

/// A condition with field positions resolved for one schema.
#[derive(Debug, Clone)]
pub struct BoundCondition {
    node: BoundNode,
}

impl BoundCondition {
    /// Evaluate against a row of the schema this condition was bound to.
    ///
    /// Comparisons involving `NULL` are false except `IS NULL`.
    pub fn evaluate(&self, row: &Row) -> Result<bool, ConditionError> {
        eval(&self.node, row)
    }
}

fn eval(node: &BoundNode, row: &Row) -> Result<bool, ConditionError> {
    match node {
        BoundNode::And(children) => {
            for child in children {
                if !eval(child, row)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        BoundNode::Or(children) => {
            for child in children {
                if eval(child, row)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        BoundNode::Not(inner) => Ok(!eval(inner, row)?),
        BoundNode::Comparison {
            index,
            field,
            op,
            operand,
        } => {
            let left = row.get(*index).unwrap_or(&Value::Null);
            match (op, operand) {
                (Operator::IsNull, _) => return Ok(left.is_null()),
                (Operator::IsNotNull, _) => return Ok(!left.is_null()),
                _ => {}
            }
            if left.is_null() {
                return Ok(false);
            }
            match operand {
                BoundOperand::None => Err(ConditionError::InvalidOperand {
                    field: field.clone(),
                    op: *op,
                }),
                BoundOperand::Pattern(pattern) => Ok(like_match(&left.to_string(), pattern)),
                BoundOperand::List(values) => {
                    for value in values.iter().filter(|v| !v.is_null()) {
                        if compare(field, left, value)? == Ordering::Equal {
                            return Ok(true);
                        }
                    }
                    Ok(false)
                }
                BoundOperand::Literal(right) => apply(field, *op, left, right),
                BoundOperand::Field(other) => {
                    let right = row.get(*other).unwrap_or(&Value::Null);
                    apply(field, *op, left, right)
                }
            }
        }
    }
}

fn apply(field: &str, op: Operator, left: &Value, right: &Value) -> Result<bool, ConditionError> {
    if right.is_null() {
        return Ok(false);
    }
    let ord = compare(field, left, right)?;
    Ok(match op {
        Operator::Eq => ord == Ordering::Equal,
        Operator::NotEq => ord != Ordering::Equal,
        Operator::Gt => ord == Ordering::Greater,
        Operator::Ge => ord != Ordering::Less,
        Operator::Lt => ord == Ordering::Less,
        Operator::Le => ord != Ordering::Greater,
        Operator::Like => like_match(&left.to_string(), &right.to_string()),
        Operator::IsNull | Operator::IsNotNull | Operator::InList => false,
    })
}

fn compare(field: &str, left: &Value, right: &Value) -> Result<Ordering, ConditionError> {
    left.compare(right)
        .ok_or_else(|| ConditionError::Incomparable {
            field: field.to_string(),
            left: left.value_type(),
            right: right.value_type(),
        })
}

/// SQL `LIKE` matching: `%` matches any run of characters, `_` exactly one.
pub fn like_match(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    let (mut t, mut p) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && pattern[p] == '%' {
            backtrack = Some((p, t));
            p += 1;
        } else if p < pattern.len() && (pattern[p] == '_' || pattern[p] == text[t]) {
            t += 1;
            p += 1;
        } else if let Some((star_p, star_t)) = backtrack {
            p = star_p + 1;
            t = star_t + 1;
            backtrack = Some((star_p, star_t + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|&c| c == '%')
}
