//! Query dialect on top of `sqlparser`.
//!
//! The text is parsed with the generic dialect and the resulting AST is
//! lowered into a [`Query`]:
//! ```text
//! SELECT [DISTINCT] <projection>, ...
//!   [FROM (<table> | dual)]
//!   [WHERE <condition>]
//!   [GROUP BY <field>, ...]
//!   [HAVING <condition>]
//!   [ORDER BY <field> [ASC | DESC], ...]
//!   [LIMIT <n> [OFFSET <m>]]
//! ```
//!
//! Conditions are lowered into [`Condition`] trees so the generated
//! pipeline can evaluate them with the `filter_rows` step. Anything else
//! the generic dialect accepts (joins, subqueries, expressions in the
//! select list) is rejected while lowering.

use crate::pipeline::condition::{Condition, Operand, Operator};
use crate::pipeline::steps::AggregateFunction;
use crate::pipeline::value::{parse_date, Value};
use crate::sql::error::{SqlError, SqlResult};
use sqlparser::ast::{
    self, BinaryOperator, DataType, Distinct, DuplicateTreatment, Expr, Function, FunctionArg,
    FunctionArgExpr, FunctionArguments, GroupByExpr, SelectItem, SetExpr, Statement, TableFactor,
    UnaryOperator,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::Token;
use std::fmt;

/// Table name meaning "no table": the query runs on one empty row.
pub const DUAL: &str = "dual";

/// One entry of the select list.
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    /// `*`: every field of the table.
    All,
    Field {
        name: String,
        alias: Option<String>,
    },
    Literal {
        value: Value,
        alias: Option<String>,
    },
    Aggregate {
        function: AggregateFunction,
        /// `None` for `COUNT(*)`.
        field: Option<String>,
        alias: Option<String>,
    },
}

impl Projection {
    /// Name of the output field, `None` for `*`.
    pub fn output_name(&self) -> Option<String> {
        match self {
            Projection::All => None,
            Projection::Field { name, alias } => Some(alias.clone().unwrap_or_else(|| name.clone())),
            Projection::Literal { value, alias } => {
                Some(alias.clone().unwrap_or_else(|| literal_text(value)))
            }
            Projection::Aggregate {
                function,
                field,
                alias,
            } => Some(
                alias
                    .clone()
                    .unwrap_or_else(|| aggregate_name(*function, field.as_deref())),
            ),
        }
    }
}

/// Default output name of an aggregate, e.g. `SUM(amount)`.
pub fn aggregate_name(function: AggregateFunction, field: Option<&str>) -> String {
    match (function, field) {
        (AggregateFunction::CountDistinct, Some(f)) => format!("COUNT(DISTINCT {})", f),
        (_, Some(f)) => format!("{}({})", function.name(), f),
        (_, None) => format!("{}(*)", function.name()),
    }
}

/// Literal as it would be written in a query.
pub fn literal_text(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        Value::Boolean(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        Value::Date(_) => format!("DATE '{}'", value),
        Value::Integer(_) | Value::Number(_) => value.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderField {
    pub name: String,
    pub ascending: bool,
}

/// A parsed query.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub distinct: bool,
    pub projections: Vec<Projection>,
    /// `None` for `dual` or a query without `FROM`.
    pub table: Option<String>,
    pub condition: Option<Condition>,
    pub group_by: Vec<String>,
    pub having: Option<Condition>,
    pub order_by: Vec<OrderField>,
    pub limit: Option<u64>,
    pub offset: u64,
}

impl Query {
    pub fn has_aggregates(&self) -> bool {
        self.projections
            .iter()
            .any(|p| matches!(p, Projection::Aggregate { .. }))
    }

    /// True when the query groups rows, explicitly or through aggregates.
    pub fn is_grouped(&self) -> bool {
        !self.group_by.is_empty() || self.has_aggregates()
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SELECT ")?;
        if self.distinct {
            f.write_str("DISTINCT ")?;
        }
        for (i, p) in self.projections.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match p {
                Projection::All => f.write_str("*")?,
                Projection::Field { name, alias } => {
                    write!(f, "{}", name)?;
                    if let Some(alias) = alias {
                        write!(f, " AS {}", alias)?;
                    }
                }
                Projection::Literal { value, alias } => {
                    write!(f, "{}", literal_text(value))?;
                    if let Some(alias) = alias {
                        write!(f, " AS {}", alias)?;
                    }
                }
                Projection::Aggregate {
                    function,
                    field,
                    alias,
                } => {
                    write!(f, "{}", aggregate_name(*function, field.as_deref()))?;
                    if let Some(alias) = alias {
                        write!(f, " AS {}", alias)?;
                    }
                }
            }
        }
        write!(f, " FROM {}", self.table.as_deref().unwrap_or(DUAL))?;
        if let Some(c) = &self.condition {
            write!(f, " WHERE {}", c)?;
        }
        if !self.group_by.is_empty() {
            write!(f, " GROUP BY {}", self.group_by.join(", "))?;
        }
        if let Some(c) = &self.having {
            write!(f, " HAVING {}", c)?;
        }
        if !self.order_by.is_empty() {
            let order: Vec<String> = self
                .order_by
                .iter()
                .map(|o| format!("{} {}", o.name, if o.ascending { "ASC" } else { "DESC" }))
                .collect();
            write!(f, " ORDER BY {}", order.join(", "))?;
        }
        if let Some(limit) = self.limit {
            write!(f, " LIMIT {}", limit)?;
        }
        if self.offset > 0 {
            write!(f, " OFFSET {}", self.offset)?;
        }
        Ok(())
    }
}

/// Parse a complete query.
pub fn parse(sql: &str) -> SqlResult<Query> {
    let statements = Parser::parse_sql(&GenericDialect {}, sql)?;
    match statements.as_slice() {
        [Statement::Query(query)] => lower_query(query),
        [_] => Err(SqlError::Parse("only SELECT statements are supported".into())),
        _ => Err(SqlError::Parse(format!(
            "expected one statement, found {}",
            statements.len()
        ))),
    }
}

/// Parse a stand-alone condition, as found after `WHERE`.
pub fn parse_condition(text: &str) -> SqlResult<Condition> {
    let dialect = GenericDialect {};
    let mut parser = Parser::new(&dialect).try_with_sql(text)?;
    let expr = parser.parse_expr()?;
    let next = parser.peek_token().token;
    if next != Token::EOF {
        return Err(SqlError::Parse(format!("unexpected '{}' after condition", next)));
    }
    condition(&expr)
}

fn unsupported<T>(what: impl fmt::Display) -> SqlResult<T> {
    Err(SqlError::Parse(format!("unsupported {}", what)))
}

fn lower_query(query: &ast::Query) -> SqlResult<Query> {
    if query.with.is_some() {
        return unsupported("WITH clause");
    }
    let SetExpr::Select(select) = query.body.as_ref() else {
        return unsupported(format!("query body '{}'", query.body));
    };

    let distinct = match &select.distinct {
        None => false,
        Some(Distinct::Distinct) => true,
        Some(Distinct::On(_)) => return unsupported("DISTINCT ON"),
    };
    if select.projection.is_empty() {
        return Err(SqlError::Parse("empty select list".into()));
    }
    let projections = select
        .projection
        .iter()
        .map(projection)
        .collect::<SqlResult<Vec<_>>>()?;

    let table = match select.from.as_slice() {
        [] => None,
        [from] if from.joins.is_empty() => match &from.relation {
            TableFactor::Table { name, .. } => {
                let name = name
                    .0
                    .last()
                    .map(|ident| ident.value.clone())
                    .unwrap_or_default();
                (!name.eq_ignore_ascii_case(DUAL)).then_some(name)
            }
            other => return unsupported(format!("table source '{}'", other)),
        },
        _ => return unsupported("joins or multiple tables"),
    };

    let condition = select.selection.as_ref().map(condition).transpose()?;
    let group_by = match &select.group_by {
        GroupByExpr::Expressions(exprs, _) => exprs
            .iter()
            .map(field_name)
            .collect::<SqlResult<Vec<_>>>()?,
        GroupByExpr::All(_) => return unsupported("GROUP BY ALL"),
    };
    let having = select.having.as_ref().map(self::condition).transpose()?;

    let order_by = match &query.order_by {
        Some(order) => order
            .exprs
            .iter()
            .map(|o| {
                Ok(OrderField {
                    name: field_or_aggregate(&o.expr)?,
                    ascending: o.asc.unwrap_or(true),
                })
            })
            .collect::<SqlResult<Vec<_>>>()?,
        None => Vec::new(),
    };
    let limit = query
        .limit
        .as_ref()
        .map(|e| unsigned(e, "row limit"))
        .transpose()?;
    let offset = query
        .offset
        .as_ref()
        .map(|o| unsigned(&o.value, "row offset"))
        .transpose()?
        .unwrap_or(0);

    Ok(Query {
        distinct,
        projections,
        table,
        condition,
        group_by,
        having,
        order_by,
        limit,
        offset,
    })
}

fn unsigned(expr: &Expr, what: &str) -> SqlResult<u64> {
    match expr {
        Expr::Value(ast::Value::Number(text, _)) => text
            .parse()
            .map_err(|_| SqlError::Parse(format!("invalid {} '{}'", what, text))),
        other => Err(SqlError::Parse(format!(
            "{} must be a non-negative integer, found '{}'",
            what, other
        ))),
    }
}

fn projection(item: &SelectItem) -> SqlResult<Projection> {
    let (expr, alias) = match item {
        SelectItem::Wildcard(_) => return Ok(Projection::All),
        SelectItem::QualifiedWildcard(..) => return Ok(Projection::All),
        SelectItem::UnnamedExpr(expr) => (expr, None),
        SelectItem::ExprWithAlias { expr, alias } => (expr, Some(alias.value.clone())),
    };
    if let Expr::Function(call) = expr {
        let (function, field) = aggregate(call)?;
        return Ok(Projection::Aggregate {
            function,
            field,
            alias,
        });
    }
    if let Some(value) = literal(expr)? {
        return Ok(Projection::Literal { value, alias });
    }
    Ok(Projection::Field {
        name: field_name(expr)?,
        alias,
    })
}

/// Field reference; a `table.` qualifier is dropped.
fn field_name(expr: &Expr) -> SqlResult<String> {
    match expr {
        Expr::Identifier(ident) => Ok(ident.value.clone()),
        Expr::CompoundIdentifier(parts) => match parts.last() {
            Some(ident) => Ok(ident.value.clone()),
            None => unsupported("empty identifier"),
        },
        Expr::Nested(inner) => field_name(inner),
        other => Err(SqlError::Parse(format!(
            "expected a field name, found '{}'",
            other
        ))),
    }
}

/// Field name, or an aggregate call standing for its output field.
fn field_or_aggregate(expr: &Expr) -> SqlResult<String> {
    match expr {
        Expr::Function(call) => {
            let (function, field) = aggregate(call)?;
            Ok(aggregate_name(function, field.as_deref()))
        }
        other => field_name(other),
    }
}

/// `COUNT(*)` becomes `CountAll`, `COUNT(DISTINCT f)` `CountDistinct`.
fn aggregate(call: &Function) -> SqlResult<(AggregateFunction, Option<String>)> {
    let name = call.name.to_string().to_ascii_uppercase();
    let function = match name.as_str() {
        "COUNT" => AggregateFunction::Count,
        "SUM" => AggregateFunction::Sum,
        "AVG" => AggregateFunction::Avg,
        "MIN" => AggregateFunction::Min,
        "MAX" => AggregateFunction::Max,
        _ => return unsupported(format!("function {}", name)),
    };
    if call.over.is_some() || call.filter.is_some() {
        return unsupported(format!("window or filter on {}", name));
    }
    let FunctionArguments::List(list) = &call.args else {
        return Err(SqlError::Parse(format!("{} needs an argument", name)));
    };
    let distinct = matches!(list.duplicate_treatment, Some(DuplicateTreatment::Distinct));
    let [arg] = list.args.as_slice() else {
        return Err(SqlError::Parse(format!("{} takes one argument", name)));
    };
    match (function, arg, distinct) {
        (AggregateFunction::Count, FunctionArg::Unnamed(FunctionArgExpr::Wildcard), false) => {
            Ok((AggregateFunction::CountAll, None))
        }
        (AggregateFunction::Count, FunctionArg::Unnamed(FunctionArgExpr::Expr(e)), true) => {
            Ok((AggregateFunction::CountDistinct, Some(field_name(e)?)))
        }
        (_, FunctionArg::Unnamed(FunctionArgExpr::Expr(e)), false) => {
            Ok((function, Some(field_name(e)?)))
        }
        _ => unsupported(format!("arguments of {}", call)),
    }
}

fn number(text: &str, negative: bool) -> SqlResult<Value> {
    let signed = if negative {
        format!("-{}", text)
    } else {
        text.to_string()
    };
    if let Ok(n) = signed.parse::<i64>() {
        return Ok(Value::Integer(n));
    }
    signed
        .parse::<f64>()
        .map(Value::Number)
        .map_err(|_| SqlError::Parse(format!("invalid number '{}'", signed)))
}

/// Literal value of `expr`, `None` when it is not a literal.
fn literal(expr: &Expr) -> SqlResult<Option<Value>> {
    let value = match expr {
        Expr::Value(ast::Value::Number(text, _)) => number(text, false)?,
        Expr::Value(ast::Value::SingleQuotedString(s)) => Value::String(s.clone()),
        Expr::Value(ast::Value::Boolean(b)) => Value::Boolean(*b),
        Expr::Value(ast::Value::Null) => Value::Null,
        Expr::Value(other) => return unsupported(format!("literal {}", other)),
        Expr::UnaryOp {
            op: UnaryOperator::Minus,
            expr: inner,
        } => match inner.as_ref() {
            Expr::Value(ast::Value::Number(text, _)) => number(text, true)?,
            other => return unsupported(format!("expression -{}", other)),
        },
        Expr::TypedString {
            data_type, value, ..
        } => match data_type {
            DataType::Date | DataType::Timestamp(..) | DataType::Datetime(..) => {
                let date = parse_date(value)
                    .ok_or_else(|| SqlError::Parse(format!("invalid date '{}'", value)))?;
                Value::Date(date)
            }
            other => return unsupported(format!("typed literal {}", other)),
        },
        Expr::Nested(inner) => return literal(inner),
        _ => return Ok(None),
    };
    Ok(Some(value))
}

/// Operands of a chain of the same boolean operator, left to right.
fn chain<'a>(expr: &'a Expr, op: &BinaryOperator, out: &mut Vec<&'a Expr>) {
    match expr {
        Expr::BinaryOp {
            left,
            op: inner,
            right,
        } if inner == op => {
            chain(left, op, out);
            chain(right, op, out);
        }
        other => out.push(other),
    }
}

fn condition(expr: &Expr) -> SqlResult<Condition> {
    match expr {
        Expr::Nested(inner) => condition(inner),
        Expr::UnaryOp {
            op: UnaryOperator::Not,
            expr: inner,
        } => Ok(condition(inner)?.negate()),
        Expr::BinaryOp {
            op: op @ (BinaryOperator::And | BinaryOperator::Or),
            ..
        } => {
            let mut operands = Vec::new();
            chain(expr, op, &mut operands);
            let terms = operands
                .into_iter()
                .map(condition)
                .collect::<SqlResult<Vec<_>>>()?;
            Ok(match op {
                BinaryOperator::And => Condition::And(terms),
                _ => Condition::Or(terms),
            })
        }
        Expr::BinaryOp { left, op, right } => comparison(left, op, right),
        Expr::IsNull(inner) => Ok(Condition::compare(
            field_or_aggregate(inner)?,
            Operator::IsNull,
            Operand::None,
        )),
        Expr::IsNotNull(inner) => Ok(Condition::compare(
            field_or_aggregate(inner)?,
            Operator::IsNotNull,
            Operand::None,
        )),
        Expr::Like {
            negated,
            expr: inner,
            pattern,
            ..
        } => {
            let Some(pattern @ Value::String(_)) = literal(pattern)? else {
                return Err(SqlError::Parse(format!(
                    "LIKE needs a pattern string, found '{}'",
                    pattern
                )));
            };
            let c = Condition::compare(
                field_or_aggregate(inner)?,
                Operator::Like,
                Operand::Literal(pattern),
            );
            Ok(if *negated { c.negate() } else { c })
        }
        Expr::InList {
            expr: inner,
            list,
            negated,
        } => {
            let values = list
                .iter()
                .map(|item| {
                    literal(item)?.ok_or_else(|| {
                        SqlError::Parse(format!("IN list needs literals, found '{}'", item))
                    })
                })
                .collect::<SqlResult<Vec<_>>>()?;
            let c = Condition::compare(
                field_or_aggregate(inner)?,
                Operator::InList,
                Operand::List(values),
            );
            Ok(if *negated { c.negate() } else { c })
        }
        other => unsupported(format!("condition '{}'", other)),
    }
}

fn comparison(left: &Expr, op: &BinaryOperator, right: &Expr) -> SqlResult<Condition> {
    let op = match op {
        BinaryOperator::Eq => Operator::Eq,
        BinaryOperator::NotEq => Operator::NotEq,
        BinaryOperator::Lt => Operator::Lt,
        BinaryOperator::LtEq => Operator::Le,
        BinaryOperator::Gt => Operator::Gt,
        BinaryOperator::GtEq => Operator::Ge,
        other => return unsupported(format!("operator {}", other)),
    };
    if let Some(value) = literal(left)? {
        // `5 < x` is read as `x > 5`.
        let field = field_or_aggregate(right)?;
        return Ok(Condition::compare(field, op.flipped(), Operand::Literal(value)));
    }
    let field = field_or_aggregate(left)?;
    if let Some(value) = literal(right)? {
        return Ok(Condition::compare(field, op, Operand::Literal(value)));
    }
    Ok(Condition::compare(
        field,
        op,
        Operand::Field(field_or_aggregate(right)?),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_query() {
        let q = parse(
            "select distinct region, sum(amount) as total, 'x' tag from sales \
             where amount > 10 and not (region = 'north' or region is null) \
             group by region having count(*) >= 2 order by total desc limit 5 offset 1",
        )
        .unwrap();
        assert!(q.distinct);
        assert_eq!(q.table.as_deref(), Some("sales"));
        assert_eq!(q.projections.len(), 3);
        assert_eq!(
            q.projections[1],
            Projection::Aggregate {
                function: AggregateFunction::Sum,
                field: Some("amount".into()),
                alias: Some("total".into()),
            }
        );
        assert_eq!(q.projections[2].output_name().as_deref(), Some("tag"));
        assert_eq!(q.group_by, vec!["region".to_string()]);
        assert_eq!(
            q.having,
            Some(Condition::literal("COUNT(*)", Operator::Ge, 2i64))
        );
        assert_eq!(
            q.order_by,
            vec![OrderField {
                name: "total".into(),
                ascending: false
            }]
        );
        assert_eq!((q.limit, q.offset), (Some(5), 1));
        assert_eq!(
            q.condition.unwrap().to_string(),
            "amount > 10 AND NOT (region = 'north' OR region IS NULL)"
        );
    }

    #[test]
    fn test_dual_and_missing_from() {
        assert_eq!(parse("SELECT * FROM dual").unwrap().table, None);
        assert_eq!(parse("SELECT * FROM DUAL").unwrap().table, None);
        let q = parse("SELECT 1 AS one").unwrap();
        assert_eq!(q.table, None);
        assert_eq!(
            q.projections,
            vec![Projection::Literal {
                value: Value::Integer(1),
                alias: Some("one".into())
            }]
        );
    }

    #[test]
    fn test_literals() {
        let c = parse_condition("a = -3 AND b = -1.5 AND c = TRUE AND d = DATE '2024-01-31'").unwrap();
        let conjuncts = c.into_conjuncts();
        assert_eq!(conjuncts[0], Condition::literal("a", Operator::Eq, -3i64));
        assert_eq!(conjuncts[1], Condition::literal("b", Operator::Eq, -1.5));
        assert_eq!(conjuncts[2], Condition::literal("c", Operator::Eq, true));
        assert!(matches!(
            &conjuncts[3],
            Condition::Comparison { operand: Operand::Literal(Value::Date(_)), .. }
        ));
    }

    #[test]
    fn test_literal_on_the_left_is_flipped() {
        assert_eq!(
            parse_condition("5 < x").unwrap(),
            Condition::literal("x", Operator::Gt, 5i64)
        );
    }

    #[test]
    fn test_in_like_and_field_comparison() {
        let c = parse_condition("k IN (1, 2) AND name NOT LIKE 'a%' AND x <= y").unwrap();
        let conjuncts = c.into_conjuncts();
        assert_eq!(
            conjuncts[0],
            Condition::compare(
                "k",
                Operator::InList,
                Operand::List(vec![Value::Integer(1), Value::Integer(2)])
            )
        );
        assert_eq!(
            conjuncts[1],
            Condition::literal("name", Operator::Like, "a%").negate()
        );
        assert_eq!(
            conjuncts[2],
            Condition::compare("x", Operator::Le, Operand::Field("y".into()))
        );
    }

    #[test]
    fn test_count_variants() {
        let q = parse("SELECT COUNT(*), COUNT(a), COUNT(DISTINCT a) FROM t").unwrap();
        let names: Vec<String> = q.projections.iter().filter_map(|p| p.output_name()).collect();
        assert_eq!(names, vec!["COUNT(*)", "COUNT(a)", "COUNT(DISTINCT a)"]);
    }

    #[test]
    fn test_syntax_and_lowering_errors() {
        assert!(matches!(
            parse("SELECT a FROM t WHERE"),
            Err(SqlError::Syntax(_))
        ));
        assert!(matches!(
            parse("SELECT a FROM t LIMIT -1"),
            Err(SqlError::Parse(_))
        ));
        assert!(parse("SELECT FROM t").is_err());
        assert!(parse("SELECT a b c FROM t").is_err());
        assert!(matches!(
            parse("SELECT a FROM t JOIN u ON t.a = u.a"),
            Err(SqlError::Parse(_))
        ));
        assert!(matches!(
            parse("SELECT a + 1 FROM t"),
            Err(SqlError::Parse(_))
        ));
        assert!(matches!(
            parse("DELETE FROM t"),
            Err(SqlError::Parse(_))
        ));
    }

    #[test]
    fn test_qualified_and_quoted_names() {
        let q = parse(r#"SELECT t.a, "Mixed Case" FROM t ORDER BY t.a"#).unwrap();
        assert_eq!(
            q.projections,
            vec![
                Projection::Field {
                    name: "a".into(),
                    alias: None
                },
                Projection::Field {
                    name: "Mixed Case".into(),
                    alias: None
                },
            ]
        );
        assert_eq!(q.order_by[0].name, "a");
    }
}
