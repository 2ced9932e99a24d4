//! Typed field values carried inside rows.
//!
//! A `Value` is one cell of a row. Comparison follows the engine's ordering
//! rules: integers and numbers compare numerically, `Null` sorts before
//! everything else, and values of unrelated types are incomparable.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

/// Canonical textual pattern for date values.
pub const DATE_FORMAT: &str = "%Y/%m/%d %H:%M:%S%.3f";

/// Patterns accepted when converting text to a date, tried in order.
const DATE_PARSE_FORMATS: &[&str] = &[
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
];

const DATE_ONLY_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d"];

/// Semantic type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ValueType {
    /// Unknown or untyped (e.g. a `NULL` literal).
    #[default]
    None,
    String,
    Integer,
    Number,
    Boolean,
    Date,
}

impl ValueType {
    pub fn name(&self) -> &'static str {
        match self {
            ValueType::None => "None",
            ValueType::String => "String",
            ValueType::Integer => "Integer",
            ValueType::Number => "Number",
            ValueType::Boolean => "Boolean",
            ValueType::Date => "Date",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ValueType::Integer | ValueType::Number)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Value conversion failure.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("cannot convert '{value}' to {target}")]
pub struct ValueError {
    pub value: String,
    pub target: ValueType,
}

/// One cell of a row.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Value {
    #[default]
    Null,
    String(String),
    Integer(i64),
    Number(f64),
    Boolean(bool),
    Date(NaiveDateTime),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Null => ValueType::None,
            Value::String(_) => ValueType::String,
            Value::Integer(_) => ValueType::Integer,
            Value::Number(_) => ValueType::Number,
            Value::Boolean(_) => ValueType::Boolean,
            Value::Date(_) => ValueType::Date,
        }
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric view of integers and numbers.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(v) => Some(*v as f64),
            Value::Number(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    /// Compare two values. `None` means the types are incomparable.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Null, _) => Some(Ordering::Less),
            (_, Value::Null) => Some(Ordering::Greater),
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.partial_cmp(&y),
                _ => None,
            },
        }
    }

    /// Like [`Value::compare`] but strings are compared ignoring case.
    pub fn compare_ignore_case(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::String(a), Value::String(b)) => Some(a.to_lowercase().cmp(&b.to_lowercase())),
            _ => self.compare(other),
        }
    }

    /// Total order used for sorting: incomparable values fall back to a
    /// fixed ranking of their types.
    pub fn sort_cmp(&self, other: &Value, case_sensitive: bool) -> Ordering {
        let cmp = if case_sensitive {
            self.compare(other)
        } else {
            self.compare_ignore_case(other)
        };
        cmp.unwrap_or_else(|| type_rank(self).cmp(&type_rank(other)))
    }

    /// Hashable key for grouping and duplicate detection.
    pub fn key(&self, case_insensitive: bool) -> ValueKey {
        match self {
            Value::Null => ValueKey::Null,
            Value::String(s) if case_insensitive => ValueKey::String(s.to_lowercase()),
            Value::String(s) => ValueKey::String(s.clone()),
            Value::Integer(v) => ValueKey::Integer(*v),
            Value::Number(v) => ValueKey::Number(v.to_bits()),
            Value::Boolean(v) => ValueKey::Boolean(*v),
            Value::Date(v) => ValueKey::Date(*v),
        }
    }

    /// Convert this value to `target`. `Null` converts to `Null`.
    pub fn convert_to(&self, target: ValueType) -> Result<Value, ValueError> {
        if self.is_null() || target == ValueType::None || self.value_type() == target {
            return Ok(self.clone());
        }
        let fail = || ValueError {
            value: self.to_string(),
            target,
        };
        let converted = match target {
            ValueType::String => Value::String(self.to_string()),
            ValueType::Integer => match self {
                Value::Number(n) if n.is_finite() => Value::Integer(n.round() as i64),
                Value::String(s) => Value::Integer(s.trim().parse().map_err(|_| fail())?),
                Value::Boolean(b) => Value::Integer(i64::from(*b)),
                Value::Date(d) => Value::Integer(d.and_utc().timestamp_millis()),
                _ => return Err(fail()),
            },
            ValueType::Number => match self {
                Value::Integer(i) => Value::Number(*i as f64),
                Value::String(s) => Value::Number(s.trim().parse().map_err(|_| fail())?),
                Value::Boolean(b) => Value::Number(if *b { 1.0 } else { 0.0 }),
                Value::Date(d) => Value::Number(d.and_utc().timestamp_millis() as f64),
                _ => return Err(fail()),
            },
            ValueType::Boolean => match self {
                Value::Integer(i) => Value::Boolean(*i != 0),
                Value::Number(n) => Value::Boolean(*n != 0.0),
                Value::String(s) => Value::Boolean(parse_bool(s).ok_or_else(fail)?),
                _ => return Err(fail()),
            },
            ValueType::Date => match self {
                Value::String(s) => Value::Date(parse_date(s).ok_or_else(fail)?),
                Value::Integer(ms) => Value::Date(
                    DateTime::from_timestamp_millis(*ms)
                        .ok_or_else(fail)?
                        .naive_utc(),
                ),
                _ => return Err(fail()),
            },
            ValueType::None => self.clone(),
        };
        Ok(converted)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::String(s) => f.write_str(s),
            Value::Integer(v) => write!(f, "{}", v),
            Value::Number(v) => write!(f, "{}", v),
            Value::Boolean(v) => f.write_str(if *v { "Y" } else { "N" }),
            Value::Date(d) => write!(f, "{}", d.format(DATE_FORMAT)),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::Date(v)
    }
}

/// Hashable projection of a [`Value`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueKey {
    Null,
    String(String),
    Integer(i64),
    Number(u64),
    Boolean(bool),
    Date(NaiveDateTime),
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Boolean(_) => 1,
        Value::Integer(_) | Value::Number(_) => 2,
        Value::Date(_) => 3,
        Value::String(_) => 4,
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_uppercase().as_str() {
        "Y" | "YES" | "TRUE" | "1" => Some(true),
        "N" | "NO" | "FALSE" | "0" => Some(false),
        _ => None,
    }
}

/// Parse a date in any of the accepted textual patterns.
pub fn parse_date(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    DATE_PARSE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            DATE_ONLY_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_cross_type_compare() {
        assert_eq!(
            Value::Integer(5).compare(&Value::Number(5.0)),
            Some(Ordering::Equal)
        );
        assert_eq!(
            Value::Number(4.5).compare(&Value::Integer(5)),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn test_null_sorts_first_and_incomparable_types() {
        assert_eq!(Value::Null.compare(&Value::Integer(1)), Some(Ordering::Less));
        assert_eq!(Value::from("a").compare(&Value::Integer(1)), None);
        assert_eq!(
            Value::from("a").sort_cmp(&Value::Integer(1), true),
            Ordering::Greater
        );
    }

    #[test]
    fn test_ignore_case_compare() {
        let a = Value::from("abc");
        let b = Value::from("ABC");
        assert_ne!(a.compare(&b), Some(Ordering::Equal));
        assert_eq!(a.compare_ignore_case(&b), Some(Ordering::Equal));
        assert_eq!(a.key(true), b.key(true));
        assert_ne!(a.key(false), b.key(false));
    }

    #[test]
    fn test_convert_string_to_integer() {
        assert_eq!(
            Value::from(" 42 ").convert_to(ValueType::Integer),
            Ok(Value::Integer(42))
        );
        let err = Value::from("x1").convert_to(ValueType::Integer).unwrap_err();
        assert_eq!(err.target, ValueType::Integer);
        assert!(err.to_string().contains("x1"));
    }

    #[test]
    fn test_convert_dates() {
        let d = Value::from("2024-01-31").convert_to(ValueType::Date).unwrap();
        assert_eq!(d.to_string(), "2024/01/31 00:00:00.000");

        let ts = Value::from("2024/01/31 10:20:30.500")
            .convert_to(ValueType::Date)
            .unwrap();
        assert_eq!(ts.to_string(), "2024/01/31 10:20:30.500");
    }

    #[test]
    fn test_null_converts_to_null() {
        assert_eq!(Value::Null.convert_to(ValueType::Date), Ok(Value::Null));
    }

    #[test]
    fn test_number_display_is_plain() {
        assert_eq!(Value::Number(5.0).to_string(), "5");
        assert_eq!(Value::Number(0.25).to_string(), "0.25");
        assert_eq!(Value::Boolean(true).to_string(), "Y");
    }
}
