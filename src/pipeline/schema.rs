//! Row layout descriptions.

use crate::pipeline::value::{Value, ValueType};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// A row is an ordered list of values positionally matching a [`Schema`].
pub type Row = Vec<Value>;

/// Description of one field in a row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMeta {
    pub name: String,
    pub value_type: ValueType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u32>,
}

impl FieldMeta {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            length: None,
            precision: None,
        }
    }

    pub fn with_length(mut self, length: u32, precision: Option<u32>) -> Self {
        self.length = Some(length);
        self.precision = precision;
        self
    }
}

/// Ordered field list describing every row on an edge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema {
    fields: Vec<FieldMeta>,
}

impl Schema {
    pub fn new(fields: Vec<FieldMeta>) -> Self {
        Self { fields }
    }

    /// The zero-field schema.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Shorthand for building a schema from `(name, type)` pairs.
    pub fn of(fields: &[(&str, ValueType)]) -> Self {
        Self::new(
            fields
                .iter()
                .map(|(name, ty)| FieldMeta::new(*name, *ty))
                .collect(),
        )
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &[FieldMeta] {
        &self.fields
    }

    pub fn field(&self, index: usize) -> Option<&FieldMeta> {
        self.fields.get(index)
    }

    /// Position of the first field named `name`.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Position of the first field named `name`, ignoring ASCII case.
    pub fn index_of_ignore_case(&self, name: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|f| f.name.eq_ignore_ascii_case(name))
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Copy of this schema with fields renamed by `(from, to)` pairs.
    pub fn renamed(&self, renames: &[(String, String)]) -> Schema {
        let mut out = self.clone();
        for (from, to) in renames {
            if let Some(idx) = out.index_of(from) {
                out.fields[idx].name = to.clone();
            }
        }
        out
    }

    /// Copy of this schema with `extra` appended.
    pub fn extended(&self, extra: impl IntoIterator<Item = FieldMeta>) -> Schema {
        let mut out = self.clone();
        out.fields.extend(extra);
        out
    }

    /// Schema containing only the fields at `indices`, in that order.
    pub fn project(&self, indices: &[usize]) -> Schema {
        Schema::new(
            indices
                .iter()
                .filter_map(|&i| self.fields.get(i).cloned())
                .collect(),
        )
    }

    /// True when both schemas have the same field names in the same order.
    pub fn same_names(&self, other: &Schema) -> bool {
        self.len() == other.len() && self.field_names().eq(other.field_names())
    }

    /// Append a field.
    pub fn push(&mut self, field: FieldMeta) {
        self.fields.push(field);
    }

    pub fn into_shared(self) -> Arc<Schema> {
        Arc::new(self)
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}:{}", field.name, field.value_type)?;
        }
        write!(f, "]")
    }
}
