//! Named string variables for `${name}` substitution.
//!
//! Each pipeline owns one `VariableSpace`. A nested pipeline gets a space
//! whose parent is the enclosing pipeline's, so lookups fall through to the
//! outer scope unless a name is overridden locally.

use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct VariableSpace {
    parent: Option<Arc<VariableSpace>>,
    values: HashMap<String, String>,
}

impl VariableSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty space that falls back to `parent` for unknown names.
    pub fn with_parent(parent: Arc<VariableSpace>) -> Self {
        Self {
            parent: Some(parent),
            values: HashMap::new(),
        }
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn extend<K, V>(&mut self, vars: impl IntoIterator<Item = (K, V)>)
    where
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in vars {
            self.set(k, v);
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        match self.values.get(name) {
            Some(v) => Some(v.as_str()),
            None => self.parent.as_deref().and_then(|p| p.get(name)),
        }
    }

    /// Names defined locally (not including the parent's).
    pub fn local_names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Replace every `${name}` in `text` with its value.
    ///
    /// References to unknown variables are left untouched.
    pub fn substitute(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            match after.find('}') {
                Some(end) => {
                    let name = &after[..end];
                    match self.get(name) {
                        Some(value) => out.push_str(value),
                        None => out.push_str(&rest[start..start + 2 + end + 1]),
                    }
                    rest = &after[end + 1..];
                }
                None => {
                    out.push_str(&rest[start..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substitute() {
        let mut vars = VariableSpace::new();
        vars.set("p", "WHERE x = 5");
        vars.set("q", "");
        assert_eq!(vars.substitute("${p}"), "WHERE x = 5");
        assert_eq!(vars.substitute("[${q}]"), "[]");
        assert_eq!(vars.substitute("a ${missing} b"), "a ${missing} b");
        assert_eq!(vars.substitute("open ${p"), "open ${p");
        assert_eq!(vars.substitute("no refs"), "no refs");
    }

    #[test]
    fn test_parent_fallback() {
        let mut outer = VariableSpace::new();
        outer.set("a", "outer");
        outer.set("b", "outer-b");
        let mut inner = VariableSpace::with_parent(Arc::new(outer));
        inner.set("a", "inner");
        assert_eq!(inner.get("a"), Some("inner"));
        assert_eq!(inner.get("b"), Some("outer-b"));
        assert_eq!(inner.local_names().count(), 1);
    }
}
