// Engine-neutral value model
// The single currency crossing the engine boundary in both directions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use uuid::Uuid;

/// A single typed value exchanged with a database engine.
///
/// Every driver maps its native wire types onto this closed set, losslessly
/// where possible. Unmapped native types decode to a descriptive
/// placeholder string rather than an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    Bytes(Vec<u8>),
    Uuid(Uuid),
}

impl QueryValue {
    pub fn is_null(&self) -> bool {
        matches!(self, QueryValue::Null)
    }

    /// Short tag for the variant, for display surfaces.
    pub fn type_name(&self) -> &'static str {
        match self {
            QueryValue::Null => "null",
            QueryValue::Bool(_) => "bool",
            QueryValue::Int(_) => "int",
            QueryValue::Float(_) => "float",
            QueryValue::Text(_) => "text",
            QueryValue::Timestamp(_) => "timestamp",
            QueryValue::Bytes(_) => "bytes",
            QueryValue::Uuid(_) => "uuid",
        }
    }
}

// Floats compare and hash by bit pattern so requests can serve as map keys
// and test fixtures.
impl PartialEq for QueryValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (QueryValue::Null, QueryValue::Null) => true,
            (QueryValue::Bool(a), QueryValue::Bool(b)) => a == b,
            (QueryValue::Int(a), QueryValue::Int(b)) => a == b,
            (QueryValue::Float(a), QueryValue::Float(b)) => a.to_bits() == b.to_bits(),
            (QueryValue::Text(a), QueryValue::Text(b)) => a == b,
            (QueryValue::Timestamp(a), QueryValue::Timestamp(b)) => a == b,
            (QueryValue::Bytes(a), QueryValue::Bytes(b)) => a == b,
            (QueryValue::Uuid(a), QueryValue::Uuid(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for QueryValue {}

impl Hash for QueryValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            QueryValue::Null => {}
            QueryValue::Bool(b) => b.hash(state),
            QueryValue::Int(i) => i.hash(state),
            QueryValue::Float(f) => f.to_bits().hash(state),
            QueryValue::Text(s) => s.hash(state),
            QueryValue::Timestamp(t) => t.hash(state),
            QueryValue::Bytes(b) => b.hash(state),
            QueryValue::Uuid(u) => u.hash(state),
        }
    }
}

impl From<&str> for QueryValue {
    fn from(s: &str) -> Self {
        QueryValue::Text(s.to_string())
    }
}

impl From<String> for QueryValue {
    fn from(s: String) -> Self {
        QueryValue::Text(s)
    }
}

impl From<i64> for QueryValue {
    fn from(i: i64) -> Self {
        QueryValue::Int(i)
    }
}

impl From<bool> for QueryValue {
    fn from(b: bool) -> Self {
        QueryValue::Bool(b)
    }
}

impl From<f64> for QueryValue {
    fn from(f: f64) -> Self {
        QueryValue::Float(f)
    }
}

/// SQL text plus ordered, typed parameter values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryRequest {
    pub sql: String,
    pub params: Vec<QueryValue>,
}

impl QueryRequest {
    pub fn new(sql: impl Into<String>) -> Self {
        Self { sql: sql.into(), params: Vec::new() }
    }

    pub fn with_params(sql: impl Into<String>, params: Vec<QueryValue>) -> Self {
        Self { sql: sql.into(), params }
    }
}

/// An ordered mapping from column name to value.
///
/// Column names are unique within a row; inserting an existing name
/// replaces the value in place, preserving order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryRow {
    entries: Vec<(String, QueryValue)>,
}

impl QueryRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: QueryValue) {
        let name = name.into();
        if let Some(entry) = self.entries.iter_mut().find(|(n, _)| *n == name) {
            entry.1 = value;
        } else {
            self.entries.push((name, value));
        }
    }

    pub fn get(&self, name: &str) -> Option<&QueryValue> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &QueryValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, QueryValue)> for QueryRow {
    fn from_iter<I: IntoIterator<Item = (String, QueryValue)>>(iter: I) -> Self {
        let mut row = QueryRow::new();
        for (name, value) in iter {
            row.insert(name, value);
        }
        row
    }
}

/// Rows returned by one execution, plus the affected-row count reported by
/// the engine for mutations (ignored for selects).
///
/// `columns` carries the statement's column names even when zero rows come
/// back, so consumers can render an empty result set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<QueryRow>,
    pub rows_affected: Option<u64>,
}

impl QueryResult {
    pub fn empty() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_request_is_hashable() {
        let a = QueryRequest::with_params(
            "SELECT * FROM t WHERE x = $1",
            vec![QueryValue::Float(1.5), QueryValue::Null],
        );
        let b = a.clone();

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn test_float_equality_by_bits() {
        assert_eq!(QueryValue::Float(f64::NAN), QueryValue::Float(f64::NAN));
        assert_ne!(QueryValue::Float(0.0), QueryValue::Float(-0.0));
        assert_ne!(QueryValue::Float(1.0), QueryValue::Int(1));
    }

    #[test]
    fn test_row_insert_replaces_existing_name() {
        let mut row = QueryRow::new();
        row.insert("id", QueryValue::Int(1));
        row.insert("name", QueryValue::from("first"));
        row.insert("id", QueryValue::Int(2));

        assert_eq!(row.len(), 2);
        assert_eq!(row.get("id"), Some(&QueryValue::Int(2)));
        // Order is preserved on replacement
        let names: Vec<&str> = row.column_names().collect();
        assert_eq!(names, vec!["id", "name"]);
    }

    #[test]
    fn test_row_get_missing_column() {
        let row = QueryRow::new();
        assert!(row.get("missing").is_none());
        assert!(row.is_empty());
    }

    #[test]
    fn test_value_type_names() {
        assert_eq!(QueryValue::Null.type_name(), "null");
        assert_eq!(QueryValue::from(42i64).type_name(), "int");
        assert_eq!(QueryValue::Bytes(vec![1, 2]).type_name(), "bytes");
    }
}
