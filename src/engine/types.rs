// SPDX-License-Identifier: Apache-2.0

//! Universal data types for the executor boundary
//!
//! These types normalize whatever the underlying log store returns into a
//! representation the analysis modules can consume.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for one execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionId(pub Uuid);

impl ExecutionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

/// Universal scalar value representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Float(f) => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Timestamp(ts) => Some(*ts),
            Self::Text(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            _ => None,
        }
    }

    /// Rough wire-size estimate used by the adapter's byte ceiling.
    pub fn estimated_bytes(&self) -> u64 {
        match self {
            Self::Null => 1,
            Self::Bool(_) => 1,
            Self::Int(_) | Self::Float(_) => 8,
            Self::Timestamp(_) => 12,
            Self::Text(s) => s.len() as u64,
        }
    }
}

/// Column metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: String,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }
}

/// A single row (values indexed by column order).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn estimated_bytes(&self) -> u64 {
        self.values.iter().map(Value::estimated_bytes).sum()
    }
}

/// Raw output from a source session, before the adapter applies caps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryOutput {
    pub columns: Vec<Column>,
    pub rows: Vec<Row>,
}

impl QueryOutput {
    pub fn empty() -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }
}

/// Capped, metadata-stamped result delivered to callers and analyzers.
///
/// Rows keep source order; the core never reorders them. `truncated` is set
/// whenever the adapter dropped rows to honor the row limit — there is no
/// silent truncation. `staleness_minutes` carries the documented latency of
/// the most-stale source table referenced by the statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultSet {
    pub columns: Vec<Column>,
    pub rows: Vec<Row>,
    pub truncated: bool,
    pub staleness_minutes: Option<u32>,
}

impl ResultSet {
    /// Index of a column by name, case-insensitive.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Value at `(row, column-name)`, if both exist.
    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row)?.values.get(idx)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_lookup_is_case_insensitive() {
        let rs = ResultSet {
            columns: vec![Column::new("USER_NAME", "TEXT")],
            rows: vec![Row::new(vec![Value::Text("ALICE".into())])],
            truncated: false,
            staleness_minutes: None,
        };
        assert_eq!(rs.column_index("user_name"), Some(0));
        assert_eq!(
            rs.value(0, "User_Name").and_then(Value::as_str),
            Some("ALICE")
        );
    }

    #[test]
    fn value_conversions() {
        assert_eq!(Value::Int(7).as_f64(), Some(7.0));
        assert_eq!(Value::Float(1.5).as_i64(), Some(1));
        assert_eq!(Value::Null.as_str(), None);

        let ts = Value::Text("2024-03-01T10:00:00+00:00".into());
        assert!(ts.as_timestamp().is_some());
    }

    #[test]
    fn row_byte_estimate_counts_text_length() {
        let row = Row::new(vec![Value::Text("abcd".into()), Value::Int(1), Value::Null]);
        assert_eq!(row.estimated_bytes(), 4 + 8 + 1);
    }
}
