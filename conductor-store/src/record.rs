//! The `Record` trait: anything persisted through a [`crate::Store`].
//!
//! Mirrors the generic persistence contract of the Memory Store (M):
//! callers define a domain type, implement `Record` for it, and get
//! CRUD, keyword search, filtering, and (for claimable records) leasing
//! for free.

use serde::{Serialize, de::DeserializeOwned};
use std::fmt;

/// A value usable in an equality [`Filter`] against an indexed field.
#[derive(Debug, Clone, PartialEq, Serialize, serde::Deserialize)]
pub enum IndexValue {
    Text(String),
    Int(i64),
    Bool(bool),
}

impl fmt::Display for IndexValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexValue::Text(s) => write!(f, "{s}"),
            IndexValue::Int(i) => write!(f, "{i}"),
            IndexValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// Comparison operator for a [`Filter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    NotEq,
}

/// A single `field {op} value` constraint evaluated against a record's
/// [`Record::index_value`].
#[derive(Debug, Clone)]
pub struct Filter {
    pub field: &'static str,
    pub op: FilterOp,
    pub value: IndexValue,
}

impl Filter {
    pub fn eq(field: &'static str, value: IndexValue) -> Self {
        Self {
            field,
            op: FilterOp::Eq,
            value,
        }
    }

    pub fn not_eq(field: &'static str, value: IndexValue) -> Self {
        Self {
            field,
            op: FilterOp::NotEq,
            value,
        }
    }

    fn matches(&self, candidate: Option<IndexValue>) -> bool {
        let Some(candidate) = candidate else { return false };
        match self.op {
            FilterOp::Eq => candidate == self.value,
            FilterOp::NotEq => candidate != self.value,
        }
    }
}

/// Trait implemented by every domain type persisted through [`crate::Store`].
///
/// Implementors are plain data structs (Task, Orchestration, Observation,
/// ...); the store never inspects their shape beyond this trait.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// SQL-safe table name, e.g. `"tasks"`.
    fn table() -> &'static str;

    /// Globally unique identifier for this record.
    fn id(&self) -> &str;

    /// Field names that may appear in a [`Filter`] passed to `Store::query`.
    fn index_fields() -> &'static [&'static str] {
        &[]
    }

    /// Value of an indexed field, or `None` if `field` is not indexed.
    fn index_value(&self, _field: &str) -> Option<IndexValue> {
        None
    }

    /// Text blob indexed for full-text keyword search. Empty string means
    /// "not searchable".
    fn searchable_text(&self) -> String {
        String::new()
    }
}

/// Evaluate a record's filters in Rust (used by the naive query path and by
/// tests); the store additionally pushes matching constraints into SQL via
/// the index table for performance.
pub fn matches_all<T: Record>(record: &T, filters: &[Filter]) -> bool {
    filters.iter().all(|f| f.matches(record.index_value(f.field)))
}
