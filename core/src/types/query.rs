use serde::{Deserialize, Serialize};

/// A named benchmark query. Query sets are ordered slices of these, so the
/// sampling order is structural rather than dependent on map iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryDescriptor {
    pub name: String,
    pub text: String,
}

impl QueryDescriptor {
    pub fn new(name: &str, text: &str) -> Self {
        Self {
            name: name.to_string(),
            text: text.to_string(),
        }
    }
}

/// Timing of one query in one pass.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub name: String,
    pub duration_ms: f64,
    pub row_count: usize,
}

/// A single column value returned by a backend query.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

pub type Row = Vec<Value>;
