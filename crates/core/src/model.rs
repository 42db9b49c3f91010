use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// A single cell of an execution result. The backend sends arbitrary JSON scalars, including
/// typed nulls, so cells are kept as raw JSON values.
pub type Scalar = Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct ConnectionId(pub i64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Connection {
    pub id: ConnectionId,
    pub name: String,
    pub connection_string: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewConnection {
    pub name: String,
    pub connection_string: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionTestOutcome {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnSchema {
    #[serde(rename = "column_name")]
    pub name: String,
    pub data_type: String,
    #[serde(rename = "is_nullable")]
    pub nullable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableSchema {
    #[serde(rename = "table_name")]
    pub name: String,
    pub columns: Vec<ColumnSchema>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GeneratedQuery {
    pub sql: String,
    pub explanation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Scalar>>,
    pub row_count: usize,
}

impl ExecutionResult {
    /// Builds a result whose `row_count` always matches the number of rows held.
    #[must_use]
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Scalar>>) -> Self {
        let row_count = rows.len();
        Self {
            columns,
            rows,
            row_count,
        }
    }

    /// Repairs a wire payload whose `row_count` disagrees with its rows.
    #[must_use]
    pub fn normalized(self) -> Self {
        if self.row_count != self.rows.len() {
            warn!(
                reported = self.row_count,
                actual = self.rows.len(),
                "backend row_count disagrees with returned rows"
            );
        }
        Self::new(self.columns, self.rows)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Cell at `row`/`column`; ragged rows yield `None` for the missing tail.
    #[must_use]
    pub fn cell(&self, row: usize, column: usize) -> Option<&Scalar> {
        self.rows.get(row).and_then(|cells| cells.get(column))
    }
}

/// Textual form of a cell, `None` for a typed null.
#[must_use]
pub fn scalar_text(value: &Scalar) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Number(number) => Some(number.to_string()),
        Value::Array(_) | Value::Object(_) => Some(value.to_string()),
    }
}
