//! Query Result - what a tabular execution returns

use serde::Serialize;
use serde_json::{Map, Value};

/// Outcome of running one statement. Storage-layer failures are reported
/// here (`success == false`), not as `Err`.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub success: bool,

    /// Column names in result order
    pub columns: Vec<String>,

    /// One JSON object per row, keyed by column name in result order
    pub rows: Vec<Map<String, Value>>,

    pub row_count: usize,

    pub execution_time_ms: u64,

    pub error: Option<String>,
}

impl QueryResult {
    pub fn success(columns: Vec<String>, rows: Vec<Map<String, Value>>, execution_time_ms: u64) -> Self {
        Self {
            success: true,
            row_count: rows.len(),
            columns,
            rows,
            execution_time_ms,
            error: None,
        }
    }

    pub fn error(error: impl Into<String>, execution_time_ms: u64) -> Self {
        Self {
            success: false,
            columns: Vec::new(),
            rows: Vec::new(),
            row_count: 0,
            execution_time_ms,
            error: Some(error.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First `max_rows` rows as a Markdown table
    pub fn to_markdown(&self, max_rows: usize) -> String {
        if self.columns.is_empty() {
            return String::new();
        }

        let mut lines = Vec::with_capacity(max_rows + 2);
        lines.push(format!("| {} |", self.columns.join(" | ")));
        lines.push(format!(
            "|{}",
            self.columns.iter().map(|_| " --- |").collect::<String>()
        ));

        for row in self.rows.iter().take(max_rows) {
            let cells: Vec<String> = self
                .columns
                .iter()
                .map(|c| row.get(c).map(cell_text).unwrap_or_default())
                .collect();
            lines.push(format!("| {} |", cells.join(" | ")));
        }

        lines.join("\n")
    }
}

/// Display text for a single cell
pub fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.replace('|', "\\|"),
        other => other.to_string(),
    }
}
