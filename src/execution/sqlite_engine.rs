//! SQLite Execution Engine
//!
//! Runs validated statements against the statistics database. The file is
//! opened read-only for every call, on a blocking thread.

use crate::error::{AgentError, Result};
use crate::execution::result::QueryResult;
use crate::execution::QueryExecutor;
use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::{params_from_iter, Connection, OpenFlags};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, warn};

pub struct SqliteExecutor {
    db_path: PathBuf,
}

impl SqliteExecutor {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    fn query_blocking(
        db_path: &Path,
        sql: &str,
        params: &[String],
    ) -> Result<(Vec<String>, Vec<Map<String, Value>>)> {
        if !db_path.exists() {
            return Err(AgentError::Execution(format!(
                "Database file not found: {}",
                db_path.display()
            )));
        }

        let conn = Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        let mut stmt = conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = Map::with_capacity(columns.len());
            for (i, name) in columns.iter().enumerate() {
                record.insert(name.clone(), value_to_json(row.get_ref(i)?));
            }
            out.push(record);
        }

        Ok((columns, out))
    }
}

#[async_trait]
impl QueryExecutor for SqliteExecutor {
    async fn execute(&self, sql: &str, params: &[String]) -> Result<QueryResult> {
        debug!("Executing SQL ({} params): {}", params.len(), sql);
        let started = Instant::now();

        let db_path = self.db_path.clone();
        let statement = sql.to_string();
        let bound = params.to_vec();
        let outcome = tokio::task::spawn_blocking(move || Self::query_blocking(&db_path, &statement, &bound))
            .await
            .map_err(|e| AgentError::Execution(format!("Query task failed: {}", e)))?;

        let elapsed = started.elapsed().as_millis() as u64;
        Ok(match outcome {
            Ok((columns, rows)) => {
                debug!("Query returned {} rows in {} ms", rows.len(), elapsed);
                QueryResult::success(columns, rows, elapsed)
            }
            Err(e) => {
                warn!("Query failed: {}", e);
                QueryResult::error(e.to_string(), elapsed)
            }
        })
    }
}

fn value_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(format!("<blob {} bytes>", bytes.len())),
    }
}
