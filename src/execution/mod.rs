//! Tabular execution interface
//!
//! The workflow only sees `QueryExecutor`; `SqliteExecutor` is the engine
//! used in production.

pub mod result;
pub mod sqlite_engine;

use crate::error::Result;
use async_trait::async_trait;

pub use result::QueryResult;
pub use sqlite_engine::SqliteExecutor;

#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Run one read-only statement with positional parameters
    async fn execute(&self, sql: &str, params: &[String]) -> Result<QueryResult>;
}
