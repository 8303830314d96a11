use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("SQL generation failed: {0}")]
    Generation(String),

    #[error("SQL validation failed: {0}")]
    Validation(String),

    #[error("SQL execution error: {0}")]
    Execution(String),

    #[error("Forecast failed: {0}")]
    Forecast(String),

    #[error("Insufficient data for forecasting: minimum {required} data points required, got {actual}")]
    InsufficientData { required: usize, actual: usize },

    #[error("Web search error: {0}")]
    WebSearch(String),

    #[error("Audit log error: {0}")]
    Audit(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, AgentError>;
