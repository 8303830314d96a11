//! Workflow State
//!
//! The single context object threaded through every step of a run, plus the
//! closed vocabularies (intent, step, selection mode) the router works with.

use crate::error::AgentError;
use crate::execution::QueryResult;
use crate::forecast::ForecastOutcome;
use crate::metadata::TableMetadata;
use crate::ranker::Candidate;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Caller-supplied context. `region` drives scope restriction; anything
/// else (e.g. `leveldata`) is carried for prompts and the audit trail.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UserContext {
    pub region: Option<String>,
    pub extra: BTreeMap<String, String>,
}

impl UserContext {
    pub fn new(region: &str) -> Self {
        Self {
            region: Some(region.to_string()),
            extra: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.extra.insert(key.to_string(), value.to_string());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        match key {
            "region" => self.region.as_deref(),
            _ => self.extra.get(key).map(String::as_str),
        }
    }

    /// Region usable for scope restriction (non-blank)
    pub fn scope_region(&self) -> Option<&str> {
        self.region.as_deref().map(str::trim).filter(|r| !r.is_empty())
    }
}

/// How a table is chosen when several candidates match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    /// Ask the language model, falling back to the best relevance score
    Auto,
    /// Ask the caller to pick by number
    Manual,
}

impl FromStr for SelectionMode {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(SelectionMode::Auto),
            "manual" => Ok(SelectionMode::Manual),
            other => Err(AgentError::Config(format!(
                "Unknown selection mode '{}' (expected auto or manual)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    DataQuery,
    Forecast,
    Clarify,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::DataQuery => "data_query",
            Intent::Forecast => "forecast",
            Intent::Clarify => "clarify",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Workflow steps. Routing between them is done by the pure functions in
/// `workflow::router`, never by comparing names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Router,
    TableResolution,
    Planner,
    SqlAgent,
    SqlExecutor,
    ForecastAgent,
    Clarify,
    ResponseFormatter,
    ErrorHandler,
    End,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Router => "router",
            Step::TableResolution => "table_resolution",
            Step::Planner => "planner",
            Step::SqlAgent => "sql_agent",
            Step::SqlExecutor => "sql_executor",
            Step::ForecastAgent => "forecast_agent",
            Step::Clarify => "clarify",
            Step::ResponseFormatter => "response_formatter",
            Step::ErrorHandler => "error_handler",
            Step::End => "end",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a run knows. Created per question, mutated by each step.
#[derive(Debug, Clone, Serialize)]
pub struct Context {
    pub user_input: String,
    pub user_context: UserContext,
    pub intent: Option<Intent>,

    pub needs_clarification: bool,
    pub clarification_question: Option<String>,
    pub clarification_response: Option<String>,

    pub relevant_tables: Vec<Candidate>,
    pub selected_table: Option<String>,
    pub table_metadata: Option<TableMetadata>,
    pub selection_confidence: Option<f64>,
    pub selection_reason: Option<String>,

    pub raw_sql: Option<String>,
    pub validated_sql: Option<String>,
    /// Positional parameters bound to `validated_sql`
    pub sql_params: Vec<String>,

    pub execution_result: Option<QueryResult>,
    pub forecast_result: Option<ForecastOutcome>,

    pub final_answer: Option<String>,
    pub error: Option<String>,
    pub next_step: Step,
}

impl Context {
    pub fn new(user_input: impl Into<String>, user_context: UserContext) -> Self {
        Self {
            user_input: user_input.into(),
            user_context,
            intent: None,
            needs_clarification: false,
            clarification_question: None,
            clarification_response: None,
            relevant_tables: Vec::new(),
            selected_table: None,
            table_metadata: None,
            selection_confidence: None,
            selection_reason: None,
            raw_sql: None,
            validated_sql: None,
            sql_params: Vec::new(),
            execution_result: None,
            forecast_result: None,
            final_answer: None,
            error: None,
            next_step: Step::Router,
        }
    }

    /// Record a failure and hand control to the error handler
    pub fn fail(&mut self, error: impl fmt::Display) {
        self.error = Some(error.to_string());
        self.next_step = Step::ErrorHandler;
    }

    pub fn select(&mut self, candidate: &Candidate) {
        self.selected_table = Some(candidate.table_name.clone());
        self.table_metadata = Some(candidate.metadata.clone());
    }
}
