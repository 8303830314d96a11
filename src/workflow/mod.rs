//! Orchestration Workflow
//!
//! Drives one question through router → table resolution → planner → one of
//! the query / forecast / clarify paths → response formatting, with a single
//! error handler reachable from every step. A run never fails: every
//! terminal path leaves a non-empty answer in the context.

pub mod formatter;
pub mod router;
pub mod state;

use crate::audit::{emit, AuditEvent, AuditLevel, AuditSink, JsonlAuditLog};
use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::execution::{QueryExecutor, SqliteExecutor};
use crate::forecast::ForecastEngine;
use crate::llm::{LanguageModel, LlmClient};
use crate::metadata::MetadataStore;
use crate::ranker::TableRanker;
use crate::selector::TableSelector;
use crate::sql::QuerySynthesizer;
use crate::web::WebSearchTool;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub use state::{Context, Intent, SelectionMode, Step, UserContext};

/// Upper bound on steps per run; a well-formed run visits far fewer
const MAX_STEPS: usize = 32;

pub const WEB_SEARCH_FAILED: &str = "Failed to generate an answer from web search.";

/// External collaborators of a workflow
#[derive(Clone)]
pub struct Services {
    pub metadata: Arc<MetadataStore>,
    pub llm: Arc<dyn LanguageModel>,
    pub executor: Arc<dyn QueryExecutor>,
    pub web: WebSearchTool,
    pub audit: Arc<dyn AuditSink>,
}

impl Services {
    /// Production services described by the configuration
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            metadata: Arc::new(MetadataStore::new(config.metadata_dir.clone())),
            llm: Arc::new(LlmClient::new(config.llm.clone())),
            executor: Arc::new(SqliteExecutor::new(config.db_path.clone())),
            web: WebSearchTool::from_settings(&config.search),
            audit: Arc::new(JsonlAuditLog::new(config.log_dir.clone())),
        }
    }
}

/// What a caller gets back from a run
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowOutcome {
    pub answer: String,
    pub intent: Option<Intent>,
    /// Steps visited, in order
    pub path: Vec<Step>,
    pub selected_table: Option<String>,
    pub selection_confidence: Option<f64>,
    pub low_confidence: bool,
    pub sql: Option<String>,
    pub error: Option<String>,
    /// The answer is a numbered table choice; see `Workflow::resume`
    pub needs_clarification: bool,
    pub context: Context,
}

pub struct Workflow {
    services: Services,
    ranker: TableRanker,
    selector: TableSelector,
    synthesizer: QuerySynthesizer,
    forecaster: ForecastEngine,
    selection_mode: SelectionMode,
    low_confidence_threshold: f64,
}

impl Workflow {
    pub fn new(config: &AgentConfig, services: Services) -> Self {
        Self {
            ranker: TableRanker::new(config.top_k_tables),
            selector: TableSelector::new(Arc::clone(&services.llm)),
            synthesizer: QuerySynthesizer::new(Arc::clone(&services.llm), config.default_limit),
            forecaster: ForecastEngine::new(
                Arc::clone(&services.executor),
                config.forecast_method,
                config.min_data_points,
                config.forecast_periods,
            ),
            selection_mode: config.selection_mode,
            low_confidence_threshold: config.low_confidence_threshold,
            services,
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(config, Services::from_config(config))
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.services.metadata
    }

    /// Answer a fresh question
    pub async fn run(&self, question: &str, user_context: UserContext) -> WorkflowOutcome {
        self.drive(Context::new(question, user_context)).await
    }

    /// Re-run a question whose previous answer was a table choice, carrying
    /// the caller's reply (a 1-based number)
    pub async fn resume(&self, previous: Context, answer: &str) -> WorkflowOutcome {
        let mut ctx = Context::new(previous.user_input, previous.user_context);
        ctx.relevant_tables = previous.relevant_tables;
        ctx.needs_clarification = previous.needs_clarification;
        ctx.clarification_question = previous.clarification_question;
        ctx.clarification_response = Some(answer.to_string());
        self.drive(ctx).await
    }

    async fn drive(&self, mut ctx: Context) -> WorkflowOutcome {
        let session = Uuid::new_v4().to_string();
        let mut path = Vec::new();
        let mut low_confidence = false;

        info!("Workflow {} started: {:?}", session, ctx.user_input);

        while ctx.next_step != Step::End {
            if path.len() >= MAX_STEPS {
                error!("Workflow {} exceeded {} steps", session, MAX_STEPS);
                ctx.fail(format!("Workflow exceeded {} steps", MAX_STEPS));
                path.push(Step::ErrorHandler);
                self.handle_error(&mut ctx, &session);
                break;
            }

            let step = ctx.next_step;
            path.push(step);
            debug!("Workflow {} entering {}", session, step);
            self.audit(&session, AuditLevel::Info, "NODE_ENTER", json!({ "node": step.as_str() }));

            match step {
                Step::Router => self.route(&mut ctx, &session),
                Step::TableResolution => low_confidence = self.resolve_table(&mut ctx, &session).await,
                Step::Planner => self.plan(&mut ctx, &session),
                Step::SqlAgent => self.generate_sql(&mut ctx, &session).await,
                Step::SqlExecutor => self.execute_sql(&mut ctx).await,
                Step::ForecastAgent => self.run_forecast(&mut ctx, &session).await,
                Step::Clarify => self.clarify(&mut ctx, &session).await,
                Step::ResponseFormatter => self.format_response(&mut ctx).await,
                Step::ErrorHandler => self.handle_error(&mut ctx, &session),
                Step::End => {}
            }
        }

        path.push(Step::End);
        self.complete(&ctx, &session, &path, low_confidence);

        WorkflowOutcome {
            answer: ctx.final_answer.clone().unwrap_or_default(),
            intent: ctx.intent,
            path,
            selected_table: ctx.selected_table.clone(),
            selection_confidence: ctx.selection_confidence,
            low_confidence,
            sql: ctx.validated_sql.clone(),
            error: ctx.error.clone(),
            needs_clarification: ctx.needs_clarification && ctx.final_answer == ctx.clarification_question,
            context: ctx,
        }
    }

    fn route(&self, ctx: &mut Context, session: &str) {
        let intent = router::classify_intent(&ctx.user_input);
        ctx.intent = Some(intent);
        ctx.next_step = router::after_router(intent);
        info!("Intent for {:?}: {}", ctx.user_input, intent);
        self.audit(
            session,
            AuditLevel::Info,
            "ROUTER_DECISION",
            json!({ "intent": intent.as_str(), "user_input": ctx.user_input }),
        );
    }

    /// Returns whether the selection was low-confidence
    async fn resolve_table(&self, ctx: &mut Context, session: &str) -> bool {
        // Resumed disambiguation: the candidates from the previous run stand
        if ctx.clarification_response.is_some() && !ctx.relevant_tables.is_empty() {
            ctx.next_step = Step::Clarify;
            return false;
        }

        let catalog = match self.services.metadata.catalog() {
            Ok(catalog) => catalog,
            Err(e) => {
                ctx.fail(e);
                return false;
            }
        };

        ctx.relevant_tables = self.ranker.find_relevant_tables(&ctx.user_input, &catalog);
        let candidates = ctx.relevant_tables.len();

        if candidates == 0 {
            ctx.needs_clarification = false;
            warn!("No table matches {:?}; falling back to web search", ctx.user_input);
            self.audit(
                session,
                AuditLevel::Warning,
                "METADATA_NOT_FOUND",
                json!({ "action": "fallback to web search" }),
            );
            ctx.next_step = router::after_table_resolution(0, false);
            return false;
        }

        if self.selection_mode == SelectionMode::Manual && candidates > 1 {
            ctx.needs_clarification = true;
            ctx.clarification_question = Some(formatter::disambiguation_question(&ctx.relevant_tables));
            self.audit(
                session,
                AuditLevel::Info,
                "TABLE_SELECTION_REQUESTED",
                json!({
                    "tables_found": candidates,
                    "table_names": ctx.relevant_tables.iter().map(|c| c.table_name.as_str()).collect::<Vec<_>>(),
                }),
            );
            ctx.next_step = router::after_table_resolution(candidates, true);
            return false;
        }

        let selection = self
            .selector
            .select_best_table(&ctx.user_input, &ctx.relevant_tables, &ctx.user_context)
            .await;

        let Some(selected) = selection.selected.as_ref() else {
            ctx.next_step = router::after_table_resolution(0, false);
            return false;
        };

        ctx.select(selected);
        ctx.selection_confidence = Some(selection.confidence);
        ctx.selection_reason = Some(selection.reason.clone());
        let low_confidence = selection.confidence <= self.low_confidence_threshold;

        if low_confidence {
            warn!(
                "Low-confidence table selection: {} ({:.2})",
                selected.table_name, selection.confidence
            );
        }
        self.audit(
            session,
            if low_confidence { AuditLevel::Warning } else { AuditLevel::Success },
            "AUTO_TABLE_SELECTED",
            json!({
                "user_query": ctx.user_input,
                "selected_table": selected.table_name,
                "confidence": selection.confidence,
                "reason": selection.reason,
                "fallback_used": selection.fallback_used,
                "years_detected": selection.years_detected,
                "low_confidence": low_confidence,
            }),
        );

        ctx.next_step = router::after_table_resolution(candidates, false);
        low_confidence
    }

    fn plan(&self, ctx: &mut Context, session: &str) {
        let intent = ctx.intent.unwrap_or(Intent::DataQuery);
        ctx.next_step = router::after_planner(intent);
        self.audit(
            session,
            AuditLevel::Info,
            "PLANNER_DECISION",
            json!({ "intent": intent.as_str(), "next_step": ctx.next_step.as_str() }),
        );
    }

    async fn generate_sql(&self, ctx: &mut Context, session: &str) {
        let Some(table) = ctx.table_metadata.clone() else {
            ctx.fail("No table selected");
            return;
        };

        match self
            .synthesizer
            .synthesize(&ctx.user_input, &table, &ctx.user_context)
            .await
        {
            Ok(query) => {
                self.audit(
                    session,
                    AuditLevel::Success,
                    "SQL_GENERATED",
                    json!({ "table": table.name, "sql": query.sql, "params": query.params.len() }),
                );
                ctx.raw_sql = Some(query.raw_sql);
                ctx.validated_sql = Some(query.sql);
                ctx.sql_params = query.params;
                ctx.next_step = Step::SqlExecutor;
            }
            Err(e) => ctx.fail(e),
        }
    }

    async fn execute_sql(&self, ctx: &mut Context) {
        let Some(sql) = ctx.validated_sql.clone() else {
            ctx.fail("No SQL query to execute");
            return;
        };

        match self.services.executor.execute(&sql, &ctx.sql_params).await {
            Ok(result) if result.success => {
                ctx.execution_result = Some(result);
                ctx.next_step = Step::ResponseFormatter;
            }
            Ok(result) => ctx.fail(AgentError::Execution(
                result.error.unwrap_or_else(|| "Unknown SQL error".to_string()),
            )),
            Err(e) => ctx.fail(e),
        }
    }

    async fn run_forecast(&self, ctx: &mut Context, session: &str) {
        let Some(table) = ctx.table_metadata.clone() else {
            ctx.fail("No table selected for forecasting");
            return;
        };

        match self
            .forecaster
            .forecast(&table, &ctx.user_context, &ctx.user_input)
            .await
        {
            Ok(outcome) => {
                self.audit(
                    session,
                    AuditLevel::Success,
                    "FORECAST_SUCCESS",
                    json!({
                        "table": table.name,
                        "method": outcome.method.name(),
                        "data_points": outcome.data_points,
                        "detection_confidence": outcome.detection_confidence,
                    }),
                );
                ctx.validated_sql = Some(outcome.sql.clone());
                ctx.sql_params = outcome.params.clone();
                ctx.forecast_result = Some(outcome);
                ctx.next_step = Step::ResponseFormatter;
            }
            Err(e) => {
                self.audit(
                    session,
                    AuditLevel::Error,
                    "FORECAST_ERROR",
                    json!({ "table": table.name, "error": e.to_string() }),
                );
                ctx.fail(e);
            }
        }
    }

    /// Disambiguation answer, pending disambiguation question, or web fallback
    async fn clarify(&self, ctx: &mut Context, session: &str) {
        if let Some(reply) = ctx.clarification_response.take() {
            let choice = reply.trim().parse::<usize>().ok();
            if let Some(candidate) = choice
                .filter(|n| (1..=ctx.relevant_tables.len()).contains(n))
                .map(|n| ctx.relevant_tables[n - 1].clone())
            {
                info!("Caller picked table {}", candidate.table_name);
                ctx.select(&candidate);
                ctx.selection_confidence = Some(1.0);
                ctx.selection_reason = Some("Selected by user".to_string());
                ctx.needs_clarification = false;
                ctx.clarification_question = None;
                ctx.next_step = Step::Planner;
                return;
            }
            warn!("Unusable table choice {:?}; asking again", reply);
            if ctx.clarification_question.is_none() && !ctx.relevant_tables.is_empty() {
                ctx.needs_clarification = true;
                ctx.clarification_question = Some(formatter::disambiguation_question(&ctx.relevant_tables));
            }
        }

        if ctx.needs_clarification {
            if let Some(question) = ctx.clarification_question.clone() {
                ctx.final_answer = Some(question);
                ctx.next_step = Step::End;
                return;
            }
        }

        self.audit(session, AuditLevel::Info, "WEB_SEARCH_INIT", json!({ "query": ctx.user_input }));
        let web_results = self.services.web.search(&ctx.user_input).await;

        match formatter::web_answer(self.services.llm.as_ref(), &ctx.user_input, &web_results).await {
            Ok(answer) if !answer.trim().is_empty() => {
                self.audit(session, AuditLevel::Success, "WEB_SEARCH_SUCCESS", json!({ "query": ctx.user_input }));
                ctx.final_answer = Some(answer);
                ctx.next_step = Step::End;
            }
            Ok(_) => ctx.fail(WEB_SEARCH_FAILED),
            Err(e) => {
                warn!("Web answer composition failed: {}", e);
                ctx.fail(WEB_SEARCH_FAILED);
            }
        }
    }

    async fn format_response(&self, ctx: &mut Context) {
        let llm = self.services.llm.as_ref();
        let table = ctx.selected_table.clone().unwrap_or_else(|| "Unknown".to_string());

        let answer = if let Some(result) = &ctx.execution_result {
            if result.is_empty() {
                formatter::empty_result_answer(&table, ctx.validated_sql.as_deref())
            } else {
                formatter::query_answer(llm, &ctx.user_input, &table, result).await
            }
        } else if let Some(outcome) = &ctx.forecast_result {
            formatter::forecast_answer(llm, outcome).await
        } else {
            ctx.final_answer
                .clone()
                .unwrap_or_else(|| formatter::NO_DATA_ANSWER.to_string())
        };

        ctx.final_answer = Some(answer);
        ctx.next_step = Step::End;
    }

    fn handle_error(&self, ctx: &mut Context, session: &str) {
        let error = ctx.error.clone().unwrap_or_else(|| "Unknown error".to_string());
        error!("Workflow error: {}", error);

        ctx.final_answer = Some(formatter::error_answer(
            &error,
            &ctx.user_input,
            ctx.selected_table.as_deref(),
        ));
        ctx.next_step = Step::End;

        self.audit(
            session,
            AuditLevel::Error,
            "ERROR_HANDLED",
            json!({ "error": error, "user_input": ctx.user_input }),
        );
    }

    fn complete(&self, ctx: &Context, session: &str, path: &[Step], low_confidence: bool) {
        info!(
            "Workflow {} complete via {}",
            session,
            path.iter().map(Step::as_str).collect::<Vec<_>>().join(" → ")
        );
        self.audit(
            session,
            if ctx.error.is_some() { AuditLevel::Error } else { AuditLevel::Success },
            "WORKFLOW_COMPLETE",
            json!({
                "user_input": ctx.user_input,
                "intent": ctx.intent.map(|i| i.as_str()),
                "has_final_answer": ctx.final_answer.as_deref().map_or(false, |a| !a.is_empty()),
                "has_error": ctx.error.is_some(),
                "selected_table": ctx.selected_table,
                "low_confidence": low_confidence,
                "path": path.iter().map(Step::as_str).collect::<Vec<_>>(),
            }),
        );
    }

    fn audit(&self, session: &str, level: AuditLevel, event: &str, data: Value) {
        emit(self.services.audit.as_ref(), AuditEvent::new(session, level, event, data));
    }
}
