use async_trait::async_trait;
use rusqlite::{params, Connection};
use statquery::audit::MemoryAuditLog;
use statquery::execution::SqliteExecutor;
use statquery::llm::{LanguageModel, LlmPurpose, LlmRequest};
use statquery::metadata::{MetadataCatalog, MetadataStore, TableMetadata};
use statquery::web::{SearchHit, WebSearch, WebSearchTool};
use statquery::workflow::{SelectionMode, Step, UserContext, WEB_SEARCH_FAILED};
use statquery::{AgentConfig, AgentError, Services, Workflow};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Language model that answers from a fixed script, per purpose
struct ScriptedLlm {
    selection: Result<String, String>,
    query: Result<String, String>,
    answer: Result<String, String>,
    calls: Mutex<Vec<LlmPurpose>>,
}

impl ScriptedLlm {
    fn new(query: &str, answer: &str) -> Self {
        Self {
            selection: Err("no selection scripted".to_string()),
            query: Ok(query.to_string()),
            answer: Ok(answer.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<LlmPurpose> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedLlm {
    async fn complete(&self, request: &LlmRequest) -> statquery::Result<String> {
        self.calls.lock().unwrap().push(request.purpose);
        let reply = match request.purpose {
            LlmPurpose::TableSelection => &self.selection,
            LlmPurpose::QueryGeneration => &self.query,
            LlmPurpose::AnswerComposition => &self.answer,
        };
        reply.clone().map_err(AgentError::Llm)
    }
}

struct StaticSearch;

#[async_trait]
impl WebSearch for StaticSearch {
    async fn search(&self, _query: &str) -> statquery::Result<Vec<SearchHit>> {
        Ok(vec![SearchHit {
            title: "Presiden pertama Indonesia".to_string(),
            content: "Soekarno adalah presiden pertama Indonesia.".to_string(),
            url: "https://example.org/presiden".to_string(),
        }])
    }
}

fn table(name: &str, json: &str) -> TableMetadata {
    let mut table: TableMetadata = serde_json::from_str(json).unwrap();
    table.name = name.to_string();
    table
}

fn catalog() -> MetadataCatalog {
    MetadataCatalog::from_tables(vec![
        table(
            "pdrb",
            r#"{"description": "PDRB atas dasar harga berlaku per wilayah",
                "columns": {
                    "wilayah": {"type": "string", "description": "Nama wilayah"},
                    "tahun": {"type": "year", "description": "Tahun"},
                    "nilai": {"type": "float", "description": "Nilai PDRB"}
                },
                "access_column": "wilayah"}"#,
        ),
        table(
            "inflasi",
            r#"{"description": "Inflasi bulanan per kota",
                "columns": {"kota": "Kota", "bulan": "Bulan", "inflasi": "Persen inflasi"},
                "access_column": null}"#,
        ),
    ])
}

/// SQLite database with a few years of PDRB for two regions
fn create_database(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("stats.db");
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(
        "CREATE TABLE pdrb (wilayah TEXT, tahun INTEGER, nilai REAL);
         CREATE TABLE inflasi (kota TEXT, bulan TEXT, inflasi REAL);",
    )
    .unwrap();

    let rows = [
        ("JAWA BARAT", 2019, 90.0),
        ("JAWA BARAT", 2020, 92.0),
        ("JAWA BARAT", 2021, 95.0),
        ("JAWA BARAT", 2022, 98.0),
        ("JAWA BARAT", 2023, 100.5),
        ("JAWA TIMUR", 2023, 200.0),
    ];
    for (wilayah, tahun, nilai) in rows {
        conn.execute(
            "INSERT INTO pdrb (wilayah, tahun, nilai) VALUES (?1, ?2, ?3)",
            params![wilayah, tahun, nilai],
        )
        .unwrap();
    }
    conn.execute(
        "INSERT INTO inflasi (kota, bulan, inflasi) VALUES ('BANDUNG', '2023-01', 2.4)",
        [],
    )
    .unwrap();
    path
}

struct Harness {
    workflow: Workflow,
    llm: Arc<ScriptedLlm>,
    audit: Arc<MemoryAuditLog>,
    _dir: TempDir,
}

fn harness(llm: ScriptedLlm, mode: SelectionMode) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let db_path = create_database(dir.path());

    let mut config = AgentConfig::default();
    config.selection_mode = mode;
    config.db_path = db_path.clone();

    let llm = Arc::new(llm);
    let audit = Arc::new(MemoryAuditLog::new());
    let services = Services {
        metadata: Arc::new(MetadataStore::from_catalog(catalog())),
        llm: llm.clone(),
        executor: Arc::new(SqliteExecutor::new(db_path)),
        web: WebSearchTool::new(Some(Arc::new(StaticSearch))),
        audit: audit.clone(),
    };

    Harness {
        workflow: Workflow::new(&config, services),
        llm,
        audit,
        _dir: dir,
    }
}

fn jabar() -> UserContext {
    UserContext::new("JAWA BARAT")
}

#[tokio::test]
async fn test_data_query_is_scoped_and_executed() {
    let h = harness(
        ScriptedLlm::new(
            "```sql\nSELECT tahun, nilai FROM pdrb WHERE tahun IN (2023)\n```",
            "Nilai PDRB Jawa Barat tahun 2023 adalah 100.5",
        ),
        SelectionMode::Auto,
    );

    let outcome = h.workflow.run("berapa nilai pdrb tahun 2023", jabar()).await;

    assert_eq!(
        outcome.path,
        vec![
            Step::Router,
            Step::TableResolution,
            Step::Planner,
            Step::SqlAgent,
            Step::SqlExecutor,
            Step::ResponseFormatter,
            Step::End
        ]
    );
    assert_eq!(outcome.selected_table.as_deref(), Some("pdrb"));
    assert_eq!(outcome.selection_confidence, Some(1.0));
    assert!(!outcome.low_confidence);
    assert!(outcome.error.is_none());
    assert_eq!(outcome.answer, "Nilai PDRB Jawa Barat tahun 2023 adalah 100.5");

    let sql = outcome.sql.unwrap();
    assert!(sql.contains("wilayah LIKE ?"));
    assert!(sql.ends_with("LIMIT 5;"));
    assert_eq!(outcome.context.sql_params, vec!["JAWA BARAT%".to_string()]);

    // Only the Jawa Barat row for 2023 survives the scope restriction
    let result = outcome.context.execution_result.unwrap();
    assert_eq!(result.row_count, 1);
    assert_eq!(result.rows[0]["nilai"], serde_json::json!(100.5));

    // A single candidate never reaches the selection model
    assert!(!h.llm.calls().contains(&LlmPurpose::TableSelection));

    let events = h.audit.event_names();
    assert!(events.contains(&"AUTO_TABLE_SELECTED".to_string()));
    assert!(events.contains(&"SQL_GENERATED".to_string()));
    assert_eq!(events.last().map(String::as_str), Some("WORKFLOW_COMPLETE"));
}

#[tokio::test]
async fn test_unsafe_statement_ends_in_error_answer() {
    let h = harness(ScriptedLlm::new("DELETE FROM pdrb", "unused"), SelectionMode::Auto);

    let outcome = h.workflow.run("berapa nilai pdrb tahun 2023", jabar()).await;

    assert!(outcome.path.contains(&Step::ErrorHandler));
    assert!(!outcome.path.contains(&Step::SqlExecutor));
    assert!(outcome.context.execution_result.is_none());
    assert!(outcome.error.as_deref().unwrap().contains("Only read-only"));
    assert!(outcome.answer.starts_with("⚠️ **ERROR**"));
    assert!(outcome.answer.contains("**Table:** pdrb"));
    assert!(h.audit.event_names().contains(&"ERROR_HANDLED".to_string()));
}

#[tokio::test]
async fn test_literal_region_filter_cannot_widen_scope() {
    let h = harness(
        ScriptedLlm::new(
            "SELECT wilayah, nilai FROM pdrb WHERE wilayah LIKE 'X' OR wilayah LIKE '%'",
            "Data PDRB",
        ),
        SelectionMode::Auto,
    );

    let outcome = h.workflow.run("berapa nilai pdrb", jabar()).await;

    assert_eq!(outcome.context.sql_params, vec!["JAWA BARAT%".to_string()]);
    let result = outcome.context.execution_result.unwrap();
    assert_eq!(result.row_count, 5);
    assert!(result
        .rows
        .iter()
        .all(|row| row["wilayah"] == serde_json::json!("JAWA BARAT")));
}

#[tokio::test]
async fn test_storage_failure_ends_in_error_answer() {
    let h = harness(ScriptedLlm::new("SELECT * FROM missing_table", "unused"), SelectionMode::Auto);

    let outcome = h.workflow.run("berapa nilai pdrb tahun 2023", jabar()).await;

    assert!(outcome.path.contains(&Step::SqlExecutor));
    assert!(outcome.path.contains(&Step::ErrorHandler));
    assert!(!outcome.path.contains(&Step::ResponseFormatter));
    assert!(outcome.context.execution_result.is_none());
    assert!(outcome.error.as_deref().unwrap().starts_with("SQL execution error"));
    assert!(outcome.answer.contains("no such table: missing_table"));
    assert!(outcome.answer.contains("**Table:** pdrb"));
}

#[tokio::test]
async fn test_forecast_uses_scoped_history() {
    let mut llm = ScriptedLlm::new("unused", "unused");
    llm.answer = Err("narration offline".to_string());
    let h = harness(llm, SelectionMode::Auto);

    let outcome = h.workflow.run("prediksi nilai pdrb", jabar()).await;

    assert!(outcome.path.contains(&Step::ForecastAgent));
    assert!(outcome.error.is_none());

    let forecast = outcome.context.forecast_result.as_ref().unwrap();
    assert_eq!(forecast.date_column, "tahun");
    assert_eq!(forecast.value_column, "nilai");
    assert_eq!(forecast.data_points, 5);
    assert_eq!(forecast.last_period, "2023");
    let periods: Vec<&str> = forecast.predictions.iter().map(|p| p.period.as_str()).collect();
    assert_eq!(periods, vec!["2024", "2025", "2026"]);
    assert_eq!(forecast.params, vec!["JAWA BARAT%".to_string()]);

    // Narration failed, so the plain summary is returned
    assert!(outcome.answer.contains("📈 **FORECAST RESULT**"));
    assert!(outcome.answer.contains("- 2024:"));
    assert!(h.audit.event_names().contains(&"FORECAST_SUCCESS".to_string()));
}

#[tokio::test]
async fn test_forecast_with_too_little_history_is_reported() {
    let h = harness(ScriptedLlm::new("unused", "unused"), SelectionMode::Auto);

    let outcome = h
        .workflow
        .run("prediksi nilai pdrb", UserContext::new("JAWA TIMUR"))
        .await;

    assert!(outcome.path.contains(&Step::ErrorHandler));
    assert!(outcome
        .answer
        .contains("minimum 3 data points required, got 1"));
    assert!(h.audit.event_names().contains(&"FORECAST_ERROR".to_string()));
}

#[tokio::test]
async fn test_open_question_goes_straight_to_web() {
    let h = harness(
        ScriptedLlm::new("unused", "Berdasarkan informasi terkini, presiden pertama adalah Soekarno."),
        SelectionMode::Auto,
    );

    let outcome = h.workflow.run("siapa presiden pertama?", jabar()).await;

    assert_eq!(outcome.path, vec![Step::Router, Step::Clarify, Step::End]);
    assert!(outcome.answer.contains("Soekarno"));
    assert!(outcome.error.is_none());
    assert_eq!(h.llm.calls(), vec![LlmPurpose::AnswerComposition]);
}

#[tokio::test]
async fn test_no_matching_table_falls_back_to_web() {
    let h = harness(
        ScriptedLlm::new("unused", "Berdasarkan informasi terkini, data tidak ditemukan."),
        SelectionMode::Auto,
    );

    let outcome = h.workflow.run("berapa xyz123nonsense", jabar()).await;

    assert_eq!(
        outcome.path,
        vec![Step::Router, Step::TableResolution, Step::Clarify, Step::End]
    );
    assert!(!outcome.path.contains(&Step::ErrorHandler));
    assert!(outcome.error.is_none());
    assert!(outcome.context.relevant_tables.is_empty());
    assert!(!outcome.answer.is_empty());

    let events = h.audit.event_names();
    assert!(events.contains(&"METADATA_NOT_FOUND".to_string()));
    assert!(events.contains(&"WEB_SEARCH_SUCCESS".to_string()));
}

#[tokio::test]
async fn test_web_composition_failure_is_an_error() {
    let mut llm = ScriptedLlm::new("unused", "unused");
    llm.answer = Err("service unavailable".to_string());
    let h = harness(llm, SelectionMode::Auto);

    let outcome = h.workflow.run("siapa presiden pertama?", jabar()).await;

    assert_eq!(outcome.error.as_deref(), Some(WEB_SEARCH_FAILED));
    assert!(outcome.path.contains(&Step::ErrorHandler));
    assert!(outcome.answer.contains(WEB_SEARCH_FAILED));
}

#[tokio::test]
async fn test_model_selection_among_candidates() {
    let mut llm = ScriptedLlm::new("SELECT tahun, nilai FROM pdrb", "Data PDRB");
    llm.selection = Ok(r#"{"selected_table_index": 2, "confidence": 0.9, "reason": "PDRB asked"}"#.to_string());
    let h = harness(llm, SelectionMode::Auto);

    let outcome = h.workflow.run("berapa inflasi dan pdrb", jabar()).await;

    assert_eq!(outcome.context.relevant_tables.len(), 2);
    assert_eq!(outcome.context.relevant_tables[0].table_name, "inflasi");
    assert_eq!(outcome.selected_table.as_deref(), Some("pdrb"));
    assert_eq!(outcome.selection_confidence, Some(0.9));
    assert!(!outcome.low_confidence);
    assert!(h.llm.calls().contains(&LlmPurpose::TableSelection));
}

#[tokio::test]
async fn test_unusable_selection_falls_back_with_low_confidence() {
    let mut llm = ScriptedLlm::new("SELECT kota, inflasi FROM inflasi", "Data inflasi");
    llm.selection = Ok("I think the second one".to_string());
    let h = harness(llm, SelectionMode::Auto);

    let outcome = h.workflow.run("berapa inflasi dan pdrb", jabar()).await;

    assert_eq!(outcome.selected_table.as_deref(), Some("inflasi"));
    assert_eq!(outcome.selection_confidence, Some(0.3));
    assert!(outcome.low_confidence);
    // No access column on inflasi, so nothing is bound
    assert!(outcome.context.sql_params.is_empty());

    let selected = h
        .audit
        .events()
        .into_iter()
        .find(|e| e.event == "AUTO_TABLE_SELECTED")
        .unwrap();
    assert_eq!(selected.data["fallback_used"], serde_json::json!(true));
}

#[tokio::test]
async fn test_manual_selection_asks_then_resumes() {
    let h = harness(
        ScriptedLlm::new("SELECT tahun, nilai FROM pdrb ORDER BY tahun", "Data PDRB Jawa Barat"),
        SelectionMode::Manual,
    );

    let asked = h.workflow.run("berapa inflasi dan pdrb", jabar()).await;

    assert!(asked.needs_clarification);
    assert_eq!(
        asked.path,
        vec![Step::Router, Step::TableResolution, Step::Clarify, Step::End]
    );
    assert!(asked.answer.contains("1. inflasi"));
    assert!(asked.answer.contains("2. pdrb"));
    assert!(h.audit.event_names().contains(&"TABLE_SELECTION_REQUESTED".to_string()));

    // An unusable reply repeats the question
    let again = h.workflow.resume(asked.context.clone(), "7").await;
    assert!(again.needs_clarification);
    assert_eq!(again.answer, asked.answer);

    let answered = h.workflow.resume(asked.context, "2").await;
    assert!(!answered.needs_clarification);
    assert_eq!(answered.selected_table.as_deref(), Some("pdrb"));
    assert_eq!(answered.selection_confidence, Some(1.0));
    assert!(answered.path.contains(&Step::SqlExecutor));
    assert_eq!(answered.answer, "Data PDRB Jawa Barat");
    assert_eq!(answered.context.execution_result.unwrap().row_count, 5);
}
