//! Query Synthesizer
//!
//! Turns a question plus one table's metadata into a single read-only
//! SQLite statement: prompt the model, clean its output, validate, then
//! apply the scope restriction and row cap.

use crate::error::{AgentError, Result};
use crate::llm::{strip_code_fences, LanguageModel, LlmPurpose, LlmRequest};
use crate::metadata::TableMetadata;
use crate::selector::extract_years;
use crate::sql::rewrite::{
    add_limit_if_missing, inject_scope_filter, placeholder_count, scope_filter_count, scope_param,
};
use crate::sql::validator::SqlValidator;
use crate::workflow::state::UserContext;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// A statement ready for execution
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SynthesizedQuery {
    /// Model output after fence stripping, before rewrites
    pub raw_sql: String,
    pub sql: String,
    /// Positional parameters for `sql`
    pub params: Vec<String>,
}

pub struct QuerySynthesizer {
    llm: Arc<dyn LanguageModel>,
    default_limit: usize,
}

impl QuerySynthesizer {
    pub fn new(llm: Arc<dyn LanguageModel>, default_limit: usize) -> Self {
        Self { llm, default_limit }
    }

    pub async fn synthesize(
        &self,
        question: &str,
        table: &TableMetadata,
        user_context: &UserContext,
    ) -> Result<SynthesizedQuery> {
        let prompt = build_query_prompt(question, table, user_context, self.default_limit);
        debug!("Query prompt for {}:\n{}", table.name, prompt);

        let content = self
            .llm
            .complete(&LlmRequest::new(LlmPurpose::QueryGeneration, prompt))
            .await
            .map_err(|e| AgentError::Generation(e.to_string()))?;

        let raw_sql = strip_code_fences(&content);
        if raw_sql.is_empty() {
            return Err(AgentError::Generation("model returned an empty statement".to_string()));
        }

        SqlValidator::validate(&raw_sql)?;

        let query = self.post_process(raw_sql, table, user_context)?;
        info!("✅ Generated SQL for {}: {}", table.name, query.sql);
        Ok(query)
    }

    /// Scope restriction (when the table has an access column and the caller
    /// a region), then the row cap. Every scope placeholder, whether written by
    /// the model or injected here, is bound to the caller's region; any other
    /// placeholder is rejected.
    pub fn post_process(
        &self,
        raw_sql: String,
        table: &TableMetadata,
        user_context: &UserContext,
    ) -> Result<SynthesizedQuery> {
        let mut sql = raw_sql.clone();
        let mut params = Vec::new();

        if let (Some(column), Some(region)) = (table.access_column(), user_context.scope_region()) {
            let (scoped, _) = inject_scope_filter(&sql, column);
            params = vec![scope_param(region); scope_filter_count(&scoped, column)];
            sql = scoped;
        }

        let placeholders = placeholder_count(&sql);
        if placeholders != params.len() {
            return Err(AgentError::Generation(format!(
                "statement has {} placeholder(s) but only {} bound value(s)",
                placeholders,
                params.len()
            )));
        }

        Ok(SynthesizedQuery {
            raw_sql,
            sql: add_limit_if_missing(&sql, self.default_limit),
            params,
        })
    }
}

/// Prompt constraining the model to one SQLite SELECT against `table`
pub fn build_query_prompt(
    question: &str,
    table: &TableMetadata,
    user_context: &UserContext,
    default_limit: usize,
) -> String {
    let years = extract_years(question);
    let year_columns = table.year_columns();

    let region_rule = match (table.access_column(), user_context.scope_region()) {
        (Some(column), Some(_)) => format!(
            "Rows are restricted by {col}. Filter with: WHERE {col} LIKE ? (keep the ? placeholder; the value is bound at execution, never write a region name)",
            col = column
        ),
        _ => "Do NOT add any region filter (no access column applies to this table).".to_string(),
    };

    let year_rule = match (years.is_empty(), year_columns.first()) {
        (false, Some(column)) => format!(
            "The user mentioned years {:?}. Add the filter {} IN ({}).",
            years,
            column,
            years.iter().map(|y| y.to_string()).collect::<Vec<_>>().join(", ")
        ),
        _ => "No year filter is required unless the question asks for one.".to_string(),
    };

    format!(
        r#"You are an expert SQLite SQL generator.

USER QUERY: "{question}"

TABLE INFORMATION:
{schema}

IMPORTANT RULES:
1. Generate ONLY a SELECT statement against table {table}.
2. {region_rule}
3. {year_rule}
4. Add LIMIT {limit} if the user does not ask for a specific quantity.
5. Return ONLY the SQL code. No markdown, no explanations.
6. Generate exactly ONE statement.

SQLITE RULES:
- Do NOT use '::' casts. Use CAST(col AS TYPE).
- Do NOT use STRING_AGG. Use GROUP_CONCAT(col, ', ').
- Do NOT use PostgreSQL or MySQL specific functions.
- Year columns may be stored as text or integers.
- For case-insensitive matching use UPPER(col) LIKE '%VALUE%'.

SQL QUERY:"#,
        question = question,
        schema = table.build_schema_prompt(),
        table = table.name,
        region_rule = region_rule,
        year_rule = year_rule,
        limit = default_limit
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedLlm {
        reply: std::result::Result<String, String>,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LanguageModel for ScriptedLlm {
        async fn complete(&self, request: &LlmRequest) -> Result<String> {
            self.prompts.lock().unwrap().push(request.prompt.clone());
            self.reply.clone().map_err(AgentError::Llm)
        }
    }

    fn scripted(reply: std::result::Result<&str, &str>) -> Arc<ScriptedLlm> {
        Arc::new(ScriptedLlm {
            reply: reply.map(str::to_string).map_err(str::to_string),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn inflation_table(access_column: Option<&str>) -> TableMetadata {
        let mut table: TableMetadata = serde_json::from_str(
            r#"{"name": "inflation_by_region", "description": "Inflasi per wilayah",
                "columns": {"wilayah": "Wilayah", "tahun": {"type": "integer", "description": "Tahun"}, "inflasi": "Nilai"}}"#,
        )
        .unwrap();
        table.access_column = access_column.map(str::to_string);
        table
    }

    #[test]
    fn test_prompt_year_and_region_rules() {
        let prompt = build_query_prompt(
            "berapa inflasi 2023",
            &inflation_table(Some("wilayah")),
            &UserContext::new("JAWA BARAT"),
            5,
        );
        assert!(prompt.contains("tahun IN (2023)"));
        assert!(prompt.contains("Filter with: WHERE wilayah LIKE ?"));
        assert!(!prompt.contains("JAWA BARAT"));
        assert!(prompt.contains("LIMIT 5"));

        let prompt = build_query_prompt("berapa inflasi", &inflation_table(None), &UserContext::new("JAWA BARAT"), 5);
        assert!(prompt.contains("Do NOT add any region filter"));
        assert!(!prompt.contains(" IN ("));
    }

    #[tokio::test]
    async fn test_synthesize_scopes_and_limits() {
        let llm = scripted(Ok("```sql\nSELECT tahun, inflasi FROM inflation_by_region WHERE tahun IN (2023)\n```"));
        let synth = QuerySynthesizer::new(llm.clone(), 5);

        let query = synth
            .synthesize("berapa inflasi 2023", &inflation_table(Some("wilayah")), &UserContext::new("JAWA BARAT"))
            .await
            .unwrap();

        assert_eq!(query.raw_sql, "SELECT tahun, inflasi FROM inflation_by_region WHERE tahun IN (2023)");
        assert_eq!(
            query.sql,
            "SELECT tahun, inflasi FROM inflation_by_region WHERE wilayah LIKE ? AND (tahun IN (2023)) LIMIT 5;"
        );
        assert_eq!(query.params, vec!["JAWA BARAT%".to_string()]);
        assert!(llm.prompts.lock().unwrap()[0].contains("tahun IN (2023)"));
    }

    #[tokio::test]
    async fn test_region_is_bound_when_model_copies_filter_line() {
        let region = "X' OR wilayah LIKE '";
        let prompt = build_query_prompt("berapa inflasi", &inflation_table(Some("wilayah")), &UserContext::new(region), 5);
        let filter_line = prompt
            .lines()
            .find_map(|l| l.split("Filter with: ").nth(1))
            .unwrap()
            .split(" (")
            .next()
            .unwrap()
            .to_string();
        assert!(!prompt.contains(region));

        let llm = scripted(Ok(&format!("SELECT * FROM inflation_by_region {}", filter_line)));
        let query = QuerySynthesizer::new(llm, 5)
            .synthesize("berapa inflasi", &inflation_table(Some("wilayah")), &UserContext::new(region))
            .await
            .unwrap();

        assert_eq!(query.sql, "SELECT * FROM inflation_by_region WHERE wilayah LIKE ? LIMIT 5;");
        assert_eq!(query.params, vec![format!("{}%", region)]);
    }

    #[tokio::test]
    async fn test_literal_region_filter_gets_bound_predicate() {
        let llm = scripted(Ok("SELECT * FROM inflation_by_region WHERE wilayah LIKE 'X' OR wilayah LIKE '%'"));
        let query = QuerySynthesizer::new(llm, 5)
            .synthesize("berapa inflasi", &inflation_table(Some("wilayah")), &UserContext::new("JAWA BARAT"))
            .await
            .unwrap();

        assert_eq!(
            query.sql,
            "SELECT * FROM inflation_by_region WHERE wilayah LIKE ? AND (wilayah LIKE 'X' OR wilayah LIKE '%') LIMIT 5;"
        );
        assert_eq!(query.params, vec!["JAWA BARAT%".to_string()]);
    }

    #[tokio::test]
    async fn test_stray_placeholder_is_rejected() {
        let llm = scripted(Ok("SELECT * FROM inflation_by_region WHERE tahun = ?"));
        let err = QuerySynthesizer::new(llm, 5)
            .synthesize("berapa inflasi", &inflation_table(None), &UserContext::new("JAWA BARAT"))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Generation(ref m) if m.contains("placeholder")));
    }

    #[tokio::test]
    async fn test_existing_limit_kept_single() {
        let synth = QuerySynthesizer::new(scripted(Ok("SELECT * FROM inflation_by_region LIMIT 20")), 5);
        let query = synth
            .synthesize("tampilkan inflasi", &inflation_table(None), &UserContext::default())
            .await
            .unwrap();
        assert_eq!(query.sql, "SELECT * FROM inflation_by_region LIMIT 20");
        assert_eq!(query.sql.to_lowercase().matches("limit").count(), 1);
        assert!(query.params.is_empty());
    }

    #[tokio::test]
    async fn test_validation_failure_is_terminal() {
        let synth = QuerySynthesizer::new(scripted(Ok("SELECT * FROM t; DROP TABLE t;")), 5);
        let err = synth
            .synthesize("q", &inflation_table(None), &UserContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Validation(ref m) if m.contains("Multiple SQL statements")));
    }

    #[tokio::test]
    async fn test_model_failure_is_generation_error() {
        let synth = QuerySynthesizer::new(scripted(Err("timeout")), 5);
        let err = synth
            .synthesize("q", &inflation_table(None), &UserContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Generation(ref m) if m.contains("timeout")));

        let synth = QuerySynthesizer::new(scripted(Ok("```sql\n```")), 5);
        let err = synth
            .synthesize("q", &inflation_table(None), &UserContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Generation(_)));
    }
}
