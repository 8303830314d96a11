//! Table Selector
//!
//! Picks exactly one table from the ranked candidates. Single candidates are
//! taken directly; several are put to the language model, with a
//! deterministic fallback to the best relevance score whenever the model's
//! answer cannot be used.

use crate::llm::{strip_code_fences, LanguageModel, LlmPurpose, LlmRequest};
use crate::ranker::Candidate;
use crate::workflow::state::UserContext;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Confidence reported when the fallback choice was used
pub const FALLBACK_CONFIDENCE: f64 = 0.3;

/// Columns shown per candidate in the selection prompt
const COLUMN_PREVIEW: usize = 8;

lazy_static! {
    static ref YEAR_PATTERN: Regex = Regex::new(r"\b(20\d{2})\b").unwrap();
}

/// Four-digit years in 2000..=2099 mentioned in the text, in order
pub fn extract_years(text: &str) -> Vec<i32> {
    YEAR_PATTERN
        .captures_iter(text)
        .filter_map(|c| c.get(1)?.as_str().parse().ok())
        .collect()
}

/// Outcome of table selection
#[derive(Debug, Clone, Serialize)]
pub struct Selection {
    pub selected: Option<Candidate>,
    pub confidence: f64,
    pub reason: String,
    pub years_detected: Vec<i32>,
    pub fallback_used: bool,
}

impl Selection {
    fn none() -> Self {
        Self {
            selected: None,
            confidence: 0.0,
            reason: "No candidate tables".to_string(),
            years_detected: Vec::new(),
            fallback_used: false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ModelChoice {
    selected_table_index: Option<serde_json::Value>,
    confidence: Option<f64>,
    reason: Option<String>,
}

pub struct TableSelector {
    llm: Arc<dyn LanguageModel>,
}

impl TableSelector {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self { llm }
    }

    /// Always returns a selection; never fails past this point
    pub async fn select_best_table(
        &self,
        query: &str,
        candidates: &[Candidate],
        user_context: &UserContext,
    ) -> Selection {
        match candidates {
            [] => Selection::none(),
            [only] => Selection {
                selected: Some(only.clone()),
                confidence: 1.0,
                reason: "Only one candidate table available".to_string(),
                years_detected: extract_years(query),
                fallback_used: false,
            },
            _ => self.select_with_model(query, candidates, user_context).await,
        }
    }

    async fn select_with_model(
        &self,
        query: &str,
        candidates: &[Candidate],
        user_context: &UserContext,
    ) -> Selection {
        let years = extract_years(query);
        let prompt = build_selection_prompt(query, candidates, user_context, &years);

        let outcome = match self
            .llm
            .complete(&LlmRequest::new(LlmPurpose::TableSelection, prompt))
            .await
        {
            Ok(content) => parse_selection(&content, candidates.len()),
            Err(e) => Err(format!("LLM call failed: {}", e)),
        };

        match outcome {
            Ok((index, confidence, reason)) => {
                let selected = candidates[index].clone();
                info!(
                    "LLM selected table {} (confidence {:.2}): {}",
                    selected.table_name, confidence, reason
                );
                Selection {
                    selected: Some(selected),
                    confidence,
                    reason,
                    years_detected: years,
                    fallback_used: false,
                }
            }
            Err(error) => {
                let Some(best) = best_by_relevance(candidates) else {
                    return Selection::none();
                };
                warn!(
                    "Table selection fell back to relevance score ({}): {}",
                    best.table_name, error
                );
                Selection {
                    selected: Some(best.clone()),
                    confidence: FALLBACK_CONFIDENCE,
                    reason: format!("Fallback due to error: {}", truncate(&error, 50)),
                    years_detected: years,
                    fallback_used: true,
                }
            }
        }
    }
}

/// Highest relevance score; the earliest candidate wins ties
pub fn best_by_relevance(candidates: &[Candidate]) -> Option<&Candidate> {
    candidates
        .iter()
        .reduce(|best, c| if c.relevance_score > best.relevance_score { c } else { best })
}

fn build_selection_prompt(
    query: &str,
    candidates: &[Candidate],
    user_context: &UserContext,
    years: &[i32],
) -> String {
    let tables_text: Vec<String> = candidates
        .iter()
        .enumerate()
        .map(|(i, candidate)| {
            let meta = &candidate.metadata;
            let columns: Vec<&str> = meta.column_names().into_iter().take(COLUMN_PREVIEW).collect();
            let has_year = !meta.year_columns().is_empty();
            let description: String = meta.description.chars().take(150).collect();
            format!(
                "Table Index: {}\nName: {}\nDescription: {}\nColumns: {}\nHas year column: {}\nAccess column: {}\nRelevance Score: {:.2}",
                i + 1,
                candidate.table_name,
                if description.is_empty() { "No description".to_string() } else { description },
                columns.join(", "),
                if has_year { "Yes" } else { "No" },
                meta.access_column().unwrap_or("None"),
                candidate.relevance_score
            )
        })
        .collect();

    let years_text = if years.is_empty() {
        "None".to_string()
    } else {
        format!("{:?}", years)
    };

    format!(
        r#"You are an AI assistant that helps select the most appropriate database table for a user's query.

USER QUERY: "{query}"

USER CONTEXT:
- Region: {region}
- Leveldata: {leveldata}
- Years mentioned: {years_text}

CANDIDATE TABLES:
{tables}

INSTRUCTIONS:
1. Analyze the user's query and identify the intent.
2. Select the table that BEST matches the query based on columns, description, and context.
3. If specific years are mentioned, prioritize tables containing year information.
4. Return ONLY a JSON object with this EXACT format:
{{"selected_table_index": <number 1-{count}>, "confidence": <float 0.1 to 1.0>, "reason": "<short explanation>"}}

Do NOT include markdown formatting. Just the raw JSON string."#,
        query = query,
        region = user_context.region.as_deref().unwrap_or("Not specified"),
        leveldata = user_context.get("leveldata").unwrap_or("Not specified"),
        years_text = years_text,
        tables = tables_text.join("\n\n"),
        count = candidates.len()
    )
}

/// Parse the model's answer into (0-based index, confidence, reason)
fn parse_selection(content: &str, candidate_count: usize) -> std::result::Result<(usize, f64, String), String> {
    let cleaned = strip_code_fences(content);
    let json = extract_json_object(&cleaned).ok_or_else(|| "No JSON object in response".to_string())?;
    let choice: ModelChoice = serde_json::from_str(json).map_err(|e| format!("Invalid JSON: {}", e))?;

    let index = choice
        .selected_table_index
        .as_ref()
        .and_then(|v| v.as_u64())
        .ok_or_else(|| "Missing or non-integer selected_table_index".to_string())? as usize;

    if index < 1 || index > candidate_count {
        return Err(format!("Index {} out of range 1-{}", index, candidate_count));
    }

    let confidence = choice.confidence.unwrap_or(0.5).clamp(0.0, 1.0);
    let reason = choice.reason.unwrap_or_else(|| "No reason".to_string());
    Ok((index - 1, confidence, reason))
}

/// First balanced `{ ... }` in free text, ignoring braces inside strings
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
