//! Response Formatter
//!
//! Turns query results, forecasts, web snippets and errors into the final
//! answer text. Narration failures degrade to plain formatting.

use crate::error::Result;
use crate::execution::QueryResult;
use crate::forecast::ForecastOutcome;
use crate::llm::{LanguageModel, LlmPurpose, LlmRequest};
use crate::ranker::Candidate;
use tracing::warn;

/// Rows shown to the model and in fallback answers
pub const PREVIEW_ROWS: usize = 10;

pub const NO_DATA_ANSWER: &str = "Sorry, there is no data to show right now.";

pub fn empty_result_answer(table: &str, sql: Option<&str>) -> String {
    let mut answer = format!(
        "✅ **QUERY RESULT**\n\nTable: {}\nThe query ran successfully but no rows matched your filters.",
        table
    );
    if let Some(sql) = sql {
        answer.push_str(&format!("\n\n**SQL:**\n```sql\n{}\n```", sql));
    }
    answer
}

pub async fn query_answer(llm: &dyn LanguageModel, question: &str, table: &str, result: &QueryResult) -> String {
    let preview = result.to_markdown(PREVIEW_ROWS);
    let prompt = format!(
        r#"You are an expert data analyst explaining database query results to a user.

USER QUESTION:
"{question}"

DATA (table: {table}):
{preview}

INSTRUCTIONS:
1. Answer the question from the data above.
2. Give a short analysis or highlight (trend, highest/lowest value).
3. Include the data table above in Markdown so the user can see the details.
4. Answer in the same language as the question.

ANSWER:"#,
        question = question,
        table = table,
        preview = preview
    );

    match llm.complete(&LlmRequest::new(LlmPurpose::AnswerComposition, prompt)).await {
        Ok(content) if !content.trim().is_empty() => content,
        Ok(_) | Err(_) => {
            warn!("Narration failed for {}; returning the table only", table);
            format!(
                "Here is the data that was found:\n\n{}\n\n(Could not generate a narrative explanation)",
                preview
            )
        }
    }
}

pub async fn forecast_answer(llm: &dyn LanguageModel, outcome: &ForecastOutcome) -> String {
    let predictions: Vec<String> = outcome
        .predictions
        .iter()
        .map(|p| format!("- {}: {:.2}", p.period, p.prediction))
        .collect();

    let prompt = format!(
        r#"You are a data analyst. Explain the following forecast to the user.

FORECAST (method: {method}):
{predictions}

Additional information:
- Table: {table}
- Value column: {value_column}
- History data points: {points} ({first} to {last})

INSTRUCTIONS:
1. Describe the predicted trend (rising, falling or stable).
2. State the prediction for the last period.
3. Include a short Markdown table of the predictions."#,
        method = outcome.method.name(),
        predictions = predictions.join("\n"),
        table = outcome.table_name,
        value_column = outcome.value_column,
        points = outcome.data_points,
        first = outcome.first_period,
        last = outcome.last_period
    );

    match llm.complete(&LlmRequest::new(LlmPurpose::AnswerComposition, prompt)).await {
        Ok(content) if !content.trim().is_empty() => content,
        Ok(_) | Err(_) => {
            warn!("Narration failed for forecast of {}", outcome.table_name);
            manual_forecast_summary(outcome)
        }
    }
}

/// Plain-text forecast summary used when narration is unavailable
pub fn manual_forecast_summary(outcome: &ForecastOutcome) -> String {
    let mut text = format!(
        "📈 **FORECAST RESULT**\n\nTable: {}\nMethod: {}\nHistory: {} data points\n\n",
        outcome.table_name,
        outcome.method.name(),
        outcome.data_points
    );
    for p in &outcome.predictions {
        text.push_str(&format!(
            "- {}: {:.2} [{:.2}, {:.2}]\n",
            p.period, p.prediction, p.lower, p.upper
        ));
    }
    text
}

/// Answer composed from web snippets. Errors are left to the caller.
pub async fn web_answer(llm: &dyn LanguageModel, question: &str, web_results: &str) -> Result<String> {
    let prompt = format!(
        r#"You are an AI assistant answering a user's question.

USER QUESTION:
"{question}"

WEB SEARCH RESULTS:
{web_results}

INSTRUCTIONS:
1. Answer in the same language as the question.
2. Use the web search results above as the main reference.
3. If the results are not relevant, use general knowledge but tell the user that specific data was not found.
4. Do not mention the search tool by name; say "Based on current information..." instead.

ANSWER:"#,
        question = question,
        web_results = web_results
    );

    llm.complete(&LlmRequest::new(LlmPurpose::AnswerComposition, prompt)).await
}

pub fn error_answer(error: &str, question: &str, table: Option<&str>) -> String {
    format!(
        "⚠️ **ERROR**\n\n{}\n\n**Query:** {}\n**Table:** {}\n\nPlease try again with a more specific question.",
        if error.trim().is_empty() { "Unknown error" } else { error },
        question,
        table.unwrap_or("N/A")
    )
}

/// Numbered list asking the caller to pick a table
pub fn disambiguation_question(candidates: &[Candidate]) -> String {
    let options: Vec<String> = candidates
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{}. {} (relevance: {:.1})", i + 1, c.table_name, c.relevance_score))
        .collect();

    format!(
        "I found {} tables that may be relevant:\n\n{}\n\nWhich table do you mean? (answer with a number 1-{})",
        candidates.len(),
        options.join("\n"),
        candidates.len()
    )
}
