//! Web Search
//!
//! Open-domain fallback used when the question is not about the stored
//! tables, or nothing in the catalog matches it.

use crate::config::SearchSettings;
use crate::error::{AgentError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

const TAVILY_ENDPOINT: &str = "https://api.tavily.com/search";
/// Characters of each snippet passed on to the model
const SNIPPET_CHARS: usize = 400;

pub const SEARCH_INACTIVE: &str = "Web search is disabled or not configured.";
pub const NO_RESULTS: &str = "No relevant web results found.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub url: String,
}

#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>>;
}

/// Tavily search API backend
pub struct TavilySearch {
    api_key: String,
    max_results: usize,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

impl TavilySearch {
    pub fn new(api_key: impl Into<String>, max_results: usize) -> Self {
        Self {
            api_key: api_key.into(),
            max_results,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl WebSearch for TavilySearch {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        let body = serde_json::json!({
            "api_key": self.api_key,
            "query": query,
            "max_results": self.max_results,
        });

        let response = self
            .http
            .post(TAVILY_ENDPOINT)
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::WebSearch(format!("Search request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AgentError::WebSearch(format!("Search API returned {}: {}", status, text)));
        }

        let parsed: TavilyResponse = response
            .json()
            .await
            .map_err(|e| AgentError::WebSearch(format!("Failed to parse search response: {}", e)))?;
        debug!("Web search returned {} hits", parsed.results.len());
        Ok(parsed.results)
    }
}

/// Search wrapper producing model-ready text. Never fails: an inactive
/// backend or a backend error become explanatory text.
#[derive(Clone)]
pub struct WebSearchTool {
    backend: Option<Arc<dyn WebSearch>>,
}

impl WebSearchTool {
    pub fn new(backend: Option<Arc<dyn WebSearch>>) -> Self {
        Self { backend }
    }

    /// Tavily when an API key is configured, otherwise inactive
    pub fn from_settings(settings: &SearchSettings) -> Self {
        let backend = settings.tavily_api_key.as_ref().map(|key| {
            Arc::new(TavilySearch::new(key.clone(), settings.max_results)) as Arc<dyn WebSearch>
        });
        if backend.is_none() {
            info!("Web search disabled (no TAVILY_API_KEY)");
        }
        Self { backend }
    }

    pub fn is_active(&self) -> bool {
        self.backend.is_some()
    }

    pub async fn search(&self, query: &str) -> String {
        let Some(backend) = &self.backend else {
            return SEARCH_INACTIVE.to_string();
        };

        match backend.search(query).await {
            Ok(hits) => format_hits(&hits),
            Err(e) => {
                warn!("Web search failed for {:?}: {}", query, e);
                format!("Error during web search: {}", e)
            }
        }
    }
}

pub fn format_hits(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return NO_RESULTS.to_string();
    }

    hits.iter()
        .enumerate()
        .map(|(i, hit)| {
            let content = hit.content.trim();
            let content = if content.chars().count() > SNIPPET_CHARS {
                format!("{}...", content.chars().take(SNIPPET_CHARS).collect::<String>())
            } else {
                content.to_string()
            };
            let url = if hit.url.is_empty() { "No URL" } else { hit.url.as_str() };
            format!("Result {}:\nContent: {}\nSource: {}", i + 1, content, url)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
