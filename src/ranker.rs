//! Table Candidate Ranker
//!
//! Lexical relevance scoring of the metadata catalog against a free-text
//! question. Cheap, deterministic, and the only input to table selection.

use crate::metadata::{MetadataCatalog, TableMetadata};
use itertools::Itertools;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

const DESCRIPTION_WEIGHT: f64 = 3.0;
const COLUMN_SUBSTRING_WEIGHT: f64 = 2.0;
const COLUMN_PREFIX_WEIGHT: f64 = 1.0;
const EXAMPLE_VALUE_WEIGHT: f64 = 0.5;

/// A table scored as potentially relevant to a question
#[derive(Debug, Clone, Serialize)]
pub struct Candidate {
    pub table_name: String,
    pub metadata: TableMetadata,
    pub relevance_score: f64,
}

pub struct TableRanker {
    top_k: usize,
}

impl TableRanker {
    pub fn new(top_k: usize) -> Self {
        Self { top_k }
    }

    /// Top-K tables by relevance. Zero-score tables are dropped; ties keep
    /// catalog order. An empty result is a normal outcome.
    pub fn find_relevant_tables(&self, query: &str, catalog: &MetadataCatalog) -> Vec<Candidate> {
        let lowered = query.to_lowercase();
        let terms: Vec<&str> = lowered.split_whitespace().unique().collect();

        if terms.is_empty() || catalog.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<Candidate> = catalog
            .iter()
            .filter_map(|table| {
                let score = score_table(table, &terms);
                (score > 0.0).then(|| Candidate {
                    table_name: table.name.clone(),
                    metadata: table.clone(),
                    relevance_score: score,
                })
            })
            .collect();

        // sort_by is stable, so equal scores stay in catalog order
        scored.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(self.top_k);

        debug!(
            "Ranked tables for {:?}: {:?}",
            query,
            scored
                .iter()
                .map(|c| (c.table_name.as_str(), c.relevance_score))
                .collect::<Vec<_>>()
        );

        scored
    }
}

/// Relevance score of one table for already-lowercased query terms
pub fn score_table(table: &TableMetadata, terms: &[&str]) -> f64 {
    let mut score = 0.0;

    let description = table.description.to_lowercase();
    if terms.iter().any(|t| description.contains(t)) {
        score += DESCRIPTION_WEIGHT;
    }

    for column in &table.columns {
        let column = column.name.to_lowercase();
        for term in terms {
            if column.contains(term) {
                score += COLUMN_SUBSTRING_WEIGHT;
            } else if term.chars().count() > 3 && shares_prefix(&column, term, 3) {
                score += COLUMN_PREFIX_WEIGHT;
            }
        }
    }

    for row in &table.example_rows {
        for value in row.values() {
            if let Value::String(text) = value {
                let text = text.to_lowercase();
                score += EXAMPLE_VALUE_WEIGHT * terms.iter().filter(|t| text.contains(*t)).count() as f64;
            }
        }
    }

    score
}

fn shares_prefix(column: &str, term: &str, len: usize) -> bool {
    let prefix: String = term.chars().take(len).collect();
    column.starts_with(&prefix)
}
