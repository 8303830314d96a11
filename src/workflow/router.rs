//! Intent classification and step routing
//!
//! Every transition decision of the workflow lives here as a pure function.

use crate::workflow::state::{Intent, Step};

const FORECAST_KEYWORDS: &[&str] = &[
    "prediksi", "forecast", "ramal", "estimasi", "proyeksi", "tren", "masa depan", "predict",
    "projection",
];

const DATA_KEYWORDS: &[&str] = &[
    "tampilkan", "lihat", "berapa", "total", "jumlah", "data", "select", "daftar", "statistik",
    "show", "list", "how many", "how much",
];

/// Keyword classification; forecast vocabulary wins over data vocabulary
pub fn classify_intent(question: &str) -> Intent {
    let lowered = question.to_lowercase();
    if FORECAST_KEYWORDS.iter().any(|k| lowered.contains(k)) {
        Intent::Forecast
    } else if DATA_KEYWORDS.iter().any(|k| lowered.contains(k)) {
        Intent::DataQuery
    } else {
        Intent::Clarify
    }
}

/// Open-domain questions skip table resolution
pub fn after_router(intent: Intent) -> Step {
    match intent {
        Intent::Clarify => Step::Clarify,
        Intent::DataQuery | Intent::Forecast => Step::TableResolution,
    }
}

/// No candidates means "try the web", not an error
pub fn after_table_resolution(candidate_count: usize, needs_clarification: bool) -> Step {
    if candidate_count == 0 || needs_clarification {
        Step::Clarify
    } else {
        Step::Planner
    }
}

pub fn after_planner(intent: Intent) -> Step {
    match intent {
        Intent::Forecast => Step::ForecastAgent,
        Intent::DataQuery => Step::SqlAgent,
        Intent::Clarify => Step::Clarify,
    }
}
