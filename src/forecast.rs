//! Forecast Engine
//!
//! Detects the time and value columns of a table from its metadata, pulls
//! the (date, value) history in one query and projects it forward.
//!
//! Two strategies are available: a recursive moving average (default) and
//! ordinary least squares on the date axis.

use crate::error::{AgentError, Result};
use crate::execution::QueryExecutor;
use crate::metadata::{ColumnSpec, TableMetadata};
use crate::sql::rewrite::{scope_param, scope_predicate};
use crate::workflow::state::UserContext;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

const DATE_KEYWORDS: &[&str] = &["tahun", "year", "bulan", "month", "tanggal", "date", "periode"];
const VALUE_KEYWORDS: &[&str] = &[
    "nilai", "value", "jumlah", "total", "devisa", "pendapatan", "qty", "quantity", "volume",
];
const DATE_TYPES: &[&str] = &["date", "datetime", "timestamp", "year", "month"];
const VALUE_TYPES: &[&str] = &["integer", "int", "float", "double", "decimal", "numeric", "number", "real"];

/// 95% interval multiplier
const Z_95: f64 = 1.96;
/// Half-width of the interval, as a fraction of the mean, for one-point windows
const SINGLE_POINT_MARGIN: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum ForecastMethod {
    MovingAverage { window: usize },
    LinearRegression,
}

impl ForecastMethod {
    /// Parse a configured method name; `window` applies to the moving average
    pub fn parse(name: &str, window: usize) -> Option<Self> {
        match name.trim().to_lowercase().replace('-', "_").as_str() {
            "moving_average" | "ma" => Some(ForecastMethod::MovingAverage { window }),
            "linear_regression" | "linear" => Some(ForecastMethod::LinearRegression),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ForecastMethod::MovingAverage { .. } => "moving_average",
            ForecastMethod::LinearRegression => "linear_regression",
        }
    }
}

/// How the time/value columns were found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionConfidence {
    /// Both columns matched by name or declared type
    High,
    /// One column matched, the other is positional
    Medium,
    /// Both columns are positional
    Low,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnDetection {
    pub date_column: String,
    pub value_column: String,
    pub confidence: DetectionConfidence,
}

/// One projected period
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub period: String,
    pub prediction: f64,
    pub lower: f64,
    pub upper: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ForecastOutcome {
    pub table_name: String,
    pub method: ForecastMethod,
    pub date_column: String,
    pub value_column: String,
    pub detection_confidence: DetectionConfidence,
    /// History points used after cleaning
    pub data_points: usize,
    pub min_value: f64,
    pub max_value: f64,
    pub first_period: String,
    pub last_period: String,
    pub last_value: f64,
    pub predictions: Vec<Prediction>,
    pub sql: String,
    pub params: Vec<String>,
}

/// Pick the date and value columns. `None` only when the table has no columns.
pub fn detect_columns(table: &TableMetadata) -> Option<ColumnDetection> {
    let columns = &table.columns;
    let first = columns.first()?;

    let date_match = best_match(columns, DATE_KEYWORDS, DATE_TYPES, None);
    let date_column = date_match
        .or_else(|| {
            columns
                .iter()
                .find(|c| matches!(c.column_type.to_lowercase().as_str(), "date" | "datetime" | "timestamp"))
        })
        .unwrap_or(first);

    let value_match = best_match(columns, VALUE_KEYWORDS, VALUE_TYPES, Some(date_column.name.as_str()));
    let value_column = value_match
        .or_else(|| columns.iter().find(|c| c.name != date_column.name))
        .unwrap_or(first);

    let confidence = match (date_match.is_some(), value_match.is_some()) {
        (true, true) => DetectionConfidence::High,
        (false, false) => DetectionConfidence::Low,
        _ => DetectionConfidence::Medium,
    };

    Some(ColumnDetection {
        date_column: date_column.name.clone(),
        value_column: value_column.name.clone(),
        confidence,
    })
}

/// Column with the most keyword hits among those matching by keyword or
/// declared type; the earliest column wins ties
fn best_match<'a>(
    columns: &'a [ColumnSpec],
    keywords: &[&str],
    types: &[&str],
    exclude: Option<&str>,
) -> Option<&'a ColumnSpec> {
    let mut best: Option<(&ColumnSpec, usize)> = None;

    for column in columns {
        if Some(column.name.as_str()) == exclude {
            continue;
        }
        let name = column.name.to_lowercase();
        let hits = keywords.iter().filter(|k| name.contains(*k)).count();
        let typed = types.contains(&column.column_type.to_lowercase().as_str());
        if hits == 0 && !typed {
            continue;
        }
        if best.map_or(true, |(_, top)| hits > top) {
            best = Some((column, hits));
        }
    }

    best.map(|(column, _)| column)
}

/// History retrieval statement, scope-restricted when possible
pub fn build_history_query(
    table: &TableMetadata,
    detection: &ColumnDetection,
    user_context: &UserContext,
) -> (String, Vec<String>) {
    let mut sql = format!(
        "SELECT {}, {} FROM {}",
        detection.date_column, detection.value_column, table.name
    );
    let mut params = Vec::new();

    if let (Some(column), Some(region)) = (table.access_column(), user_context.scope_region()) {
        sql.push_str(&format!(" WHERE {}", scope_predicate(column)));
        params.push(scope_param(region));
    }

    sql.push_str(&format!(" ORDER BY {}", detection.date_column));
    (sql, params)
}

/// A cleaned history point
#[derive(Debug, Clone, PartialEq)]
struct Observation {
    label: String,
    date: Option<f64>,
    value: f64,
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
}

fn label(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.trim().to_string()),
        other => Some(other.to_string()),
    }
}

/// Four-digit year in [1900, 2100], if the label is one
fn as_year(label: &str) -> Option<i64> {
    let parsed = label.parse::<f64>().ok()?;
    let year = (parsed.fract() == 0.0).then_some(parsed as i64)?;
    (1900..=2100).contains(&year).then_some(year)
}

/// Labels for future periods: following years when every history label is a
/// year, otherwise "+1", "+2", ...
pub fn period_labels(history_labels: &[String], periods: usize) -> Vec<String> {
    let years: Option<Vec<i64>> = history_labels.iter().map(|l| as_year(l)).collect();
    match years.and_then(|ys| ys.into_iter().max()) {
        Some(last) => (1..=periods as i64).map(|i| (last + i).to_string()).collect(),
        None => (1..=periods).map(|i| format!("+{}", i)).collect(),
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation
fn std_dev(values: &[f64], mean: f64) -> f64 {
    (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}

/// Recursive moving average: each point is the mean of the trailing window of
/// the history so far, and is appended before the next one is computed.
/// Returns (point, lower, upper) per period.
pub fn moving_average(history: &[f64], window: usize, periods: usize) -> Vec<(f64, f64, f64)> {
    let mut series = history.to_vec();
    let mut out = Vec::with_capacity(periods);

    for _ in 0..periods {
        if series.is_empty() {
            break;
        }
        let width = window.max(1).min(series.len());
        let tail = &series[series.len() - width..];
        let point = mean(tail);
        let margin = if tail.len() == 1 {
            SINGLE_POINT_MARGIN * point.abs()
        } else {
            Z_95 * std_dev(tail, point)
        };
        out.push((point, point - margin, point + margin));
        series.push(point);
    }

    out
}

/// Least-squares line through (x, y); each future x is one step past the last
pub fn linear_regression(xs: &[f64], ys: &[f64], periods: usize) -> Vec<(f64, f64, f64)> {
    if xs.is_empty() || xs.len() != ys.len() {
        return Vec::new();
    }

    let x_mean = mean(xs);
    let y_mean = mean(ys);
    let sxx: f64 = xs.iter().map(|x| (x - x_mean).powi(2)).sum();
    let sxy: f64 = xs.iter().zip(ys).map(|(x, y)| (x - x_mean) * (y - y_mean)).sum();
    let slope = if sxx == 0.0 { 0.0 } else { sxy / sxx };
    let intercept = y_mean - slope * x_mean;

    let residuals: Vec<f64> = xs.iter().zip(ys).map(|(x, y)| y - (intercept + slope * x)).collect();
    let margin = Z_95 * std_dev(&residuals, mean(&residuals));

    let last_x = xs[xs.len() - 1];
    (1..=periods)
        .map(|i| {
            let point = intercept + slope * (last_x + i as f64);
            (point, point - margin, point + margin)
        })
        .collect()
}

pub struct ForecastEngine {
    executor: Arc<dyn QueryExecutor>,
    method: ForecastMethod,
    min_points: usize,
    periods: usize,
}

impl ForecastEngine {
    pub fn new(executor: Arc<dyn QueryExecutor>, method: ForecastMethod, min_points: usize, periods: usize) -> Self {
        Self {
            executor,
            method,
            min_points,
            periods,
        }
    }

    pub async fn forecast(
        &self,
        table: &TableMetadata,
        user_context: &UserContext,
        question: &str,
    ) -> Result<ForecastOutcome> {
        let detection = detect_columns(table).ok_or_else(|| {
            AgentError::Forecast(format!("Table {} has no column information", table.name))
        })?;
        info!(
            "Forecasting {} for {:?}: date={}, value={} ({:?})",
            table.name, question, detection.date_column, detection.value_column, detection.confidence
        );

        let (sql, params) = build_history_query(table, &detection, user_context);
        let result = self.executor.execute(&sql, &params).await?;
        if !result.success {
            return Err(AgentError::Execution(
                result.error.unwrap_or_else(|| "Unknown SQL error".to_string()),
            ));
        }

        if result.row_count < self.min_points {
            return Err(AgentError::InsufficientData {
                required: self.min_points,
                actual: result.row_count,
            });
        }

        let history: Vec<Observation> = result
            .rows
            .iter()
            .filter_map(|row| {
                let raw_date = row.get(&detection.date_column)?;
                Some(Observation {
                    label: label(raw_date)?,
                    date: numeric(raw_date),
                    value: numeric(row.get(&detection.value_column)?)?,
                })
            })
            .collect();

        // An empty history is never enough, whatever the configured minimum
        if history.is_empty() || history.len() < self.min_points {
            return Err(AgentError::InsufficientData {
                required: self.min_points.max(1),
                actual: history.len(),
            });
        }
        debug!("{} of {} rows usable after cleaning", history.len(), result.row_count);

        let values: Vec<f64> = history.iter().map(|o| o.value).collect();
        let points = match self.method {
            ForecastMethod::MovingAverage { window } => moving_average(&values, window, self.periods),
            ForecastMethod::LinearRegression => {
                let dates: Option<Vec<f64>> = history.iter().map(|o| o.date).collect();
                let xs = dates.unwrap_or_else(|| (0..history.len()).map(|i| i as f64).collect());
                linear_regression(&xs, &values, self.periods)
            }
        };

        let labels: Vec<String> = history.iter().map(|o| o.label.clone()).collect();
        let predictions = period_labels(&labels, self.periods)
            .into_iter()
            .zip(points)
            .map(|(period, (prediction, lower, upper))| Prediction {
                period,
                prediction,
                lower,
                upper,
            })
            .collect();

        let first = &history[0];
        let last = &history[history.len() - 1];
        Ok(ForecastOutcome {
            table_name: table.name.clone(),
            method: self.method,
            date_column: detection.date_column,
            value_column: detection.value_column,
            detection_confidence: detection.confidence,
            data_points: history.len(),
            min_value: values.iter().cloned().fold(f64::INFINITY, f64::min),
            max_value: values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
            first_period: first.label.clone(),
            last_period: last.label.clone(),
            last_value: last.value,
            predictions,
            sql,
            params,
        })
    }
}
