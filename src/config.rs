//! Agent Configuration
//!
//! Settings are read from the process environment (after `.env` has been
//! loaded by the binary) and can be overridden field by field by CLI flags.

use crate::error::{AgentError, Result};
use crate::forecast::ForecastMethod;
use crate::workflow::state::{SelectionMode, UserContext};
use std::path::PathBuf;
use std::str::FromStr;

/// Language model connection settings
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    /// When set, requests go to an Azure OpenAI deployment
    pub azure_api_version: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Web search settings
#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub tavily_api_key: Option<String>,
    pub max_results: usize,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub llm: LlmSettings,
    pub search: SearchSettings,
    pub db_path: PathBuf,
    pub metadata_dir: PathBuf,
    pub log_dir: PathBuf,
    pub min_data_points: usize,
    pub forecast_periods: usize,
    pub forecast_method: ForecastMethod,
    pub default_limit: usize,
    pub top_k_tables: usize,
    pub selection_mode: SelectionMode,
    pub low_confidence_threshold: f64,
    pub user_context: UserContext,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            llm: LlmSettings {
                api_key: None,
                base_url: "https://api.openai.com/v1".to_string(),
                model: "gpt-4o-mini".to_string(),
                azure_api_version: None,
                temperature: 0.7,
                max_tokens: 512,
            },
            search: SearchSettings {
                tavily_api_key: None,
                max_results: 3,
            },
            db_path: PathBuf::from("database.db"),
            metadata_dir: PathBuf::from("metadata"),
            log_dir: PathBuf::from("logs"),
            min_data_points: 3,
            forecast_periods: 3,
            forecast_method: ForecastMethod::MovingAverage { window: 3 },
            default_limit: 5,
            top_k_tables: 5,
            selection_mode: SelectionMode::Auto,
            low_confidence_threshold: 0.3,
            user_context: UserContext::new("RM III JABAR").with("leveldata", "2_KABUPATEN_JAWA_BARAT"),
        }
    }
}

impl AgentConfig {
    /// Build configuration from environment variables, falling back to defaults
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup (used by tests)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |keys: &[&str]| -> Option<String> {
            keys.iter()
                .find_map(|k| lookup(k))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut config = Self::default();

        config.llm.api_key = get(&["LLM_API_KEY", "AZURE_OPENAI_API_KEY", "OPENAI_API_KEY"]);
        if let Some(url) = get(&["LLM_BASE_URL", "AZURE_OPENAI_ENDPOINT", "OPENAI_BASE_URL"]) {
            config.llm.base_url = url;
        }
        if let Some(model) = get(&["LLM_MODEL", "AZURE_MODEL_DEPLOYMENT", "OPENAI_MODEL"]) {
            config.llm.model = model;
        }
        config.llm.azure_api_version = get(&["AZURE_MODEL_VERSION"]);
        if let Some(v) = get(&["MODEL_TEMPERATURE"]) {
            config.llm.temperature = parse_value("MODEL_TEMPERATURE", &v)?;
        }
        if let Some(v) = get(&["MODEL_MAX_TOKEN"]) {
            config.llm.max_tokens = parse_value("MODEL_MAX_TOKEN", &v)?;
        }

        config.search.tavily_api_key = get(&["TAVILY_API_KEY"]);
        if let Some(v) = get(&["TAVILY_MAX_RESULTS"]) {
            config.search.max_results = parse_value("TAVILY_MAX_RESULTS", &v)?;
        }

        if let Some(v) = get(&["DB_PATH"]) {
            config.db_path = PathBuf::from(v);
        }
        if let Some(v) = get(&["METADATA_DIR"]) {
            config.metadata_dir = PathBuf::from(v);
        }
        if let Some(sub) = get(&["ACTIVE_METADATA_SUBFOLDER"]) {
            config.metadata_dir = config.metadata_dir.join(sub);
        }
        if let Some(v) = get(&["LOG_DIR"]) {
            config.log_dir = PathBuf::from(v);
        }

        if let Some(v) = get(&["MIN_DATA_POINTS"]) {
            config.min_data_points = parse_value("MIN_DATA_POINTS", &v)?;
            if config.min_data_points == 0 {
                return Err(AgentError::Config("MIN_DATA_POINTS must be at least 1".to_string()));
            }
        }
        if let Some(v) = get(&["DEFAULT_FORECAST_PERIODS"]) {
            config.forecast_periods = parse_value("DEFAULT_FORECAST_PERIODS", &v)?;
        }
        let window = match get(&["FORECAST_WINDOW"]) {
            Some(v) => parse_value("FORECAST_WINDOW", &v)?,
            None => 3,
        };
        config.forecast_method = match get(&["FORECAST_METHOD"]) {
            Some(v) => ForecastMethod::parse(&v, window)
                .ok_or_else(|| AgentError::Config(format!("Unknown FORECAST_METHOD: {}", v)))?,
            None => ForecastMethod::MovingAverage { window },
        };
        if let Some(v) = get(&["DEFAULT_LIMIT"]) {
            config.default_limit = parse_value("DEFAULT_LIMIT", &v)?;
        }
        if let Some(v) = get(&["TOP_K_TABLES"]) {
            config.top_k_tables = parse_value("TOP_K_TABLES", &v)?;
        }
        if let Some(v) = get(&["SELECTION_MODE"]) {
            config.selection_mode = v.parse()?;
        }
        if let Some(v) = get(&["LOW_CONFIDENCE_THRESHOLD"]) {
            config.low_confidence_threshold = parse_value("LOW_CONFIDENCE_THRESHOLD", &v)?;
        }

        if let Some(region) = get(&["REGION"]) {
            config.user_context.region = Some(region);
        }
        if let Some(level) = get(&["LEVELDATA"]) {
            config.user_context = config.user_context.with("leveldata", &level);
        }

        Ok(config)
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.parse::<T>()
        .map_err(|_| AgentError::Config(format!("Invalid value for {}: '{}'", key, raw)))
}
