use std::env;
use std::time::Duration;

use url::Url;

use crate::error::NlqError;

const DEFAULT_FALLBACK_MODELS: &[&str] = &[
    "gemini-2.5-flash-lite",
    "gemini-2.5-flash",
    "gemini-2.0-flash",
    "gemini-2.0-flash-lite",
];

/// Runtime settings, read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub llm_endpoint: String,
    pub fallback_endpoint: String,
    pub fallback_models: Vec<String>,
    pub fallback_api_key: String,
    pub llm_timeout: Duration,
    pub llm_max_tokens: u32,
    pub llm_temperature: f32,
    pub llm_health_ttl: Duration,
    pub default_query_limit: usize,
    pub statement_timeout: Duration,
    pub data_dir: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            llm_endpoint: "http://localhost:8501".to_string(),
            fallback_endpoint: "http://localhost:8602".to_string(),
            fallback_models: DEFAULT_FALLBACK_MODELS
                .iter()
                .map(|m| m.to_string())
                .collect(),
            fallback_api_key: String::new(),
            llm_timeout: Duration::from_secs(60),
            llm_max_tokens: 1024,
            llm_temperature: 0.0,
            llm_health_ttl: Duration::from_secs(300),
            default_query_limit: 500,
            statement_timeout: Duration::from_millis(5000),
            data_dir: "./data".to_string(),
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, NlqError> {
        let defaults = Settings::default();

        let llm_endpoint = var_or("LOCAL_LLM_ENDPOINT", &defaults.llm_endpoint);
        let fallback_endpoint = var_or("FALLBACK_LLM_ENDPOINT", &defaults.fallback_endpoint);
        validate_endpoint("LOCAL_LLM_ENDPOINT", &llm_endpoint)?;
        validate_endpoint("FALLBACK_LLM_ENDPOINT", &fallback_endpoint)?;

        let fallback_models = match env::var("FALLBACK_LLM_MODELS") {
            Ok(raw) => raw
                .split(',')
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty())
                .collect(),
            Err(_) => defaults.fallback_models.clone(),
        };

        Ok(Self {
            llm_endpoint,
            fallback_endpoint,
            fallback_models,
            fallback_api_key: var_or("FALLBACK_API_KEY", ""),
            llm_timeout: Duration::from_secs(parse_var("LLM_TIMEOUT", 60)?),
            llm_max_tokens: parse_var("LLM_MAX_TOKENS", defaults.llm_max_tokens)?,
            llm_temperature: parse_var("LLM_TEMPERATURE", defaults.llm_temperature)?,
            llm_health_ttl: Duration::from_secs(parse_var("LLM_HEALTH_TTL", 300)?),
            default_query_limit: parse_var("DEFAULT_QUERY_LIMIT", defaults.default_query_limit)?,
            statement_timeout: Duration::from_millis(parse_var("STATEMENT_TIMEOUT_MS", 5000)?),
            data_dir: var_or("DATA_DIR", &defaults.data_dir),
        })
    }

    /// Completion URL on the primary endpoint.
    pub fn completions_url(&self) -> String {
        format!("{}/v1/completions", self.llm_endpoint.trim_end_matches('/'))
    }

    /// Generation URL on the secondary named-model endpoint.
    pub fn fallback_generate_url(&self) -> String {
        format!(
            "{}/v1/generate",
            self.fallback_endpoint.trim_end_matches('/')
        )
    }

    pub fn has_fallback_credentials(&self) -> bool {
        !self.fallback_api_key.trim().is_empty()
    }
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T>(name: &str, default: T) -> Result<T, NlqError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|e| NlqError::Config {
            message: format!("Invalid {}: {}", name, e),
        }),
        Err(_) => Ok(default),
    }
}

fn validate_endpoint(name: &str, endpoint: &str) -> Result<(), NlqError> {
    Url::parse(endpoint).map_err(|e| NlqError::Config {
        message: format!("Invalid {} URL '{}': {}", name, endpoint, e),
    })?;
    Ok(())
}
