use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::config::Settings;
use crate::error::NlqError;
use crate::response::ResponseProcessor;

const ERROR_BODY_LIMIT: usize = 500;
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// One model endpoint the client can ask for a completion.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    fn name(&self) -> &str;
    async fn generate(&self, prompt: &str) -> Result<String, NlqError>;
}

/// Primary backend: an OpenAI-style completions endpoint.
pub struct CompletionBackend {
    client: reqwest::Client,
    url: String,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    prompt: &'a str,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    #[serde(default)]
    text: String,
}

impl CompletionBackend {
    pub fn new(settings: &Settings) -> Result<Self, NlqError> {
        let client = reqwest::Client::builder()
            .timeout(settings.llm_timeout)
            .build()
            .map_err(|e| NlqError::Config {
                message: format!("Failed to build HTTP client: {}", e),
            })?;
        Ok(Self {
            client,
            url: settings.completions_url(),
            max_tokens: settings.llm_max_tokens,
            temperature: settings.llm_temperature,
        })
    }
}

#[async_trait]
impl GenerationBackend for CompletionBackend {
    fn name(&self) -> &str {
        "primary"
    }

    async fn generate(&self, prompt: &str) -> Result<String, NlqError> {
        let payload = CompletionRequest {
            prompt,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let response = self.client.post(&self.url).json(&payload).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(NlqError::Generation {
                message: format!(
                    "Primary endpoint error: HTTP {}: {}",
                    status.as_u16(),
                    truncate(&body, ERROR_BODY_LIMIT)
                ),
            });
        }

        let parsed: CompletionResponse =
            serde_json::from_str(&body).map_err(|_| NlqError::ResponseParse {
                message: format!(
                    "primary endpoint returned a non-JSON body: {}",
                    truncate(&body, ERROR_BODY_LIMIT)
                ),
            })?;

        let text = parsed
            .choices
            .first()
            .map(|c| c.text.trim().to_string())
            .unwrap_or_default();
        if text.is_empty() {
            return Err(NlqError::Generation {
                message: "Primary endpoint returned empty text response".to_string(),
            });
        }
        Ok(text)
    }
}

/// One named model on the secondary provider, tried in ranked order.
pub struct RankedModelBackend {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    max_output_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    text: String,
}

impl RankedModelBackend {
    pub fn new(settings: &Settings, model: String) -> Result<Self, NlqError> {
        let client = reqwest::Client::builder()
            .timeout(settings.llm_timeout)
            .build()
            .map_err(|e| NlqError::Config {
                message: format!("Failed to build HTTP client: {}", e),
            })?;
        Ok(Self {
            client,
            url: settings.fallback_generate_url(),
            api_key: settings.fallback_api_key.clone(),
            model,
            max_tokens: settings.llm_max_tokens,
            temperature: settings.llm_temperature,
        })
    }
}

#[async_trait]
impl GenerationBackend for RankedModelBackend {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String, NlqError> {
        let payload = GenerateRequest {
            model: &self.model,
            prompt,
            max_output_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NlqError::Generation {
                message: format!(
                    "Model {} error: HTTP {}: {}",
                    self.model,
                    status.as_u16(),
                    truncate(&body, ERROR_BODY_LIMIT)
                ),
            });
        }

        let parsed: GenerateResponse = response.json().await?;
        let text = parsed.text.trim().to_string();
        if text.is_empty() {
            return Err(NlqError::Generation {
                message: format!("Model {} returned empty text response", self.model),
            });
        }
        Ok(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub status: HealthStatus,
    pub message: String,
}

impl ComponentHealth {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Ok,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Error,
            message: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == HealthStatus::Ok
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LlmHealthReport {
    pub primary: ComponentHealth,
    pub fallback: ComponentHealth,
}

/// TTL cache for health snapshots, so probes never run per request.
pub struct HealthCache {
    ttl: Duration,
    slot: RwLock<Option<(Instant, LlmHealthReport)>>,
}

impl HealthCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: RwLock::new(None),
        }
    }

    pub async fn get(&self) -> Option<LlmHealthReport> {
        let slot = self.slot.read().await;
        match &*slot {
            Some((stored_at, report)) if stored_at.elapsed() < self.ttl => Some(report.clone()),
            _ => None,
        }
    }

    pub async fn put(&self, report: LlmHealthReport) {
        let mut slot = self.slot.write().await;
        *slot = Some((Instant::now(), report));
    }
}

/// Ordered walk over generation backends: the primary first, then the ranked
/// fallback models. Quota errors and generic errors are treated alike; the
/// next candidate is always tried.
pub struct LlmClient {
    primary: Box<dyn GenerationBackend>,
    fallbacks: Vec<Box<dyn GenerationBackend>>,
    processor: ResponseProcessor,
    health_cache: HealthCache,
    probe: reqwest::Client,
    probe_url: Option<String>,
    fallback_configured: bool,
}

impl LlmClient {
    pub fn from_settings(settings: &Settings) -> Result<Self, NlqError> {
        let primary: Box<dyn GenerationBackend> = Box::new(CompletionBackend::new(settings)?);

        let mut fallbacks: Vec<Box<dyn GenerationBackend>> = Vec::new();
        if settings.has_fallback_credentials() {
            for model in &settings.fallback_models {
                fallbacks.push(Box::new(RankedModelBackend::new(settings, model.clone())?));
            }
        }

        let probe = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .map_err(|e| NlqError::Config {
                message: format!("Failed to build HTTP client: {}", e),
            })?;
        let probe_url = format!("{}/", settings.llm_endpoint.trim_end_matches('/'));

        Ok(Self {
            primary,
            fallbacks,
            processor: ResponseProcessor::new()?,
            health_cache: HealthCache::new(settings.llm_health_ttl),
            probe,
            probe_url: Some(probe_url),
            fallback_configured: settings.has_fallback_credentials(),
        })
    }

    /// Builds a client over explicit backends. Intended for tests and
    /// embedders that bring their own transport.
    pub fn with_backends(
        primary: Box<dyn GenerationBackend>,
        fallbacks: Vec<Box<dyn GenerationBackend>>,
        health_cache: HealthCache,
    ) -> Result<Self, NlqError> {
        let fallback_configured = !fallbacks.is_empty();
        Ok(Self {
            primary,
            fallbacks,
            processor: ResponseProcessor::new()?,
            health_cache,
            probe: reqwest::Client::new(),
            probe_url: None,
            fallback_configured,
        })
    }

    /// Returns the first non-empty successful response, cleaned of code
    /// fences. All backends failing surfaces the primary and final fallback
    /// errors together.
    pub async fn generate(&self, prompt: &str) -> Result<String, NlqError> {
        debug!(
            "Calling {} backend with prompt: {}...",
            self.primary.name(),
            prompt.chars().take(100).collect::<String>()
        );

        let primary_error = match self.primary.generate(prompt).await {
            Ok(text) => return Ok(self.processor.clean(&text)),
            Err(e) => {
                error!("{} backend failed: {}", self.primary.name(), e);
                e
            }
        };

        let mut last_error: Option<NlqError> = None;
        for backend in &self.fallbacks {
            match backend.generate(prompt).await {
                Ok(text) => {
                    info!("Model {} responded successfully", backend.name());
                    return Ok(self.processor.clean(&text));
                }
                Err(e) => {
                    warn!("Model {} failed: {}", backend.name(), e);
                    last_error = Some(e);
                }
            }
        }

        let fallback_detail = match last_error {
            Some(e) => e.to_string(),
            None => "no fallback credentials configured".to_string(),
        };
        Err(NlqError::Generation {
            message: format!(
                "All generation backends failed. Primary: {}. Fallback: {}",
                primary_error, fallback_detail
            ),
        })
    }

    /// Cheap reachability snapshot: pings the primary base URL and reports
    /// fallback credential presence. Cached under the configured TTL.
    pub async fn health(&self) -> LlmHealthReport {
        if let Some(cached) = self.health_cache.get().await {
            return cached;
        }

        let primary = match &self.probe_url {
            Some(url) => match self.probe.get(url).send().await {
                Ok(resp) if resp.status().is_success() => ComponentHealth::ok("reachable"),
                Ok(resp) => {
                    ComponentHealth::error(format!("HTTP {}", resp.status().as_u16()))
                }
                Err(e) => ComponentHealth::error(e.to_string()),
            },
            None => ComponentHealth::error("no probe endpoint configured"),
        };

        let fallback = if self.fallback_configured {
            ComponentHealth::ok("api_key_set")
        } else {
            ComponentHealth::error("missing fallback API key")
        };

        let report = LlmHealthReport { primary, fallback };
        self.health_cache.put(report.clone()).await;
        report
    }
}

fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let head: String = text.chars().take(limit).collect();
    format!("{}...", head)
}
