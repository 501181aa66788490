//! Analyzer connection layer.
//!
//! `AnalyzerTransport` is the single-attempt wire interface; `HttpAnalyzer`
//! implements it over a chat-completions-style HTTP API. The
//! `AnalyzerConnection` wraps any transport with the resilience policy:
//! per-request timeout, bounded retries with jittered exponential backoff,
//! read-through caching, and cooperative cancellation.

use crate::cache::{cache_key, CacheStats, MemoryCache, SharedCache};
use crate::cancel::CancelToken;
use crate::config::EngineConfig;
use crate::error::{EngineError, FetchFailure, Result};
use crate::prompts::PromptClass;
use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

// ============================================================================
// Wire Types
// ============================================================================

/// One chat message forwarded to the analyzer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// A fully assembled analyzer request.
#[derive(Debug, Clone, Serialize)]
pub struct AnalyzerRequest {
    pub repo_url: String,
    pub branch: String,
    pub messages: Vec<ChatMessage>,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    /// Ask the analyzer to answer in JSON when it supports the hint.
    pub response_format_json: bool,
}

/// Raw analyzer payload: either prose or an already-parsed object.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "lowercase")]
pub enum AnalyzerPayload {
    Text(String),
    Json(Value),
}

/// Token usage accumulated across analyzer calls.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    pub fn add(&mut self, other: TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
    }

    /// Estimated cost in USD for the given per-million-token rates.
    pub fn estimated_cost(&self, input_rate: f64, output_rate: f64) -> f64 {
        (self.prompt_tokens as f64 / 1_000_000.0) * input_rate
            + (self.completion_tokens as f64 / 1_000_000.0) * output_rate
    }
}

/// One successful analyzer response.
#[derive(Debug, Clone)]
pub struct AnalyzerResponse {
    pub payload: AnalyzerPayload,
    pub usage: TokenUsage,
}

// ============================================================================
// Transport Trait
// ============================================================================

/// Single-attempt analyzer transport. Implementations map their failure
/// modes onto `EngineError::FetchFailed` categories; the connection layer
/// owns retries, timeouts, caching, and cancellation.
#[async_trait]
pub trait AnalyzerTransport: Send + Sync {
    async fn send(&self, request: &AnalyzerRequest) -> Result<AnalyzerResponse>;
}

// ============================================================================
// HTTP Transport
// ============================================================================

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    repo_url: &'a str,
    branch: &'a str,
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f64,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<WireResponseFormat>,
}

#[derive(Debug, Serialize)]
struct WireResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    content: String,
}

#[derive(Debug, Deserialize, Default)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// Chat-completions-shaped HTTP analyzer client.
pub struct HttpAnalyzer {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpAnalyzer {
    /// Build a client with a per-request deadline taken from the config.
    pub fn new(endpoint: impl Into<String>, config: &EngineConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| EngineError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key: None,
        })
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    fn classify(error: &reqwest::Error) -> FetchFailure {
        if error.is_timeout() {
            FetchFailure::Timeout
        } else if error.is_connect() {
            FetchFailure::Unreachable
        } else {
            FetchFailure::ServerError
        }
    }
}

#[async_trait]
impl AnalyzerTransport for HttpAnalyzer {
    async fn send(&self, request: &AnalyzerRequest) -> Result<AnalyzerResponse> {
        let body = WireRequest {
            repo_url: &request.repo_url,
            branch: &request.branch,
            model: &request.model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            response_format: request
                .response_format_json
                .then_some(WireResponseFormat { format_type: "json" }),
        };

        let mut http = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }

        let response = http.send().await.map_err(|e| EngineError::FetchFailed {
            category: Self::classify(&e),
            detail: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            let category = if status.is_server_error() {
                FetchFailure::ServerError
            } else {
                FetchFailure::Protocol
            };
            let detail = response
                .text()
                .await
                .unwrap_or_else(|_| "no response body".to_string());
            return Err(EngineError::FetchFailed {
                category,
                detail: format!("{status}: {detail}"),
            });
        }

        let value: Value = response.json().await.map_err(|e| EngineError::FetchFailed {
            category: FetchFailure::Protocol,
            detail: format!("unparseable response body: {e}"),
        })?;

        // Chat-completions shape: unwrap the first choice as prose. Anything
        // else is passed through as a structured payload.
        if let Some(choices) = value.get("choices").and_then(Value::as_array) {
            let choice: WireChoice = choices
                .first()
                .cloned()
                .map(serde_json::from_value)
                .transpose()
                .map_err(|e| EngineError::FetchFailed {
                    category: FetchFailure::Protocol,
                    detail: format!("malformed choice: {e}"),
                })?
                .ok_or_else(|| EngineError::FetchFailed {
                    category: FetchFailure::Protocol,
                    detail: "response contained no choices".to_string(),
                })?;
            let usage: WireUsage = value
                .get("usage")
                .cloned()
                .map(serde_json::from_value)
                .transpose()
                .unwrap_or_default()
                .unwrap_or_default();
            return Ok(AnalyzerResponse {
                payload: AnalyzerPayload::Text(choice.message.content),
                usage: TokenUsage {
                    prompt_tokens: usage.prompt_tokens,
                    completion_tokens: usage.completion_tokens,
                },
            });
        }

        Ok(AnalyzerResponse {
            payload: AnalyzerPayload::Json(value),
            usage: TokenUsage::default(),
        })
    }
}

// ============================================================================
// Resilient Connection
// ============================================================================

/// Transport wrapper owning the retry policy and the cache tiers.
pub struct AnalyzerConnection {
    transport: Arc<dyn AnalyzerTransport>,
    local_cache: MemoryCache,
    shared_cache: Option<Arc<dyn SharedCache>>,
    config: EngineConfig,
    usage: Mutex<TokenUsage>,
    used_keys: Mutex<Vec<String>>,
}

impl AnalyzerConnection {
    pub fn new(transport: Arc<dyn AnalyzerTransport>, config: EngineConfig) -> Self {
        let local_cache = MemoryCache::new(config.cache_capacity_entries);
        Self {
            transport,
            local_cache,
            shared_cache: None,
            config,
            usage: Mutex::new(TokenUsage::default()),
            used_keys: Mutex::new(Vec::new()),
        }
    }

    /// Plug in an external shared cache tier.
    pub fn with_shared_cache(mut self, cache: Arc<dyn SharedCache>) -> Self {
        self.shared_cache = Some(cache);
        self
    }

    fn ttl_for(&self, class: PromptClass) -> Duration {
        match class {
            PromptClass::Comprehensive => {
                Duration::from_secs(self.config.cache_ttl_seconds_comprehensive)
            }
            PromptClass::GapFill(_) | PromptClass::SnippetRequery => {
                Duration::from_secs(self.config.cache_ttl_seconds_gap_fill)
            }
        }
    }

    /// Call the analyzer with caching, retries, and cancellation.
    pub async fn call(
        &self,
        class: PromptClass,
        repo_url: &str,
        branch: &str,
        prompt: &str,
        cancel: &CancelToken,
    ) -> Result<AnalyzerPayload> {
        let key = cache_key(repo_url, branch, &class.label(), prompt);

        // Read-through: local tier, then shared tier.
        if let Some(raw) = self.local_cache.get(&key).await {
            if let Ok(payload) = serde_json::from_str::<AnalyzerPayload>(&raw) {
                debug!(class = %class.label(), "analyzer cache hit (local)");
                self.remember_key(&key).await;
                return Ok(payload);
            }
        }
        if let Some(shared) = &self.shared_cache {
            if let Some(raw) = shared.get(&key).await {
                if let Ok(payload) = serde_json::from_str::<AnalyzerPayload>(&raw) {
                    debug!(class = %class.label(), "analyzer cache hit (shared)");
                    self.local_cache
                        .set(&key, raw, self.ttl_for(class))
                        .await;
                    self.remember_key(&key).await;
                    return Ok(payload);
                }
            }
        }

        let request = AnalyzerRequest {
            repo_url: repo_url.to_string(),
            branch: branch.to_string(),
            messages: vec![
                ChatMessage::system(crate::prompts::REVIEWER_SYSTEM),
                ChatMessage::user(prompt),
            ],
            model: self.config.model.clone(),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            response_format_json: true,
        };

        let result = self.call_with_retries(&request, cancel).await;
        match result {
            Ok(response) => {
                self.usage.lock().await.add(response.usage);
                if let Ok(raw) = serde_json::to_string(&response.payload) {
                    let ttl = self.ttl_for(class);
                    self.local_cache.set(&key, raw.clone(), ttl).await;
                    if let Some(shared) = &self.shared_cache {
                        shared.set(&key, raw, ttl).await;
                    }
                }
                self.remember_key(&key).await;
                Ok(response.payload)
            }
            Err(error) => {
                // Never leave a stale entry behind a failed refresh.
                self.local_cache.invalidate(&key).await;
                if let Some(shared) = &self.shared_cache {
                    shared.invalidate(&key).await;
                }
                Err(error)
            }
        }
    }

    async fn call_with_retries(
        &self,
        request: &AnalyzerRequest,
        cancel: &CancelToken,
    ) -> Result<AnalyzerResponse> {
        let mut last_error: Option<EngineError> = None;

        for attempt in 1..=self.config.max_retries {
            if cancel.is_cancelled() {
                return Err(EngineError::cancelled("caller request"));
            }
            if attempt > 1 {
                let delay = self.backoff_delay(attempt);
                info!(
                    attempt,
                    max = self.config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "retrying analyzer call"
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => {
                        return Err(EngineError::cancelled("caller request"));
                    }
                }
            }

            let outcome = tokio::select! {
                sent = tokio::time::timeout(
                    self.config.request_timeout(),
                    self.transport.send(request),
                ) => match sent {
                    Ok(result) => result,
                    Err(_) => Err(EngineError::FetchFailed {
                        category: FetchFailure::Timeout,
                        detail: format!(
                            "request exceeded {} ms",
                            self.config.analyzer_request_timeout_ms
                        ),
                    }),
                },
                _ = cancel.cancelled() => {
                    return Err(EngineError::cancelled("caller request"));
                }
            };

            match outcome {
                Ok(response) => return Ok(response),
                Err(EngineError::FetchFailed { category, detail }) => {
                    if category.is_transient() {
                        warn!(attempt, %category, "analyzer call failed: {}", detail);
                        last_error = Some(EngineError::FetchFailed { category, detail });
                    } else {
                        return Err(EngineError::FetchFailed { category, detail });
                    }
                }
                Err(other) => return Err(other),
            }
        }

        Err(last_error.unwrap_or(EngineError::FetchFailed {
            category: FetchFailure::Unreachable,
            detail: "analyzer call failed with no attempts recorded".to_string(),
        }))
    }

    /// Exponential backoff with jitter: initial * 2^(attempt-2), capped,
    /// then scaled by a random factor in [1-jitter, 1+jitter].
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(2).min(16);
        let base = self
            .config
            .backoff_initial_ms
            .saturating_mul(1u64 << exp)
            .min(self.config.backoff_max_ms);
        let jitter = self.config.backoff_jitter;
        let factor = if jitter > 0.0 {
            rand::thread_rng().gen_range(1.0 - jitter..=1.0 + jitter)
        } else {
            1.0
        };
        Duration::from_millis((base as f64 * factor) as u64)
    }

    async fn remember_key(&self, key: &str) {
        let mut keys = self.used_keys.lock().await;
        if !keys.iter().any(|k| k == key) {
            keys.push(key.to_string());
        }
    }

    /// Tell the cache tiers that the run using these entries has delivered
    /// its result, so they may be evicted eagerly.
    pub async fn mark_delivered(&self) {
        let keys = std::mem::take(&mut *self.used_keys.lock().await);
        if keys.is_empty() {
            return;
        }
        self.local_cache.mark_delivered(&keys).await;
        if let Some(shared) = &self.shared_cache {
            shared.mark_delivered(&keys).await;
        }
    }

    pub async fn usage(&self) -> TokenUsage {
        *self.usage.lock().await
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.local_cache.stats().await
    }
}
