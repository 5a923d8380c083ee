//! Intelligence provider clients.
//!
//! Providers share the chat-completions wire shape; each variant differs
//! in base URL, default model, and credentials. The orchestrator holds a
//! registry mapping provider names to instances and never constructs
//! clients itself.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};

/// Known provider variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderName {
    Perplexity,
    OpenAi,
}

impl std::fmt::Display for ProviderName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Perplexity => write!(f, "perplexity"),
            Self::OpenAi => write!(f, "openai"),
        }
    }
}

/// A synthesis request: prompt plus generation parameters.
#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    pub system: Option<String>,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f64,
}

impl SynthesisRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            max_tokens: 2048,
            temperature: 0.2,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature.clamp(0.0, 1.0);
        self
    }
}

/// Raw product of a synthesis call. No schema is imposed on the prose;
/// structuring happens downstream in the extractor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportPayload {
    pub content: String,
    pub response_id: String,
}

/// Capability interface for intelligence synthesis.
#[async_trait]
pub trait IntelligenceProvider: Send + Sync {
    async fn synthesize(&self, request: SynthesisRequest) -> Result<ReportPayload>;

    fn name(&self) -> ProviderName;
}

/// Embedding seam used by the vector index gateway.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Configuration for provider clients.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub api_key: String,
    pub base_url: Option<String>,
    pub default_model: Option<String>,
    pub timeout_secs: u64,
}

impl ProviderConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
            default_model: None,
            timeout_secs: 120,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

fn build_http_client(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| Error::Internal(format!("failed to build HTTP client: {}", e)))
}

// Chat-completions wire types, shared by both providers.

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatWireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatWireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    id: String,
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatWireMessage,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

fn classify_status(provider: &str, status: reqwest::StatusCode, body: &str) -> Error {
    let message = serde_json::from_str::<ApiErrorBody>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.chars().take(200).collect());

    match status.as_u16() {
        401 | 403 => Error::auth(provider, message),
        429 => Error::rate_limited(provider),
        // Other client errors mean the request itself is bad; retrying
        // the same request cannot help.
        400..=499 => Error::Validation(format!("{}: {}", provider, message)),
        _ => Error::api(provider, format!("{}: {}", status, message)),
    }
}

async fn chat_completion(
    http: &Client,
    provider: &str,
    url: &str,
    api_key: &str,
    request: ChatRequest,
) -> Result<ReportPayload> {
    let response = http
        .post(url)
        .header("Authorization", format!("Bearer {}", api_key))
        .header("content-type", "application/json")
        .json(&request)
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                Error::timeout(0)
            } else {
                Error::network(format!("{}: {}", provider, e))
            }
        })?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| Error::network(format!("{}: failed to read response: {}", provider, e)))?;

    if !status.is_success() {
        return Err(classify_status(provider, status, &body));
    }

    let parsed: ChatResponse = serde_json::from_str(&body)
        .map_err(|e| Error::api(provider, format!("unparseable response: {}", e)))?;

    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| Error::api(provider, "no choices in response"))?;

    Ok(ReportPayload {
        content: choice.message.content,
        response_id: parsed.id,
    })
}

fn wire_messages(request: &SynthesisRequest) -> Vec<ChatWireMessage> {
    let mut messages = Vec::new();
    if let Some(system) = &request.system {
        messages.push(ChatWireMessage {
            role: "system".to_string(),
            content: system.clone(),
        });
    }
    messages.push(ChatWireMessage {
        role: "user".to_string(),
        content: request.prompt.clone(),
    });
    messages
}

/// Perplexity client: search-grounded synthesis with web citations.
pub struct PerplexityProvider {
    config: ProviderConfig,
    http: Client,
}

impl PerplexityProvider {
    const DEFAULT_BASE_URL: &'static str = "https://api.perplexity.ai";
    const DEFAULT_MODEL: &'static str = "sonar-pro";

    pub fn new(config: ProviderConfig) -> Result<Self> {
        let http = build_http_client(config.timeout_secs)?;
        Ok(Self { config, http })
    }

    fn base_url(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or(Self::DEFAULT_BASE_URL)
    }
}

#[async_trait]
impl IntelligenceProvider for PerplexityProvider {
    async fn synthesize(&self, request: SynthesisRequest) -> Result<ReportPayload> {
        let model = self
            .config
            .default_model
            .clone()
            .unwrap_or_else(|| Self::DEFAULT_MODEL.to_string());

        let api_request = ChatRequest {
            model,
            messages: wire_messages(&request),
            max_tokens: Some(request.max_tokens),
            temperature: Some(request.temperature),
        };

        let url = format!("{}/chat/completions", self.base_url());
        chat_completion(&self.http, "perplexity", &url, &self.config.api_key, api_request).await
    }

    fn name(&self) -> ProviderName {
        ProviderName::Perplexity
    }
}

/// OpenAI client: synthesis fallback and structured-extraction parses,
/// plus the embedding endpoint used by the vector index.
pub struct OpenAiProvider {
    config: ProviderConfig,
    http: Client,
}

impl OpenAiProvider {
    const DEFAULT_BASE_URL: &'static str = "https://api.openai.com";
    const DEFAULT_MODEL: &'static str = "gpt-4o-mini";
    const EMBEDDING_MODEL: &'static str = "text-embedding-3-small";

    pub fn new(config: ProviderConfig) -> Result<Self> {
        let http = build_http_client(config.timeout_secs)?;
        Ok(Self { config, http })
    }

    fn base_url(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or(Self::DEFAULT_BASE_URL)
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingWireRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingWireResponse {
    data: Vec<EmbeddingWireData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingWireData {
    embedding: Vec<f32>,
}

#[async_trait]
impl IntelligenceProvider for OpenAiProvider {
    async fn synthesize(&self, request: SynthesisRequest) -> Result<ReportPayload> {
        let model = self
            .config
            .default_model
            .clone()
            .unwrap_or_else(|| Self::DEFAULT_MODEL.to_string());

        let api_request = ChatRequest {
            model,
            messages: wire_messages(&request),
            max_tokens: Some(request.max_tokens),
            temperature: Some(request.temperature),
        };

        let url = format!("{}/v1/chat/completions", self.base_url());
        chat_completion(&self.http, "openai", &url, &self.config.api_key, api_request).await
    }

    fn name(&self) -> ProviderName {
        ProviderName::OpenAi
    }
}

#[async_trait]
impl Embedder for OpenAiProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let api_request = EmbeddingWireRequest {
            model: Self::EMBEDDING_MODEL.to_string(),
            input: texts.to_vec(),
        };

        let url = format!("{}/v1/embeddings", self.base_url());
        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("content-type", "application/json")
            .json(&api_request)
            .send()
            .await
            .map_err(|e| Error::network(format!("openai: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::network(format!("openai: failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(classify_status("openai", status, &body));
        }

        let parsed: EmbeddingWireResponse = serde_json::from_str(&body)
            .map_err(|e| Error::api("openai", format!("unparseable embedding response: {}", e)))?;

        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

/// Registry mapping provider names to instances.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<ProviderName, Arc<dyn IntelligenceProvider>>,
    default_provider: Option<ProviderName>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(mut self, provider: Arc<dyn IntelligenceProvider>) -> Self {
        let name = provider.name();
        self.providers.insert(name, provider);
        if self.default_provider.is_none() {
            self.default_provider = Some(name);
        }
        self
    }

    pub fn with_default(mut self, name: ProviderName) -> Self {
        self.default_provider = Some(name);
        self
    }

    pub fn get(&self, name: ProviderName) -> Option<&Arc<dyn IntelligenceProvider>> {
        self.providers.get(&name)
    }

    /// Resolve a provider, falling back to the default.
    pub fn resolve(&self, name: Option<ProviderName>) -> Result<&Arc<dyn IntelligenceProvider>> {
        let name = name
            .or(self.default_provider)
            .ok_or_else(|| Error::Config("no intelligence provider configured".to_string()))?;
        self.providers
            .get(&name)
            .ok_or_else(|| Error::Config(format!("provider not registered: {}", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let auth = classify_status("perplexity", reqwest::StatusCode::UNAUTHORIZED, "{}");
        assert!(matches!(auth, Error::Auth { .. }));

        let limited = classify_status("perplexity", reqwest::StatusCode::TOO_MANY_REQUESTS, "{}");
        assert!(matches!(limited, Error::RateLimited { .. }));

        let bad_request = classify_status("openai", reqwest::StatusCode::BAD_REQUEST, "{}");
        assert!(matches!(bad_request, Error::Validation(_)));
        assert!(!bad_request.is_retryable());

        let server = classify_status("openai", reqwest::StatusCode::BAD_GATEWAY, "{}");
        assert!(matches!(server, Error::Api { .. }));
        assert!(server.is_retryable());
    }

    #[test]
    fn test_error_body_message_is_extracted() {
        let body = r#"{"error": {"message": "model overloaded"}}"#;
        let err = classify_status("openai", reqwest::StatusCode::INTERNAL_SERVER_ERROR, body);
        assert!(err.to_string().contains("model overloaded"));
    }

    #[test]
    fn test_wire_messages_include_system() {
        let request = SynthesisRequest::new("find startups")
            .with_system("You are an analyst")
            .with_temperature(0.5);
        let messages = wire_messages(&request);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[1].role, "user");
    }

    #[test]
    fn test_registry_resolution() {
        struct StubProvider(ProviderName);

        #[async_trait]
        impl IntelligenceProvider for StubProvider {
            async fn synthesize(&self, _request: SynthesisRequest) -> Result<ReportPayload> {
                Ok(ReportPayload {
                    content: String::new(),
                    response_id: "stub".into(),
                })
            }

            fn name(&self) -> ProviderName {
                self.0
            }
        }

        let registry = ProviderRegistry::new()
            .with_provider(Arc::new(StubProvider(ProviderName::Perplexity)))
            .with_provider(Arc::new(StubProvider(ProviderName::OpenAi)));

        assert_eq!(
            registry.resolve(None).unwrap().name(),
            ProviderName::Perplexity
        );
        assert_eq!(
            registry
                .resolve(Some(ProviderName::OpenAi))
                .unwrap()
                .name(),
            ProviderName::OpenAi
        );

        let empty = ProviderRegistry::new();
        assert!(empty.resolve(None).is_err());
    }

    #[test]
    fn test_temperature_is_clamped() {
        let request = SynthesisRequest::new("p").with_temperature(3.0);
        assert_eq!(request.temperature, 1.0);
    }
}
