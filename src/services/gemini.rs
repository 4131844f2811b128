//! Gemini client for Google Gemini API interactions
//!
//! A `GeminiClient` is bound to one API key and one model. The rotating
//! providers build a new client for every attempt, so a client never outlives
//! the key it was built with.

use crate::schemas::gemini::{
    BatchEmbedContentsRequest, BatchEmbedContentsResponse, EmbedContentRequest,
    EmbedContentResponse, GeminiContent, GeminiError, GeminiRequest, GeminiResponse,
    GenerationConfig, TaskType,
};
use crate::schemas::{ChatMessage, ChatResponse, Role, TokenUsage};
use crate::services::providers::{ChatModel, ClientFactory, Embeddings};
use crate::utils::{mask_key, truncate_str};
use async_trait::async_trait;
use reqwest::header::HeaderValue;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Constants
// ============================================================================

pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

const API_KEY_HEADER: &str = "x-goog-api-key";

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur when calling the Gemini API
#[derive(Error, Debug)]
pub enum GeminiServiceError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("API error: {code} {status} - {message}")]
    ApiError {
        code: i32,
        status: String,
        message: String,
    },

    #[error("Failed to parse response: {0}")]
    ParseError(String),

    #[error("Response contained no candidates")]
    EmptyResponse,

    #[error("Invalid API key {0}")]
    InvalidApiKey(String),
}

impl GeminiServiceError {
    /// Check if the key ran out of quota or hit a rate limit
    pub fn is_quota_error(&self) -> bool {
        match self {
            Self::ApiError { code, status, .. } => *code == 429 || status == "RESOURCE_EXHAUSTED",
            _ => false,
        }
    }

    /// Check if another key (or a later attempt) could plausibly succeed
    ///
    /// Usable as a rotation policy when malformed requests should fail fast.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ApiError {
                code, status, ..
            } => {
                self.is_quota_error()
                    || *code >= 500
                    || matches!(*code, 401 | 403)
                    || status == "PERMISSION_DENIED"
                    || status == "UNAUTHENTICATED"
            }
            Self::HttpError(e) => e.is_timeout() || e.is_connect(),
            Self::InvalidApiKey(_) => true,
            Self::ParseError(_) | Self::EmptyResponse => false,
        }
    }
}

// ============================================================================
// Client Options
// ============================================================================

/// Provider-specific client options
///
/// `generation_config` entries are copied verbatim into the request's
/// `generationConfig` (e.g. `temperature`, `topP`, `maxOutputTokens`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientOptions {
    /// Base URL (default: generativelanguage.googleapis.com)
    pub base_url: Option<String>,

    /// Request timeout in seconds
    pub timeout_seconds: Option<u64>,

    /// Pass-through generation options
    #[serde(default)]
    pub generation_config: Map<String, Value>,
}

impl ClientOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    /// Set a pass-through generation option
    pub fn with_option(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.generation_config.insert(name.into(), value.into());
        self
    }
}

// ============================================================================
// Gemini Client
// ============================================================================

/// Client for one Gemini model authenticated with one API key
#[derive(Clone)]
pub struct GeminiClient {
    /// HTTP client
    http: Client,

    /// API key sent with every request
    api_key: String,

    /// Model path ("models/gemini-1.5-pro")
    model: String,

    /// Base URL for API calls
    base_url: String,

    /// Generation options copied into chat requests
    generation_config: Map<String, Value>,
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("api_key", &mask_key(&self.api_key))
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl GeminiClient {
    /// Create a new client
    ///
    /// Fails without any network traffic if the key is blank or cannot be
    /// sent as a header value.
    pub fn new(
        model: &str,
        api_key: &str,
        options: &ClientOptions,
    ) -> Result<Self, GeminiServiceError> {
        if api_key.trim().is_empty() || HeaderValue::from_str(api_key).is_err() {
            return Err(GeminiServiceError::InvalidApiKey(mask_key(api_key)));
        }

        let timeout = options.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECS);
        let http = Client::builder()
            .timeout(Duration::from_secs(timeout))
            .build()?;

        let base_url = options
            .base_url
            .as_deref()
            .unwrap_or(GEMINI_API_BASE)
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            http,
            api_key: api_key.to_string(),
            model: model_path(model),
            base_url,
            generation_config: options.generation_config.clone(),
        })
    }

    /// Get the model path this client calls
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Generate content (non-streaming)
    pub async fn generate_content(
        &self,
        request: &GeminiRequest,
    ) -> Result<GeminiResponse, GeminiServiceError> {
        self.post("generateContent", request).await
    }

    /// Embed a single text
    pub async fn embed_content(
        &self,
        text: &str,
        task_type: TaskType,
    ) -> Result<Vec<f32>, GeminiServiceError> {
        let request = self.embed_request(text, task_type);
        let response: EmbedContentResponse = self.post("embedContent", &request).await?;
        Ok(response.embedding.values)
    }

    /// Embed several texts in one request, preserving order
    pub async fn batch_embed_contents(
        &self,
        texts: &[String],
        task_type: TaskType,
    ) -> Result<Vec<Vec<f32>>, GeminiServiceError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = BatchEmbedContentsRequest {
            requests: texts
                .iter()
                .map(|text| self.embed_request(text, task_type))
                .collect(),
        };
        let response: BatchEmbedContentsResponse =
            self.post("batchEmbedContents", &request).await?;

        if response.embeddings.len() != texts.len() {
            return Err(GeminiServiceError::ParseError(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                response.embeddings.len()
            )));
        }

        Ok(response.embeddings.into_iter().map(|e| e.values).collect())
    }

    fn embed_request(&self, text: &str, task_type: TaskType) -> EmbedContentRequest {
        EmbedContentRequest {
            model: self.model.clone(),
            content: GeminiContent::plain(text),
            task_type: Some(task_type),
        }
    }

    /// Build a generateContent request from conversation turns
    pub fn build_chat_request(
        &self,
        messages: &[ChatMessage],
        stop: Option<&[String]>,
    ) -> GeminiRequest {
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();

        let contents = messages
            .iter()
            .filter_map(|m| match m.role {
                Role::User => Some(GeminiContent::user(m.content.as_str())),
                Role::Assistant => Some(GeminiContent::model(m.content.as_str())),
                Role::System => None,
            })
            .collect();

        let generation_config = GenerationConfig {
            stop_sequences: stop.filter(|s| !s.is_empty()).map(|s| s.to_vec()),
            extra: self.generation_config.clone(),
        };

        GeminiRequest {
            contents,
            system_instruction: (!system.is_empty())
                .then(|| GeminiContent::plain(system.join("\n\n"))),
            generation_config: (!generation_config.is_empty()).then_some(generation_config),
        }
    }

    async fn post<Req, Resp>(&self, method: &str, body: &Req) -> Result<Resp, GeminiServiceError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let url = format!("{}/{}:{}", self.base_url, self.model, method);

        tracing::debug!(
            model = %self.model,
            method = %method,
            key = %mask_key(&self.api_key),
            "Calling Gemini API"
        );

        let response = self
            .http
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();

            // Try to parse as Gemini error
            if let Ok(gemini_error) = serde_json::from_str::<GeminiError>(&error_text) {
                return Err(GeminiServiceError::ApiError {
                    code: gemini_error.error.code,
                    status: gemini_error.error.status,
                    message: gemini_error.error.message,
                });
            }

            return Err(GeminiServiceError::ApiError {
                code: status.as_u16() as i32,
                status: status.canonical_reason().unwrap_or_default().to_string(),
                message: error_text,
            });
        }

        let response_text = response.text().await?;
        serde_json::from_str(&response_text).map_err(|e| {
            tracing::error!(
                error = %e,
                body = %truncate_str(&response_text, 500),
                "Failed to parse Gemini response"
            );
            GeminiServiceError::ParseError(e.to_string())
        })
    }
}

/// Qualify a bare model name ("embedding-001" -> "models/embedding-001")
fn model_path(model: &str) -> String {
    if model.starts_with("models/") || model.starts_with("tunedModels/") {
        model.to_string()
    } else {
        format!("models/{}", model)
    }
}

/// Convert a generateContent response to a chat answer
pub fn into_chat_response(response: GeminiResponse) -> Result<ChatResponse, GeminiServiceError> {
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or(GeminiServiceError::EmptyResponse)?;

    let usage = response.usage_metadata.map(|u| TokenUsage {
        prompt_tokens: u.prompt_token_count.max(0) as u32,
        completion_tokens: u.candidates_token_count.max(0) as u32,
        total_tokens: u.total_token_count.max(0) as u32,
    });

    Ok(ChatResponse {
        text: candidate.content.map(|c| c.text()).unwrap_or_default(),
        finish_reason: candidate.finish_reason,
        usage,
    })
}

#[async_trait]
impl ChatModel for GeminiClient {
    type Error = GeminiServiceError;

    async fn generate(
        &self,
        messages: &[ChatMessage],
        stop: Option<&[String]>,
    ) -> Result<ChatResponse, GeminiServiceError> {
        let request = self.build_chat_request(messages, stop);
        let response = self.generate_content(&request).await?;
        into_chat_response(response)
    }
}

#[async_trait]
impl Embeddings for GeminiClient {
    type Error = GeminiServiceError;

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, GeminiServiceError> {
        self.batch_embed_contents(texts, TaskType::RetrievalDocument)
            .await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, GeminiServiceError> {
        self.embed_content(text, TaskType::RetrievalQuery).await
    }
}

// ============================================================================
// Client Factory
// ============================================================================

/// Builds a `GeminiClient` per attempt
#[derive(Debug, Clone, Copy, Default)]
pub struct GeminiClientFactory;

impl ClientFactory for GeminiClientFactory {
    type Client = GeminiClient;
    type Error = GeminiServiceError;

    fn build(
        &self,
        model: &str,
        api_key: &str,
        options: &ClientOptions,
    ) -> Result<GeminiClient, GeminiServiceError> {
        GeminiClient::new(model, api_key, options)
    }
}

// ============================================================================
// Tests
// ============================================================================
