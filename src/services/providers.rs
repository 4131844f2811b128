//! Rotating chat and embedding providers
//!
//! `RotatingGeminiChat` and `RotatingGeminiEmbeddings` hold a shared
//! `KeyPool`, a model name and client options. Every call goes through the
//! `RotationExecutor`, which builds a fresh client per attempt through a
//! `ClientFactory`. Errors of the last attempt reach the caller unchanged.

use crate::config::Settings;
use crate::error::{ConfigurationError, RotationError};
use crate::schemas::gemini::models;
use crate::schemas::{ChatMessage, ChatResponse};
use crate::services::gemini::{ClientOptions, GeminiClientFactory};
use crate::services::key_pool::KeyPool;
use crate::services::rotation::RotationExecutor;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::Instrument;

// ============================================================================
// Traits
// ============================================================================

/// A model that answers a conversation
#[async_trait]
pub trait ChatModel: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn generate(
        &self,
        messages: &[ChatMessage],
        stop: Option<&[String]>,
    ) -> Result<ChatResponse, Self::Error>;
}

/// A model that turns text into vectors
#[async_trait]
pub trait Embeddings: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, Self::Error>;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, Self::Error>;
}

/// Builds one client for one API key
pub trait ClientFactory: Send + Sync {
    type Client: Send + Sync;
    type Error: std::error::Error + Send + Sync + 'static;

    fn build(
        &self,
        model: &str,
        api_key: &str,
        options: &ClientOptions,
    ) -> Result<Self::Client, Self::Error>;
}

// ============================================================================
// Rotating Chat
// ============================================================================

/// Chat model that rotates API keys on failure
pub struct RotatingGeminiChat<F: ClientFactory = GeminiClientFactory> {
    executor: RotationExecutor<F::Error>,
    factory: F,
    model: String,
    options: ClientOptions,
}

impl RotatingGeminiChat<GeminiClientFactory> {
    /// Create a chat provider backed by the Gemini REST API
    pub fn new(pool: Arc<KeyPool>, model: impl Into<String>, options: ClientOptions) -> Self {
        Self::with_factory(GeminiClientFactory, pool, model, options)
    }
}

impl<F: ClientFactory> RotatingGeminiChat<F> {
    /// Create a chat provider with a custom client factory
    pub fn with_factory(
        factory: F,
        pool: Arc<KeyPool>,
        model: impl Into<String>,
        options: ClientOptions,
    ) -> Self {
        Self {
            executor: RotationExecutor::new(pool),
            factory,
            model: model.into(),
            options,
        }
    }

    /// Only rotate on errors accepted by `policy`
    pub fn with_rotation_policy<P>(mut self, policy: P) -> Self
    where
        P: Fn(&F::Error) -> bool + Send + Sync + 'static,
    {
        self.executor = self.executor.with_rotation_policy(policy);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn pool(&self) -> &Arc<KeyPool> {
        self.executor.pool()
    }
}

#[async_trait]
impl<F> ChatModel for RotatingGeminiChat<F>
where
    F: ClientFactory,
    F::Client: ChatModel<Error = F::Error>,
{
    type Error = RotationError<F::Error>;

    async fn generate(
        &self,
        messages: &[ChatMessage],
        stop: Option<&[String]>,
    ) -> Result<ChatResponse, Self::Error> {
        let span = tracing::debug_span!("rotating_chat", model = %self.model);
        self.executor
            .execute(
                |key| self.factory.build(&self.model, key, &self.options),
                |client| async move { client.generate(messages, stop).await },
            )
            .instrument(span)
            .await
    }
}

// ============================================================================
// Rotating Embeddings
// ============================================================================

/// Embedding model that rotates API keys on failure
pub struct RotatingGeminiEmbeddings<F: ClientFactory = GeminiClientFactory> {
    executor: RotationExecutor<F::Error>,
    factory: F,
    model: String,
    options: ClientOptions,
}

impl RotatingGeminiEmbeddings<GeminiClientFactory> {
    /// Create an embedding provider backed by the Gemini REST API
    pub fn new(pool: Arc<KeyPool>, model: impl Into<String>, options: ClientOptions) -> Self {
        Self::with_factory(GeminiClientFactory, pool, model, options)
    }
}

impl<F: ClientFactory> RotatingGeminiEmbeddings<F> {
    /// Create an embedding provider with a custom client factory
    pub fn with_factory(
        factory: F,
        pool: Arc<KeyPool>,
        model: impl Into<String>,
        options: ClientOptions,
    ) -> Self {
        Self {
            executor: RotationExecutor::new(pool),
            factory,
            model: model.into(),
            options,
        }
    }

    /// Only rotate on errors accepted by `policy`
    pub fn with_rotation_policy<P>(mut self, policy: P) -> Self
    where
        P: Fn(&F::Error) -> bool + Send + Sync + 'static,
    {
        self.executor = self.executor.with_rotation_policy(policy);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn pool(&self) -> &Arc<KeyPool> {
        self.executor.pool()
    }
}

#[async_trait]
impl<F> Embeddings for RotatingGeminiEmbeddings<F>
where
    F: ClientFactory,
    F::Client: Embeddings<Error = F::Error>,
{
    type Error = RotationError<F::Error>;

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, Self::Error> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let span = tracing::debug_span!(
            "rotating_embed_documents",
            model = %self.model,
            count = texts.len()
        );
        self.executor
            .execute(
                |key| self.factory.build(&self.model, key, &self.options),
                |client| async move { client.embed_documents(texts).await },
            )
            .instrument(span)
            .await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, Self::Error> {
        let span = tracing::debug_span!("rotating_embed_query", model = %self.model);
        self.executor
            .execute(
                |key| self.factory.build(&self.model, key, &self.options),
                |client| async move { client.embed_query(text).await },
            )
            .instrument(span)
            .await
    }
}

// ============================================================================
// Resource Construction
// ============================================================================

/// Build a chat and an embedding provider that share one key pool
///
/// Keys come from the sources configured in `settings.keys`.
pub fn build_rotating_resources(
    settings: &Settings,
) -> Result<(RotatingGeminiChat, RotatingGeminiEmbeddings), ConfigurationError> {
    let pool = Arc::new(KeyPool::from_sources(&settings.keys)?);
    Ok(rotating_resources_from_pool(pool, settings))
}

/// Build both providers around an existing pool
pub fn rotating_resources_from_pool(
    pool: Arc<KeyPool>,
    settings: &Settings,
) -> (RotatingGeminiChat, RotatingGeminiEmbeddings) {
    let mut base = ClientOptions::new().with_timeout(settings.request_timeout_seconds);
    if let Some(url) = &settings.gemini_base_url {
        base = base.with_base_url(url.clone());
    }

    let mut chat_options = base.clone();
    if let Some(temperature) = settings.temperature {
        chat_options = chat_options.with_option("temperature", temperature);
    }

    tracing::info!(
        chat_model = %settings.chat_model,
        embedding_model = %settings.embedding_model,
        key_count = pool.len(),
        "Initialized rotating Gemini providers"
    );

    let chat = RotatingGeminiChat::new(Arc::clone(&pool), settings.chat_model.clone(), chat_options);
    let embeddings = RotatingGeminiEmbeddings::new(pool, settings.embedding_model.clone(), base);
    (chat, embeddings)
}

/// Default chat model
pub const DEFAULT_CHAT_MODEL: &str = models::GEMINI_1_5_PRO;

/// Default embedding model
pub const DEFAULT_EMBEDDING_MODEL: &str = models::EMBEDDING_001;

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::gemini::GeminiServiceError;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Fake client that fails for blocked keys with a quota error
    struct FakeClient {
        key: String,
        blocked: bool,
    }

    fn quota_error(key: &str) -> GeminiServiceError {
        GeminiServiceError::ApiError {
            code: 429,
            status: "RESOURCE_EXHAUSTED".to_string(),
            message: format!("quota exceeded for {}", key),
        }
    }

    #[async_trait]
    impl ChatModel for FakeClient {
        type Error = GeminiServiceError;

        async fn generate(
            &self,
            messages: &[ChatMessage],
            stop: Option<&[String]>,
        ) -> Result<ChatResponse, GeminiServiceError> {
            if self.blocked {
                return Err(quota_error(&self.key));
            }
            Ok(ChatResponse {
                text: format!(
                    "{} answered {} turns (stop: {})",
                    self.key,
                    messages.len(),
                    stop.map(|s| s.join("|")).unwrap_or_default()
                ),
                finish_reason: Some("STOP".to_string()),
                usage: None,
            })
        }
    }

    #[async_trait]
    impl Embeddings for FakeClient {
        type Error = GeminiServiceError;

        async fn embed_documents(
            &self,
            texts: &[String],
        ) -> Result<Vec<Vec<f32>>, GeminiServiceError> {
            if self.blocked {
                return Err(quota_error(&self.key));
            }
            Ok(texts.iter().map(|t| vec![t.len() as f32]).collect())
        }

        async fn embed_query(&self, text: &str) -> Result<Vec<f32>, GeminiServiceError> {
            if self.blocked {
                return Err(quota_error(&self.key));
            }
            Ok(vec![text.len() as f32, 1.0])
        }
    }

    /// Records every build and blocks the configured keys
    #[derive(Default)]
    struct FakeFactory {
        blocked: HashSet<String>,
        builds: Mutex<Vec<(String, String)>>,
    }

    impl FakeFactory {
        fn blocking(keys: &[&str]) -> Self {
            Self {
                blocked: keys.iter().map(|k| k.to_string()).collect(),
                builds: Mutex::new(Vec::new()),
            }
        }

        fn built_keys(&self) -> Vec<String> {
            self.builds
                .lock()
                .unwrap()
                .iter()
                .map(|(_, key)| key.clone())
                .collect()
        }
    }

    impl ClientFactory for FakeFactory {
        type Client = FakeClient;
        type Error = GeminiServiceError;

        fn build(
            &self,
            model: &str,
            api_key: &str,
            _options: &ClientOptions,
        ) -> Result<FakeClient, GeminiServiceError> {
            self.builds
                .lock()
                .unwrap()
                .push((model.to_string(), api_key.to_string()));
            Ok(FakeClient {
                key: api_key.to_string(),
                blocked: self.blocked.contains(api_key),
            })
        }
    }

    fn shared_pool(keys: &[&str]) -> Arc<KeyPool> {
        Arc::new(KeyPool::new(keys).unwrap())
    }

    #[tokio::test]
    async fn test_chat_rotates_past_exhausted_keys() {
        let pool = shared_pool(&["A", "A", "B", "C"]);
        let chat = RotatingGeminiChat::with_factory(
            FakeFactory::blocking(&["A", "B"]),
            Arc::clone(&pool),
            "gemini-1.5-pro",
            ClientOptions::default(),
        );
        let stop = vec!["END".to_string()];

        let response = chat
            .generate(&[ChatMessage::user("hello")], Some(&stop))
            .await
            .unwrap();

        assert_eq!(response.text, "C answered 1 turns (stop: END)");
        assert_eq!(chat.factory.built_keys(), vec!["A", "B", "C"]);
        assert_eq!(pool.rotations(), 2);
    }

    #[tokio::test]
    async fn test_chat_surfaces_last_error_unchanged() {
        let pool = shared_pool(&["A", "B"]);
        let chat = RotatingGeminiChat::with_factory(
            FakeFactory::blocking(&["A", "B"]),
            Arc::clone(&pool),
            "gemini-1.5-pro",
            ClientOptions::default(),
        );

        let err = chat
            .generate(&[ChatMessage::user("hello")], None)
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "API error: 429 RESOURCE_EXHAUSTED - quota exceeded for B"
        );
        assert!(err.into_inner().unwrap().is_quota_error());
        assert_eq!(pool.rotations(), 2);
    }

    #[tokio::test]
    async fn test_chat_passes_model_to_factory() {
        let chat = RotatingGeminiChat::with_factory(
            FakeFactory::default(),
            shared_pool(&["k"]),
            "gemini-1.5-flash",
            ClientOptions::default(),
        );

        chat.generate(&[ChatMessage::user("hi")], None).await.unwrap();

        let builds = chat.factory.builds.lock().unwrap().clone();
        assert_eq!(builds, vec![("gemini-1.5-flash".to_string(), "k".to_string())]);
    }

    #[tokio::test]
    async fn test_embeddings_share_pool_with_chat() {
        let pool = shared_pool(&["A", "B"]);
        let embeddings = RotatingGeminiEmbeddings::with_factory(
            FakeFactory::blocking(&["A"]),
            Arc::clone(&pool),
            "models/embedding-001",
            ClientOptions::default(),
        );
        let chat = RotatingGeminiChat::with_factory(
            FakeFactory::default(),
            Arc::clone(&pool),
            "gemini-1.5-pro",
            ClientOptions::default(),
        );

        let vector = embeddings.embed_query("abc").await.unwrap();
        assert_eq!(vector, vec![3.0, 1.0]);

        // The chat provider picks up where the embedding rotation left off
        let response = chat.generate(&[ChatMessage::user("q")], None).await.unwrap();
        assert!(response.text.starts_with("B answered"));
        assert_eq!(chat.factory.built_keys(), vec!["B"]);
    }

    #[tokio::test]
    async fn test_embed_documents_keeps_order() {
        let embeddings = RotatingGeminiEmbeddings::with_factory(
            FakeFactory::default(),
            shared_pool(&["k"]),
            "models/embedding-001",
            ClientOptions::default(),
        );
        let texts = vec!["a".to_string(), "abcd".to_string(), "ab".to_string()];

        let vectors = embeddings.embed_documents(&texts).await.unwrap();

        assert_eq!(vectors, vec![vec![1.0], vec![4.0], vec![2.0]]);
    }

    #[tokio::test]
    async fn test_embed_documents_empty_input_skips_calls() {
        let embeddings = RotatingGeminiEmbeddings::with_factory(
            FakeFactory::default(),
            shared_pool(&["k"]),
            "models/embedding-001",
            ClientOptions::default(),
        );

        let vectors = embeddings.embed_documents(&[]).await.unwrap();

        assert!(vectors.is_empty());
        assert!(embeddings.factory.built_keys().is_empty());
    }

    #[tokio::test]
    async fn test_rotation_policy_on_provider() {
        let pool = shared_pool(&["A", "B"]);
        let embeddings = RotatingGeminiEmbeddings::with_factory(
            FakeFactory::blocking(&["A"]),
            Arc::clone(&pool),
            "models/embedding-001",
            ClientOptions::default(),
        )
        .with_rotation_policy(|err: &GeminiServiceError| !err.is_quota_error());

        let err = embeddings.embed_query("abc").await.unwrap_err();

        assert!(err.provider_error().unwrap().is_quota_error());
        assert_eq!(pool.rotations(), 0);
    }

    #[test]
    fn test_rotating_resources_share_one_pool() {
        let settings = Settings::default();
        let pool = shared_pool(&["k1", "k2"]);

        let (chat, embeddings) = rotating_resources_from_pool(Arc::clone(&pool), &settings);

        assert!(Arc::ptr_eq(chat.pool(), embeddings.pool()));
        assert_eq!(chat.model(), DEFAULT_CHAT_MODEL);
        assert_eq!(embeddings.model(), DEFAULT_EMBEDDING_MODEL);
    }
}
