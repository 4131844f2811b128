//! Services module
//!
//! Contains the key pool, the rotation executor and the Gemini integrations.

pub mod gemini;
pub mod key_pool;
pub mod providers;
pub mod rotation;

pub use gemini::{ClientOptions, GeminiClient, GeminiClientFactory, GeminiServiceError};
pub use key_pool::{KeyLoader, KeyPool, KeyPoolStats, KeySource, KeySourceConfig};
pub use providers::{
    build_rotating_resources, rotating_resources_from_pool, ChatModel, ClientFactory, Embeddings,
    RotatingGeminiChat, RotatingGeminiEmbeddings,
};
pub use rotation::{RotationExecutor, RotationOutcome, RotationPolicy};
