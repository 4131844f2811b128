//! RAG toolkit library
//!
//! Shared pieces of the medical Q&A and contract-compliance applications:
//! a Gemini API key pool, the rotation executor, and chat/embedding
//! providers that survive per-key quota failures.

// Public modules
pub mod config;
pub mod error;
pub mod logging;
pub mod schemas;
pub mod services;
pub mod utils;

// Re-export commonly used types
pub use config::Settings;
pub use error::{ConfigurationError, RotationError};
pub use services::{
    build_rotating_resources, ChatModel, Embeddings, KeyPool, RotatingGeminiChat,
    RotatingGeminiEmbeddings, RotationExecutor,
};
