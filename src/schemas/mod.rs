//! Request and response schemas

pub mod chat;
pub mod gemini;

pub use chat::{ChatMessage, ChatResponse, Role, TokenUsage};
