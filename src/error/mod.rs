//! Error types

mod types;

pub use types::{ConfigurationError, RotationError};
