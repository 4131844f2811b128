//! Error types shared by the key pool and the rotation executor

use std::path::PathBuf;
use thiserror::Error;

/// No usable credentials could be assembled
///
/// Raised at pool construction time and never retried.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("No API keys available: {0}")]
    NoKeys(String),

    #[error("Failed to read key file {path}: {source}")]
    KeyFileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse key file {path}: {source}")]
    KeyFileParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Failure surfaced by a rotating call
///
/// `Provider` carries the error of the last attempt untouched; its `Display`
/// is the inner error's, so callers see the original message.
#[derive(Error, Debug)]
pub enum RotationError<E> {
    #[error("Key rotation exhausted without a recorded error")]
    Exhausted,

    #[error(transparent)]
    Provider(E),
}

impl<E> RotationError<E> {
    /// Check if this is the synthetic exhaustion error
    pub fn is_exhausted(&self) -> bool {
        matches!(self, RotationError::Exhausted)
    }

    /// Borrow the provider error, if any
    pub fn provider_error(&self) -> Option<&E> {
        match self {
            RotationError::Provider(e) => Some(e),
            RotationError::Exhausted => None,
        }
    }

    /// Get the provider error if this is not an exhaustion error
    pub fn into_inner(self) -> Option<E> {
        match self {
            RotationError::Provider(e) => Some(e),
            RotationError::Exhausted => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_is_transparent() {
        let err: RotationError<String> = RotationError::Provider("quota exceeded".to_string());
        assert_eq!(err.to_string(), "quota exceeded");
        assert!(!err.is_exhausted());
        assert_eq!(err.into_inner(), Some("quota exceeded".to_string()));
    }

    #[test]
    fn test_exhausted_has_no_inner() {
        let err: RotationError<String> = RotationError::Exhausted;
        assert!(err.is_exhausted());
        assert!(err.provider_error().is_none());
        assert!(err.into_inner().is_none());
    }

    #[test]
    fn test_no_keys_message() {
        let err = ConfigurationError::NoKeys("set GEMINI_API_KEYS".to_string());
        assert_eq!(err.to_string(), "No API keys available: set GEMINI_API_KEYS");
    }
}
