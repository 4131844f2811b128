//! Key loading
//!
//! Resolves raw API keys from, in order of preference:
//! 1. a single comma-separated environment variable (`GEMINI_API_KEYS`)
//! 2. numbered variables (`GEMINI_API_KEY_1`, `GEMINI_API_KEY_2`, ...) up to
//!    the first missing index
//! 3. a JSON file shaped like `{"keys": ["...", "..."]}`

use super::pool::KeyPool;
use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::fs;
use std::path::PathBuf;

pub const DEFAULT_SINGLE_VAR: &str = "GEMINI_API_KEYS";
pub const DEFAULT_NUMBERED_PREFIX: &str = "GEMINI_API_KEY";
pub const DEFAULT_KEY_FILE: &str = "config/gemini_keys.json";

// ============================================================================
// Source Configuration
// ============================================================================

/// Where to look for API keys
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct KeySourceConfig {
    /// Variable holding comma-separated keys
    pub single_var: String,
    /// Prefix of the numbered variables (`<prefix>_1`, `<prefix>_2`, ...)
    pub numbered_prefix: String,
    /// Legacy JSON key file, skipped when `None`
    pub key_file: Option<PathBuf>,
}

impl Default for KeySourceConfig {
    fn default() -> Self {
        Self {
            single_var: DEFAULT_SINGLE_VAR.to_string(),
            numbered_prefix: DEFAULT_NUMBERED_PREFIX.to_string(),
            key_file: Some(PathBuf::from(DEFAULT_KEY_FILE)),
        }
    }
}

/// The source a pool was loaded from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    SingleVariable,
    NumberedVariables,
    KeyFile,
}

impl fmt::Display for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SingleVariable => write!(f, "single_variable"),
            Self::NumberedVariables => write!(f, "numbered_variables"),
            Self::KeyFile => write!(f, "key_file"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct KeyFile {
    #[serde(default)]
    keys: Vec<String>,
}

// ============================================================================
// Key Loader
// ============================================================================

/// Builds a `KeyPool` from the configured sources
#[derive(Debug, Clone, Default)]
pub struct KeyLoader {
    config: KeySourceConfig,
}

impl KeyLoader {
    pub fn new(config: KeySourceConfig) -> Self {
        Self { config }
    }

    /// Load a pool from the process environment (and key file)
    pub fn load(&self) -> Result<KeyPool, ConfigurationError> {
        self.load_with(|name| env::var(name).ok())
    }

    /// Load a pool using a custom variable lookup
    pub fn load_with<F>(&self, lookup: F) -> Result<KeyPool, ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let (source, raw_keys) = self.resolve(lookup)?;
        let pool = KeyPool::new(raw_keys)?;

        tracing::info!(
            source = %source,
            key_count = pool.len(),
            "Loaded API keys"
        );

        Ok(pool)
    }

    /// Pick the first source that is present and return its raw entries
    ///
    /// A set, non-blank single variable is authoritative even if its entries
    /// turn out to be blank; the pool constructor rejects that case. Numbered
    /// variables only count when at least one of them holds a non-blank value.
    pub fn resolve<F>(&self, lookup: F) -> Result<(KeySource, Vec<String>), ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(&self.config.single_var).filter(|v| !v.trim().is_empty()) {
            tracing::debug!(variable = %self.config.single_var, "Using single key variable");
            let keys = value.split(',').map(str::to_string).collect();
            return Ok((KeySource::SingleVariable, keys));
        }

        let numbered = self.numbered_keys(&lookup);
        if !numbered.is_empty() {
            tracing::debug!(
                prefix = %self.config.numbered_prefix,
                count = numbered.len(),
                "Using numbered key variables"
            );
            return Ok((KeySource::NumberedVariables, numbered));
        }

        if let Some(path) = self.config.key_file.as_ref().filter(|p| p.exists()) {
            tracing::debug!(path = %path.display(), "Using key file");
            let contents = fs::read_to_string(path).map_err(|source| {
                ConfigurationError::KeyFileRead {
                    path: path.clone(),
                    source,
                }
            })?;
            let file: KeyFile = serde_json::from_str(&contents).map_err(|source| {
                ConfigurationError::KeyFileParse {
                    path: path.clone(),
                    source,
                }
            })?;
            return Ok((KeySource::KeyFile, file.keys));
        }

        Err(ConfigurationError::NoKeys(self.missing_hint()))
    }

    fn numbered_keys<F>(&self, lookup: &F) -> Vec<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        (1..)
            .map(|idx| lookup(&format!("{}_{}", self.config.numbered_prefix, idx)))
            .take_while(Option::is_some)
            .flatten()
            .filter(|value| !value.trim().is_empty())
            .collect()
    }

    fn missing_hint(&self) -> String {
        let mut hint = format!(
            "set {} or {}_1, {}_2, ...",
            self.config.single_var, self.config.numbered_prefix, self.config.numbered_prefix
        );
        if let Some(path) = &self.config.key_file {
            hint.push_str(&format!(", or populate {}", path.display()));
        }
        hint
    }
}

impl KeyPool {
    /// Load the pool used by the applications from the default sources
    pub fn from_defaults() -> Result<Self, ConfigurationError> {
        KeyLoader::default().load()
    }

    /// Load a pool from the given sources
    pub fn from_sources(config: &KeySourceConfig) -> Result<Self, ConfigurationError> {
        KeyLoader::new(config.clone()).load()
    }
}

// ============================================================================
// Tests
// ============================================================================
