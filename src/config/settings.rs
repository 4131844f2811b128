//! Application settings and configuration
//!
//! This module provides configuration management for the toolkit,
//! loading settings from environment variables with sensible defaults.

use crate::schemas::gemini::models;
use crate::services::key_pool::{
    KeySourceConfig, DEFAULT_KEY_FILE, DEFAULT_NUMBERED_PREFIX, DEFAULT_SINGLE_VAR,
};
use crate::services::gemini::DEFAULT_TIMEOUT_SECS;
use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::PathBuf;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// `time | LEVEL | target | message` lines
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Pretty => write!(f, "pretty"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => anyhow::bail!("Invalid log format: {}. Expected: pretty or json", s),
        }
    }
}

/// Main application settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    // App settings
    pub app_name: String,
    pub app_version: String,
    pub log_level: String,
    pub log_format: LogFormat,

    // Models
    pub chat_model: String,
    pub embedding_model: String,

    // Gemini client options
    pub gemini_base_url: Option<String>,
    pub request_timeout_seconds: u64,
    pub temperature: Option<f64>,

    // Key sources
    pub keys: KeySourceConfig,
}

impl Settings {
    /// Load settings from environment variables with defaults
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let key_file = env_or_default("GEMINI_KEY_FILE", DEFAULT_KEY_FILE);

        let settings = Self {
            app_name: env_or_default("APP_NAME", "rag-apps"),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            log_level: env_or_default("LOG_LEVEL", "info"),
            log_format: env_or_default("LOG_FORMAT", "pretty")
                .parse()
                .unwrap_or_default(),

            chat_model: env_or_default("GEMINI_CHAT_MODEL", models::GEMINI_1_5_PRO),
            embedding_model: env_or_default("GEMINI_EMBEDDING_MODEL", models::EMBEDDING_001),

            gemini_base_url: env::var("GEMINI_BASE_URL").ok(),
            request_timeout_seconds: env_or_default(
                "GEMINI_TIMEOUT_SECONDS",
                &DEFAULT_TIMEOUT_SECS.to_string(),
            )
            .parse()
            .context("Invalid GEMINI_TIMEOUT_SECONDS value")?,
            temperature: env::var("GEMINI_TEMPERATURE")
                .ok()
                .map(|v| v.parse())
                .transpose()
                .context("Invalid GEMINI_TEMPERATURE value")?,

            keys: KeySourceConfig {
                single_var: env_or_default("GEMINI_KEYS_VAR", DEFAULT_SINGLE_VAR),
                numbered_prefix: env_or_default("GEMINI_KEY_PREFIX", DEFAULT_NUMBERED_PREFIX),
                key_file: (!key_file.trim().is_empty()).then(|| PathBuf::from(key_file)),
            },
        };

        settings.validate()?;

        Ok(settings)
    }

    /// Validate settings
    fn validate(&self) -> Result<()> {
        if self.request_timeout_seconds == 0 {
            anyhow::bail!("Request timeout must be > 0");
        }

        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                anyhow::bail!("Temperature must be between 0.0 and 2.0, got {}", t);
            }
        }

        if self.chat_model.trim().is_empty() || self.embedding_model.trim().is_empty() {
            anyhow::bail!("Model names cannot be empty");
        }

        if self.keys.single_var.trim().is_empty() || self.keys.numbered_prefix.trim().is_empty() {
            anyhow::bail!("Key variable names cannot be empty");
        }

        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_name: "rag-apps".to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            chat_model: models::GEMINI_1_5_PRO.to_string(),
            embedding_model: models::EMBEDDING_001.to_string(),
            gemini_base_url: None,
            request_timeout_seconds: DEFAULT_TIMEOUT_SECS,
            temperature: None,
            keys: KeySourceConfig::default(),
        }
    }
}

/// Helper function to get environment variable with default
fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
