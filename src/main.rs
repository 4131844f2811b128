//! rag-keyring
//!
//! Command line companion to the RAG toolkit: inspect the configured API key
//! pool and run one-off chat or embedding calls through the rotating
//! providers.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rag_keyring::{
    build_rotating_resources,
    config::{LogFormat, Settings},
    logging::init_tracing,
    schemas::ChatMessage,
    services::{KeyLoader, KeyPool},
    utils::mask_key,
    ChatModel, Embeddings,
};
use std::env;

/// rag-keyring
///
/// Gemini chat and embeddings with API key rotation.
#[derive(Parser, Debug)]
#[command(name = "rag-keyring")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level: trace, debug, info, warn, error (overrides LOG_LEVEL env var)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log format (overrides LOG_FORMAT env var)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    /// Chat model (overrides GEMINI_CHAT_MODEL env var)
    #[arg(long, global = true)]
    chat_model: Option<String>,

    /// Embedding model (overrides GEMINI_EMBEDDING_MODEL env var)
    #[arg(long, global = true)]
    embedding_model: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show where keys are loaded from and the (masked) pool
    Keys,

    /// Send one prompt through the rotating chat model
    Chat {
        /// The user prompt
        prompt: String,

        /// Optional system instruction
        #[arg(long)]
        system: Option<String>,

        /// Stop sequence (repeatable)
        #[arg(long = "stop")]
        stop: Vec<String>,
    },

    /// Embed a text and print the vector dimension
    Embed {
        /// Text to embed
        text: String,

        /// Embed as a document instead of a query
        #[arg(long)]
        document: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut settings = Settings::load()?;

    // Override settings with CLI arguments
    if let Some(log_level) = args.log_level {
        settings.log_level = log_level;
    }
    if let Some(log_format) = args.log_format {
        settings.log_format = log_format;
    }
    if let Some(model) = args.chat_model {
        settings.chat_model = model;
    }
    if let Some(model) = args.embedding_model {
        settings.embedding_model = model;
    }

    init_tracing(&settings.log_level, settings.log_format)?;

    tracing::debug!(
        app_name = %settings.app_name,
        version = %settings.app_version,
        "Starting"
    );

    match args.command {
        Command::Keys => show_keys(&settings),
        Command::Chat {
            prompt,
            system,
            stop,
        } => run_chat(&settings, prompt, system, stop).await,
        Command::Embed { text, document } => run_embed(&settings, text, document).await,
    }
}

fn show_keys(settings: &Settings) -> Result<()> {
    let loader = KeyLoader::new(settings.keys.clone());
    let (source, raw_keys) = loader.resolve(|name| env::var(name).ok())?;
    let pool = KeyPool::new(raw_keys)?;

    println!("Source: {}", source);
    println!("Keys:   {}", pool.len());
    for (idx, key) in pool.keys().iter().enumerate() {
        println!("  {:>2}. {}", idx + 1, mask_key(key));
    }
    Ok(())
}

async fn run_chat(
    settings: &Settings,
    prompt: String,
    system: Option<String>,
    stop: Vec<String>,
) -> Result<()> {
    let (chat, _) = build_rotating_resources(settings)?;

    let mut messages = Vec::new();
    if let Some(system) = system {
        messages.push(ChatMessage::system(system));
    }
    messages.push(ChatMessage::user(prompt));

    let stop = (!stop.is_empty()).then_some(stop);
    let response = chat
        .generate(&messages, stop.as_deref())
        .await
        .context("Chat request failed")?;

    println!("{}", response.text);
    if let Some(usage) = response.usage {
        tracing::info!(
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            total_tokens = usage.total_tokens,
            "Token usage"
        );
    }
    Ok(())
}

async fn run_embed(settings: &Settings, text: String, document: bool) -> Result<()> {
    let (_, embeddings) = build_rotating_resources(settings)?;

    let vector = if document {
        embeddings
            .embed_documents(std::slice::from_ref(&text))
            .await
            .context("Embedding request failed")?
            .into_iter()
            .next()
            .unwrap_or_default()
    } else {
        embeddings
            .embed_query(&text)
            .await
            .context("Embedding request failed")?
    };

    println!("Dimension: {}", vector.len());
    let preview: Vec<String> = vector.iter().take(5).map(|v| format!("{:.4}", v)).collect();
    println!("Preview:   [{}]", preview.join(", "));
    Ok(())
}
