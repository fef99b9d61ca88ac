// Provider module
// Narrow capability interfaces over the hosted embedding and generation services

pub mod ollama;
pub mod openai;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

use crate::config::{Config, ProviderKind};

pub use ollama::OllamaClient;
pub use openai::OpenAiClient;

/// Failure reported by an external provider, classified by whether a retry may help
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("request failed: {0}")]
    Permanent(String),
}

impl ProviderError {
    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Text generated by a [`GenerationProvider`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub text: String,
    pub model: String,
}

/// Converts texts to fixed-dimension vectors.
///
/// Implementations must return exactly one vector per input, in input order.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;
}

/// Produces a completion for a prompt
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<Generation, ProviderError>;
}

/// Maps a transport-level error from `ureq` onto the provider error taxonomy
pub(crate) fn classify_ureq_error(error: &ureq::Error) -> ProviderError {
    match error {
        ureq::Error::StatusCode(status) if *status == 429 || *status >= 500 => {
            warn!("Provider returned HTTP {}, treating as transient", status);
            ProviderError::Transient(format!("HTTP {}", status))
        }
        ureq::Error::StatusCode(status) => ProviderError::Permanent(format!("HTTP {}", status)),
        ureq::Error::ConnectionFailed
        | ureq::Error::HostNotFound
        | ureq::Error::Timeout(_)
        | ureq::Error::Io(_) => ProviderError::Transient(error.to_string()),
        _ => ProviderError::Permanent(error.to_string()),
    }
}

/// Runs a blocking provider call off the async runtime
pub(crate) async fn run_blocking<T, F>(call: F) -> Result<T, ProviderError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ProviderError> + Send + 'static,
{
    tokio::task::spawn_blocking(call)
        .await
        .map_err(|e| ProviderError::Permanent(format!("provider task failed: {}", e)))?
}

/// Embedding and generation providers selected by the configuration
pub struct Providers {
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub generator: Arc<dyn GenerationProvider>,
}

impl Providers {
    #[inline]
    pub fn from_config(config: &Config) -> Result<Self> {
        let request_timeout = config.query.request_timeout();
        match config.provider {
            ProviderKind::Ollama => {
                let client = Arc::new(
                    OllamaClient::new(&config.ollama)
                        .context("Failed to initialize Ollama client")?
                        .with_timeout(request_timeout),
                );
                Ok(Self {
                    embedder: Arc::clone(&client) as Arc<dyn EmbeddingProvider>,
                    generator: client,
                })
            }
            ProviderKind::OpenAi => {
                let client = Arc::new(
                    OpenAiClient::new(&config.openai)
                        .context("Failed to initialize OpenAI client")?
                        .with_timeout(request_timeout),
                );
                Ok(Self {
                    embedder: Arc::clone(&client) as Arc<dyn EmbeddingProvider>,
                    generator: client,
                })
            }
        }
    }
}
