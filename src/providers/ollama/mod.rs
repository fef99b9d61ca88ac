#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use super::{
    EmbeddingProvider, Generation, GenerationProvider, ProviderError, classify_ureq_error,
    run_blocking,
};
use crate::config::OllamaConfig;

const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: Url,
    embedding_model: String,
    generation_model: String,
    agent: ureq::Agent,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    model: Option<String>,
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub size: Option<u64>,
    pub digest: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    models: Vec<ModelInfo>,
}

impl OllamaClient {
    #[inline]
    pub fn new(config: &OllamaConfig) -> Result<Self> {
        let base_url = config
            .ollama_url()
            .context("Failed to generate Ollama URL from config")?;
        Ok(Self::with_base_url(base_url, config))
    }

    /// Build a client against an explicit server URL, taking model names from `config`
    #[inline]
    pub fn with_base_url(base_url: Url, config: &OllamaConfig) -> Self {
        Self {
            base_url,
            embedding_model: config.embedding_model.clone(),
            generation_model: config.generation_model.clone(),
            agent: build_agent(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS)),
        }
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = build_agent(timeout);
        self
    }

    /// Test connection to Ollama server and verify both models are available
    #[inline]
    pub fn health_check(&self) -> Result<()> {
        self.ensure_models(&[self.embedding_model.as_str(), self.generation_model.as_str()])
    }

    /// Like [`health_check`](Self::health_check), but only the embedding model is required
    #[inline]
    pub fn embedding_health_check(&self) -> Result<()> {
        self.ensure_models(&[self.embedding_model.as_str()])
    }

    fn ensure_models(&self, wanted: &[&str]) -> Result<()> {
        debug!("Performing health check for Ollama at {}", self.base_url);

        let models = self.list_models().context("Server ping failed")?;
        for &model in wanted {
            if !models.iter().any(|m| m.name == model) {
                let available: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
                warn!(
                    "Model {} not found. Available models: {:?}",
                    model, available
                );
                return Err(anyhow::anyhow!(
                    "Model '{}' is not available. Available models: {:?}",
                    model,
                    available
                ));
            }
        }

        info!(
            "Health check passed for Ollama server at {} with models {:?}",
            self.base_url, wanted
        );
        Ok(())
    }

    /// List all available models
    #[inline]
    pub fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = self
            .base_url
            .join("/api/tags")
            .context("Failed to build models URL")?;

        debug!("Fetching available models from {}", url);

        let response_text = self
            .agent
            .get(url.as_str())
            .call()
            .and_then(|mut resp| resp.body_mut().read_to_string())
            .context("Failed to fetch models")?;

        let models_response: ModelsResponse =
            serde_json::from_str(&response_text).context("Failed to parse models response")?;

        debug!("Found {} models", models_response.models.len());
        Ok(models_response.models)
    }

    fn embed_blocking(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Generating embeddings for {} texts", texts.len());

        let request = EmbedRequest {
            model: &self.embedding_model,
            input: texts,
        };
        let response_text = self.post_json("/api/embed", &request)?;

        let response: EmbedResponse = serde_json::from_str(&response_text).map_err(|e| {
            ProviderError::Permanent(format!("Failed to parse embedding response: {}", e))
        })?;

        if response.embeddings.len() != texts.len() {
            return Err(ProviderError::Permanent(format!(
                "Mismatch between request and response counts: {} vs {}",
                texts.len(),
                response.embeddings.len()
            )));
        }

        Ok(response.embeddings)
    }

    fn generate_blocking(&self, prompt: &str) -> Result<Generation, ProviderError> {
        debug!("Generating completion for prompt (length: {})", prompt.len());

        let request = ChatRequest {
            model: &self.generation_model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            stream: false,
        };
        let response_text = self.post_json("/api/chat", &request)?;

        let response: ChatResponse = serde_json::from_str(&response_text).map_err(|e| {
            ProviderError::Permanent(format!("Failed to parse chat response: {}", e))
        })?;

        Ok(Generation {
            text: response.message.content,
            model: response
                .model
                .unwrap_or_else(|| self.generation_model.clone()),
        })
    }

    fn post_json<T: Serialize>(&self, path: &str, body: &T) -> Result<String, ProviderError> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| ProviderError::Permanent(format!("Failed to build URL: {}", e)))?;
        let body = serde_json::to_string(body)
            .map_err(|e| ProviderError::Permanent(format!("Failed to serialize request: {}", e)))?;

        self.agent
            .post(url.as_str())
            .header("Content-Type", "application/json")
            .send(&body)
            .and_then(|mut resp| resp.body_mut().read_to_string())
            .map_err(|e| classify_ureq_error(&e))
    }
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into()
}

#[async_trait]
impl EmbeddingProvider for OllamaClient {
    async fn embed(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let client = self.clone();
        let batch = batch.to_vec();
        run_blocking(move || client.embed_blocking(&batch)).await
    }
}

#[async_trait]
impl GenerationProvider for OllamaClient {
    async fn generate(&self, prompt: &str) -> Result<Generation, ProviderError> {
        let client = self.clone();
        let prompt = prompt.to_string();
        run_blocking(move || client.generate_blocking(&prompt)).await
    }
}
