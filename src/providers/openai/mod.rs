
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::{
    EmbeddingProvider, Generation, GenerationProvider, ProviderError, classify_ureq_error,
    run_blocking,
};
use crate::config::OpenAiConfig;

const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

/// Client for OpenAI-compatible `/embeddings` and `/chat/completions` endpoints
#[derive(Clone)]
pub struct OpenAiClient {
    base_url: Url,
    api_key: String,
    embedding_model: String,
    generation_model: String,
    max_tokens: u32,
    agent: ureq::Agent,
}

impl std::fmt::Debug for OpenAiClient {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("base_url", &self.base_url)
            .field("embedding_model", &self.embedding_model)
            .field("generation_model", &self.generation_model)
            .field("max_tokens", &self.max_tokens)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    model: Option<String>,
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

impl OpenAiClient {
    #[inline]
    pub fn new(config: &OpenAiConfig) -> Result<Self> {
        let api_key = config
            .resolve_api_key()
            .context("OpenAI API key not configured")?;
        let base_url = config
            .endpoint_url()
            .context("Failed to parse OpenAI base URL")?;

        Ok(Self {
            base_url,
            api_key,
            embedding_model: config.embedding_model.clone(),
            generation_model: config.generation_model.clone(),
            max_tokens: config.max_tokens,
            agent: build_agent(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS)),
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = build_agent(timeout);
        self
    }

    fn embed_blocking(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Requesting {} embeddings from {}", texts.len(), self.base_url);

        let request = EmbeddingsRequest {
            model: &self.embedding_model,
            input: texts,
        };
        let response_text = self.post_json("embeddings", &request)?;

        let mut response: EmbeddingsResponse =
            serde_json::from_str(&response_text).map_err(|e| {
                ProviderError::Permanent(format!("Failed to parse embeddings response: {}", e))
            })?;

        if response.data.len() != texts.len() {
            return Err(ProviderError::Permanent(format!(
                "Mismatch between request and response counts: {} vs {}",
                texts.len(),
                response.data.len()
            )));
        }

        // The API tags each embedding with its input position
        response.data.sort_by_key(|d| d.index);
        Ok(response.data.into_iter().map(|d| d.embedding).collect())
    }

    fn generate_blocking(&self, prompt: &str) -> Result<Generation, ProviderError> {
        let request = ChatCompletionRequest {
            model: &self.generation_model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: self.max_tokens,
        };
        let response_text = self.post_json("chat/completions", &request)?;

        let response: ChatCompletionResponse =
            serde_json::from_str(&response_text).map_err(|e| {
                ProviderError::Permanent(format!("Failed to parse chat response: {}", e))
            })?;

        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ProviderError::Permanent("Chat response had no content".to_string()))?;

        Ok(Generation {
            text,
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
            .header("Authorization", &format!("Bearer {}", self.api_key))
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
impl EmbeddingProvider for OpenAiClient {
    async fn embed(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let client = self.clone();
        let batch = batch.to_vec();
        run_blocking(move || client.embed_blocking(&batch)).await
    }
}

#[async_trait]
impl GenerationProvider for OpenAiClient {
    async fn generate(&self, prompt: &str) -> Result<Generation, ProviderError> {
        let client = self.clone();
        let prompt = prompt.to_string();
        run_blocking(move || client.generate_blocking(&prompt)).await
    }
}
