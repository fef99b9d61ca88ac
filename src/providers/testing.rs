// Deterministic in-process providers for unit tests

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::{EmbeddingProvider, Generation, GenerationProvider, ProviderError};

/// Embeds text as keyword counts over a fixed vocabulary, plus one bias
/// dimension so that no vector is all zeros
pub(crate) struct KeywordEmbedder {
    vocabulary: Vec<&'static str>,
    calls: AtomicUsize,
    batch_sizes: Mutex<Vec<usize>>,
}

impl KeywordEmbedder {
    pub(crate) fn new(vocabulary: &[&'static str]) -> Self {
        Self {
            vocabulary: vocabulary.to_vec(),
            calls: AtomicUsize::new(0),
            batch_sizes: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn dimension(&self) -> usize {
        self.vocabulary.len() + 1
    }

    pub(crate) fn vector_for(&self, text: &str) -> Vec<f32> {
        let lowered = text.to_lowercase();
        let mut vector: Vec<f32> = self
            .vocabulary
            .iter()
            .map(|word| lowered.split_whitespace().filter(|w| w == word).count() as f32)
            .collect();
        vector.push(0.1);
        vector
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().expect("lock not poisoned").clone()
    }
}

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    async fn embed(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.batch_sizes
            .lock()
            .expect("lock not poisoned")
            .push(batch.len());
        Ok(batch.iter().map(|text| self.vector_for(text)).collect())
    }
}

/// Fails according to a script before delegating to an inner embedder
pub(crate) struct ScriptedEmbedder {
    inner: KeywordEmbedder,
    failures: Mutex<VecDeque<ProviderError>>,
    calls: AtomicUsize,
    /// Calls that succeed before the scripted failures start
    successes_first: usize,
}

impl ScriptedEmbedder {
    pub(crate) fn new(vocabulary: &[&'static str], failures: Vec<ProviderError>) -> Self {
        Self::failing_after(vocabulary, 0, failures)
    }

    pub(crate) fn failing_after(
        vocabulary: &[&'static str],
        successes_first: usize,
        failures: Vec<ProviderError>,
    ) -> Self {
        Self {
            inner: KeywordEmbedder::new(vocabulary),
            failures: Mutex::new(failures.into()),
            calls: AtomicUsize::new(0),
            successes_first,
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for ScriptedEmbedder {
    async fn embed(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let previous_calls = self.calls.fetch_add(1, Ordering::SeqCst);
        if previous_calls < self.successes_first {
            return self.inner.embed(batch).await;
        }
        let next_failure = self.failures.lock().expect("lock not poisoned").pop_front();
        match next_failure {
            Some(error) => Err(error),
            None => self.inner.embed(batch).await,
        }
    }
}

/// Returns the same vector for every input
pub(crate) struct FixedEmbedder(pub(crate) Vec<f32>);

#[async_trait]
impl EmbeddingProvider for FixedEmbedder {
    async fn embed(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        Ok(vec![self.0.clone(); batch.len()])
    }
}

/// Echoes prompts back and records them
pub(crate) struct EchoGenerator {
    prompts: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl EchoGenerator {
    pub(crate) fn new() -> Self {
        Self {
            prompts: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    pub(crate) fn with_delay(delay: Duration) -> Self {
        Self {
            prompts: Mutex::new(Vec::new()),
            delay: Some(delay),
        }
    }

    pub(crate) fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("lock not poisoned").clone()
    }
}

#[async_trait]
impl GenerationProvider for EchoGenerator {
    async fn generate(&self, prompt: &str) -> Result<Generation, ProviderError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.prompts
            .lock()
            .expect("lock not poisoned")
            .push(prompt.to_string());
        Ok(Generation {
            text: format!("echo: {}", prompt),
            model: "echo-model".to_string(),
        })
    }
}

/// Always fails
pub(crate) struct FailingGenerator(pub(crate) ProviderError);

#[async_trait]
impl GenerationProvider for FailingGenerator {
    async fn generate(&self, _prompt: &str) -> Result<Generation, ProviderError> {
        Err(self.0.clone())
    }
}

/// Drops the last vector of every response
pub(crate) struct TruncatingEmbedder(pub(crate) KeywordEmbedder);

#[async_trait]
impl EmbeddingProvider for TruncatingEmbedder {
    async fn embed(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let mut vectors = self.0.embed(batch).await?;
        vectors.pop();
        Ok(vectors)
    }
}
