// Retrieval module
// Answers a query from the indexed history, or directly from the language model


use std::fmt::{self, Write as _};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize, Serializer};
use tracing::{debug, info};

use crate::database::sqlite::HistoryRecord;
use crate::database::vector_store::{SharedStore, VectorStore};
use crate::providers::{EmbeddingProvider, Generation, GenerationProvider, ProviderError};
use crate::{RagError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    /// Search the history and generate from the retrieved entries
    Retrieve,
    /// Send the query to the generation model as is
    Direct,
}

impl FromStr for QueryMode {
    type Err = RagError;

    #[inline]
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "retrieve" | "rag" => Ok(Self::Retrieve),
            "direct" | "generate" => Ok(Self::Direct),
            other => Err(RagError::InvalidRequest(format!(
                "unknown query mode '{other}' (expected 'retrieve' or 'direct')"
            ))),
        }
    }
}

impl fmt::Display for QueryMode {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retrieve => write!(f, "retrieve"),
            Self::Direct => write!(f, "direct"),
        }
    }
}

/// A validated query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    pub text: String,
    pub mode: QueryMode,
    /// Number of history entries to retrieve; ignored in direct mode
    pub k: usize,
}

impl QueryRequest {
    /// Validate raw caller input; `mode` accepts `retrieve`/`rag` and `direct`/`generate`
    #[inline]
    pub fn new(text: impl Into<String>, mode: &str, k: usize) -> Result<Self> {
        let mode = mode.parse()?;
        Self::with_mode(text, mode, k)
    }

    #[inline]
    pub fn with_mode(text: impl Into<String>, mode: QueryMode, k: usize) -> Result<Self> {
        let text = text.into().trim().to_string();
        if text.is_empty() {
            return Err(RagError::InvalidRequest(
                "query text must not be empty".to_string(),
            ));
        }
        Ok(Self { text, mode, k })
    }
}

/// A retrieved history entry backing a response
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Source {
    #[serde(flatten)]
    pub record: HistoryRecord,
    pub distance: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResponse {
    pub response_text: String,
    #[serde(rename = "latency_ms", serialize_with = "serialize_millis")]
    pub latency: Duration,
    pub model: Option<String>,
    /// Present in retrieve mode, nearest first
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<Source>>,
}

fn serialize_millis<S: Serializer>(
    duration: &Duration,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}

/// Stages of one query; `Completed` and `Failed` are terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    Received,
    Embedding,
    Searching,
    ContextAssembly,
    Generating,
    Completed,
    Failed,
}

impl fmt::Display for QueryState {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Received => "received",
            Self::Embedding => "embedding",
            Self::Searching => "searching",
            Self::ContextAssembly => "context-assembly",
            Self::Generating => "generating",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

impl QueryState {
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

fn advance(state: &mut QueryState, next: QueryState) {
    debug!("Query state {} -> {}", state, next);
    *state = next;
}

pub struct RetrievalPipeline {
    embedder: Arc<dyn EmbeddingProvider>,
    generator: Arc<dyn GenerationProvider>,
    store: Option<SharedStore>,
    timeout: Option<Duration>,
}

impl RetrievalPipeline {
    #[inline]
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn GenerationProvider>,
    ) -> Self {
        Self {
            embedder,
            generator,
            store: None,
            timeout: None,
        }
    }

    #[inline]
    pub fn with_store(mut self, store: SharedStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Limit on the whole query, embedding through generation
    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[inline]
    pub fn store(&self) -> Option<&SharedStore> {
        self.store.as_ref()
    }

    #[inline]
    pub async fn run(&self, request: QueryRequest) -> Result<QueryResponse> {
        let mut state = QueryState::Received;
        self.run_tracked(request, &mut state).await
    }

    /// [`Self::run`], leaving the final lifecycle state in `state`
    pub(crate) async fn run_tracked(
        &self,
        request: QueryRequest,
        state: &mut QueryState,
    ) -> Result<QueryResponse> {
        let started = Instant::now();
        debug!("Query state {} (mode {}, k {})", state, request.mode, request.k);

        let outcome = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.execute(&request, state))
                .await
                .unwrap_or(Err(RagError::Timeout(limit))),
            None => self.execute(&request, state).await,
        };

        match outcome {
            Ok((generation, sources)) => {
                advance(state, QueryState::Completed);
                let latency = started.elapsed();
                info!(
                    "Answered {} query in {:?} using {}{}",
                    request.mode,
                    latency,
                    generation.model,
                    sources
                        .as_ref()
                        .map(|s| format!(" with {} sources", s.len()))
                        .unwrap_or_default()
                );
                Ok(QueryResponse {
                    response_text: generation.text,
                    latency,
                    model: Some(generation.model),
                    sources,
                })
            }
            Err(e) => {
                advance(state, QueryState::Failed);
                debug!("Query failed: {}", e);
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        request: &QueryRequest,
        state: &mut QueryState,
    ) -> Result<(Generation, Option<Vec<Source>>)> {
        match request.mode {
            QueryMode::Direct => {
                advance(state, QueryState::Generating);
                let generation = self
                    .generator
                    .generate(&request.text)
                    .await
                    .map_err(RagError::GenerationProvider)?;
                Ok((generation, None))
            }
            QueryMode::Retrieve => {
                let Some(shared) = &self.store else {
                    return Err(RagError::EmptyCorpus);
                };
                let store = shared.snapshot().await;
                if request.k < 1 || request.k > store.len() {
                    return Err(RagError::InvalidK {
                        k: request.k,
                        size: store.len(),
                    });
                }

                advance(state, QueryState::Embedding);
                let query_vector = self.embed_query(&request.text).await?;

                advance(state, QueryState::Searching);
                let hits = store.search(&query_vector, request.k)?;

                advance(state, QueryState::ContextAssembly);
                let sources = assemble_sources(&store, &hits)?;

                advance(state, QueryState::Generating);
                let prompt = build_prompt(&request.text, &sources);
                let generation = self
                    .generator
                    .generate(&prompt)
                    .await
                    .map_err(RagError::GenerationProvider)?;
                Ok((generation, Some(sources)))
            }
        }
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let vectors = self
            .embedder
            .embed(&[text.to_string()])
            .await
            .map_err(RagError::EmbeddingProvider)?;

        let [vector]: [Vec<f32>; 1] = vectors.try_into().map_err(|vectors: Vec<Vec<f32>>| {
            RagError::EmbeddingProvider(ProviderError::Permanent(format!(
                "provider returned {} vectors for one query",
                vectors.len()
            )))
        })?;
        Ok(vector)
    }
}

fn assemble_sources(
    store: &VectorStore,
    hits: &[crate::database::vector_store::SearchHit],
) -> Result<Vec<Source>> {
    hits.iter()
        .map(|hit| {
            store
                .lookup(hit.id)
                .cloned()
                .map(|record| Source {
                    record,
                    distance: hit.distance,
                })
                .ok_or_else(|| {
                    RagError::CorruptIndex(format!(
                        "indexed record {} has no history metadata",
                        hit.id
                    ))
                })
        })
        .collect()
}

/// Prompt asking the model to answer `query` from `sources`, nearest first
#[inline]
pub fn build_prompt(query: &str, sources: &[Source]) -> String {
    let mut context = String::new();
    for (number, source) in sources.iter().enumerate() {
        let record = &source.record;
        let _ = writeln!(context, "[{}] Title: {}", number + 1, record.display_title());
        if let Some(description) = record
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
        {
            let _ = writeln!(context, "Description: {description}");
        }
        let _ = writeln!(context, "URL: {}\n", record.url);
    }

    format!(
        "Based on the following pages from the user's browsing history, answer the query '{query}'.\n\n{context}Please structure the answer."
    )
}
