// Embedding builder
// Turns history records into an index, one provider call per batch


use std::collections::HashSet;
use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::BuildOptions;
use crate::database::sqlite::HistoryRecord;
use crate::database::vector_store::{EmbeddingRecord, VectorIndex};
use crate::providers::{EmbeddingProvider, ProviderError};
use crate::{RagError, Result};

/// Counters for one [`EmbeddingBuilder::build_missing`] run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildStats {
    /// Records selected for embedding after deduplication and truncation
    pub candidates: usize,
    pub already_indexed: usize,
    /// Candidates with neither title nor description
    pub skipped_empty: usize,
    pub embedded: usize,
    pub batches: usize,
    /// Embedding calls made, retries included
    pub provider_calls: usize,
}

#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub index: VectorIndex,
    pub stats: BuildStats,
}

pub struct EmbeddingBuilder {
    provider: Arc<dyn EmbeddingProvider>,
    options: BuildOptions,
}

impl EmbeddingBuilder {
    #[inline]
    pub fn new(provider: Arc<dyn EmbeddingProvider>, options: BuildOptions) -> Self {
        Self { provider, options }
    }

    /// Embed the records that `existing` does not cover and build the combined index.
    ///
    /// Existing entries keep their order and come first, followed by the new
    /// records in input order. When there is nothing new to embed the existing
    /// index is returned without calling the provider.
    #[inline]
    pub async fn build_missing(
        &self,
        records: &[HistoryRecord],
        existing: Option<&VectorIndex>,
    ) -> Result<BuildOutcome> {
        let mut stats = BuildStats::default();

        let mut seen = HashSet::with_capacity(records.len());
        let mut candidates: Vec<&HistoryRecord> = Vec::new();
        for record in records {
            if existing.is_some_and(|index| index.contains(record.id)) {
                stats.already_indexed += 1;
            } else if seen.insert(record.id) {
                candidates.push(record);
            } else {
                debug!("Ignoring repeated history record {}", record.id);
            }
        }

        if let Some(max_urls) = self.options.max_urls.filter(|&max| candidates.len() > max) {
            info!(
                "Limiting embedding candidates from {} to {}",
                candidates.len(),
                max_urls
            );
            candidates.truncate(max_urls);
        }
        stats.candidates = candidates.len();

        let mut pending: Vec<(i64, String)> = Vec::with_capacity(candidates.len());
        for record in candidates {
            match record.embedding_text() {
                Some(text) => pending.push((record.id, text)),
                None => {
                    warn!(
                        "Skipping history record {} ({}): no title or description to embed",
                        record.id, record.url
                    );
                    stats.skipped_empty += 1;
                }
            }
        }

        if pending.is_empty() {
            return match existing {
                Some(index) => {
                    info!(
                        "No new records to embed, index unchanged at {} records",
                        index.len()
                    );
                    Ok(BuildOutcome {
                        index: index.clone(),
                        stats,
                    })
                }
                None => Err(RagError::EmptyCorpus),
            };
        }

        let batch_size = self.options.batch_size.max(1);
        let bar = progress_bar(pending.len());
        let mut new_records = Vec::with_capacity(pending.len());

        for (batch_number, batch) in pending.chunks(batch_size).enumerate() {
            let texts: Vec<String> = batch.iter().map(|(_, text)| text.clone()).collect();
            debug!(
                "Embedding batch {} with {} records",
                batch_number + 1,
                texts.len()
            );

            let vectors = match self.embed_with_retry(&texts, &mut stats).await {
                Ok(vectors) => vectors,
                Err(e) => {
                    bar.abandon_with_message("failed");
                    return Err(e);
                }
            };

            new_records.extend(
                batch
                    .iter()
                    .zip(vectors)
                    .map(|(&(id, _), vector)| EmbeddingRecord { id, vector }),
            );
            stats.batches += 1;
            bar.inc(batch.len() as u64);
        }
        bar.finish_and_clear();
        stats.embedded = new_records.len();

        let mut combined: Vec<EmbeddingRecord> = existing
            .map(|index| index.records().collect())
            .unwrap_or_default();
        combined.extend(new_records);
        let index = VectorIndex::build(combined)?;

        info!(
            "Embedded {} records in {} batches ({} provider calls), index now holds {}",
            stats.embedded,
            stats.batches,
            stats.provider_calls,
            index.len()
        );
        Ok(BuildOutcome { index, stats })
    }

    /// One batch, retrying transient failures per the configured policy
    async fn embed_with_retry(
        &self,
        texts: &[String],
        stats: &mut BuildStats,
    ) -> Result<Vec<Vec<f32>>> {
        let policy = self.options.retry;
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            stats.provider_calls += 1;
            match self.provider.embed(texts).await {
                Ok(vectors) if vectors.len() == texts.len() => return Ok(vectors),
                Ok(vectors) => {
                    return Err(RagError::EmbeddingProvider(ProviderError::Permanent(
                        format!(
                            "provider returned {} vectors for {} inputs",
                            vectors.len(),
                            texts.len()
                        ),
                    )));
                }
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = policy.backoff(attempt);
                    warn!(
                        "Embedding attempt {}/{} failed: {}; retrying in {:?}",
                        attempt, max_attempts, e, delay
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(
                        "Embedding batch failed after {} attempt(s): {}",
                        attempt, e
                    );
                    return Err(RagError::EmbeddingProvider(e));
                }
            }
        }
    }
}

fn progress_bar(len: usize) -> ProgressBar {
    if !console::user_attended_stderr() {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(len as u64);
    if let Ok(style) = ProgressStyle::with_template("{bar:40} [{pos}/{len}] Embedding history {msg}")
    {
        bar.set_style(style);
    }
    bar
}
