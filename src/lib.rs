use std::time::Duration;

use thiserror::Error;

use crate::providers::ProviderError;

pub type Result<T> = std::result::Result<T, RagError>;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid k: {k} (must be between 1 and {size})")]
    InvalidK { k: usize, size: usize },

    #[error("Cannot build an index from an empty corpus")]
    EmptyCorpus,

    #[error("Vector dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("Duplicate record id in index: {0}")]
    DuplicateId(i64),

    #[error("Invalid vector for record {id}: {reason}")]
    InvalidVector { id: i64, reason: String },

    #[error("Corrupt index: {0}")]
    CorruptIndex(String),

    #[error("Embedding provider error: {0}")]
    EmbeddingProvider(#[source] ProviderError),

    #[error("Generation provider error: {0}")]
    GenerationProvider(#[source] ProviderError),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Another index build is already running (lock file: {0})")]
    IndexerBusy(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl RagError {
    /// Whether retrying the same operation later could succeed
    #[inline]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::EmbeddingProvider(e) | Self::GenerationProvider(e) => e.is_transient(),
            Self::Timeout(_) => true,
            _ => false,
        }
    }
}

pub mod commands;
pub mod config;
pub mod database;
pub mod indexer;
pub mod providers;
pub mod retrieval;
