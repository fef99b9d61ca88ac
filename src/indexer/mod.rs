// Indexer module
// Offline maintenance: embeds history records and persists the vector index

pub mod builder;
pub mod consistency;


use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::Context;
use chrono::Utc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::database::sqlite::HistoryDatabase;
use crate::database::vector_store::{VectorIndex, persistence};
use crate::providers::EmbeddingProvider;
use crate::{RagError, Result};

pub use builder::{BuildOutcome, BuildStats, EmbeddingBuilder};
pub use consistency::{ConsistencyReport, ConsistencyValidator};

/// Locks older than this are left over from a crashed build
pub const STALE_LOCK_AGE: Duration = Duration::from_secs(60 * 60);

/// Backoff schedule for transient embedding failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total calls per batch, including the first
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    #[inline]
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1000),
            max_backoff: Duration::from_millis(30_000),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry that follows failed attempt number `attempt` (1-based)
    #[inline]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildOptions {
    pub batch_size: usize,
    pub max_urls: Option<usize>,
    pub retry: RetryPolicy,
}

impl Default for BuildOptions {
    #[inline]
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_urls: None,
            retry: RetryPolicy::default(),
        }
    }
}

/// Result of one [`Indexer::run`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexReport {
    pub stats: BuildStats,
    pub total_indexed: usize,
    pub dimension: usize,
    /// Previously indexed records dropped because their history entry is gone
    pub pruned: usize,
    /// False when nothing changed and the index file was left as is
    pub persisted: bool,
    pub index_path: PathBuf,
}

/// Builds the vector index for the configured history database
pub struct Indexer {
    config: Config,
    database: HistoryDatabase,
    embedder: Arc<dyn EmbeddingProvider>,
    options: BuildOptions,
}

impl Indexer {
    #[inline]
    pub async fn new(config: Config, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let database_path = config.history_database_path();
        let database = HistoryDatabase::new(&database_path)
            .await
            .with_context(|| {
                format!(
                    "Failed to open history database at {}",
                    database_path.display()
                )
            })?;

        Ok(Self::with_database(config, database, embedder))
    }

    #[inline]
    pub fn with_database(
        config: Config,
        database: HistoryDatabase,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        let options = config.build_options();
        Self {
            config,
            database,
            embedder,
            options,
        }
    }

    #[inline]
    pub fn with_options(mut self, options: BuildOptions) -> Self {
        self.options = options;
        self
    }

    #[inline]
    pub fn database(&self) -> &HistoryDatabase {
        &self.database
    }

    /// Embed every record not yet in the persisted index and write the result.
    ///
    /// Indexed records whose history entry was deleted are dropped first. The
    /// index file is replaced only after all batches succeed.
    #[inline]
    pub async fn run(&self) -> Result<IndexReport> {
        let _lock = BuildLock::acquire(&self.config.build_lock_path()).await?;

        let index_path = self.config.index_path();
        let existing = persistence::load_optional(&index_path).await?;
        if let Some(index) = &existing {
            info!(
                "Loaded existing index with {} records from {}",
                index.len(),
                index_path.display()
            );
        }

        let records = self
            .database
            .list_records()
            .await
            .context("Failed to read browsing history")?;
        info!("Read {} history records", records.len());

        let had_index = existing.is_some();
        let history_ids: HashSet<i64> = records.iter().map(|record| record.id).collect();
        let (existing, pruned) = match existing {
            Some(index) => {
                let retained = index.retain(|id| history_ids.contains(&id))?;
                let kept = retained.as_ref().map_or(0, VectorIndex::len);
                let pruned = index.len().saturating_sub(kept);
                if pruned > 0 {
                    warn!(
                        "Dropping {} indexed records whose history entries no longer exist",
                        pruned
                    );
                }
                (retained, pruned)
            }
            None => (None, 0),
        };

        let builder = EmbeddingBuilder::new(Arc::clone(&self.embedder), self.options);
        let outcome = match builder.build_missing(&records, existing.as_ref()).await {
            Ok(outcome) => outcome,
            Err(RagError::EmptyCorpus) if pruned > 0 => {
                // Nothing left to index; the old file would only point at deleted history
                warn!("No indexable history remains, removing {}", index_path.display());
                fs::remove_file(&index_path).await?;
                return Err(RagError::EmptyCorpus);
            }
            Err(e) => return Err(e),
        };

        let persisted = !had_index || outcome.stats.embedded > 0 || pruned > 0;
        if persisted {
            persistence::persist(&outcome.index, &index_path).await?;
        } else {
            info!("Index is up to date, leaving {} untouched", index_path.display());
        }

        Ok(IndexReport {
            total_indexed: outcome.index.len(),
            dimension: outcome.index.dimension(),
            stats: outcome.stats,
            pruned,
            persisted,
            index_path,
        })
    }

    /// Compare the persisted index against the history database
    #[inline]
    pub async fn validate_consistency(&self) -> Result<ConsistencyReport> {
        let index = persistence::load_optional(&self.config.index_path()).await?;
        ConsistencyValidator::new(&self.database)
            .validate(index.as_ref())
            .await
    }
}

/// Lock file held for the duration of a build; removed on drop.
///
/// The file holds `<unix timestamp> <token>`; the token identifies the owner.
#[derive(Debug)]
pub struct BuildLock {
    path: PathBuf,
    contents: String,
}

impl BuildLock {
    /// Take the lock at `path`, reclaiming it if it is stale
    #[inline]
    pub async fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        match Self::create(path).await {
            Ok(lock) => Ok(lock),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                if !Self::is_stale(path).await {
                    return Err(RagError::IndexerBusy(path.display().to_string()));
                }
                warn!("Reclaiming stale build lock at {}", path.display());
                match fs::remove_file(path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
                Self::create(path).await.map_err(|e| match e.kind() {
                    ErrorKind::AlreadyExists => RagError::IndexerBusy(path.display().to_string()),
                    _ => e.into(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn create(path: &Path) -> std::io::Result<Self> {
        let contents = format!("{} {}", Utc::now().timestamp(), Uuid::new_v4());
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await?;
        file.write_all(contents.as_bytes()).await?;
        file.sync_all().await?;

        debug!("Acquired build lock at {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            contents,
        })
    }

    /// Whether the lock at `path` is older than [`STALE_LOCK_AGE`].
    ///
    /// The recorded timestamp decides when it parses. A lock that is empty or
    /// unreadable may still be mid-write, so its file modification time decides.
    async fn is_stale(path: &Path) -> bool {
        let recorded = fs::read_to_string(path).await.ok().and_then(|contents| {
            contents
                .split_whitespace()
                .next()
                .and_then(|stamp| stamp.parse::<i64>().ok())
        });

        if let Some(created) = recorded {
            let age = Utc::now().timestamp().saturating_sub(created);
            return age.unsigned_abs() >= STALE_LOCK_AGE.as_secs();
        }

        match fs::metadata(path).await.and_then(|meta| meta.modified()) {
            Ok(modified) => SystemTime::now()
                .duration_since(modified)
                .is_ok_and(|age| age >= STALE_LOCK_AGE),
            // Gone already; the retry below settles who gets it
            Err(e) => e.kind() == ErrorKind::NotFound,
        }
    }
}

impl Drop for BuildLock {
    #[inline]
    fn drop(&mut self) {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) if contents == self.contents => {
                if let Err(e) = std::fs::remove_file(&self.path) {
                    warn!("Failed to remove build lock {}: {}", self.path.display(), e);
                }
            }
            Ok(_) => warn!(
                "Build lock {} was taken over by another build, leaving it in place",
                self.path.display()
            ),
            Err(e) => warn!("Failed to read build lock {}: {}", self.path.display(), e),
        }
    }
}
