use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};

use crate::config::{Config, ProviderKind};
use crate::database::sqlite::HistoryDatabase;
use crate::database::vector_store::{SharedStore, VectorStore, persistence};
use crate::indexer::{ConsistencyValidator, Indexer};
use crate::providers::{OllamaClient, Providers};
use crate::retrieval::{QueryMode, QueryRequest, QueryResponse, RetrievalPipeline};
use crate::{RagError, Result};

/// Options for `history-rag query`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOptions {
    pub mode: Option<String>,
    pub k: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub json: bool,
}

fn load_config() -> Result<Config> {
    let config = Config::load_default().context("Failed to load configuration")?;
    config
        .validate()
        .map_err(|e| RagError::Config(e.to_string()))?;
    Ok(config)
}

/// Check that Ollama is reachable; `embedding_only` skips the generation model
async fn check_ollama(config: &Config, embedding_only: bool) -> Result<()> {
    let client = OllamaClient::new(&config.ollama).context("Failed to initialize Ollama client")?;
    tokio::task::spawn_blocking(move || {
        if embedding_only {
            client.embedding_health_check()
        } else {
            client.health_check()
        }
    })
        .await
        .context("Ollama health check task failed")?
        .context("Ollama is not ready")?;
    Ok(())
}

/// Embed any history records not yet indexed and persist the index
#[inline]
pub async fn build_index(batch_size: Option<usize>, max_urls: Option<usize>) -> Result<()> {
    let mut config = load_config()?;
    if let Some(batch_size) = batch_size {
        config
            .indexing
            .set_batch_size(batch_size)
            .map_err(|e| RagError::Config(e.to_string()))?;
    }
    if max_urls.is_some() {
        config.indexing.max_urls = max_urls;
    }

    if config.provider == ProviderKind::Ollama {
        check_ollama(&config, true).await?;
    }

    let providers = Providers::from_config(&config)?;
    info!(
        "Building index from {} using {} embeddings",
        config.history_database_path().display(),
        config.provider
    );

    let report = Indexer::new(config, providers.embedder).await?.run().await?;
    let stats = report.stats;

    println!("✅ Index build complete");
    println!("   Records indexed: {}", report.total_indexed);
    println!("   Vector dimension: {}", report.dimension);
    println!("   Newly embedded: {}", stats.embedded);
    println!("   Already indexed: {}", stats.already_indexed);
    if report.pruned > 0 {
        println!("   Dropped (history entry deleted): {}", report.pruned);
    }
    if stats.skipped_empty > 0 {
        println!("   ⚠️  Skipped (no title or description): {}", stats.skipped_empty);
    }
    println!(
        "   Batches: {} ({} provider calls)",
        stats.batches, stats.provider_calls
    );
    if report.persisted {
        println!("   Index file: {}", report.index_path.display());
    } else {
        println!("   Index was already up to date");
    }

    Ok(())
}

/// Answer `text` and print the response
#[inline]
pub async fn run_query(text: String, options: &QueryOptions) -> Result<()> {
    let config = load_config()?;
    let mode = options.mode.as_deref().unwrap_or("retrieve");
    let k = options.k.unwrap_or(config.query.default_k);
    let request = QueryRequest::new(text, mode, k)?;

    let providers = Providers::from_config(&config)?;
    let timeout = options
        .timeout_secs
        .map_or_else(|| config.query.timeout(), Duration::from_secs);
    let mut pipeline =
        RetrievalPipeline::new(providers.embedder, providers.generator).with_timeout(timeout);

    if request.mode == QueryMode::Retrieve {
        if let Some(store) = open_store(&config).await? {
            pipeline = pipeline.with_store(SharedStore::new(store));
        } else {
            warn!("No index found, run `history-rag build` first");
        }
    }

    let response = pipeline.run(request).await?;
    print_response(&response, options.json)
}

async fn open_store(config: &Config) -> Result<Option<VectorStore>> {
    let index_path = config.index_path();
    if !index_path.exists() {
        return Ok(None);
    }

    let database_path = config.history_database_path();
    let database = HistoryDatabase::new(&database_path)
        .await
        .with_context(|| {
            format!(
                "Failed to open history database at {}",
                database_path.display()
            )
        })?;
    VectorStore::open(&index_path, &database).await.map(Some)
}

fn print_response(response: &QueryResponse, json: bool) -> Result<()> {
    if json {
        let rendered =
            serde_json::to_string_pretty(response).context("Failed to serialize response")?;
        println!("{}", rendered);
        return Ok(());
    }

    println!("{}", response.response_text);
    if let Some(sources) = &response.sources {
        println!();
        println!("Sources:");
        for (number, source) in sources.iter().enumerate() {
            println!(
                "  {}. {} ({}) [distance {:.4}]",
                number + 1,
                source.record.display_title(),
                source.record.url,
                source.distance
            );
        }
    }
    println!();
    println!(
        "({} in {} ms)",
        response.model.as_deref().unwrap_or("unknown model"),
        response.latency.as_millis()
    );
    Ok(())
}

#[inline]
pub async fn show_status() -> Result<()> {
    let config = match Config::load_default() {
        Ok(config) => config,
        Err(e) => {
            warn!("Using default configuration: {}", e);
            let dir = Config::default_dir().map_err(|e| RagError::Config(e.to_string()))?;
            Config::with_base_dir(dir)
        }
    };

    println!("📊 History RAG Status Report");
    println!("{}", "=".repeat(50));
    println!();

    println!("🗄️  History Database:");
    let database_path = config.history_database_path();
    let database = match HistoryDatabase::new(&database_path).await {
        Ok(database) => {
            match database.count_records().await {
                Ok(count) => println!("   ✅ {} ({} records)", database_path.display(), count),
                Err(e) => println!("   ⚠️  Connected but unreadable - {}", e),
            }
            Some(database)
        }
        Err(e) => {
            println!("   ❌ Failed to open {} - {}", database_path.display(), e);
            None
        }
    };

    println!("🤖 Provider: {}", config.provider);
    if config.provider == ProviderKind::Ollama {
        match check_ollama(&config, false).await {
            Ok(()) => println!(
                "   ✅ Ollama: Connected ({}:{})",
                config.ollama.host, config.ollama.port
            ),
            Err(e) => println!("   ❌ Ollama: {}", e),
        }
    } else {
        match config.openai.resolve_api_key() {
            Ok(_) => println!("   ✅ API key configured ({})", config.openai.base_url),
            Err(e) => println!("   ❌ {}", e),
        }
    }

    println!("🔍 Vector Index:");
    let index_path = config.index_path();
    let index = match persistence::load_optional(&index_path).await {
        Ok(Some(index)) => {
            println!(
                "   ✅ {} records, dimension {} ({})",
                index.len(),
                index.dimension(),
                index_path.display()
            );
            Some(index)
        }
        Ok(None) => {
            println!("   💤 Not built yet");
            None
        }
        Err(e) => {
            println!("   ❌ {} - {}", index_path.display(), e);
            None
        }
    };
    if config.build_lock_path().exists() {
        println!("   🔄 A build is in progress");
    }

    if let Some(database) = database {
        println!("🧮 Consistency:");
        match ConsistencyValidator::new(&database)
            .validate(index.as_ref())
            .await
        {
            Ok(report) => {
                let marker = if report.is_consistent { "✅" } else { "❌" };
                println!("   {} {}", marker, report.summary());
            }
            Err(e) => println!("   ⚠️  Check failed - {}", e),
        }
    }

    Ok(())
}
