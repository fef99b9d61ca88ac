use clap::{Parser, Subcommand};
use history_rag::Result;
use history_rag::commands::{QueryOptions, build_index, run_query, show_status};
use history_rag::config::{run_interactive_config, show_config};

#[derive(Parser)]
#[command(name = "history-rag")]
#[command(about = "Semantic search and question answering over your browsing history")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure providers and indexing settings
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Embed new history records and rebuild the vector index
    Build {
        /// Records per embedding request
        #[arg(long)]
        batch_size: Option<usize>,
        /// Maximum number of new records to embed in this run
        #[arg(long)]
        max_urls: Option<usize>,
    },
    /// Ask a question about your browsing history
    Query {
        /// The question to answer
        text: String,
        /// "retrieve" to answer from history, "direct" to ask the model alone
        #[arg(long, default_value = "retrieve")]
        mode: String,
        /// Number of history entries to retrieve
        #[arg(short, long)]
        k: Option<usize>,
        /// Give up after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
        /// Print the response as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show history database, provider and index status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config()?;
            } else {
                run_interactive_config()?;
            }
        }
        Commands::Build {
            batch_size,
            max_urls,
        } => {
            build_index(batch_size, max_urls).await?;
        }
        Commands::Query {
            text,
            mode,
            k,
            timeout_secs,
            json,
        } => {
            let options = QueryOptions {
                mode: Some(mode),
                k,
                timeout_secs,
                json,
            };
            run_query(text, &options).await?;
        }
        Commands::Status => {
            show_status().await?;
        }
    }

    Ok(())
}
