use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Input, Password, Select};

use super::{Config, ConfigError, IndexingConfig, OllamaConfig, OpenAiConfig, ProviderKind};


const PROVIDER_CHOICES: &[&str] = &["Ollama (local)", "OpenAI-compatible API"];

#[inline]
pub fn run_interactive_config() -> Result<()> {
    eprintln!("{}", style("🔧 History RAG Configuration Setup").bold().cyan());
    eprintln!();

    let mut config = load_existing_config()?;

    let provider_index = Select::new()
        .with_prompt("Embedding and generation provider")
        .default(provider_position(config.provider))
        .items(PROVIDER_CHOICES)
        .interact()?;

    eprintln!();
    config.provider = provider_at(provider_index);
    if config.provider == ProviderKind::Ollama {
        eprintln!("{}", style("Ollama Configuration").bold().yellow());
        configure_ollama(&mut config.ollama)?;

        eprintln!();
        eprintln!("{}", style("Testing configuration...").yellow());
        if test_ollama_connection(&config.ollama) {
            eprintln!("{}", style("✓ Ollama connection successful!").green());
        } else {
            eprintln!(
                "{}",
                style("⚠ Warning: Could not connect to Ollama").yellow()
            );
            eprintln!("You can continue, but make sure Ollama is running before indexing.");
        }
    } else {
        eprintln!("{}", style("OpenAI Configuration").bold().yellow());
        configure_openai(&mut config.openai)?;
    }

    eprintln!();
    eprintln!("{}", style("Indexing").bold().yellow());
    configure_indexing(&mut config.indexing)?;

    eprintln!();
    if Confirm::new()
        .with_prompt("Save configuration?")
        .default(true)
        .interact()?
    {
        config.save().context("Failed to save configuration")?;
        eprintln!("{}", style("✓ Configuration saved successfully!").green());
        eprintln!(
            "Configuration saved to: {}",
            style(config.config_file_path().display()).cyan()
        );
    } else {
        eprintln!("Configuration not saved.");
    }

    Ok(())
}

#[inline]
pub fn show_config() -> Result<()> {
    let config = Config::load_default().context("Failed to load configuration")?;

    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();
    eprintln!("  Provider: {}", style(config.provider).cyan());
    eprintln!();

    match config.provider {
        ProviderKind::Ollama => {
            eprintln!("{}", style("Ollama Settings:").bold().yellow());
            match config.ollama.ollama_url() {
                Ok(url) => eprintln!("  Ollama URL: {}", style(url).cyan()),
                Err(e) => eprintln!("  Ollama URL: {} ({})", style("Invalid").red(), e),
            }
            eprintln!(
                "  Embedding Model: {}",
                style(&config.ollama.embedding_model).cyan()
            );
            eprintln!(
                "  Generation Model: {}",
                style(&config.ollama.generation_model).cyan()
            );
        }
        ProviderKind::OpenAi => {
            eprintln!("{}", style("OpenAI Settings:").bold().yellow());
            eprintln!("  Base URL: {}", style(&config.openai.base_url).cyan());
            let key_state = if config.openai.resolve_api_key().is_ok() {
                style("configured").green()
            } else {
                style("missing").red()
            };
            eprintln!("  API Key: {}", key_state);
            eprintln!(
                "  Embedding Model: {}",
                style(&config.openai.embedding_model).cyan()
            );
            eprintln!(
                "  Generation Model: {}",
                style(&config.openai.generation_model).cyan()
            );
            eprintln!("  Max Tokens: {}", style(config.openai.max_tokens).cyan());
        }
    }

    eprintln!();
    eprintln!("{}", style("Indexing:").bold().yellow());
    eprintln!("  Batch Size: {}", style(config.indexing.batch_size).cyan());
    match config.indexing.max_urls {
        Some(max) => eprintln!("  Max URLs: {}", style(max).cyan()),
        None => eprintln!("  Max URLs: {}", style("unlimited").dim()),
    }
    eprintln!(
        "  Retry Attempts: {}",
        style(config.indexing.max_attempts).cyan()
    );

    eprintln!();
    eprintln!("{}", style("Query:").bold().yellow());
    eprintln!("  Default k: {}", style(config.query.default_k).cyan());
    eprintln!("  Timeout: {}s", style(config.query.timeout_secs).cyan());

    eprintln!();
    eprintln!(
        "History database: {}",
        style(config.history_database_path().display()).dim()
    );
    eprintln!("Index file: {}", style(config.index_path().display()).dim());
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );

    Ok(())
}

/// Position of `provider` in [`PROVIDER_CHOICES`]
fn provider_position(provider: ProviderKind) -> usize {
    match provider {
        ProviderKind::Ollama => 0,
        ProviderKind::OpenAi => 1,
    }
}

fn provider_at(index: usize) -> ProviderKind {
    if index == 0 {
        ProviderKind::Ollama
    } else {
        ProviderKind::OpenAi
    }
}

/// A blank entry leaves the key to the environment variable
fn entered_api_key(input: String) -> Option<String> {
    if input.trim().is_empty() {
        None
    } else {
        Some(input)
    }
}

fn load_existing_config() -> Result<Config> {
    let dir = Config::default_dir().context("Failed to determine config directory")?;
    Config::load(&dir).map_or_else(
        |_| {
            eprintln!(
                "{}",
                style("No usable configuration found. Using defaults.").yellow()
            );
            Ok(Config::with_base_dir(&dir))
        },
        |config| {
            eprintln!("{}", style("Found existing configuration.").green());
            Ok(config)
        },
    )
}

fn configure_ollama(ollama: &mut OllamaConfig) -> Result<()> {
    let protocols = &["http", "https"];
    let default_index = protocols
        .iter()
        .position(|&p| p == ollama.protocol)
        .unwrap_or(0);

    let protocol_index = Select::new()
        .with_prompt("Ollama protocol")
        .default(default_index)
        .items(protocols)
        .interact()?;

    let protocol = protocols[protocol_index].to_string();

    let host: String = Input::new()
        .with_prompt("Ollama host")
        .default(ollama.host.clone())
        .validate_with(|input: &String| -> Result<(), ConfigError> {
            let temp_config = OllamaConfig {
                protocol: protocol.clone(),
                host: input.clone(),
                ..OllamaConfig::default()
            };
            temp_config.validate()
        })
        .interact_text()?;

    let port: u16 = Input::new()
        .with_prompt("Ollama port")
        .default(ollama.port)
        .validate_with(|input: &u16| -> Result<(), &str> {
            if *input == 0 {
                Err("Port must be greater than 0")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let embedding_model = prompt_model("Embedding model", &ollama.embedding_model)?;
    let generation_model = prompt_model("Generation model", &ollama.generation_model)?;

    ollama.set_protocol(protocol)?;
    ollama.set_host(host)?;
    ollama.set_port(port)?;
    ollama.set_embedding_model(embedding_model)?;
    ollama.set_generation_model(generation_model)?;

    Ok(())
}

fn configure_openai(openai: &mut OpenAiConfig) -> Result<()> {
    let base_url: String = Input::new()
        .with_prompt("API base URL")
        .default(openai.base_url.clone())
        .validate_with(|input: &String| -> Result<(), ConfigError> {
            OpenAiConfig {
                base_url: input.clone(),
                ..OpenAiConfig::default()
            }
            .endpoint_url()
            .map(|_| ())
        })
        .interact_text()?;

    let api_key = Password::new()
        .with_prompt(format!(
            "API key (leave empty to read from ${})",
            openai.api_key_env
        ))
        .allow_empty_password(true)
        .interact()?;

    openai.base_url = base_url;
    openai.api_key = entered_api_key(api_key);
    openai.embedding_model = prompt_model("Embedding model", &openai.embedding_model)?;
    openai.generation_model = prompt_model("Generation model", &openai.generation_model)?;

    Ok(())
}

fn configure_indexing(indexing: &mut IndexingConfig) -> Result<()> {
    let batch_size: usize = Input::new()
        .with_prompt("Batch size for embedding requests")
        .default(indexing.batch_size)
        .validate_with(|input: &usize| -> Result<(), &str> {
            if *input == 0 {
                Err("Batch size must be greater than 0")
            } else if *input > 1000 {
                Err("Batch size must be 1000 or less")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    indexing.set_batch_size(batch_size)?;
    Ok(())
}

fn prompt_model(prompt: &str, current: &str) -> Result<String> {
    let model = Input::new()
        .with_prompt(prompt)
        .default(current.to_string())
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("Model name cannot be empty")
            } else {
                Ok(())
            }
        })
        .interact_text()?;
    Ok(model)
}

fn test_ollama_connection(ollama: &OllamaConfig) -> bool {
    let url = format!(
        "{}://{}:{}/api/version",
        ollama.protocol, ollama.host, ollama.port
    );

    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_global(Some(std::time::Duration::from_secs(5)))
        .build()
        .into();

    match agent.get(&url).call() {
        Ok(_) => true,
        Err(ureq::Error::StatusCode(code)) if (400..500).contains(&code) => true,
        Err(_) => false,
    }
}
