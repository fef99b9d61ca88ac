use super::*;
use tempfile::TempDir;

fn test_config() -> (Config, TempDir) {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = Config::with_base_dir(temp_dir.path());
    (config, temp_dir)
}

#[test]
fn default_config() {
    let (config, _temp_dir) = test_config();
    assert_eq!(config.provider, ProviderKind::Ollama);
    assert_eq!(config.ollama.protocol, "http");
    assert_eq!(config.ollama.host, "localhost");
    assert_eq!(config.ollama.port, 11434);
    assert_eq!(config.openai.embedding_model, "text-embedding-ada-002");
    assert_eq!(config.openai.max_tokens, 150);
    assert_eq!(config.indexing.batch_size, 10);
    assert_eq!(config.query.default_k, 3);
    assert!(config.validate().is_ok());
}

#[test]
fn config_validation() {
    let (config, _temp_dir) = test_config();

    let mut invalid_config = config.clone();
    invalid_config.ollama.protocol = "ftp".to_string();
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidProtocol(_))
    ));

    let mut invalid_config = config.clone();
    invalid_config.ollama.port = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.ollama.generation_model = "  ".to_string();
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidModel(_))
    ));

    let mut invalid_config = config.clone();
    invalid_config.indexing.batch_size = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.indexing.batch_size = 1001;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.indexing.max_urls = Some(0);
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidMaxUrls(0))
    ));

    let mut invalid_config = config.clone();
    invalid_config.indexing.initial_backoff_ms = 60_000;
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidBackoff(60_000, 30_000))
    ));

    let mut invalid_config = config;
    invalid_config.query.default_k = 0;
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidDefaultK(0))
    ));
}

#[test]
fn ollama_url_generation() {
    let url = OllamaConfig::default()
        .ollama_url()
        .expect("should generate ollama_url successfully");
    assert_eq!(url.as_str(), "http://localhost:11434/");
}

#[test]
fn openai_endpoint_gets_trailing_slash() {
    let url = OpenAiConfig::default()
        .endpoint_url()
        .expect("default base url should parse");
    assert_eq!(url.as_str(), "https://api.openai.com/v1/");
    assert_eq!(
        url.join("embeddings").expect("join").as_str(),
        "https://api.openai.com/v1/embeddings"
    );
}

#[test]
fn explicit_api_key_wins_over_environment() {
    let config = OpenAiConfig {
        api_key: Some("sk-explicit".to_string()),
        api_key_env: "HISTORY_RAG_TEST_UNSET_OPENAI_KEY".to_string(),
        ..OpenAiConfig::default()
    };
    assert_eq!(
        config.resolve_api_key().expect("key should resolve"),
        "sk-explicit"
    );

    let blank = OpenAiConfig {
        api_key: Some("   ".to_string()),
        ..config
    };
    assert!(matches!(
        blank.resolve_api_key(),
        Err(ConfigError::MissingApiKey(_))
    ));
}

#[test]
fn toml_serialization() {
    let (mut config, _temp_dir) = test_config();
    config.provider = ProviderKind::OpenAi;
    config.indexing.max_urls = Some(25);
    config.history_database = Some(PathBuf::from("/tmp/history.db"));

    let toml_str = toml::to_string(&config).expect("should serialize toml correctly");
    let mut parsed_config: Config = toml::from_str(&toml_str).expect("should parse toml correctly");
    parsed_config.base_dir = config.base_dir.clone();
    assert_eq!(config, parsed_config);
    assert!(toml_str.contains("provider = \"openai\""));
}

#[test]
fn partial_config_uses_defaults() {
    let partial_toml = r#"
        [ollama]
        host = "custom-host"

        [indexing]
        batch_size = 32
    "#;

    let config: Config = toml::from_str(partial_toml).expect("partial config should parse");
    assert_eq!(config.ollama.host, "custom-host");
    assert_eq!(config.ollama.port, 11434);
    assert_eq!(config.indexing.batch_size, 32);
    assert_eq!(config.indexing.max_attempts, 3);
    assert_eq!(config.provider, ProviderKind::Ollama);
}

#[test]
fn save_and_load_round_trip() {
    let (mut config, temp_dir) = test_config();
    config.ollama.set_port(8080).expect("valid port");
    config
        .ollama
        .set_generation_model("mistral:latest".to_string())
        .expect("valid model");
    config.save().expect("config should save");

    let loaded = Config::load(temp_dir.path()).expect("config should load");
    assert_eq!(loaded, config);
    assert_eq!(loaded.ollama.port, 8080);
}

#[test]
fn load_rejects_invalid_file() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    fs::write(
        temp_dir.path().join("config.toml"),
        "[indexing]\nbatch_size = 0\n",
    )
    .expect("should write config");

    assert!(Config::load(temp_dir.path()).is_err());
}

#[test]
fn missing_file_yields_defaults() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = Config::load(temp_dir.path()).expect("defaults should load");
    assert_eq!(config.base_dir, temp_dir.path());
    assert_eq!(config.index_path(), temp_dir.path().join("history.index"));
    assert_eq!(
        config.history_database_path(),
        temp_dir.path().join("local_browsing_history.db")
    );
}

#[test]
fn setter_validation() {
    let mut config = OllamaConfig::default();

    assert!(config.set_protocol("https".to_string()).is_ok());
    assert_eq!(config.protocol, "https");
    assert!(config.set_protocol("ftp".to_string()).is_err());

    assert!(config.set_port(0).is_err());
    assert!(config.set_embedding_model(String::new()).is_err());
    assert!(config.set_host("ollama.internal".to_string()).is_ok());
    assert_eq!(config.host, "ollama.internal");

    let mut indexing = IndexingConfig::default();
    assert!(indexing.set_batch_size(0).is_err());
    assert!(indexing.set_batch_size(64).is_ok());
    assert_eq!(indexing.batch_size, 64);
}

#[test]
fn build_options_follow_indexing_config() {
    let (mut config, _temp_dir) = test_config();
    config.indexing.batch_size = 7;
    config.indexing.max_urls = Some(100);
    config.indexing.initial_backoff_ms = 250;

    let options = config.build_options();
    assert_eq!(options.batch_size, 7);
    assert_eq!(options.max_urls, Some(100));
    assert_eq!(options.retry.max_attempts, 3);
    assert_eq!(options.retry.initial_backoff, Duration::from_millis(250));
}
