use super::*;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_config() -> OllamaConfig {
    OllamaConfig {
        embedding_model: "test-embed".to_string(),
        generation_model: "test-chat".to_string(),
        ..OllamaConfig::default()
    }
}

fn client_for(server: &MockServer) -> OllamaClient {
    let url = Url::parse(&server.uri()).expect("mock server uri should parse");
    OllamaClient::with_base_url(url, &test_config()).with_timeout(Duration::from_secs(5))
}

#[test]
fn client_configuration() {
    let config = OllamaConfig {
        protocol: "http".to_string(),
        host: "test-host".to_string(),
        port: 1234,
        ..test_config()
    };
    let client = OllamaClient::new(&config).expect("Failed to create client");

    assert_eq!(client.embedding_model, "test-embed");
    assert_eq!(client.generation_model, "test-chat");
    assert_eq!(client.base_url.host_str(), Some("test-host"));
    assert_eq!(client.base_url.port(), Some(1234));
}

#[tokio::test]
async fn embeds_batch_in_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_partial_json(json!({ "model": "test-embed", "input": ["a", "b"] })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "test-embed",
            "embeddings": [[1.0, 0.0], [0.0, 1.0]]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let vectors = client
        .embed(&["a".to_string(), "b".to_string()])
        .await
        .expect("embedding should succeed");

    assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
}

#[tokio::test]
async fn rate_limit_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let error = client_for(&server)
        .embed(&["a".to_string()])
        .await
        .expect_err("429 should fail");

    assert!(error.is_transient(), "unexpected error: {error:?}");
}

#[tokio::test]
async fn server_error_is_transient_and_client_error_is_permanent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let embed_error = client
        .embed(&["a".to_string()])
        .await
        .expect_err("503 should fail");
    assert!(embed_error.is_transient());

    let chat_error = client
        .generate("hello")
        .await
        .expect_err("404 should fail");
    assert!(!chat_error.is_transient());
}

#[tokio::test]
async fn count_mismatch_is_permanent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "embeddings": [[1.0, 0.0]] })),
        )
        .mount(&server)
        .await;

    let error = client_for(&server)
        .embed(&["a".to_string(), "b".to_string()])
        .await
        .expect_err("mismatched count should fail");

    assert!(matches!(error, ProviderError::Permanent(_)));
}

#[tokio::test]
async fn generates_chat_completion() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({
            "model": "test-chat",
            "stream": false,
            "messages": [{ "role": "user", "content": "hello" }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "test-chat",
            "message": { "role": "assistant", "content": "hi there" },
            "done": true
        })))
        .mount(&server)
        .await;

    let generation = client_for(&server)
        .generate("hello")
        .await
        .expect("generation should succeed");

    assert_eq!(generation.text, "hi there");
    assert_eq!(generation.model, "test-chat");
}

#[tokio::test]
async fn health_check_requires_both_models() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [{ "name": "test-embed" }]
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let result = tokio::task::spawn_blocking(move || client.health_check())
        .await
        .expect("health check task should join");

    let error = result.expect_err("missing chat model should fail");
    assert!(error.to_string().contains("test-chat"));
}

#[tokio::test]
async fn embedding_health_check_ignores_chat_model() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [{ "name": "test-embed" }]
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let result = tokio::task::spawn_blocking(move || client.embedding_health_check())
        .await
        .expect("health check task should join");

    assert!(result.is_ok(), "embedding model alone is enough: {result:?}");
}

#[tokio::test]
async fn embedding_health_check_requires_embedding_model() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [{ "name": "test-chat" }]
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let result = tokio::task::spawn_blocking(move || client.embedding_health_check())
        .await
        .expect("health check task should join");

    let error = result.expect_err("missing embedding model should fail");
    assert!(error.to_string().contains("test-embed"));
}
