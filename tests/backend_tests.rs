//! Integration tests for `src/backend.rs`.
//!
//! Exercises the HTTP-backed `OpenAiBackend` against a `wiremock` server:
//! success-path decoding, non-success statuses, malformed response bodies,
//! empty choice lists, and request timeouts.

use std::sync::Mutex;
use std::time::Duration;

use clientpulse::{GenerationBackend, OpenAiBackend, PipelineError};
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Serialise tests that read/write environment variables so they don't
/// race against each other within this integration test binary.
static ENV_MUTEX: Mutex<()> = Mutex::new(());

// ============================================================================
// Helpers
// ============================================================================

fn make_backend(base_url: &str) -> OpenAiBackend {
    let _guard = ENV_MUTEX.lock().expect("env mutex");
    std::env::set_var("OPENAI_API_KEY", "test-key");
    let backend = OpenAiBackend::new("gpt-3.5-turbo")
        .expect("must succeed with key set")
        .with_base_url(base_url);
    std::env::remove_var("OPENAI_API_KEY");
    backend
}

fn success_body(content: &str) -> serde_json::Value {
    json!({ "choices": [{ "message": { "content": content } }] })
}

// ============================================================================
// Success path
// ============================================================================

#[tokio::test]
async fn test_generate_returns_message_content() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(success_body(r#"["gap one"]"#)))
        .mount(&server)
        .await;

    let backend = make_backend(&server.uri());
    let text = backend.generate("analyze this", 200).await.expect("success");
    assert_eq!(text, r#"["gap one"]"#);
}

#[tokio::test]
async fn test_generate_sends_bearer_authorization() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("Authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(success_body("ok")))
        .expect(1)
        .mount(&server)
        .await;

    let backend = make_backend(&server.uri());
    backend.generate("prompt", 100).await.expect("success");
}

// ============================================================================
// Failure paths
// ============================================================================

#[tokio::test]
async fn test_generate_http_429_is_generation_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_json(
            json!({"error": {"type": "rate_limit_exceeded", "message": "Rate limit reached"}}),
        ))
        .mount(&server)
        .await;

    let backend = make_backend(&server.uri());
    let err = backend.generate("prompt", 100).await.expect_err("must fail");
    match err {
        PipelineError::Generation(message) => assert!(message.contains("429")),
        other => panic!("unexpected error variant: {other}"),
    }
}

#[tokio::test]
async fn test_generate_malformed_envelope_is_generation_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string("definitely not json"))
        .mount(&server)
        .await;

    let backend = make_backend(&server.uri());
    let err = backend.generate("prompt", 100).await.expect_err("must fail");
    assert!(matches!(err, PipelineError::Generation(_)));
}

#[tokio::test]
async fn test_generate_empty_choices_is_generation_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
        .mount(&server)
        .await;

    let backend = make_backend(&server.uri());
    let err = backend.generate("prompt", 100).await.expect_err("must fail");
    match err {
        PipelineError::Generation(message) => assert!(message.contains("no choices")),
        other => panic!("unexpected error variant: {other}"),
    }
}

#[tokio::test]
async fn test_generate_timeout_is_generation_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(success_body("late"))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let backend = make_backend(&server.uri()).with_timeout(Duration::from_millis(250));
    let err = backend.generate("prompt", 100).await.expect_err("must fail");
    assert!(matches!(err, PipelineError::Generation(_)));
}
