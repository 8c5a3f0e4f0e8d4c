//! HTTP backend tests against a local mock server.

use planloom_agent::{ClaudeBackend, LmBackend, OpenAiBackend};
use planloom_core::{ModelConfig, Provider};
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn model(provider: Provider, base_url: &str) -> ModelConfig {
    ModelConfig {
        provider,
        model_id: "test-model".to_string(),
        api_key: "test-key".to_string(),
        base_url: Some(base_url.to_string()),
        max_tokens: 1024,
    }
}

#[tokio::test]
async fn claude_backend_joins_text_blocks() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "test-key"))
        .and(header("anthropic-version", "2023-06-01"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": [
                {"type": "text", "text": "{\"result_type\":"},
                {"type": "text", "text": "\"NOOP\"}"},
            ],
            "stop_reason": "end_turn",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let backend = ClaudeBackend::new(model(Provider::Claude, &server.uri()));
    let completion = backend.complete(Some("system"), "prompt").await.unwrap();
    assert_eq!(completion.text, "{\"result_type\":\n\"NOOP\"}");
    assert!(!completion.refused);
}

#[tokio::test]
async fn claude_backend_flags_refusal_stop_reason() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": [{"type": "text", "text": "I can't help with that."}],
            "stop_reason": "refusal",
        })))
        .mount(&server)
        .await;

    let backend = ClaudeBackend::new(model(Provider::Claude, &server.uri()));
    let completion = backend.complete(None, "prompt").await.unwrap();
    assert!(completion.refused);
}

#[tokio::test]
async fn claude_backend_surfaces_api_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": {"type": "rate_limit_error", "message": "slow down"},
        })))
        .mount(&server)
        .await;

    let backend = ClaudeBackend::new(model(Provider::Claude, &server.uri()));
    let err = backend.complete(None, "prompt").await.unwrap_err();
    let text = err.to_string();
    assert!(text.contains("429"));
    assert!(text.contains("rate_limit_error"));
}

#[tokio::test]
async fn openai_backend_reads_first_choice() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("Authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "message": {"role": "assistant", "content": "{\"total_score\": 95}"},
                "finish_reason": "stop",
            }],
        })))
        .expect(1)
        .mount(&server)
        .await;

    let backend = OpenAiBackend::new(model(Provider::OpenAi, &server.uri()));
    let completion = backend.complete(Some("system"), "prompt").await.unwrap();
    assert_eq!(completion.text, "{\"total_score\": 95}");
    assert!(!completion.refused);
}

#[tokio::test]
async fn openai_backend_flags_content_filter() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "message": {"role": "assistant", "content": ""},
                "finish_reason": "content_filter",
            }],
        })))
        .mount(&server)
        .await;

    let backend = OpenAiBackend::new(model(Provider::OpenAi, &server.uri()));
    let completion = backend.complete(None, "prompt").await.unwrap();
    assert!(completion.refused);
}
