//! Mock HTTP server tests for `NdjsonProvider` against an Ollama-style
//! `/api/chat` endpoint.

use shimeji_core::{ChatEvent, ChatMessage, DeltaSink, ErrorKind, Provider, ProviderError};
use shimeji_providers::NdjsonProvider;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn provider(server: &MockServer, model: &str) -> NdjsonProvider {
    NdjsonProvider::new(reqwest::Client::new(), Some(&server.uri()), model).unwrap()
}

fn conversation() -> Vec<ChatMessage> {
    vec![ChatMessage::user("Hello")]
}

fn line(content: &str, done: bool) -> String {
    format!(
        "{}\n",
        serde_json::json!({
            "model": "gemma3:1b",
            "message": {"role": "assistant", "content": content},
            "done": done
        })
    )
}

#[tokio::test]
async fn stream_emits_hel_then_lo() {
    let server = MockServer::start().await;

    let body = format!("{}{}{}", line("Hel", false), line("lo", false), line("", true));
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(serde_json::json!({"model": "gemma3:1b", "stream": true})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"))
        .expect(1)
        .mount(&server)
        .await;

    let (sink, mut rx) = DeltaSink::channel(16);
    let result = provider(&server, "gemma3:1b")
        .stream(&conversation(), &sink)
        .await
        .unwrap();
    drop(sink);

    let mut seen = Vec::new();
    while let Some(ChatEvent::Delta(d)) = rx.recv().await {
        seen.push((d.fragment, d.accumulated));
    }
    assert_eq!(
        seen,
        vec![("Hel".to_string(), "Hel".to_string()), ("lo".to_string(), "Hello".to_string())]
    );
    assert_eq!(result.text, "Hello");
}

#[tokio::test]
async fn done_line_content_applied_then_stream_stops() {
    let server = MockServer::start().await;

    let body = format!(
        "{}not json at all\n{{\"response\":\"flat\"}}\n{}{}",
        line("a", false),
        line("!", true),
        line("ignored", false)
    );
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"))
        .mount(&server)
        .await;

    let result = provider(&server, "gemma3:1b")
        .stream(&conversation(), &DeltaSink::disabled())
        .await
        .unwrap();
    assert_eq!(result.text, "aflat!");
}

#[tokio::test]
async fn complete_sends_stream_false() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(serde_json::json!({"stream": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "model": "gemma3:1b",
            "message": {"role": "assistant", "content": "Hi from local"},
            "done": true
        })))
        .expect(1)
        .mount(&server)
        .await;

    let result = provider(&server, "gemma3:1b").complete(&conversation()).await.unwrap();
    assert_eq!(result.text, "Hi from local");
}

#[tokio::test]
async fn status_403_is_forbidden_with_endpoint() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let err = provider(&server, "gemma3:1b")
        .stream(&conversation(), &DeltaSink::disabled())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ProviderError::Forbidden {
            endpoint: server.uri()
        }
    );
    assert_eq!(err.kind(), ErrorKind::AuthError);
}

#[tokio::test]
async fn missing_model_is_model_not_found() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(serde_json::json!({"error": "model \"llama9\" not found, try pulling it first"})),
        )
        .mount(&server)
        .await;

    let err = provider(&server, "llama9")
        .stream(&conversation(), &DeltaSink::disabled())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ProviderError::ModelNotFound {
            model: "llama9".into()
        }
    );
}

#[tokio::test]
async fn unreachable_runner_is_connection_error() {
    let provider = NdjsonProvider::new(reqwest::Client::new(), Some("127.0.0.1:1"), "gemma3:1b").unwrap();
    let err = provider
        .stream(&conversation(), &DeltaSink::disabled())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ProviderError::Connection {
            endpoint: "http://127.0.0.1:1".into()
        }
    );
    assert_eq!(err.kind(), ErrorKind::NetworkUnavailable);
}

#[tokio::test]
async fn stream_with_only_done_is_empty_response() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(line("", true), "application/x-ndjson"))
        .mount(&server)
        .await;

    let err = provider(&server, "gemma3:1b")
        .stream(&conversation(), &DeltaSink::disabled())
        .await
        .unwrap_err();
    assert_eq!(err, ProviderError::EmptyResponse);
}

// ── Model listing ──────────────────────────────────────────────────────

#[tokio::test]
async fn list_models_returns_installed_names() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "models": [
                {"name": "gemma3:1b", "size": 815319791},
                {"name": "llama3.2:latest"},
                {"model": "nameless"}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let models = provider(&server, "gemma3:1b").list_models().await.unwrap();
    assert_eq!(models, vec!["gemma3:1b", "llama3.2:latest"]);
}

#[tokio::test]
async fn list_models_without_models_field_is_empty() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .mount(&server)
        .await;

    let models = provider(&server, "gemma3:1b").list_models().await.unwrap();
    assert!(models.is_empty());
}

#[tokio::test]
async fn list_models_403_is_forbidden() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let err = provider(&server, "gemma3:1b").list_models().await.unwrap_err();
    assert_eq!(
        err,
        ProviderError::Forbidden {
            endpoint: server.uri()
        }
    );
}

#[tokio::test]
async fn list_models_other_status_keeps_code() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(404).set_body_string("404 page not found"))
        .mount(&server)
        .await;

    let err = provider(&server, "gemma3:1b").list_models().await.unwrap_err();
    assert_eq!(
        err,
        ProviderError::ApiError {
            status_code: 404,
            message: "404 page not found".into()
        }
    );
}

#[tokio::test]
async fn list_models_unreachable_is_connection_error() {
    let provider = NdjsonProvider::new(reqwest::Client::new(), Some("127.0.0.1:1"), "").unwrap();
    let err = provider.list_models().await.unwrap_err();
    assert_eq!(
        err,
        ProviderError::Connection {
            endpoint: "http://127.0.0.1:1".into()
        }
    );
}
