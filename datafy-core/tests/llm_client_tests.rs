use datafy_core::llm_client::{GenerationError, LlmClient, LlmConfig, LlmProvider, TextGenerator};
use mockito::Matcher;
use serde_json::json;
use std::time::Duration;

fn config(provider: LlmProvider, endpoint: String) -> LlmConfig {
    LlmConfig {
        provider,
        endpoint,
        model: "test-model".into(),
        retry_max_elapsed: Duration::from_secs(1),
        ..Default::default()
    }
}

#[tokio::test]
async fn ollama_generate_returns_response() {
    let mut server = mockito::Server::new_async().await;
    let m = server
        .mock("POST", "/api/generate")
        .match_header("content-type", Matcher::Regex("application/json".into()))
        .match_body(Matcher::PartialJson(json!({
            "model": "test-model",
            "prompt": "ping",
            "stream": false
        })))
        .with_status(200)
        .with_body(r#"{"model": "test-model", "response": "pong", "done": true}"#)
        .create_async()
        .await;

    let client = LlmClient::new(config(LlmProvider::Ollama, server.url())).unwrap();
    let reply = client.generate("ping", 0.4).await.unwrap();

    assert_eq!(reply, "pong");
    m.assert_async().await;
}

#[tokio::test]
async fn openai_chat_sends_bearer_token() {
    let mut server = mockito::Server::new_async().await;
    let m = server
        .mock("POST", "/v1/chat/completions")
        .match_header("authorization", "Bearer test-key")
        .with_status(200)
        .with_body(r#"{ "choices": [ { "message": { "content": "hello" } } ] }"#)
        .create_async()
        .await;

    let mut cfg = config(LlmProvider::OpenAi, server.url());
    cfg.api_key = Some("test-key".into());
    let client = LlmClient::new(cfg).unwrap();

    assert_eq!(client.generate("hi", 0.2).await.unwrap(), "hello");
    m.assert_async().await;
}

#[tokio::test]
async fn server_error_is_a_status_error() {
    let mut server = mockito::Server::new_async().await;
    let m = server
        .mock("POST", "/api/generate")
        .with_status(500)
        .with_body("model crashed")
        .expect(1)
        .create_async()
        .await;

    let client = LlmClient::new(config(LlmProvider::Ollama, server.url())).unwrap();
    let err = client.generate("ping", 0.4).await.unwrap_err();

    match err {
        GenerationError::Status { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "model crashed");
        }
        other => panic!("unexpected error: {:?}", other),
    }
    m.assert_async().await;
}

#[tokio::test]
async fn unavailable_service_is_retried() {
    let mut server = mockito::Server::new_async().await;
    let m = server
        .mock("POST", "/api/generate")
        .with_status(503)
        .expect_at_least(2)
        .create_async()
        .await;

    let client = LlmClient::new(config(LlmProvider::Ollama, server.url())).unwrap();
    let err = client.generate("ping", 0.4).await.unwrap_err();

    assert!(matches!(err, GenerationError::Status { status: 503, .. }));
    m.assert_async().await;
}

#[tokio::test]
async fn malformed_body_is_invalid_response() {
    let mut server = mockito::Server::new_async().await;
    let _m = server
        .mock("POST", "/v1/chat/completions")
        .with_status(200)
        .with_body(r#"{"choices": []}"#)
        .create_async()
        .await;

    let client = LlmClient::new(config(LlmProvider::OpenAi, server.url())).unwrap();
    let err = client.generate("ping", 0.4).await.unwrap_err();
    assert!(matches!(err, GenerationError::InvalidResponse(_)));
}

#[tokio::test]
async fn silent_service_times_out() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let mut cfg = config(LlmProvider::Ollama, format!("http://{}", addr));
    cfg.timeout = Duration::from_millis(200);
    let client = LlmClient::new(cfg).unwrap();

    let err = client.generate("ping", 0.4).await.unwrap_err();
    assert!(matches!(err, GenerationError::Timeout(t) if t == Duration::from_millis(200)));
}
