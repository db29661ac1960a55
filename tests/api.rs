//! Integration tests for the HTTP layer.
//!
//! Each test serves the router on a random port and talks to it over HTTP.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use lingua_memory::embedding::HashingEmbedder;
use lingua_memory::providers::{CompletionOptions, CompletionProvider};
use lingua_memory::storage::SqliteIndex;
use lingua_memory::{api, Components, Config, Error, Result, Turn, TutorEngine};

const DIMENSIONS: usize = 64;

#[derive(Default)]
struct EchoTutor {
    down: AtomicBool,
}

#[async_trait]
impl CompletionProvider for EchoTutor {
    async fn complete(&self, turns: &[Turn], options: &CompletionOptions) -> Result<String> {
        if self.down.load(Ordering::SeqCst) {
            return Err(Error::completion("upstream unavailable"));
        }
        if options.json_response {
            return Ok(r#"{"grammar_score": 8, "estimated_level": "B2"}"#.to_string());
        }
        let last = turns.iter().rev().find(|t| t.role == lingua_memory::Role::User);
        Ok(format!("Eco: {}", last.map(|t| t.content.as_str()).unwrap_or("")))
    }

    fn model_name(&self) -> &str {
        "echo"
    }
}

/// Spin up a test server on a random port and return the base URL.
async fn start_test_server(tutor: Arc<EchoTutor>) -> (String, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::with_data_dir(dir.path());
    config.embedding_dimensions = DIMENSIONS;
    let audio_dir = config.audio_dir();

    let engine = TutorEngine::with_components(
        config,
        Components {
            embedder: Arc::new(HashingEmbedder::new(DIMENSIONS)),
            index: Arc::new(SqliteIndex::in_memory().unwrap()),
            completion: tutor,
            speech: None,
        },
    );
    let router = api::router(Arc::new(engine), audio_dir);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    (format!("http://{}", addr), dir)
}

/// Helper to GET a URL and return (status, body).
async fn get(base: &str, path: &str) -> (u16, Value) {
    let resp = reqwest::Client::new()
        .get(format!("{}{}", base, path))
        .send()
        .await
        .unwrap();
    let status = resp.status().as_u16();
    let body = resp.json().await.unwrap_or(Value::Null);
    (status, body)
}

/// Helper to POST JSON and return (status, body).
async fn post_json(base: &str, path: &str, json: Value) -> (u16, Value) {
    let resp = reqwest::Client::new()
        .post(format!("{}{}", base, path))
        .json(&json)
        .send()
        .await
        .unwrap();
    let status = resp.status().as_u16();
    let body = resp.json().await.unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn test_health_endpoint() {
    let (base, _dir) = start_test_server(Arc::default()).await;
    let (status, body) = get(&base, "/api/health").await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_converse_uses_defaults() {
    let (base, _dir) = start_test_server(Arc::default()).await;
    let (status, body) = post_json(&base, "/api/converse", serde_json::json!({"text": "Bonjour"})).await;

    assert_eq!(status, 200);
    assert_eq!(body["session_id"], "default");
    assert_eq!(body["reply"], "Eco: Bonjour");
    assert!(body["reply_id"].is_string());
    assert!(body["audio_url"].is_null());
}

#[tokio::test]
async fn test_converse_rejects_empty_text() {
    let (base, _dir) = start_test_server(Arc::default()).await;
    let (status, body) = post_json(
        &base,
        "/api/converse",
        serde_json::json!({"text": "  ", "session_id": "s1"}),
    )
    .await;

    assert_eq!(status, 400);
    assert!(body["error"].as_str().unwrap().contains("empty"));
}

#[tokio::test]
async fn test_converse_reports_provider_failure() {
    let tutor = Arc::new(EchoTutor::default());
    tutor.down.store(true, Ordering::SeqCst);
    let (base, _dir) = start_test_server(tutor).await;

    let (status, body) = post_json(&base, "/api/converse", serde_json::json!({"text": "Hallo"})).await;
    assert_eq!(status, 502);
    assert_eq!(body["error"], "upstream unavailable");
}

#[tokio::test]
async fn test_search_returns_ranked_matches() {
    let (base, _dir) = start_test_server(Arc::default()).await;
    post_json(
        &base,
        "/api/converse",
        serde_json::json!({"text": "Ciao amici", "session_id": "s1", "lang": "it", "tts": false}),
    )
    .await;

    let (status, body) = post_json(
        &base,
        "/api/search",
        serde_json::json!({"session_id": "s1", "query": "Ciao amici", "top_k": 1}),
    )
    .await;
    assert_eq!(status, 200);
    let matches = body["matches"].as_array().unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0]["content"], "Ciao amici");
    assert_eq!(matches[0]["role"], "user");
}

#[tokio::test]
async fn test_feedback_validation_and_ack() {
    let (base, _dir) = start_test_server(Arc::default()).await;

    let (status, _) = post_json(
        &base,
        "/api/feedback",
        serde_json::json!({"session_id": "s1", "learning_feedback": "confused"}),
    )
    .await;
    assert_eq!(status, 400);

    let (status, body) = post_json(
        &base,
        "/api/feedback",
        serde_json::json!({
            "session_id": "s1",
            "learning_feedback": "confused",
            "ai_response": "Eco: Hola",
            "user_message": "Hola"
        }),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["recorded"], true);
    assert_eq!(body["session_id"], "s1");
}

#[tokio::test]
async fn test_progress_and_reset() {
    let (base, _dir) = start_test_server(Arc::default()).await;

    let (status, body) = get(&base, "/api/progress/nobody").await;
    assert_eq!(status, 200);
    assert_eq!(body["assessments"], 0);
    assert_eq!(body["trend"], "insufficient_data");

    let (status, body) = post_json(&base, "/api/reset", serde_json::json!({"session_id": "s1"})).await;
    assert_eq!(status, 200);
    assert_eq!(body["reset"], true);
}

#[tokio::test]
async fn test_missing_audio_is_not_found() {
    let (base, _dir) = start_test_server(Arc::default()).await;
    let (status, _) = get(&base, "/api/audio/missing.mp3").await;
    assert_eq!(status, 404);
}
