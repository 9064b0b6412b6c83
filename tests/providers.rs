//! HTTP providers against a local mock server.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use repo_reader::answer::AnswerGenerator;
use repo_reader::config::IngestConfig;
use repo_reader::embedding::{Embedder, HuggingFaceEmbedder, OllamaEmbedder, RetryingEmbedder};
use repo_reader::error::ProviderError;
use repo_reader::generation::{GeminiGenerator, Generator, HuggingFaceGenerator};
use repo_reader::materialize::{GitHost, RepoHost};
use repo_reader::models::ScoredChunk;
use repo_reader::retry::RetryPolicy;

const EMBED_PATH: &str = "/mini/pipeline/feature-extraction";

fn retrying_hf(server: &MockServer) -> RetryingEmbedder {
    let inner = HuggingFaceEmbedder::new("mini", server.uri(), Some("hf-key".to_string()), 5).unwrap();
    RetryingEmbedder::new(
        Box::new(inner),
        HuggingFaceEmbedder::PROVIDER,
        RetryPolicy::fixed(3, Duration::from_millis(5)),
    )
}

#[tokio::test]
async fn test_hf_embedding_recovers_after_two_cold_starts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(EMBED_PATH))
        .respond_with(ResponseTemplate::new(503).set_body_string("Model mini is currently loading"))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(EMBED_PATH))
        .and(header("authorization", "Bearer hf-key"))
        .and(body_partial_json(json!({ "inputs": "fn main() {}" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([[0.5, 0.25, 0.125]])))
        .mount(&server)
        .await;

    let embedder = retrying_hf(&server);
    let vector = embedder.embed("fn main() {}").await.unwrap();
    assert_eq!(vector, vec![0.5, 0.25, 0.125]);
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_hf_embedding_stops_after_three_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(EMBED_PATH))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = retrying_hf(&server).embed("x").await.unwrap_err();
    assert!(matches!(err, ProviderError::Unavailable { attempts: 3, .. }), "{:?}", err);
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_hf_embedding_client_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(EMBED_PATH))
        .respond_with(ResponseTemplate::new(400).set_body_string("input too long"))
        .mount(&server)
        .await;

    let err = retrying_hf(&server).embed("x").await.unwrap_err();
    assert!(!err.is_transient());
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_ollama_embedding() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_partial_json(json!({ "model": "nomic", "input": "hello" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "embeddings": [[1.0, 2.0]] })))
        .mount(&server)
        .await;

    let embedder = OllamaEmbedder::new("nomic", server.uri(), 5).unwrap();
    assert_eq!(embedder.embed("hello").await.unwrap(), vec![1.0, 2.0]);
}

fn gemini_reply(text: &str) -> serde_json::Value {
    json!({ "candidates": [{ "content": { "parts": [{ "text": text }] } }] })
}

#[tokio::test]
async fn test_gemini_generation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-test:generateContent"))
        .and(header("x-goog-api-key", "g-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(gemini_reply("In auth.ts. [SOURCE: 1]")))
        .mount(&server)
        .await;

    let gemini = GeminiGenerator::new("gemini-test", server.uri(), Some("g-key".to_string()), 5).unwrap();
    assert_eq!(gemini.generate("prompt").await.unwrap(), "In auth.ts. [SOURCE: 1]");
}

#[tokio::test]
async fn test_gemini_without_key_never_calls_out() {
    let server = MockServer::start().await;
    let gemini = GeminiGenerator::new("gemini-test", server.uri(), None, 5).unwrap();
    let err = gemini.generate("prompt").await.unwrap_err();
    assert!(!err.is_transient());
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_hf_generation_parameters() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/zephyr"))
        .and(body_partial_json(json!({
            "inputs": "prompt",
            "parameters": { "max_new_tokens": 512, "return_full_text": false }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "generated_text": "done" }])))
        .mount(&server)
        .await;

    let hf = HuggingFaceGenerator::new("zephyr", server.uri(), None, 5).unwrap();
    assert_eq!(hf.generate("prompt").await.unwrap(), "done");
}

#[tokio::test]
async fn test_overloaded_primary_falls_back_to_secondary() {
    let gemini_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&gemini_server)
        .await;
    let hf_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/zephyr"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([{ "generated_text": "It is in db.ts [SOURCE: 1]" }])),
        )
        .mount(&hf_server)
        .await;

    let primary: Arc<dyn Generator> = Arc::new(
        GeminiGenerator::new("gemini-test", gemini_server.uri(), Some("g".to_string()), 5).unwrap(),
    );
    let secondary: Arc<dyn Generator> =
        Arc::new(HuggingFaceGenerator::new("zephyr", hf_server.uri(), None, 5).unwrap());
    let answerer = AnswerGenerator::new(
        primary,
        Some(secondary),
        RetryPolicy::exponential(3, Duration::from_millis(2)),
    );

    let chunks = vec![
        ScoredChunk {
            chunk_id: "a".to_string(),
            file_path: "src/api.ts".to_string(),
            start_line: 0,
            end_line: 4,
            content: "function api() {}".to_string(),
            similarity: 0.9,
        },
        ScoredChunk {
            chunk_id: "b".to_string(),
            file_path: "src\\db.ts".to_string(),
            start_line: 10,
            end_line: 20,
            content: "function db() {}".to_string(),
            similarity: 0.8,
        },
    ];
    let answer = answerer.answer("where is the database?", &chunks).await;

    assert_eq!(answer.answer, "It is in db.ts");
    assert_eq!(answer.attributed_path.as_deref(), Some("src/db.ts"));
    let highlight = answer.highlight.unwrap();
    assert_eq!((highlight.start_line, highlight.end_line), (10, 20));
    assert_eq!(gemini_server.received_requests().await.unwrap().len(), 3);
    assert_eq!(hf_server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_github_tree_count_uses_ingest_filters() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/tools/git/trees/HEAD"))
        .and(query_param("recursive", "1"))
        .and(header("authorization", "Bearer gh-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "truncated": false,
            "tree": [
                { "path": "src", "type": "tree" },
                { "path": "src/a.ts", "type": "blob" },
                { "path": "src/b.py", "type": "blob" },
                { "path": "README.md", "type": "blob" },
                { "path": "node_modules/x/index.js", "type": "blob" },
                { "path": "assets/logo.png", "type": "blob" },
                { "path": "package-lock.json", "type": "blob" }
            ]
        })))
        .mount(&server)
        .await;

    let host = GitHost::new(server.uri(), Some("gh-token".to_string()), IngestConfig::default()).unwrap();
    let count = host.count_files("https://github.com/acme/tools.git").await.unwrap();
    assert_eq!(count, 2);
}

#[tokio::test]
async fn test_github_error_is_remote_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).set_body_string("Not Found"))
        .mount(&server)
        .await;

    let host = GitHost::new(server.uri(), None, IngestConfig::default()).unwrap();
    let err = host
        .count_files("https://github.com/acme/missing")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "remote_error");
}
