//! Embedding provider abstraction and implementations.
//!
//! Defines the [`Embedder`] trait and concrete implementations:
//! - **[`HuggingFaceEmbedder`]**: calls the Hugging Face feature-extraction inference API.
//! - **[`OpenAIEmbedder`]**: calls the OpenAI embeddings API.
//! - **[`OllamaEmbedder`]**: calls a local Ollama instance's `/api/embed` endpoint.
//! - **[`RetryingEmbedder`]**: wraps any of the above with bounded retry of transient failures.
//!
//! Also provides vector utilities for SQLite BLOB storage and ranking:
//! - [`cosine_similarity`]: compute similarity between two embedding vectors
//! - [`vec_to_blob`]: encode a `Vec<f32>` as little-endian bytes for SQLite BLOB storage
//! - [`blob_to_vec`]: decode a SQLite BLOB back into a `Vec<f32>`
//!
//! # Provider Selection
//!
//! Use [`create_embedder`] to instantiate the configured provider, already
//! wrapped in a [`RetryingEmbedder`]:
//!
//! ```rust,no_run
//! # use repo_reader::config::EmbeddingConfig;
//! # use repo_reader::embedding::create_embedder;
//! let config = EmbeddingConfig::default(); // provider = "huggingface"
//! let embedder = create_embedder(&config).unwrap();
//! assert_eq!(embedder.model_name(), "sentence-transformers/all-MiniLM-L6-v2");
//! ```
//!
//! # Retry Strategy
//!
//! Failures are classified into [`ProviderError::Transient`] and
//! [`ProviderError::Fatal`]:
//! - Hugging Face: HTTP 503, or a body mentioning "loading"/"unavailable" → transient
//! - OpenAI and Ollama: HTTP 429 and 5xx → transient
//! - Everything else (4xx, malformed output, missing API key) → fatal
//!
//! [`RetryingEmbedder`] waits a fixed delay (default 5s) between attempts and
//! gives up after `max_retries` calls in total.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::ProviderError;
use crate::retry::{retry_transient, RetryPolicy};

pub const DEFAULT_HF_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";
pub const DEFAULT_HF_URL: &str = "https://router.huggingface.co/hf-inference/models";
pub const DEFAULT_OPENAI_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com";
pub const DEFAULT_OLLAMA_MODEL: &str = "nomic-embed-text";
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Turns text into a dense vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"sentence-transformers/all-MiniLM-L6-v2"`).
    fn model_name(&self) -> &str;

    /// Embed one text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

fn env_key(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|k| !k.trim().is_empty())
}

// ============ Hugging Face ============

/// Embedding provider using the Hugging Face inference API.
///
/// Calls `POST {url}/{model}/pipeline/feature-extraction`. The API key is
/// read from `HUGGINGFACE_API_KEY` and sent as a bearer token when set.
pub struct HuggingFaceEmbedder {
    client: reqwest::Client,
    model: String,
    url: String,
    api_key: Option<String>,
}

impl HuggingFaceEmbedder {
    pub const PROVIDER: &'static str = "huggingface";

    pub fn new(
        model: impl Into<String>,
        url: impl Into<String>,
        api_key: Option<String>,
        timeout_secs: u64,
    ) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout_secs)?,
            model: model.into(),
            url: url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        Self::new(
            config.model.as_deref().unwrap_or(DEFAULT_HF_MODEL),
            config.url.as_deref().unwrap_or(DEFAULT_HF_URL),
            env_key("HUGGINGFACE_API_KEY"),
            config.timeout_secs,
        )
    }
}

#[async_trait]
impl Embedder for HuggingFaceEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let provider = Self::PROVIDER;
        let mut request = self
            .client
            .post(format!("{}/{}/pipeline/feature-extraction", self.url, self.model))
            .json(&serde_json::json!({ "inputs": text }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| classify_hf_message(provider, e.to_string()))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            if status.as_u16() == 503 {
                return Err(ProviderError::transient(
                    provider,
                    format!("HTTP {}: {}", status, body),
                ));
            }
            return Err(classify_hf_message(
                provider,
                format!("HTTP {}: {}", status, body),
            ));
        }

        let json: Value = serde_json::from_str(&body)
            .map_err(|e| ProviderError::fatal(provider, format!("invalid JSON: {}", e)))?;
        parse_embedding(provider, &json)
    }
}

/// Hugging Face reports a cold model with a message rather than a stable code.
fn classify_hf_message(provider: &'static str, message: String) -> ProviderError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("loading") || lower.contains("unavailable") {
        ProviderError::transient(provider, message)
    } else {
        ProviderError::fatal(provider, message)
    }
}

/// Normalize a feature-extraction response into one vector.
///
/// A nested sequence yields its first inner sequence; a flat sequence of
/// numbers is returned as-is. Anything else is a fatal error.
pub fn parse_embedding(provider: &'static str, json: &Value) -> Result<Vec<f32>, ProviderError> {
    let outer = json
        .as_array()
        .ok_or_else(|| ProviderError::fatal(provider, "Invalid embedding output format"))?;

    let values = match outer.first() {
        Some(Value::Array(inner)) => inner,
        _ => outer,
    };

    let vector = numbers(values)
        .ok_or_else(|| ProviderError::fatal(provider, "Invalid embedding output format"))?;
    if vector.is_empty() {
        return Err(ProviderError::fatal(provider, "Empty embedding"));
    }
    Ok(vector)
}

fn numbers(values: &[Value]) -> Option<Vec<f32>> {
    values.iter().map(|v| v.as_f64().map(|f| f as f32)).collect()
}

// ============ OpenAI ============

/// Embedding provider using the OpenAI API.
///
/// Calls the `POST /v1/embeddings` endpoint with the configured model.
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAIEmbedder {
    client: reqwest::Client,
    model: String,
    url: String,
    api_key: Option<String>,
}

impl OpenAIEmbedder {
    pub const PROVIDER: &'static str = "openai";

    pub fn new(
        model: impl Into<String>,
        url: impl Into<String>,
        api_key: Option<String>,
        timeout_secs: u64,
    ) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout_secs)?,
            model: model.into(),
            url: url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        Self::new(
            config.model.as_deref().unwrap_or(DEFAULT_OPENAI_MODEL),
            config.url.as_deref().unwrap_or(DEFAULT_OPENAI_URL),
            env_key("OPENAI_API_KEY"),
            config.timeout_secs,
        )
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let provider = Self::PROVIDER;
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::fatal(provider, "OPENAI_API_KEY not set"))?;

        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
        });

        let json = post_json(
            provider,
            self.client
                .post(format!("{}/v1/embeddings", self.url))
                .bearer_auth(api_key)
                .json(&body),
        )
        .await?;

        let embedding = json
            .get("data")
            .and_then(|d| d.as_array())
            .and_then(|d| d.first())
            .and_then(|item| item.get("embedding"))
            .ok_or_else(|| {
                ProviderError::fatal(provider, "Invalid OpenAI response: missing embedding")
            })?;
        parse_embedding(provider, embedding)
    }
}

// ============ Ollama ============

/// Embedding provider using a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured Ollama URL (default: `http://localhost:11434`).
pub struct OllamaEmbedder {
    client: reqwest::Client,
    model: String,
    url: String,
}

impl OllamaEmbedder {
    pub const PROVIDER: &'static str = "ollama";

    pub fn new(model: impl Into<String>, url: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout_secs)?,
            model: model.into(),
            url: url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        Self::new(
            config.model.as_deref().unwrap_or(DEFAULT_OLLAMA_MODEL),
            config.url.as_deref().unwrap_or(DEFAULT_OLLAMA_URL),
            config.timeout_secs,
        )
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let provider = Self::PROVIDER;
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
        });

        let json = post_json(
            provider,
            self.client
                .post(format!("{}/api/embed", self.url))
                .json(&body),
        )
        .await?;

        let embeddings = json.get("embeddings").ok_or_else(|| {
            ProviderError::fatal(provider, "Invalid Ollama response: missing embeddings array")
        })?;
        parse_embedding(provider, embeddings)
    }
}

/// Send a request and decode a JSON body, treating 429 and 5xx as transient.
async fn post_json(
    provider: &'static str,
    request: reqwest::RequestBuilder,
) -> Result<Value, ProviderError> {
    let response = request
        .send()
        .await
        .map_err(|e| ProviderError::fatal(provider, format!("connection error: {}", e)))?;

    let status = response.status();
    if status.is_success() {
        return response
            .json()
            .await
            .map_err(|e| ProviderError::fatal(provider, format!("invalid JSON: {}", e)));
    }

    let body_text = response.text().await.unwrap_or_default();
    let message = format!("API error {}: {}", status, body_text);
    if status.as_u16() == 429 || status.is_server_error() {
        Err(ProviderError::transient(provider, message))
    } else {
        Err(ProviderError::fatal(provider, message))
    }
}

// ============ Retry wrapper ============

/// Retries transient failures of an inner embedder with a fixed delay.
pub struct RetryingEmbedder {
    inner: Box<dyn Embedder>,
    provider: &'static str,
    policy: RetryPolicy,
}

impl RetryingEmbedder {
    pub fn new(inner: Box<dyn Embedder>, provider: &'static str, policy: RetryPolicy) -> Self {
        Self {
            inner,
            provider,
            policy,
        }
    }
}

#[async_trait]
impl Embedder for RetryingEmbedder {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        retry_transient(&self.policy, self.provider, || self.inner.embed(text)).await
    }
}

/// Create the configured [`Embedder`], wrapped in a [`RetryingEmbedder`].
///
/// # Supported Providers
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"huggingface"` | [`HuggingFaceEmbedder`] |
/// | `"openai"` | [`OpenAIEmbedder`] |
/// | `"ollama"` | [`OllamaEmbedder`] |
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    let (inner, provider): (Box<dyn Embedder>, &'static str) = match config.provider.as_str() {
        "huggingface" => (
            Box::new(HuggingFaceEmbedder::from_config(config)?),
            HuggingFaceEmbedder::PROVIDER,
        ),
        "openai" => (
            Box::new(OpenAIEmbedder::from_config(config)?),
            OpenAIEmbedder::PROVIDER,
        ),
        "ollama" => (
            Box::new(OllamaEmbedder::from_config(config)?),
            OllamaEmbedder::PROVIDER,
        ),
        other => anyhow::bail!("Unknown embedding provider: {}", other),
    };

    let policy = RetryPolicy::fixed(
        config.max_retries,
        Duration::from_millis(config.retry_delay_ms),
    );
    Ok(Arc::new(RetryingEmbedder::new(inner, provider, policy)))
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// Each `f32` is stored as 4 bytes in little-endian order, producing
/// a BLOB of `vec.len() × 4` bytes.
///
/// # Example
///
/// ```rust
/// use repo_reader::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors, vectors of
/// different lengths, and zero vectors.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        assert!(cosine_similarity(&[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0]).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite() {
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_parse_embedding_shapes() {
        let nested = serde_json::json!([[0.5, 0.25], [9.0, 9.0]]);
        assert_eq!(parse_embedding("t", &nested).unwrap(), vec![0.5, 0.25]);

        let flat = serde_json::json!([1.0, 2.0, 3.0]);
        assert_eq!(parse_embedding("t", &flat).unwrap(), vec![1.0, 2.0, 3.0]);

        for bad in [
            serde_json::json!({"error": "nope"}),
            serde_json::json!(["a", "b"]),
            serde_json::json!([]),
            serde_json::json!(0.5),
        ] {
            let err = parse_embedding("t", &bad).unwrap_err();
            assert!(!err.is_transient(), "{}", bad);
        }
    }

    #[test]
    fn test_hf_message_classification() {
        assert!(classify_hf_message("hf", "Model is currently loading".into()).is_transient());
        assert!(classify_hf_message("hf", "Service Unavailable".into()).is_transient());
        assert!(!classify_hf_message("hf", "HTTP 401: Invalid token".into()).is_transient());
    }

    struct FlakyEmbedder {
        calls: Arc<AtomicU32>,
        fail_first: u32,
    }

    #[async_trait]
    impl Embedder for FlakyEmbedder {
        fn model_name(&self) -> &str {
            "flaky"
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, ProviderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.fail_first {
                Err(ProviderError::transient("flaky", "model loading"))
            } else {
                Ok(vec![1.0, 0.0])
            }
        }
    }

    fn retrying(fail_first: u32) -> (RetryingEmbedder, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let inner = FlakyEmbedder {
            calls: calls.clone(),
            fail_first,
        };
        let policy = RetryPolicy::fixed(3, Duration::from_millis(1));
        (
            RetryingEmbedder::new(Box::new(inner), "flaky", policy),
            calls,
        )
    }

    #[tokio::test]
    async fn test_retrying_embedder_recovers() {
        let (embedder, calls) = retrying(2);
        assert_eq!(embedder.embed("x").await.unwrap(), vec![1.0, 0.0]);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(embedder.model_name(), "flaky");
    }

    #[tokio::test]
    async fn test_retrying_embedder_gives_up_after_three_calls() {
        let (embedder, calls) = retrying(u32::MAX);
        let err = embedder.embed("x").await.unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable { attempts: 3, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_create_embedder_rejects_unknown_provider() {
        let config = EmbeddingConfig {
            provider: "magic".to_string(),
            ..EmbeddingConfig::default()
        };
        assert!(create_embedder(&config).is_err());
    }
}
