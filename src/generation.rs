//! Text generation providers.
//!
//! - **[`GeminiGenerator`]**: Google Gemini `generateContent` API (primary).
//! - **[`HuggingFaceGenerator`]**: Hugging Face text-generation inference API (secondary).
//!
//! Both map HTTP 429 and 503 to [`ProviderError::Transient`]; the retry and
//! fallback sequence lives in [`crate::answer`].

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{GenerationConfig, ProviderConfig};
use crate::error::ProviderError;

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_GEMINI_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_HF_GENERATION_MODEL: &str = "HuggingFaceH4/zephyr-7b-beta";
pub const DEFAULT_HF_URL: &str = "https://router.huggingface.co/hf-inference/models";

const HF_MAX_NEW_TOKENS: u32 = 512;
const HF_TEMPERATURE: f32 = 0.3;

/// Produces a completion for a prompt.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Short provider name used in logs.
    fn name(&self) -> &'static str;

    async fn generate(&self, prompt: &str) -> Result<String, ProviderError>;
}

fn classify_status(provider: &'static str, status: reqwest::StatusCode, body: &str) -> ProviderError {
    let message = format!("HTTP {}: {}", status, body);
    match status.as_u16() {
        429 | 503 => ProviderError::transient(provider, message),
        _ => ProviderError::fatal(provider, message),
    }
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

fn env_key(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|k| !k.trim().is_empty())
}

// ============ Gemini ============

/// Calls `POST {url}/v1beta/models/{model}:generateContent`.
///
/// The key comes from `GEMINI_API_KEY`. A missing key fails every call
/// fatally, which sends the answer pipeline straight to the secondary.
pub struct GeminiGenerator {
    client: reqwest::Client,
    model: String,
    url: String,
    api_key: Option<String>,
}

impl GeminiGenerator {
    pub const PROVIDER: &'static str = "gemini";

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

    pub fn from_config(provider: &ProviderConfig, timeout_secs: u64) -> Result<Self> {
        Self::new(
            provider.model.as_deref().unwrap_or(DEFAULT_GEMINI_MODEL),
            provider.url.as_deref().unwrap_or(DEFAULT_GEMINI_URL),
            env_key("GEMINI_API_KEY"),
            timeout_secs,
        )
    }
}

#[async_trait]
impl Generator for GeminiGenerator {
    fn name(&self) -> &'static str {
        Self::PROVIDER
    }

    async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        let provider = Self::PROVIDER;
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::fatal(provider, "GEMINI_API_KEY not set"))?;

        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
        });

        let response = self
            .client
            .post(format!(
                "{}/v1beta/models/{}:generateContent",
                self.url, self.model
            ))
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::fatal(provider, format!("connection error: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(provider, status, &text));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::fatal(provider, format!("invalid JSON: {}", e)))?;
        parse_gemini_response(&json)
    }
}

/// Concatenate the text parts of the first candidate.
fn parse_gemini_response(json: &Value) -> Result<String, ProviderError> {
    let parts = json
        .pointer("/candidates/0/content/parts")
        .and_then(|p| p.as_array())
        .ok_or_else(|| {
            ProviderError::fatal(GeminiGenerator::PROVIDER, "response has no candidate text")
        })?;

    Ok(parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect::<Vec<_>>()
        .join(""))
}

// ============ Hugging Face ============

/// Calls `POST {url}/{model}` with `max_new_tokens = 512` and
/// `temperature = 0.3`. The key comes from `HUGGINGFACE_API_KEY`.
pub struct HuggingFaceGenerator {
    client: reqwest::Client,
    model: String,
    url: String,
    api_key: Option<String>,
}

impl HuggingFaceGenerator {
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

    pub fn from_config(provider: &ProviderConfig, timeout_secs: u64) -> Result<Self> {
        Self::new(
            provider
                .model
                .as_deref()
                .unwrap_or(DEFAULT_HF_GENERATION_MODEL),
            provider.url.as_deref().unwrap_or(DEFAULT_HF_URL),
            env_key("HUGGINGFACE_API_KEY"),
            timeout_secs,
        )
    }
}

#[async_trait]
impl Generator for HuggingFaceGenerator {
    fn name(&self) -> &'static str {
        Self::PROVIDER
    }

    async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        let provider = Self::PROVIDER;
        let body = serde_json::json!({
            "inputs": prompt,
            "parameters": {
                "max_new_tokens": HF_MAX_NEW_TOKENS,
                "temperature": HF_TEMPERATURE,
                "return_full_text": false,
            },
        });

        let mut request = self
            .client
            .post(format!("{}/{}", self.url, self.model))
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::fatal(provider, format!("connection error: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(provider, status, &text));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::fatal(provider, format!("invalid JSON: {}", e)))?;
        parse_hf_generation(&json)
    }
}

/// Accepts both `[{"generated_text": ..}]` and `{"generated_text": ..}`.
fn parse_hf_generation(json: &Value) -> Result<String, ProviderError> {
    let item = match json {
        Value::Array(items) => items.first(),
        other => Some(other),
    };
    item.and_then(|i| i.get("generated_text"))
        .and_then(|t| t.as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            ProviderError::fatal(HuggingFaceGenerator::PROVIDER, "response has no generated_text")
        })
}

fn build_generator(slot: &ProviderConfig, timeout_secs: u64) -> Result<Option<Arc<dyn Generator>>> {
    let generator: Arc<dyn Generator> = match slot.provider.as_str() {
        "gemini" => Arc::new(GeminiGenerator::from_config(slot, timeout_secs)?),
        "huggingface" => Arc::new(HuggingFaceGenerator::from_config(slot, timeout_secs)?),
        "disabled" => return Ok(None),
        other => anyhow::bail!("Unknown generation provider: {}", other),
    };
    Ok(Some(generator))
}

/// Build the `(primary, secondary)` pair from configuration.
pub fn create_generators(
    config: &GenerationConfig,
) -> Result<(Arc<dyn Generator>, Option<Arc<dyn Generator>>)> {
    let primary = build_generator(&config.primary, config.timeout_secs)?
        .ok_or_else(|| anyhow::anyhow!("generation.primary must not be disabled"))?;
    let secondary = build_generator(&config.secondary, config.timeout_secs)?;
    Ok((primary, secondary))
}
