//! Grounded answer generation with provider fallback and source attribution.
//!
//! [`AnswerGenerator::answer`] turns a question plus retrieved chunks into an
//! [`Answer`]:
//!
//! 1. No chunks → a fixed "nothing found" answer; no provider is called.
//! 2. Build a prompt listing every chunk as a numbered `[Source i]` block.
//! 3. Ask the primary provider, retrying transient failures with exponential
//!    backoff. Any primary failure falls through to the secondary, called
//!    exactly once.
//! 4. If both fail, return the degraded answer. Provider errors never reach
//!    the caller.
//! 5. Parse the trailing `[SOURCE: X]` tag to pick the attributed chunk
//!    (rank 0 when absent or out of range) and strip the tags from the text.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;

use crate::config::GenerationConfig;
use crate::error::ProviderError;
use crate::generation::{create_generators, Generator};
use crate::models::{Answer, Highlight, ScoredChunk};
use crate::retry::{retry_transient, RetryPolicy};
use crate::walker::normalize_relative;

pub const NO_CONTEXT_ANSWER: &str = "I could not find relevant code in this repository.";
pub const DEGRADED_ANSWER: &str =
    "The AI service is currently under heavy load. Please try again shortly.";
pub const REFUSAL_PHRASE: &str = "I cannot answer this based on the provided code.";

static SOURCE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\[SOURCE:\s*(\d+)\]").unwrap());

pub struct AnswerGenerator {
    primary: Arc<dyn Generator>,
    secondary: Option<Arc<dyn Generator>>,
    policy: RetryPolicy,
}

impl AnswerGenerator {
    pub fn new(
        primary: Arc<dyn Generator>,
        secondary: Option<Arc<dyn Generator>>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            primary,
            secondary,
            policy,
        }
    }

    pub fn from_config(config: &GenerationConfig) -> anyhow::Result<Self> {
        let (primary, secondary) = create_generators(config)?;
        let policy = RetryPolicy::exponential(
            config.max_retries,
            Duration::from_millis(config.base_delay_ms),
        );
        Ok(Self::new(primary, secondary, policy))
    }

    pub async fn answer(&self, question: &str, chunks: &[ScoredChunk]) -> Answer {
        if chunks.is_empty() {
            return Answer::unattributed(NO_CONTEXT_ANSWER);
        }

        let prompt = build_prompt(question, chunks);
        let response = match self.complete(&prompt).await {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, "all generation providers failed");
                return Answer::unattributed(DEGRADED_ANSWER);
            }
        };

        let (text, index) = parse_source_tag(&response, chunks.len());
        let best = &chunks[index];
        tracing::debug!(source = index, file = %best.file_path, "attributed answer");

        Answer {
            answer: text,
            attributed_path: Some(normalize_attribution_path(&best.file_path)),
            highlight: Some(Highlight {
                start_line: best.start_line,
                end_line: best.end_line,
            }),
        }
    }

    async fn complete(&self, prompt: &str) -> Result<String, ProviderError> {
        let primary = &self.primary;
        let primary_err =
            match retry_transient(&self.policy, primary.name(), || primary.generate(prompt)).await {
                Ok(text) => return Ok(text),
                Err(e) => e,
            };

        let Some(secondary) = &self.secondary else {
            return Err(primary_err);
        };

        tracing::warn!(
            provider = primary.name(),
            fallback = secondary.name(),
            error = %primary_err,
            "primary generation failed, falling back"
        );
        secondary.generate(prompt).await
    }
}

/// Render the grounding prompt for `question` over `chunks`.
pub fn build_prompt(question: &str, chunks: &[ScoredChunk]) -> String {
    let context = chunks
        .iter()
        .enumerate()
        .map(|(i, c)| {
            format!(
                "[Source {}]: File: {} (Lines {}-{})\n{}",
                i, c.file_path, c.start_line, c.end_line, c.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n---\n\n");

    let last = chunks.len().saturating_sub(1);

    format!(
        "You are an expert software engineer.\n\
         Answer the question strictly using the provided code context.\n\
         \n\
         Question:\n\
         \"{question}\"\n\
         \n\
         Context:\n\
         {context}\n\
         \n\
         Rules:\n\
         1. Cite files and functions explicitly in your explanation.\n\
         2. If the answer is not present in the context, say \"{REFUSAL_PHRASE}\"\n\
         3. CRITICAL: At the very end of your response, on a new line, output strictly the tag \
         \"[SOURCE: X]\" where X is the index number (0-{last}) of the single most relevant \
         source code block you used.\n\
         \x20  Example:\n\
         \x20  The login logic is in Auth.ts...\n\
         \n\
         \x20  [SOURCE: 0]\n"
    )
}

/// Extract the attributed source index and the cleaned answer text.
///
/// The first tag decides the index when it is in `0..source_count`;
/// otherwise the index is 0. When any tag is present, all tags are removed
/// and the text is trimmed. Text without a tag is returned unchanged.
pub fn parse_source_tag(text: &str, source_count: usize) -> (String, usize) {
    let Some(caps) = SOURCE_TAG.captures(text) else {
        return (text.to_string(), 0);
    };

    let index = caps
        .get(1)
        .and_then(|m| m.as_str().parse::<usize>().ok())
        .filter(|&i| i < source_count)
        .unwrap_or(0);

    let cleaned = SOURCE_TAG.replace_all(text, "").trim().to_string();
    (cleaned, index)
}

/// Forward slashes, no leading slash.
pub fn normalize_attribution_path(path: &str) -> String {
    normalize_relative(path)
}
