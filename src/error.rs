//! Error kinds surfaced by the ingestion and answer pipelines.
//!
//! Provider failures are split by retryability so the retry helpers in
//! [`crate::retry`] can decide whether to wait and try again. Ingestion
//! failures carry enough structure for the HTTP layer to render a stable
//! error code (e.g. `REPO_TOO_LARGE` with the detected file count).

/// Failure reported by an external embedding or generation provider.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The provider signalled a temporary condition (model loading,
    /// overloaded, rate limited). Safe to retry.
    #[error("{provider} temporarily unavailable: {message}")]
    Transient {
        provider: &'static str,
        message: String,
    },

    /// Any other failure. Never retried.
    #[error("{provider} request failed: {message}")]
    Fatal {
        provider: &'static str,
        message: String,
    },

    /// Every permitted attempt hit a transient failure.
    #[error("{provider} unavailable after {attempts} attempts")]
    Unavailable {
        provider: &'static str,
        attempts: u32,
    },
}

impl ProviderError {
    pub fn transient(provider: &'static str, message: impl Into<String>) -> Self {
        Self::Transient {
            provider,
            message: message.into(),
        }
    }

    pub fn fatal(provider: &'static str, message: impl Into<String>) -> Self {
        Self::Fatal {
            provider,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Failure of the ingestion state machine or one of its setup stages.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The remote repository exceeds the configured file ceiling.
    #[error("This repository has {file_count} source files. The Free Tier limit is {limit} files.")]
    Policy { file_count: usize, limit: usize },

    #[error("clone failed: {0}")]
    Clone(String),

    /// The remote host could not be queried (e.g. file count lookup).
    #[error("remote lookup failed: {0}")]
    Remote(String),

    #[error("file tree walk failed: {0}")]
    Walk(String),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl IngestError {
    /// Machine-readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "bad_request",
            Self::Policy { .. } => "REPO_TOO_LARGE",
            Self::Clone(_) => "clone_failed",
            Self::Remote(_) => "remote_error",
            Self::Walk(_) | Self::Storage(_) => "internal",
        }
    }
}

/// Failure to turn a file's text into chunks.
#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    #[error("no grammar could be loaded for .{0} files: {1}")]
    Grammar(String, String),

    #[error("parser produced no syntax tree for {0}")]
    Parse(String),
}
