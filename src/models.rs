//! Core data models used throughout repo-reader.
//!
//! These types represent the repositories, files, chunks, and answers that
//! flow through the ingestion and retrieval pipeline.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of an ingested repository.
///
/// Transitions only move forward: `Pending → Ingesting → {Completed, Failed}`
/// (and `Pending → Failed`). Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RepoStatus {
    Pending,
    Ingesting,
    Completed,
    Failed,
}

impl RepoStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Ingesting => "INGESTING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    /// Whether moving from `self` to `next` is a legal forward transition.
    pub fn can_transition_to(self, next: RepoStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Ingesting)
                | (Self::Pending, Self::Failed)
                | (Self::Ingesting, Self::Completed)
                | (Self::Ingesting, Self::Failed)
        )
    }

    /// Statuses from which `next` may be reached.
    pub fn predecessors(next: RepoStatus) -> &'static [RepoStatus] {
        match next {
            Self::Pending => &[],
            Self::Ingesting => &[Self::Pending],
            Self::Completed => &[Self::Ingesting],
            Self::Failed => &[Self::Pending, Self::Ingesting],
        }
    }
}

impl fmt::Display for RepoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for RepoStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "INGESTING" => Ok(Self::Ingesting),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            other => anyhow::bail!("unknown repository status: {}", other),
        }
    }
}

/// A repository registered for ingestion.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    pub id: String,
    pub url: String,
    pub name: String,
    pub owner_id: String,
    pub status: RepoStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A file recorded during ingestion. Never mutated after creation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoFile {
    pub id: String,
    pub repo_id: String,
    pub file_path: String,
}

/// A persisted chunk of a file together with its embedding.
#[derive(Debug, Clone)]
pub struct CodeChunk {
    pub id: String,
    pub file_id: String,
    pub start_line: usize,
    pub end_line: usize,
    pub content: String,
    pub vector: Vec<f32>,
    pub created_at: i64,
}

/// What kind of construct a chunk was cut from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    Function,
    Class,
    /// A fixed line window (no syntax tree involved).
    Window,
}

/// Chunker output, before embedding and persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDraft {
    pub kind: ChunkKind,
    pub name: String,
    pub content: String,
    /// 1-based, inclusive.
    pub start_line: usize,
    /// 1-based, inclusive.
    pub end_line: usize,
}

/// A chunk returned by similarity ranking.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredChunk {
    pub chunk_id: String,
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub content: String,
    pub similarity: f32,
}

/// Line range highlighted in the attributed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Highlight {
    pub start_line: usize,
    pub end_line: usize,
}

/// The result of a repository question.
///
/// `attributed_path` and `highlight` are either both present or both absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    pub answer: String,
    pub attributed_path: Option<String>,
    pub highlight: Option<Highlight>,
}

impl Answer {
    /// An answer that points at no file.
    pub fn unattributed(text: impl Into<String>) -> Self {
        Self {
            answer: text.into(),
            attributed_path: None,
            highlight: None,
        }
    }
}
