//! Storage abstraction for repositories, files, and embedded chunks.
//!
//! The [`Store`] trait defines every persistence operation used by the
//! ingestion state machine, the batch scheduler, and the retriever.
//! Two backends are provided:
//!
//! - [`SqliteStore`]: sqlx over SQLite, vectors stored as BLOBs.
//! - [`InMemoryStore`]: `RwLock`-guarded vectors, for tests.
//!
//! Similarity ranking is a brute-force cosine scan over one repository's
//! chunks, shared by both backends through [`rank_candidates`].

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use std::cmp::Ordering;

use crate::models::{ChunkDraft, RepoFile, RepoStatus, Repository, ScoredChunk};

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

/// Abstract storage backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`create_repository`](Store::create_repository) | Register a repository in a given status |
/// | [`find_repository`](Store::find_repository) | Look up by (owner, URL) |
/// | [`set_status`](Store::set_status) | Forward-only status transition |
/// | [`touch_repository`](Store::touch_repository) | Heartbeat of a running ingestion |
/// | [`delete_repository`](Store::delete_repository) | Remove a repository with its files and chunks |
/// | [`insert_file`](Store::insert_file) / [`insert_chunk`](Store::insert_chunk) | Persist ingestion output |
/// | [`file_content`](Store::file_content) | Reassemble a file from its chunks |
/// | [`vector_search`](Store::vector_search) | Top-k chunks of one repository by cosine similarity |
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_repository(
        &self,
        url: &str,
        name: &str,
        owner_id: &str,
        status: RepoStatus,
    ) -> Result<Repository>;

    /// The oldest repository registered by `owner_id` for `url`, if any.
    async fn find_repository(&self, owner_id: &str, url: &str) -> Result<Option<Repository>>;

    async fn get_repository(&self, id: &str) -> Result<Option<Repository>>;

    /// All repositories of an owner, newest first.
    async fn list_repositories(&self, owner_id: &str) -> Result<Vec<Repository>>;

    async fn repositories_with_status(&self, status: RepoStatus) -> Result<Vec<Repository>>;

    /// Move a repository to `next` if its current status allows it.
    ///
    /// Returns `false` (and changes nothing) when the repository is missing
    /// or the transition would go backwards.
    async fn set_status(&self, id: &str, next: RepoStatus) -> Result<bool>;

    /// Refresh `updated_at` of an `INGESTING` repository. `false` otherwise.
    async fn touch_repository(&self, id: &str) -> Result<bool>;

    /// Delete a repository together with its files and chunks.
    async fn delete_repository(&self, id: &str) -> Result<bool>;

    async fn insert_file(&self, repo_id: &str, file_path: &str) -> Result<RepoFile>;

    /// Persist one embedded chunk. Returns the chunk id.
    async fn insert_chunk(&self, file_id: &str, draft: &ChunkDraft, vector: &[f32])
        -> Result<String>;

    /// Files of a repository, ordered by path.
    async fn list_files(&self, repo_id: &str) -> Result<Vec<RepoFile>>;

    /// A file's chunks joined with `\n` in start-line order.
    ///
    /// `None` for an unknown file or a file without chunks.
    async fn file_content(&self, file_id: &str) -> Result<Option<String>>;

    /// Number of chunks stored under `repo_id`.
    async fn chunk_count(&self, repo_id: &str) -> Result<usize>;

    /// The `k` chunks of `repo_id` most similar to `query`.
    async fn vector_search(&self, repo_id: &str, query: &[f32], k: usize)
        -> Result<Vec<ScoredChunk>>;
}

/// Sort by descending similarity and keep the first `k`.
///
/// Ties are broken by start line, then chunk id, so equal scores come back
/// in a stable order.
pub fn rank_candidates(mut candidates: Vec<ScoredChunk>, k: usize) -> Vec<ScoredChunk> {
    candidates.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.start_line.cmp(&b.start_line))
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    candidates.truncate(k);
    candidates
}

pub(crate) fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
