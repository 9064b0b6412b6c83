//! In-memory [`Store`] implementation for tests.
//!
//! Uses `Vec`s behind `std::sync::RwLock`; insertion order stands in for
//! creation time. Vector search is brute-force cosine similarity.

use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use super::{new_id, now_ts, rank_candidates, Store};
use crate::embedding::cosine_similarity;
use crate::models::{ChunkDraft, CodeChunk, RepoFile, RepoStatus, Repository, ScoredChunk};

pub struct InMemoryStore {
    repos: RwLock<Vec<Repository>>,
    files: RwLock<Vec<RepoFile>>,
    chunks: RwLock<Vec<CodeChunk>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            repos: RwLock::new(Vec::new()),
            files: RwLock::new(Vec::new()),
            chunks: RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn create_repository(
        &self,
        url: &str,
        name: &str,
        owner_id: &str,
        status: RepoStatus,
    ) -> Result<Repository> {
        let now = now_ts();
        let repo = Repository {
            id: new_id(),
            url: url.to_string(),
            name: name.to_string(),
            owner_id: owner_id.to_string(),
            status,
            created_at: now,
            updated_at: now,
        };
        self.repos.write().unwrap().push(repo.clone());
        Ok(repo)
    }

    async fn find_repository(&self, owner_id: &str, url: &str) -> Result<Option<Repository>> {
        let repos = self.repos.read().unwrap();
        Ok(repos
            .iter()
            .find(|r| r.owner_id == owner_id && r.url == url)
            .cloned())
    }

    async fn get_repository(&self, id: &str) -> Result<Option<Repository>> {
        let repos = self.repos.read().unwrap();
        Ok(repos.iter().find(|r| r.id == id).cloned())
    }

    async fn list_repositories(&self, owner_id: &str) -> Result<Vec<Repository>> {
        let repos = self.repos.read().unwrap();
        Ok(repos
            .iter()
            .rev()
            .filter(|r| r.owner_id == owner_id)
            .cloned()
            .collect())
    }

    async fn repositories_with_status(&self, status: RepoStatus) -> Result<Vec<Repository>> {
        let repos = self.repos.read().unwrap();
        Ok(repos.iter().filter(|r| r.status == status).cloned().collect())
    }

    async fn set_status(&self, id: &str, next: RepoStatus) -> Result<bool> {
        let mut repos = self.repos.write().unwrap();
        match repos.iter_mut().find(|r| r.id == id) {
            Some(repo) if repo.status.can_transition_to(next) => {
                repo.status = next;
                repo.updated_at = now_ts();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn touch_repository(&self, id: &str) -> Result<bool> {
        let mut repos = self.repos.write().unwrap();
        match repos
            .iter_mut()
            .find(|r| r.id == id && r.status == RepoStatus::Ingesting)
        {
            Some(repo) => {
                repo.updated_at = now_ts();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_repository(&self, id: &str) -> Result<bool> {
        let mut repos = self.repos.write().unwrap();
        let before = repos.len();
        repos.retain(|r| r.id != id);
        if repos.len() == before {
            return Ok(false);
        }

        let mut files = self.files.write().unwrap();
        let removed: Vec<String> = files
            .iter()
            .filter(|f| f.repo_id == id)
            .map(|f| f.id.clone())
            .collect();
        files.retain(|f| f.repo_id != id);
        self.chunks
            .write()
            .unwrap()
            .retain(|c| !removed.contains(&c.file_id));
        Ok(true)
    }

    async fn insert_file(&self, repo_id: &str, file_path: &str) -> Result<RepoFile> {
        if self.get_repository(repo_id).await?.is_none() {
            anyhow::bail!("repository {} does not exist", repo_id);
        }
        let file = RepoFile {
            id: new_id(),
            repo_id: repo_id.to_string(),
            file_path: file_path.to_string(),
        };
        self.files.write().unwrap().push(file.clone());
        Ok(file)
    }

    async fn insert_chunk(
        &self,
        file_id: &str,
        draft: &ChunkDraft,
        vector: &[f32],
    ) -> Result<String> {
        if draft.start_line < 1 || draft.start_line > draft.end_line {
            anyhow::bail!(
                "invalid line range {}-{}",
                draft.start_line,
                draft.end_line
            );
        }
        if !self.files.read().unwrap().iter().any(|f| f.id == file_id) {
            anyhow::bail!("file {} does not exist", file_id);
        }

        let chunk = CodeChunk {
            id: new_id(),
            file_id: file_id.to_string(),
            start_line: draft.start_line,
            end_line: draft.end_line,
            content: draft.content.clone(),
            vector: vector.to_vec(),
            created_at: now_ts(),
        };
        let id = chunk.id.clone();
        self.chunks.write().unwrap().push(chunk);
        Ok(id)
    }

    async fn list_files(&self, repo_id: &str) -> Result<Vec<RepoFile>> {
        let mut files: Vec<RepoFile> = self
            .files
            .read()
            .unwrap()
            .iter()
            .filter(|f| f.repo_id == repo_id)
            .cloned()
            .collect();
        files.sort_by(|a, b| a.file_path.cmp(&b.file_path));
        Ok(files)
    }

    async fn file_content(&self, file_id: &str) -> Result<Option<String>> {
        let chunks = self.chunks.read().unwrap();
        let mut parts: Vec<&CodeChunk> = chunks.iter().filter(|c| c.file_id == file_id).collect();
        if parts.is_empty() {
            return Ok(None);
        }
        // Stable sort keeps insertion order for equal start lines.
        parts.sort_by_key(|c| c.start_line);
        Ok(Some(
            parts
                .iter()
                .map(|c| c.content.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
        ))
    }

    async fn chunk_count(&self, repo_id: &str) -> Result<usize> {
        let files = self.files.read().unwrap();
        let chunks = self.chunks.read().unwrap();
        Ok(chunks
            .iter()
            .filter(|c| files.iter().any(|f| f.id == c.file_id && f.repo_id == repo_id))
            .count())
    }

    async fn vector_search(
        &self,
        repo_id: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let files = self.files.read().unwrap();
        let chunks = self.chunks.read().unwrap();

        let candidates = chunks
            .iter()
            .filter_map(|c| {
                let file = files
                    .iter()
                    .find(|f| f.id == c.file_id && f.repo_id == repo_id)?;
                Some(ScoredChunk {
                    chunk_id: c.id.clone(),
                    file_path: file.file_path.clone(),
                    start_line: c.start_line,
                    end_line: c.end_line,
                    content: c.content.clone(),
                    similarity: cosine_similarity(query, &c.vector),
                })
            })
            .collect();

        Ok(rank_candidates(candidates, k))
    }
}
