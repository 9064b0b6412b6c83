//! SQLite-backed [`Store`] implementation.
//!
//! Vectors are stored as little-endian `f32` BLOBs on `code_chunks` and
//! ranked in Rust. Deleting a repository relies on `ON DELETE CASCADE`, so
//! the pool must be opened with foreign keys enabled (see [`crate::db`]).

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::{new_id, now_ts, rank_candidates, Store};
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::models::{ChunkDraft, RepoFile, RepoStatus, Repository, ScoredChunk};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

const REPO_COLUMNS: &str = "id, url, name, owner_id, status, created_at, updated_at";

fn repo_from_row(row: &SqliteRow) -> Result<Repository> {
    let status: String = row.get("status");
    Ok(Repository {
        id: row.get("id"),
        url: row.get("url"),
        name: row.get("name"),
        owner_id: row.get("owner_id"),
        status: status.parse()?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn file_from_row(row: &SqliteRow) -> RepoFile {
    RepoFile {
        id: row.get("id"),
        repo_id: row.get("repo_id"),
        file_path: row.get("file_path"),
    }
}

#[async_trait]
impl Store for SqliteStore {
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

        sqlx::query(
            r#"
            INSERT INTO repositories (id, url, name, owner_id, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&repo.id)
        .bind(&repo.url)
        .bind(&repo.name)
        .bind(&repo.owner_id)
        .bind(repo.status.as_str())
        .bind(repo.created_at)
        .bind(repo.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(repo)
    }

    async fn find_repository(&self, owner_id: &str, url: &str) -> Result<Option<Repository>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM repositories WHERE owner_id = ? AND url = ? \
             ORDER BY created_at ASC, rowid ASC LIMIT 1",
            REPO_COLUMNS
        ))
        .bind(owner_id)
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(repo_from_row).transpose()
    }

    async fn get_repository(&self, id: &str) -> Result<Option<Repository>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM repositories WHERE id = ?",
            REPO_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(repo_from_row).transpose()
    }

    async fn list_repositories(&self, owner_id: &str) -> Result<Vec<Repository>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM repositories WHERE owner_id = ? ORDER BY created_at DESC, rowid DESC",
            REPO_COLUMNS
        ))
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(repo_from_row).collect()
    }

    async fn repositories_with_status(&self, status: RepoStatus) -> Result<Vec<Repository>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM repositories WHERE status = ? ORDER BY created_at ASC, rowid ASC",
            REPO_COLUMNS
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(repo_from_row).collect()
    }

    async fn set_status(&self, id: &str, next: RepoStatus) -> Result<bool> {
        let allowed = RepoStatus::predecessors(next);
        if allowed.is_empty() {
            return Ok(false);
        }

        let placeholders = vec!["?"; allowed.len()].join(", ");
        let sql = format!(
            "UPDATE repositories SET status = ?, updated_at = ? WHERE id = ? AND status IN ({})",
            placeholders
        );

        let mut query = sqlx::query(&sql)
            .bind(next.as_str())
            .bind(now_ts())
            .bind(id);
        for prev in allowed {
            query = query.bind(prev.as_str());
        }

        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn touch_repository(&self, id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE repositories SET updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(now_ts())
        .bind(id)
        .bind(RepoStatus::Ingesting.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_repository(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM repositories WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_file(&self, repo_id: &str, file_path: &str) -> Result<RepoFile> {
        let file = RepoFile {
            id: new_id(),
            repo_id: repo_id.to_string(),
            file_path: file_path.to_string(),
        };

        sqlx::query("INSERT INTO repo_files (id, repo_id, file_path) VALUES (?, ?, ?)")
            .bind(&file.id)
            .bind(&file.repo_id)
            .bind(&file.file_path)
            .execute(&self.pool)
            .await?;

        Ok(file)
    }

    async fn insert_chunk(
        &self,
        file_id: &str,
        draft: &ChunkDraft,
        vector: &[f32],
    ) -> Result<String> {
        let id = new_id();

        sqlx::query(
            r#"
            INSERT INTO code_chunks (id, file_id, start_line, end_line, content, vector, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(file_id)
        .bind(draft.start_line as i64)
        .bind(draft.end_line as i64)
        .bind(&draft.content)
        .bind(vec_to_blob(vector))
        .bind(now_ts())
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    async fn list_files(&self, repo_id: &str) -> Result<Vec<RepoFile>> {
        let rows = sqlx::query(
            "SELECT id, repo_id, file_path FROM repo_files WHERE repo_id = ? ORDER BY file_path ASC",
        )
        .bind(repo_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(file_from_row).collect())
    }

    async fn file_content(&self, file_id: &str) -> Result<Option<String>> {
        let rows = sqlx::query(
            "SELECT content FROM code_chunks WHERE file_id = ? ORDER BY start_line ASC, rowid ASC",
        )
        .bind(file_id)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Ok(None);
        }

        let parts: Vec<String> = rows.iter().map(|r| r.get("content")).collect();
        Ok(Some(parts.join("\n")))
    }

    async fn chunk_count(&self, repo_id: &str) -> Result<usize> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM code_chunks c
            JOIN repo_files f ON f.id = c.file_id
            WHERE f.repo_id = ?
            "#,
        )
        .bind(repo_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as usize)
    }

    async fn vector_search(
        &self,
        repo_id: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.start_line, c.end_line, c.content, c.vector, f.file_path
            FROM code_chunks c
            JOIN repo_files f ON f.id = c.file_id
            WHERE f.repo_id = ?
            "#,
        )
        .bind(repo_id)
        .fetch_all(&self.pool)
        .await?;

        let candidates: Vec<ScoredChunk> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("vector");
                let start_line: i64 = row.get("start_line");
                let end_line: i64 = row.get("end_line");
                ScoredChunk {
                    chunk_id: row.get("id"),
                    file_path: row.get("file_path"),
                    start_line: start_line as usize,
                    end_line: end_line as usize,
                    content: row.get("content"),
                    similarity: cosine_similarity(query, &blob_to_vec(&blob)),
                }
            })
            .collect();

        Ok(rank_candidates(candidates, k))
    }
}
