//! Question retrieval: embed once, rank one repository's chunks.

use anyhow::Result;

use crate::embedding::Embedder;
use crate::models::ScoredChunk;
use crate::store::Store;

/// Chunks retrieved per question unless configured otherwise.
pub const DEFAULT_TOP_K: usize = 5;

/// Return the `top_k` chunks of `repo_id` most similar to `question`.
///
/// The question is embedded exactly once. A repository with no chunks
/// yields an empty list without calling the embedder.
pub async fn retrieve(
    store: &dyn Store,
    embedder: &dyn Embedder,
    repo_id: &str,
    question: &str,
    top_k: usize,
) -> Result<Vec<ScoredChunk>> {
    if store.chunk_count(repo_id).await? == 0 {
        tracing::debug!(repo_id, "no chunks to search");
        return Ok(Vec::new());
    }

    let query = embedder.embed(question).await?;
    let hits = store.vector_search(repo_id, &query, top_k).await?;
    tracing::debug!(repo_id, hits = hits.len(), "retrieved context");
    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::models::{ChunkDraft, ChunkKind, RepoStatus};
    use crate::store::InMemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Fixed {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Embedder for Fixed {
        fn model_name(&self) -> &str {
            "fixed"
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![1.0, 0.0])
        }
    }

    #[tokio::test]
    async fn test_retrieve_embeds_once_and_truncates() {
        let store = InMemoryStore::new();
        let repo = store
            .create_repository("u", "n", "o", RepoStatus::Ingesting)
            .await
            .unwrap();
        let file = store.insert_file(&repo.id, "a.ts").await.unwrap();
        for i in 0..8usize {
            let draft = ChunkDraft {
                kind: ChunkKind::Window,
                name: String::new(),
                content: format!("chunk {}", i),
                start_line: i + 1,
                end_line: i + 1,
            };
            store
                .insert_chunk(&file.id, &draft, &[1.0, i as f32 * 0.1])
                .await
                .unwrap();
        }

        let embedder = Fixed {
            calls: AtomicU32::new(0),
        };
        let hits = retrieve(&store, &embedder, &repo.id, "q", DEFAULT_TOP_K)
            .await
            .unwrap();
        assert_eq!(hits.len(), 5);
        assert_eq!(hits[0].content, "chunk 0");
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }

    struct Down;

    #[async_trait]
    impl Embedder for Down {
        fn model_name(&self) -> &str {
            "down"
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, ProviderError> {
            Err(ProviderError::fatal("down", "provider offline"))
        }
    }

    #[tokio::test]
    async fn test_retrieve_empty_repository() {
        let store = InMemoryStore::new();
        let embedder = Fixed {
            calls: AtomicU32::new(0),
        };
        let hits = retrieve(&store, &embedder, "none", "q", 5).await.unwrap();
        assert!(hits.is_empty());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_repository_never_reaches_embedder() {
        let store = InMemoryStore::new();
        let repo = store
            .create_repository("u", "n", "o", RepoStatus::Completed)
            .await
            .unwrap();
        store.insert_file(&repo.id, "a.ts").await.unwrap();

        let hits = retrieve(&store, &Down, &repo.id, "q", 5).await.unwrap();
        assert!(hits.is_empty());
    }
}
