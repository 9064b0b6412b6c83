//! Batched file processing for one ingestion run.
//!
//! Files are grouped into batches of `batch_size`. Batches run strictly one
//! after another; the files inside a batch are processed concurrently.
//!
//! Per file: read → skip if empty, not UTF-8, or oversized → record the
//! file → chunk → embed and store each chunk, pausing `pacing_ms` after
//! every stored chunk. A chunk whose embedding fails is skipped on its own;
//! a file whose read, chunking, or persistence fails is counted as failed.
//! Neither stops the batch or the run.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::future::join_all;

use crate::chunk::Chunker;
use crate::config::Config;
use crate::embedding::Embedder;
use crate::store::Store;
use crate::walker::FileNode;

/// Counters for one run, logged when the run ends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub files_seen: usize,
    pub files_processed: usize,
    pub files_skipped: usize,
    pub files_failed: usize,
    pub chunks_stored: usize,
    pub chunks_skipped: usize,
}

impl IngestReport {
    fn absorb(&mut self, outcome: FileOutcome) {
        match outcome {
            FileOutcome::Processed { stored, skipped } => {
                self.files_processed += 1;
                self.chunks_stored += stored;
                self.chunks_skipped += skipped;
            }
            FileOutcome::Skipped => self.files_skipped += 1,
            FileOutcome::Failed => self.files_failed += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileOutcome {
    Processed { stored: usize, skipped: usize },
    Skipped,
    Failed,
}

pub struct Scheduler {
    store: Arc<dyn Store>,
    embedder: Arc<dyn Embedder>,
    chunker: Chunker,
    batch_size: usize,
    pacing: Duration,
    max_file_bytes: usize,
}

impl Scheduler {
    pub fn new(store: Arc<dyn Store>, embedder: Arc<dyn Embedder>, config: &Config) -> Self {
        Self {
            store,
            embedder,
            chunker: Chunker::new(&config.chunking),
            batch_size: config.ingest.batch_size.max(1),
            pacing: Duration::from_millis(config.ingest.pacing_ms),
            max_file_bytes: config.ingest.max_file_bytes,
        }
    }

    /// Process `files` (paths relative to `root`) into `repo_id`.
    pub async fn run(&self, repo_id: &str, root: &Path, files: &[FileNode]) -> IngestReport {
        let mut report = IngestReport {
            files_seen: files.len(),
            ..IngestReport::default()
        };
        let total_batches = files.len().div_ceil(self.batch_size);

        for (index, batch) in files.chunks(self.batch_size).enumerate() {
            tracing::info!(
                repo_id,
                batch = index + 1,
                total_batches,
                files = batch.len(),
                "processing batch"
            );

            let outcomes =
                join_all(batch.iter().map(|file| self.process_file(repo_id, root, file))).await;
            for outcome in outcomes {
                report.absorb(outcome);
            }
        }

        report
    }

    async fn process_file(&self, repo_id: &str, root: &Path, file: &FileNode) -> FileOutcome {
        match self.try_process_file(repo_id, root, file).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(repo_id, file = %file.path, error = %e, "file failed");
                FileOutcome::Failed
            }
        }
    }

    async fn try_process_file(
        &self,
        repo_id: &str,
        root: &Path,
        file: &FileNode,
    ) -> Result<FileOutcome> {
        let bytes = tokio::fs::read(root.join(&file.path))
            .await
            .with_context(|| format!("Failed to read {}", file.path))?;

        let Ok(text) = String::from_utf8(bytes) else {
            tracing::debug!(file = %file.path, "skipping non-UTF-8 file");
            return Ok(FileOutcome::Skipped);
        };
        if text.is_empty() || text.len() > self.max_file_bytes {
            tracing::debug!(file = %file.path, bytes = text.len(), "skipping empty or oversized file");
            return Ok(FileOutcome::Skipped);
        }

        let record = self.store.insert_file(repo_id, &file.path).await?;
        let drafts = self.chunker.chunk(&file.name, &text)?;

        let mut stored = 0;
        let mut skipped = 0;
        for draft in &drafts {
            let vector = match self.embedder.embed(&draft.content).await {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(
                        file = %file.path,
                        start_line = draft.start_line,
                        error = %e,
                        "embedding failed, skipping chunk"
                    );
                    skipped += 1;
                    continue;
                }
            };

            self.store.insert_chunk(&record.id, draft, &vector).await?;
            stored += 1;

            if !self.pacing.is_zero() {
                tokio::time::sleep(self.pacing).await;
            }
        }

        Ok(FileOutcome::Processed { stored, skipped })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::models::RepoStatus;
    use crate::store::InMemoryStore;
    use crate::walker::NodeKind;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Fails on any text containing "poison"; tracks peak concurrency.
    #[derive(Default)]
    struct PeakEmbedder {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for PeakEmbedder {
        fn model_name(&self) -> &str {
            "peak"
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if text.contains("poison") {
                Err(ProviderError::fatal("peak", "rejected"))
            } else {
                Ok(vec![1.0, text.len() as f32])
            }
        }
    }

    fn config() -> Config {
        let mut config = Config::default();
        config.ingest.pacing_ms = 0;
        config
    }

    fn node(path: &str) -> FileNode {
        FileNode {
            path: path.to_string(),
            name: path.rsplit('/').next().unwrap().to_string(),
            kind: NodeKind::File,
        }
    }

    async fn setup(files: &[(&str, String)]) -> (TempDir, Arc<InMemoryStore>, String, Vec<FileNode>) {
        let tmp = TempDir::new().unwrap();
        for (path, content) in files {
            let full = tmp.path().join(path);
            std::fs::create_dir_all(full.parent().unwrap()).unwrap();
            std::fs::write(full, content).unwrap();
        }
        let store = Arc::new(InMemoryStore::new());
        let repo = store
            .create_repository("u", "n", "o", RepoStatus::Ingesting)
            .await
            .unwrap();
        let nodes = files.iter().map(|(p, _)| node(p)).collect();
        (tmp, store, repo.id, nodes)
    }

    #[tokio::test]
    async fn test_batches_bound_concurrency() {
        let files: Vec<(String, String)> = (0..12)
            .map(|i| (format!("f{:02}.py", i), format!("print({})", i)))
            .collect();
        let borrowed: Vec<(&str, String)> =
            files.iter().map(|(p, c)| (p.as_str(), c.clone())).collect();
        let (tmp, store, repo_id, nodes) = setup(&borrowed).await;

        let embedder = Arc::new(PeakEmbedder::default());
        let scheduler = Scheduler::new(store.clone(), embedder.clone(), &config());
        let report = scheduler.run(&repo_id, tmp.path(), &nodes).await;

        assert_eq!(report.files_seen, 12);
        assert_eq!(report.files_processed, 12);
        assert_eq!(report.chunks_stored, 12);
        let peak = embedder.peak.load(Ordering::SeqCst);
        assert!(peak <= 5, "peak concurrency {}", peak);
        assert!(peak >= 2, "files in a batch should overlap, peak {}", peak);
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let big = "x".repeat(30_001);
        let (tmp, store, repo_id, mut nodes) = setup(&[
            ("ok.py", "a = 1\n".to_string()),
            ("empty.py", String::new()),
            ("huge.py", big),
            ("bad.py", "poison = True".to_string()),
        ])
        .await;
        nodes.push(node("missing.py"));

        let scheduler = Scheduler::new(store.clone(), Arc::new(PeakEmbedder::default()), &config());
        let report = scheduler.run(&repo_id, tmp.path(), &nodes).await;

        assert_eq!(
            report,
            IngestReport {
                files_seen: 5,
                files_processed: 2,
                files_skipped: 2,
                files_failed: 1,
                chunks_stored: 1,
                chunks_skipped: 1,
            }
        );

        // Skipped files never get a record; a file whose only chunk failed keeps one.
        let files = store.list_files(&repo_id).await.unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.file_path.as_str()).collect();
        assert_eq!(paths, vec!["bad.py", "ok.py"]);
        assert_eq!(store.chunk_count(&repo_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_blank_windows_are_stored_and_content_is_whole() {
        let text = (1..=120)
            .map(|i| if (51..=100).contains(&i) { String::new() } else { format!("v{} = {}", i, i) })
            .collect::<Vec<_>>()
            .join("\n");
        let (tmp, store, repo_id, nodes) = setup(&[("gaps.py", text.clone())]).await;

        let scheduler = Scheduler::new(store.clone(), Arc::new(PeakEmbedder::default()), &config());
        let report = scheduler.run(&repo_id, tmp.path(), &nodes).await;
        assert_eq!(report.chunks_stored, 3);
        assert_eq!(report.chunks_skipped, 0);

        let files = store.list_files(&repo_id).await.unwrap();
        let content = store.file_content(&files[0].id).await.unwrap().unwrap();
        assert_eq!(content.split('\n').count(), 120);
        assert_eq!(content, text);
    }
}
