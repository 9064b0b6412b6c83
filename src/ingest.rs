//! Ingestion state machine.
//!
//! `start_ingestion` decides synchronously whether a repository is accepted
//! and returns at once; the heavy work runs as a background job:
//!
//! ```text
//! request ─▶ validate ─▶ existing (owner, url)? ──yes──▶ return it unchanged
//!                              │ no
//!                              ▼
//!                     remote file count > limit? ──yes──▶ PolicyError (no clone)
//!                              │ no
//!                              ▼
//!                     existing (owner, url)? ──yes──▶ return it unchanged
//!                              │ no
//!                              ▼
//!                  create repository (INGESTING), spawn job, return
//!
//! job: workspace ─▶ clone ─▶ walk ─▶ select ─▶ batches ─▶ COMPLETED ─▶ cleanup
//!                     └──── any stage error ──▶ FAILED ─▶ cleanup
//! ```
//!
//! The remote count runs outside the start lock, so a slow lookup only
//! delays its own request; the lookup is repeated under the lock before
//! creating. Per-file and per-chunk problems are absorbed by the scheduler
//! and never fail the run.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::config::Config;
use crate::embedding::Embedder;
use crate::error::IngestError;
use crate::jobs::JobRegistry;
use crate::materialize::{normalize_repo_url, RepoHost, Workspace};
use crate::models::RepoStatus;
use crate::scheduler::{IngestReport, Scheduler};
use crate::store::Store;
use crate::walker::{flatten_files, select_files, walk_tree, WalkFilter};

#[derive(Debug, Clone)]
pub struct StartRequest {
    pub repo_url: String,
    pub repo_name: String,
    pub owner_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartOutcome {
    pub id: String,
    pub status: RepoStatus,
    /// `false` when an existing repository was returned.
    pub created: bool,
}

pub struct Ingestor {
    store: Arc<dyn Store>,
    embedder: Arc<dyn Embedder>,
    host: Arc<dyn RepoHost>,
    config: Arc<Config>,
    jobs: JobRegistry,
    // Serializes find-or-create within this process. Never held across I/O
    // to the remote host.
    start_lock: tokio::sync::Mutex<()>,
}

impl Ingestor {
    pub fn new(
        store: Arc<dyn Store>,
        embedder: Arc<dyn Embedder>,
        host: Arc<dyn RepoHost>,
        config: Arc<Config>,
    ) -> Self {
        let heartbeat = Duration::from_secs(config.ingest.heartbeat_secs);
        Self {
            jobs: JobRegistry::new(store.clone(), heartbeat),
            store,
            embedder,
            host,
            config,
            start_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn jobs(&self) -> &JobRegistry {
        &self.jobs
    }

    pub async fn start_ingestion(&self, request: StartRequest) -> Result<StartOutcome, IngestError> {
        let url = request.repo_url.trim();
        let name = request.repo_name.trim();
        let owner_id = request.owner_id.trim();
        if url.is_empty() || name.is_empty() || owner_id.is_empty() {
            return Err(IngestError::InvalidRequest(
                "repoUrl, repoName and ownerId are required".to_string(),
            ));
        }
        let url = normalize_repo_url(url);

        if let Some(existing) = self.existing(owner_id, &url).await? {
            return Ok(existing);
        }

        let limit = self.config.ingest.file_limit;
        let file_count = self.host.count_files(&url).await?;
        if file_count > limit {
            tracing::info!(%url, file_count, limit, "rejecting oversized repository");
            return Err(IngestError::Policy { file_count, limit });
        }

        let _guard = self.start_lock.lock().await;
        if let Some(existing) = self.existing(owner_id, &url).await? {
            return Ok(existing);
        }

        let repo = self
            .store
            .create_repository(&url, name, owner_id, RepoStatus::Ingesting)
            .await?;
        tracing::info!(repo_id = %repo.id, %url, file_count, "ingestion accepted");

        let pipeline = Pipeline {
            store: self.store.clone(),
            embedder: self.embedder.clone(),
            host: self.host.clone(),
            config: self.config.clone(),
        };
        self.jobs.spawn(repo.id.clone(), pipeline.run(repo.id.clone(), url));

        Ok(StartOutcome {
            id: repo.id,
            status: repo.status,
            created: true,
        })
    }

    async fn existing(&self, owner_id: &str, url: &str) -> Result<Option<StartOutcome>, IngestError> {
        let Some(existing) = self.store.find_repository(owner_id, url).await? else {
            return Ok(None);
        };
        tracing::info!(repo_id = %existing.id, status = %existing.status, "repository already registered");
        Ok(Some(StartOutcome {
            id: existing.id,
            status: existing.status,
            created: false,
        }))
    }
}

/// Owned handles for one background run.
struct Pipeline {
    store: Arc<dyn Store>,
    embedder: Arc<dyn Embedder>,
    host: Arc<dyn RepoHost>,
    config: Arc<Config>,
}

impl Pipeline {
    /// Errors are returned to the job registry, which marks the repository
    /// `FAILED`.
    async fn run(self, repo_id: String, url: String) -> Result<()> {
        let workspace = Workspace::allocate(&self.config.ingest.workspace_dir)?;

        let result = self.execute(&repo_id, &url, &workspace).await;
        workspace.cleanup();

        let report = result?;
        tracing::info!(
            repo_id = %repo_id,
            files_seen = report.files_seen,
            files_processed = report.files_processed,
            files_skipped = report.files_skipped,
            files_failed = report.files_failed,
            chunks_stored = report.chunks_stored,
            chunks_skipped = report.chunks_skipped,
            "ingestion complete"
        );
        Ok(())
    }

    async fn execute(&self, repo_id: &str, url: &str, workspace: &Workspace) -> Result<IngestReport> {
        tracing::info!(repo_id, url, "cloning repository");
        self.host.materialize(url, workspace.path()).await?;

        let root = workspace.path().to_path_buf();
        let filter = WalkFilter::from_config(&self.config.ingest);
        let nodes = tokio::task::spawn_blocking(move || walk_tree(&root, &filter))
            .await
            .context("file tree walk panicked")?
            .map_err(|e| IngestError::Walk(format!("{:#}", e)))?;

        let files = select_files(flatten_files(nodes), &self.config.ingest);
        tracing::info!(repo_id, files = files.len(), "filtered file list");

        let scheduler = Scheduler::new(self.store.clone(), self.embedder.clone(), &self.config);
        let report = scheduler.run(repo_id, workspace.path(), &files).await;

        if !self.store.set_status(repo_id, RepoStatus::Completed).await? {
            anyhow::bail!("repository {} could not be marked COMPLETED", repo_id);
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::store::InMemoryStore;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NoEmbed;

    #[async_trait]
    impl Embedder for NoEmbed {
        fn model_name(&self) -> &str {
            "none"
        }
        async fn embed(&self, _text: &str) -> std::result::Result<Vec<f32>, ProviderError> {
            Err(ProviderError::fatal("none", "unused"))
        }
    }

    struct NoHost;

    #[async_trait]
    impl RepoHost for NoHost {
        async fn count_files(&self, _url: &str) -> std::result::Result<usize, IngestError> {
            Ok(0)
        }
        async fn materialize(&self, _url: &str, _dest: &Path) -> std::result::Result<(), IngestError> {
            Err(IngestError::Clone("offline".to_string()))
        }
    }

    /// Remote counts for URLs containing "slow" wait until the gate opens.
    struct GateHost {
        open: tokio::sync::watch::Sender<bool>,
        entered: AtomicUsize,
    }

    impl GateHost {
        fn new() -> Self {
            Self {
                open: tokio::sync::watch::channel(false).0,
                entered: AtomicUsize::new(0),
            }
        }

        async fn wait_entered(&self, n: usize) {
            while self.entered.load(Ordering::SeqCst) < n {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        }
    }

    #[async_trait]
    impl RepoHost for GateHost {
        async fn count_files(&self, url: &str) -> std::result::Result<usize, IngestError> {
            if url.contains("slow") {
                let mut rx = self.open.subscribe();
                self.entered.fetch_add(1, Ordering::SeqCst);
                let _ = rx.wait_for(|open| *open).await;
            }
            Ok(0)
        }
        async fn materialize(&self, _url: &str, _dest: &Path) -> std::result::Result<(), IngestError> {
            Err(IngestError::Clone("offline".to_string()))
        }
    }

    fn request(url: &str, owner: &str) -> StartRequest {
        StartRequest {
            repo_url: url.to_string(),
            repo_name: "r".to_string(),
            owner_id: owner.to_string(),
        }
    }

    fn unit_config() -> Config {
        let mut config = Config::default();
        config.ingest.workspace_dir = std::env::temp_dir().join("repo-reader-ingest-unit");
        config
    }

    fn gated() -> (Arc<Ingestor>, Arc<InMemoryStore>, Arc<GateHost>) {
        let store = Arc::new(InMemoryStore::new());
        let host = Arc::new(GateHost::new());
        let ingestor = Arc::new(Ingestor::new(
            store.clone(),
            Arc::new(NoEmbed),
            host.clone(),
            Arc::new(unit_config()),
        ));
        (ingestor, store, host)
    }

    fn ingestor() -> (Ingestor, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let ingestor = Ingestor::new(
            store.clone(),
            Arc::new(NoEmbed),
            Arc::new(NoHost),
            Arc::new(unit_config()),
        );
        (ingestor, store)
    }

    #[tokio::test]
    async fn test_blank_fields_are_rejected() {
        let (ingestor, _) = ingestor();
        let err = ingestor
            .start_ingestion(StartRequest {
                repo_url: "https://github.com/o/r".to_string(),
                repo_name: "  ".to_string(),
                owner_id: "alice".to_string(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "bad_request");
    }

    #[tokio::test]
    async fn test_clone_failure_marks_failed() {
        let (ingestor, store) = ingestor();
        let outcome = ingestor
            .start_ingestion(StartRequest {
                repo_url: "https://github.com/o/r.git".to_string(),
                repo_name: "r".to_string(),
                owner_id: "alice".to_string(),
            })
            .await
            .unwrap();
        assert!(outcome.created);
        assert_eq!(outcome.status, RepoStatus::Ingesting);

        let state = ingestor.jobs().wait(&outcome.id).await.unwrap();
        assert!(matches!(state, crate::jobs::JobState::Failed(ref r) if r.contains("offline")));

        let repo = store.get_repository(&outcome.id).await.unwrap().unwrap();
        assert_eq!(repo.status, RepoStatus::Failed);
        assert_eq!(repo.url, "https://github.com/o/r");
    }

    #[tokio::test]
    async fn test_slow_remote_count_does_not_block_other_owners() {
        let (ingestor, _store, host) = gated();
        let slow = {
            let ingestor = ingestor.clone();
            tokio::spawn(async move {
                ingestor
                    .start_ingestion(request("https://github.com/o/slow", "alice"))
                    .await
            })
        };
        host.wait_entered(1).await;

        let fast = tokio::time::timeout(
            Duration::from_millis(500),
            ingestor.start_ingestion(request("https://github.com/o/fast", "bob")),
        )
        .await
        .expect("start for another owner waited on a remote count")
        .unwrap();
        assert!(fast.created);

        host.open.send_replace(true);
        assert!(slow.await.unwrap().unwrap().created);
    }

    #[tokio::test]
    async fn test_concurrent_starts_create_one_repository() {
        let (ingestor, store, host) = gated();
        let spawn_start = || {
            let ingestor = ingestor.clone();
            tokio::spawn(async move {
                ingestor
                    .start_ingestion(request("https://github.com/o/slow", "alice"))
                    .await
            })
        };
        let first = spawn_start();
        let second = spawn_start();
        host.wait_entered(2).await;
        host.open.send_replace(true);

        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();
        assert_eq!(first.id, second.id);
        assert!(first.created != second.created);
        assert_eq!(store.list_repositories("alice").await.unwrap().len(), 1);
    }
}
