//! Background ingestion jobs.
//!
//! Each accepted ingestion runs as a detached tokio task. While it runs, the
//! registry refreshes the repository's `updated_at` on every heartbeat, so a
//! process sharing the database can tell a live run from one whose process
//! died. A job that returns an error or panics leaves its repository `FAILED`.
//!
//! A `watch` receiver is kept per repository so callers (the CLI, tests) can
//! await the outcome without holding the task handle. Finished entries are
//! pruned whenever another job is spawned. Jobs are never cancelled.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;
use tokio::task::JoinError;
use tokio::time::MissedTickBehavior;

use crate::models::RepoStatus;
use crate::store::{now_ts, Store};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Running,
    Completed,
    Failed(String),
}

impl JobState {
    pub fn is_finished(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

pub struct JobRegistry {
    store: Arc<dyn Store>,
    heartbeat: Duration,
    jobs: Mutex<HashMap<String, watch::Receiver<JobState>>>,
}

impl JobRegistry {
    pub fn new(store: Arc<dyn Store>, heartbeat: Duration) -> Self {
        Self {
            store,
            heartbeat: heartbeat.max(Duration::from_millis(1)),
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Run `job` in the background under `repo_id`.
    pub fn spawn<F>(&self, repo_id: impl Into<String>, job: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let repo_id = repo_id.into();
        let (tx, rx) = watch::channel(JobState::Running);
        {
            let mut jobs = self.jobs.lock().unwrap();
            jobs.retain(|_, rx| !rx.borrow().is_finished() && rx.has_changed().is_ok());
            jobs.insert(repo_id.clone(), rx);
        }

        let store = self.store.clone();
        let heartbeat = self.heartbeat;
        tokio::spawn(async move {
            let state = supervise(store.as_ref(), &repo_id, heartbeat, job).await;
            let _ = tx.send(state);
        });
    }

    /// Wait until the job for `repo_id` finishes. `None` if no such job.
    pub async fn wait(&self, repo_id: &str) -> Option<JobState> {
        let mut rx = {
            let jobs = self.jobs.lock().unwrap();
            jobs.get(repo_id)?.clone()
        };

        let state = match rx.wait_for(JobState::is_finished).await {
            Ok(state) => state.clone(),
            // The supervisor went away without reporting (runtime shutdown).
            Err(_) => JobState::Failed("ingestion task aborted".to_string()),
        };
        Some(state)
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }
}

/// Drive `job` to completion, beating the heartbeat while it runs.
async fn supervise<F>(store: &dyn Store, repo_id: &str, heartbeat: Duration, job: F) -> JobState
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    let mut task = tokio::spawn(job);
    let mut ticker = tokio::time::interval(heartbeat);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; the row was just written.
    ticker.tick().await;

    let joined = loop {
        tokio::select! {
            joined = &mut task => break joined,
            _ = ticker.tick() => {
                if let Err(e) = store.touch_repository(repo_id).await {
                    tracing::warn!(repo_id, error = %e, "heartbeat failed");
                }
            }
        }
    };

    let reason = match joined {
        Ok(Ok(())) => return JobState::Completed,
        Ok(Err(e)) => format!("{:#}", e),
        Err(e) => join_failure(e),
    };

    tracing::error!(repo_id, error = %reason, "ingestion failed");
    match store.set_status(repo_id, RepoStatus::Failed).await {
        Ok(true) => {}
        Ok(false) => tracing::warn!(repo_id, "repository not in a state that can fail"),
        Err(e) => tracing::error!(repo_id, error = %e, "failed to mark repository FAILED"),
    }
    JobState::Failed(reason)
}

fn join_failure(e: JoinError) -> String {
    if !e.is_panic() {
        return format!("ingestion task aborted: {}", e);
    }
    let payload = e.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_default();
    format!("ingestion task panicked: {}", message)
}

/// Mark `INGESTING` repositories whose heartbeat is older than `stale_after`
/// as `FAILED`. Returns how many were marked.
///
/// Runs that are still alive in any process keep refreshing `updated_at`
/// and are left alone.
pub async fn recover_interrupted(store: &dyn Store, stale_after: Duration) -> Result<usize> {
    let cutoff = now_ts() - stale_after.as_secs() as i64;
    let candidates = store.repositories_with_status(RepoStatus::Ingesting).await?;

    let mut recovered = 0;
    for repo in candidates.into_iter().filter(|r| r.updated_at <= cutoff) {
        if store.set_status(&repo.id, RepoStatus::Failed).await? {
            tracing::warn!(
                repo_id = %repo.id,
                url = %repo.url,
                last_heartbeat = repo.updated_at,
                "marking interrupted ingestion as failed"
            );
            recovered += 1;
        }
    }
    Ok(recovered)
}
