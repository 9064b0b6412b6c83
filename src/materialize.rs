//! Getting a repository onto local disk, and sizing it beforehand.
//!
//! [`Workspace`] hands out a uniquely named directory per ingestion run so
//! concurrent runs never share a path. [`RepoHost`] is the seam between the
//! ingestion state machine and the remote host: [`GitHost`] clones with the
//! system `git` binary and counts files through the GitHub trees API.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;

use crate::config::{Config, IngestConfig};
use crate::error::IngestError;
use crate::walker::is_selected_path;

/// A per-run scratch directory under the configured workspace root.
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
}

impl Workspace {
    /// Create `root/<uuid>`.
    pub fn allocate(root: &Path) -> anyhow::Result<Self> {
        let path = root.join(uuid::Uuid::new_v4().to_string());
        std::fs::create_dir_all(&path)
            .with_context(|| format!("Failed to create workspace {}", path.display()))?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the directory. Safe to call more than once; errors are logged.
    pub fn cleanup(&self) {
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "workspace cleanup failed")
            }
        }
    }
}

/// Remote repository operations needed before and during ingestion.
#[async_trait]
pub trait RepoHost: Send + Sync {
    /// Number of files the remote repository would contribute to ingestion.
    async fn count_files(&self, url: &str) -> Result<usize, IngestError>;

    /// Place a working copy of `url` at `dest`.
    async fn materialize(&self, url: &str, dest: &Path) -> Result<(), IngestError>;
}

/// `owner/repo` of a GitHub URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GithubRepo {
    pub owner: String,
    pub name: String,
}

/// Parse `https://github.com/o/r`, `https://github.com/o/r.git`,
/// `github.com/o/r/tree/main`, and `git@github.com:o/r.git`.
pub fn parse_github_url(url: &str) -> Option<GithubRepo> {
    let url = url.trim();
    let rest = if let Some(rest) = url.strip_prefix("git@github.com:") {
        rest
    } else {
        let without_scheme = url
            .strip_prefix("https://")
            .or_else(|| url.strip_prefix("http://"))
            .unwrap_or(url);
        let without_www = without_scheme
            .strip_prefix("www.")
            .unwrap_or(without_scheme);
        without_www.strip_prefix("github.com/")?
    };

    let mut segments = rest.split('/').filter(|s| !s.is_empty());
    let owner = segments.next()?;
    let name = segments.next()?;
    let name = name.strip_suffix(".git").unwrap_or(name);
    if owner.is_empty() || name.is_empty() {
        return None;
    }

    Some(GithubRepo {
        owner: owner.to_string(),
        name: name.to_string(),
    })
}

/// Canonical form used to key repositories.
///
/// GitHub URLs become `https://github.com/{owner}/{repo}`; anything else is
/// trimmed of whitespace and trailing slashes.
pub fn normalize_repo_url(url: &str) -> String {
    match parse_github_url(url) {
        Some(repo) => format!("https://github.com/{}/{}", repo.owner, repo.name),
        None => url.trim().trim_end_matches('/').to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct TreeResponse {
    #[serde(default)]
    tree: Vec<TreeEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Debug, Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

/// Clones with `git clone --depth 1`; counts through the GitHub REST API.
///
/// `GITHUB_TOKEN`, when set, is sent as a bearer token to lift the
/// anonymous rate limit and reach private repositories.
pub struct GitHost {
    client: reqwest::Client,
    api_url: String,
    token: Option<String>,
    ingest: IngestConfig,
}

impl GitHost {
    pub fn new(
        api_url: impl Into<String>,
        token: Option<String>,
        ingest: IngestConfig,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("repo-reader/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token,
            ingest,
        })
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let token = std::env::var("GITHUB_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty());
        Self::new(&config.github.api_url, token, config.ingest.clone())
    }
}

#[async_trait]
impl RepoHost for GitHost {
    async fn count_files(&self, url: &str) -> Result<usize, IngestError> {
        let Some(repo) = parse_github_url(url) else {
            tracing::warn!(url, "not a GitHub URL; skipping file count");
            return Ok(0);
        };

        let mut request = self
            .client
            .get(format!(
                "{}/repos/{}/{}/git/trees/HEAD?recursive=1",
                self.api_url, repo.owner, repo.name
            ))
            .header("Accept", "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| IngestError::Remote(format!("GitHub request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IngestError::Remote(format!(
                "GitHub API error {}: {}",
                status,
                body.trim()
            )));
        }

        let tree: TreeResponse = response
            .json()
            .await
            .map_err(|e| IngestError::Remote(format!("Invalid GitHub tree response: {}", e)))?;
        if tree.truncated {
            tracing::warn!(url, "GitHub tree listing truncated; count is a lower bound");
        }

        let count = tree
            .tree
            .iter()
            .filter(|e| e.kind == "blob" && is_selected_path(&e.path, &self.ingest))
            .count();
        tracing::debug!(url, count, "counted remote files");
        Ok(count)
    }

    async fn materialize(&self, url: &str, dest: &Path) -> Result<(), IngestError> {
        let output = tokio::process::Command::new("git")
            .args(["clone", "--depth", "1", "--quiet", "--"])
            .arg(url)
            .arg(dest)
            .output()
            .await
            .map_err(|e| {
                IngestError::Clone(format!("Failed to execute 'git clone'. Is git installed? {}", e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(IngestError::Clone(stderr.trim().to_string()));
        }

        Ok(())
    }
}
