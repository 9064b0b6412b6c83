use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level configuration, read from a TOML file.
///
/// Every section has defaults so a minimal file only needs to override what
/// differs per deployment. API keys are never read from this file; they come
/// from `HUGGINGFACE_API_KEY`, `GEMINI_API_KEY`, `OPENAI_API_KEY` and
/// `GITHUB_TOKEN`.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub github: GithubConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/repo-reader.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Parent directory for per-run clone workspaces.
    #[serde(default = "default_workspace_dir")]
    pub workspace_dir: PathBuf,
    /// Files processed concurrently within one batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Delay after each stored chunk, in milliseconds.
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,
    /// Files larger than this (bytes of UTF-8 text) are skipped.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: usize,
    /// Remote repositories reporting more source files are rejected.
    #[serde(default = "default_file_limit")]
    pub file_limit: usize,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default = "default_ignored_dirs")]
    pub ignored_dirs: Vec<String>,
    #[serde(default = "default_ignored_files")]
    pub ignored_files: Vec<String>,
    /// Extensions (with leading dot) excluded before chunking.
    #[serde(default = "default_ignored_extensions")]
    pub ignored_extensions: Vec<String>,
    /// How often a running ingestion refreshes its repository's `updated_at`.
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    /// `serve` marks `INGESTING` repositories FAILED at startup once their
    /// heartbeat is this old.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            workspace_dir: default_workspace_dir(),
            batch_size: default_batch_size(),
            pacing_ms: default_pacing_ms(),
            max_file_bytes: default_max_file_bytes(),
            file_limit: default_file_limit(),
            max_depth: default_max_depth(),
            ignored_dirs: default_ignored_dirs(),
            ignored_files: default_ignored_files(),
            ignored_extensions: default_ignored_extensions(),
            heartbeat_secs: default_heartbeat_secs(),
            stale_after_secs: default_stale_after_secs(),
        }
    }
}

fn default_workspace_dir() -> PathBuf {
    std::env::temp_dir().join("repo-reader")
}
fn default_batch_size() -> usize {
    5
}
fn default_pacing_ms() -> u64 {
    100
}
fn default_max_file_bytes() -> usize {
    30_000
}
fn default_file_limit() -> usize {
    300
}
fn default_max_depth() -> usize {
    64
}
fn default_heartbeat_secs() -> u64 {
    15
}
fn default_stale_after_secs() -> u64 {
    120
}
fn default_ignored_dirs() -> Vec<String> {
    [".git", "node_modules", "dist", "build", "coverage", ".next"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_ignored_files() -> Vec<String> {
    ["package-lock.json", "yarn.lock", ".DS_Store", ".env"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_ignored_extensions() -> Vec<String> {
    [
        ".png",
        ".jpg",
        ".jpeg",
        ".gif",
        ".svg",
        ".ico",
        ".json",
        ".lock",
        ".md",
        ".txt",
        ".map",
        ".css",
        ".scss",
        ".html",
        ".xml",
        ".yml",
        ".yaml",
        ".config",
        ".toml",
        ".csv",
        ".editorconfig",
        ".gitignore",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Extensions (without dot) parsed into a syntax tree.
    #[serde(default = "default_source_extensions")]
    pub source_extensions: Vec<String>,
    /// Window size for files that are not recognized source code.
    #[serde(default = "default_window_lines")]
    pub window_lines: usize,
    /// Window size for source files with no extractable constructs.
    #[serde(default = "default_fallback_window_lines")]
    pub fallback_window_lines: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            source_extensions: default_source_extensions(),
            window_lines: default_window_lines(),
            fallback_window_lines: default_fallback_window_lines(),
        }
    }
}

fn default_source_extensions() -> Vec<String> {
    ["ts", "tsx", "js", "jsx"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_window_lines() -> usize {
    50
}
fn default_fallback_window_lines() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `huggingface`, `openai`, or `ollama`.
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Base URL override (Ollama host, or a proxy for the hosted APIs).
    #[serde(default)]
    pub url: Option<String>,
    /// Total attempts per text, including the first.
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            url: None,
            max_retries: default_embedding_retries(),
            retry_delay_ms: default_embedding_retry_delay_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "huggingface".to_string()
}
fn default_embedding_retries() -> u32 {
    3
}
fn default_embedding_retry_delay_ms() -> u64 {
    5000
}
fn default_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_primary")]
    pub primary: ProviderConfig,
    #[serde(default = "default_secondary")]
    pub secondary: ProviderConfig,
    /// Total attempts against the primary provider.
    #[serde(default = "default_generation_retries")]
    pub max_retries: u32,
    /// First backoff delay; doubles on every further attempt.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            primary: default_primary(),
            secondary: default_secondary(),
            max_retries: default_generation_retries(),
            base_delay_ms: default_base_delay_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// One generation provider slot.
#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    /// `gemini`, `huggingface`, or `disabled`.
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl ProviderConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_primary() -> ProviderConfig {
    ProviderConfig {
        provider: "gemini".to_string(),
        model: None,
        url: None,
    }
}
fn default_secondary() -> ProviderConfig {
    ProviderConfig {
        provider: "huggingface".to_string(),
        model: None,
        url: None,
    }
}
fn default_generation_retries() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct GithubConfig {
    #[serde(default = "default_github_api")]
    pub api_url: String,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_url: default_github_api(),
        }
    }
}

fn default_github_api() -> String {
    "https://api.github.com".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.ingest.batch_size == 0 {
        anyhow::bail!("ingest.batch_size must be > 0");
    }
    if config.ingest.max_depth == 0 {
        anyhow::bail!("ingest.max_depth must be > 0");
    }
    if config.ingest.heartbeat_secs == 0 {
        anyhow::bail!("ingest.heartbeat_secs must be > 0");
    }
    if config.ingest.stale_after_secs <= config.ingest.heartbeat_secs {
        anyhow::bail!("ingest.stale_after_secs must be greater than ingest.heartbeat_secs");
    }
    if config.chunking.window_lines == 0 || config.chunking.fallback_window_lines == 0 {
        anyhow::bail!("chunking window sizes must be > 0");
    }
    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.embedding.max_retries == 0 || config.generation.max_retries == 0 {
        anyhow::bail!("max_retries counts total attempts and must be >= 1");
    }

    match config.embedding.provider.as_str() {
        "huggingface" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be huggingface, openai, or ollama.",
            other
        ),
    }

    for (slot, provider) in [
        ("primary", &config.generation.primary),
        ("secondary", &config.generation.secondary),
    ] {
        match provider.provider.as_str() {
            "gemini" | "huggingface" | "disabled" => {}
            other => anyhow::bail!(
                "Unknown generation.{} provider: '{}'. Must be gemini, huggingface, or disabled.",
                slot,
                other
            ),
        }
    }
    if !config.generation.primary.is_enabled() {
        anyhow::bail!("generation.primary must not be disabled");
    }

    Ok(())
}
