//! # repo-reader CLI
//!
//! ## Usage
//!
//! ```bash
//! repo-reader --config ./config/repo-reader.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `repo-reader init` | Create the SQLite database and schema |
//! | `repo-reader ingest <url>` | Clone, chunk, and embed a repository (waits for the job) |
//! | `repo-reader status <id>` | Show a repository's ingestion status |
//! | `repo-reader repos --owner <id>` | List an owner's repositories |
//! | `repo-reader files <id>` | List a repository's ingested files |
//! | `repo-reader file <id>` | Print a file reassembled from its chunks |
//! | `repo-reader ask <repo-id> "<question>"` | Answer a question about a repository |
//! | `repo-reader delete <id>` | Delete a repository and everything under it |
//! | `repo-reader serve` | Start the HTTP API |
//! | `repo-reader completions <shell>` | Print shell completions |

use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use repo_reader::config;
use repo_reader::ingest::StartRequest;
use repo_reader::jobs::JobState;
use repo_reader::materialize::parse_github_url;
use repo_reader::migrate;
use repo_reader::server::{self, AppState};

/// Ask questions about a code repository, answered from its own source.
#[derive(Parser)]
#[command(name = "repo-reader", version, propagate_version = true)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// A missing file is not an error for `completions`; every other
    /// command needs it.
    #[arg(long, global = true, default_value = "./config/repo-reader.toml")]
    config: PathBuf,

    /// Enable debug logging (overridden by `RUST_LOG`).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Ingest a repository and wait until it is COMPLETED or FAILED.
    Ingest {
        /// Repository URL (GitHub URLs are normalized).
        url: String,
        /// Display name; defaults to the repository name from the URL.
        #[arg(long)]
        name: Option<String>,
        /// Owner the repository is registered under.
        #[arg(long, default_value = "local")]
        owner: String,
    },

    /// Show a repository's status.
    Status { id: String },

    /// List repositories of an owner, newest first.
    Repos {
        #[arg(long, default_value = "local")]
        owner: String,
    },

    /// List the ingested files of a repository.
    Files { id: String },

    /// Print a file's content reassembled from its chunks.
    File { id: String },

    /// Answer a question using a repository's indexed code.
    Ask { repo_id: String, question: String },

    /// Delete a repository with its files and chunks.
    Delete { id: String },

    /// Start the HTTP API on `[server].bind`.
    Serve,

    /// Print shell completions to stdout.
    Completions { shell: clap_complete::Shell },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if std::env::var_os("RUST_LOG").is_some() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init();

    if let Commands::Completions { shell } = cli.command {
        let mut command = Cli::command();
        clap_complete::generate(shell, &mut command, "repo-reader", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { url, name, owner } => {
            let state = AppState::from_config(&cfg).await?;
            let name = name.unwrap_or_else(|| default_repo_name(&url));
            let outcome = state
                .ingestor
                .start_ingestion(StartRequest {
                    repo_url: url,
                    repo_name: name,
                    owner_id: owner,
                })
                .await?;

            if !outcome.created {
                println!("Repository already exists: {} ({})", outcome.id, outcome.status);
                return Ok(());
            }

            println!("Ingestion started: {}", outcome.id);
            match state.ingestor.jobs().wait(&outcome.id).await {
                Some(JobState::Failed(reason)) => {
                    anyhow::bail!("ingestion of {} failed: {}", outcome.id, reason)
                }
                _ => println!("Ingestion completed: {}", outcome.id),
            }
        }
        Commands::Status { id } => {
            let state = AppState::from_config(&cfg).await?;
            let repo = state
                .store
                .get_repository(&id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("repository not found: {}", id))?;
            println!("{}  {}  {}  {}", repo.id, repo.status, repo.name, repo.url);
        }
        Commands::Repos { owner } => {
            let state = AppState::from_config(&cfg).await?;
            let repos = state.store.list_repositories(&owner).await?;
            if repos.is_empty() {
                println!("No repositories for {}.", owner);
            }
            for repo in repos {
                println!("{}  {:<10} {}  {}", repo.id, repo.status, repo.name, repo.url);
            }
        }
        Commands::Files { id } => {
            let state = AppState::from_config(&cfg).await?;
            for file in state.store.list_files(&id).await? {
                println!("{}  {}", file.id, file.file_path);
            }
        }
        Commands::File { id } => {
            let state = AppState::from_config(&cfg).await?;
            match state.store.file_content(&id).await? {
                Some(content) => println!("{}", content),
                None => anyhow::bail!("file content not found: {}", id),
            }
        }
        Commands::Ask { repo_id, question } => {
            if question.trim().is_empty() {
                anyhow::bail!("question must not be empty");
            }
            let state = AppState::from_config(&cfg).await?;
            let answer = state
                .ask(&repo_id, question.trim())
                .await?
                .ok_or_else(|| anyhow::anyhow!("repository not found: {}", repo_id))?;

            println!("{}", answer.answer);
            if let (Some(path), Some(highlight)) = (&answer.attributed_path, &answer.highlight) {
                println!();
                println!(
                    "Source: {} (lines {}-{})",
                    path,
                    highlight.start_line, highlight.end_line
                );
            }
        }
        Commands::Delete { id } => {
            let state = AppState::from_config(&cfg).await?;
            if !state.store.delete_repository(&id).await? {
                anyhow::bail!("repository not found: {}", id);
            }
            println!("Repository deleted successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Completions { .. } => unreachable!(),
    }

    Ok(())
}

fn default_repo_name(url: &str) -> String {
    match parse_github_url(url) {
        Some(repo) => repo.name,
        None => url
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .map(|s| s.trim_end_matches(".git").to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| url.to_string()),
    }
}
