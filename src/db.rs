//! SQLite pool setup shared by the CLI, the server and the tests.
//!
//! A `serve` process and CLI commands may open the same database file at
//! once, and running ingestions write heartbeats while requests read, so the
//! pool uses WAL with a busy timeout instead of failing on a locked file.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::time::Duration;

use crate::config::DbConfig;
use crate::migrate::apply_schema;
use crate::store::SqliteStore;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_CONNECTIONS: u32 = 5;

/// Open (creating if needed) the database at `config.path`.
pub async fn connect(config: &DbConfig) -> Result<SqlitePool> {
    if let Some(parent) = config.path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    // Cascading deletes from repositories to files to chunks rely on foreign keys.
    let options = SqliteConnectOptions::new()
        .filename(&config.path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT);

    SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open database {}", config.path.display()))
}

/// Connect and make sure the schema exists.
pub async fn open_store(config: &DbConfig) -> Result<SqliteStore> {
    let pool = connect(config).await?;
    apply_schema(&pool).await?;
    Ok(SqliteStore::new(pool))
}
