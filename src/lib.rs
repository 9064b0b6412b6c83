//! # repo-reader
//!
//! Ingests a code repository and answers natural-language questions about it
//! from its own source, pointing at the file and line range the answer came
//! from.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────────────┐   ┌──────────┐
//! │ Materialize  │──▶│ Walk → Chunk → Embed │──▶│  SQLite  │
//! │ git clone    │   │ batched, paced       │   │ + vectors│
//! └──────────────┘   └─────────────────────┘   └────┬─────┘
//!                                                   │
//!                     question ──▶ embed ──▶ rank ──┤
//!                                                   ▼
//!                                  ┌──────────────────────────┐
//!                                  │ Generate (primary, then  │
//!                                  │ fallback) + attribution  │
//!                                  └──────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Provider and ingestion error types |
//! | [`db`] / [`migrate`] | SQLite connection and schema |
//! | [`store`] | Persistence trait, SQLite and in-memory stores |
//! | [`materialize`] | Workspaces, cloning, remote file counts |
//! | [`walker`] | File tree traversal and filtering |
//! | [`chunk`] | Syntax-aware and line-window chunking |
//! | [`retry`] | Retry policies for unreliable providers |
//! | [`embedding`] | Embedding providers |
//! | [`generation`] | Text-generation providers |
//! | [`scheduler`] | Batched per-file processing |
//! | [`ingest`] / [`jobs`] | Ingestion state machine and background jobs |
//! | [`search`] | Question retrieval |
//! | [`answer`] | Grounded answers with fallback and attribution |
//! | [`graph`] | Folder/file graph of a repository |
//! | [`server`] | HTTP API |

pub mod answer;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod graph;
pub mod ingest;
pub mod jobs;
pub mod materialize;
pub mod migrate;
pub mod models;
pub mod retry;
pub mod scheduler;
pub mod search;
pub mod server;
pub mod store;
pub mod walker;
