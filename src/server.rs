//! HTTP API over ingestion and question answering.
//!
//! # Endpoints
//!
//! | Method   | Path | Description |
//! |----------|------|-------------|
//! | `POST`   | `/ingest` | Start (or find) an ingestion |
//! | `GET`    | `/repos?ownerId=` | Repositories of an owner, newest first |
//! | `GET`    | `/repos/{id}/status` | Status, URL and name |
//! | `GET`    | `/repos/{id}/files` | Ingested file records |
//! | `GET`    | `/repos/{id}/graph` | Folder/file graph |
//! | `DELETE` | `/repos/{id}` | Delete a repository with its files and chunks |
//! | `GET`    | `/files/{id}/content` | Reassembled file content |
//! | `POST`   | `/repos/{id}/chat` | Answer a question about a repository |
//! | `GET`    | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "Question is required" } }
//! ```
//!
//! Error codes: `bad_request` (400), `REPO_TOO_LARGE` (400, adds
//! `fileCount` and `limit`), `not_found` (404), `remote_error` (502),
//! `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so a browser dashboard
//! can call the API directly.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};

use crate::answer::AnswerGenerator;
use crate::config::Config;
use crate::embedding::{create_embedder, Embedder};
use crate::error::IngestError;
use crate::graph::{build_file_graph, FileGraph};
use crate::ingest::{Ingestor, StartRequest};
use crate::jobs::recover_interrupted;
use crate::materialize::{GitHost, RepoHost};
use crate::models::{Answer, RepoStatus, Repository};
use crate::search::retrieve;
use crate::store::Store;

/// Shared handles for request handlers and CLI commands.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub embedder: Arc<dyn Embedder>,
    pub answerer: Arc<AnswerGenerator>,
    pub ingestor: Arc<Ingestor>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn Store>,
        embedder: Arc<dyn Embedder>,
        answerer: Arc<AnswerGenerator>,
        host: Arc<dyn RepoHost>,
    ) -> Self {
        let ingestor = Arc::new(Ingestor::new(
            store.clone(),
            embedder.clone(),
            host,
            config.clone(),
        ));
        Self {
            config,
            store,
            embedder,
            answerer,
            ingestor,
        }
    }

    /// Open the database, apply the schema, and build providers from `config`.
    ///
    /// Leaves existing rows untouched; see [`AppState::recover_interrupted`].
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let store: Arc<dyn Store> = Arc::new(crate::db::open_store(&config.db).await?);

        let embedder = create_embedder(&config.embedding)?;
        let answerer = Arc::new(AnswerGenerator::from_config(&config.generation)?);
        let host: Arc<dyn RepoHost> = Arc::new(GitHost::from_config(config)?);

        Ok(Self::new(
            Arc::new(config.clone()),
            store,
            embedder,
            answerer,
            host,
        ))
    }

    /// Fail `INGESTING` repositories whose heartbeat has gone stale.
    ///
    /// Only `serve` calls this, at startup. Runs alive in another process
    /// on the same database keep their heartbeat fresh and are not touched.
    pub async fn recover_interrupted(&self) -> anyhow::Result<usize> {
        let stale_after = Duration::from_secs(self.config.ingest.stale_after_secs);
        let recovered = recover_interrupted(self.store.as_ref(), stale_after).await?;
        if recovered > 0 {
            tracing::warn!(recovered, "recovered interrupted ingestions");
        }
        Ok(recovered)
    }

    /// Answer `question` against `repo_id`. `None` if the repository is unknown.
    pub async fn ask(&self, repo_id: &str, question: &str) -> anyhow::Result<Option<Answer>> {
        if self.store.get_repository(repo_id).await?.is_none() {
            return Ok(None);
        }
        let chunks = retrieve(
            self.store.as_ref(),
            self.embedder.as_ref(),
            repo_id,
            question,
            self.config.retrieval.top_k,
        )
        .await?;
        Ok(Some(self.answerer.answer(question, &chunks).await))
    }
}

/// Build the router with every endpoint and permissive CORS.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/ingest", post(handle_ingest))
        .route("/repos", get(handle_list_repos))
        .route("/repos/{id}", axum::routing::delete(handle_delete_repo))
        .route("/repos/{id}/status", get(handle_repo_status))
        .route("/repos/{id}/files", get(handle_repo_files))
        .route("/repos/{id}/graph", get(handle_repo_graph))
        .route("/repos/{id}/chat", post(handle_chat))
        .route("/files/{id}/content", get(handle_file_content))
        .layer(cors)
        .with_state(state)
}

/// Start the HTTP server on `config.server.bind`.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let state = AppState::from_config(config).await?;
    state.recover_interrupted().await?;
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, "repo-reader server listening");
    println!("repo-reader server listening on http://{}", config.server.bind);

    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorDetail {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit: Option<usize>,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
    file_count: Option<usize>,
    limit: Option<usize>,
}

impl AppError {
    fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.to_string(),
            message: message.into(),
            file_count: None,
            limit: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
                file_count: self.file_count,
                limit: self.limit,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        match &err {
            IngestError::InvalidRequest(message) => bad_request(message.clone()),
            IngestError::Policy { file_count, limit } => AppError {
                file_count: Some(*file_count),
                limit: Some(*limit),
                ..AppError::new(StatusCode::BAD_REQUEST, err.code(), err.to_string())
            },
            IngestError::Remote(_) => {
                AppError::new(StatusCode::BAD_GATEWAY, err.code(), err.to_string())
            }
            _ => internal(anyhow::anyhow!(err.to_string())),
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::NOT_FOUND, "not_found", message)
}

/// Logs the full error chain; the client only sees a generic message.
fn internal(err: anyhow::Error) -> AppError {
    tracing::error!(error = %format!("{:#}", err), "request failed");
    AppError::new(
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal",
        "Internal server error",
    )
}

async fn load_repo(state: &AppState, id: &str) -> Result<Repository, AppError> {
    state
        .store
        .get_repository(id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found("Repository not found"))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /ingest ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IngestBody {
    #[serde(default)]
    repo_url: String,
    #[serde(default)]
    repo_name: String,
    #[serde(default)]
    owner_id: String,
}

#[derive(Serialize)]
struct IngestResponse {
    message: &'static str,
    id: String,
    status: RepoStatus,
}

async fn handle_ingest(
    State(state): State<AppState>,
    Json(body): Json<IngestBody>,
) -> Result<Json<IngestResponse>, AppError> {
    let outcome = state
        .ingestor
        .start_ingestion(StartRequest {
            repo_url: body.repo_url,
            repo_name: body.repo_name,
            owner_id: body.owner_id,
        })
        .await?;

    let message = if outcome.created {
        "Ingestion started."
    } else {
        "Repository already exists"
    };
    Ok(Json(IngestResponse {
        message,
        id: outcome.id,
        status: outcome.status,
    }))
}

// ============ GET /repos ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OwnerQuery {
    owner_id: Option<String>,
}

async fn handle_list_repos(
    State(state): State<AppState>,
    Query(query): Query<OwnerQuery>,
) -> Result<Json<Vec<Repository>>, AppError> {
    let owner_id = query
        .owner_id
        .filter(|o| !o.trim().is_empty())
        .ok_or_else(|| bad_request("ownerId is required"))?;
    let repos = state
        .store
        .list_repositories(owner_id.trim())
        .await
        .map_err(internal)?;
    Ok(Json(repos))
}

// ============ GET /repos/{id}/status ============

#[derive(Serialize)]
struct StatusResponse {
    status: RepoStatus,
    url: String,
    name: String,
}

async fn handle_repo_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>, AppError> {
    let repo = load_repo(&state, &id).await?;
    Ok(Json(StatusResponse {
        status: repo.status,
        url: repo.url,
        name: repo.name,
    }))
}

// ============ GET /repos/{id}/files ============

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FileEntry {
    id: String,
    file_path: String,
}

async fn handle_repo_files(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<FileEntry>>, AppError> {
    load_repo(&state, &id).await?;
    let files = state.store.list_files(&id).await.map_err(internal)?;
    Ok(Json(
        files
            .into_iter()
            .map(|f| FileEntry {
                id: f.id,
                file_path: f.file_path,
            })
            .collect(),
    ))
}

// ============ GET /repos/{id}/graph ============

async fn handle_repo_graph(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<FileGraph>, AppError> {
    let repo = load_repo(&state, &id).await?;
    let files = state.store.list_files(&id).await.map_err(internal)?;
    Ok(Json(build_file_graph(&repo.name, &files)))
}

// ============ DELETE /repos/{id} ============

#[derive(Serialize)]
struct MessageResponse {
    message: &'static str,
}

async fn handle_delete_repo(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<OwnerQuery>,
) -> Result<Json<MessageResponse>, AppError> {
    let repo = load_repo(&state, &id).await?;
    if let Some(owner_id) = query.owner_id.as_deref().map(str::trim) {
        if !owner_id.is_empty() && owner_id != repo.owner_id {
            return Err(not_found("Repository not found"));
        }
    }

    if !state.store.delete_repository(&id).await.map_err(internal)? {
        return Err(not_found("Repository not found"));
    }
    tracing::info!(repo_id = %id, "repository deleted");
    Ok(Json(MessageResponse {
        message: "Repository deleted successfully",
    }))
}

// ============ GET /files/{id}/content ============

#[derive(Serialize)]
struct ContentResponse {
    content: String,
}

async fn handle_file_content(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ContentResponse>, AppError> {
    let content = state
        .store
        .file_content(&id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found("File content not found"))?;
    Ok(Json(ContentResponse { content }))
}

// ============ POST /repos/{id}/chat ============

#[derive(Deserialize)]
struct ChatBody {
    #[serde(default)]
    question: String,
}

async fn handle_chat(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ChatBody>,
) -> Result<Json<Answer>, AppError> {
    let question = body.question.trim();
    if question.is_empty() {
        return Err(bad_request("Question is required"));
    }

    match state.ask(&id, question).await {
        Ok(Some(answer)) => Ok(Json(answer)),
        Ok(None) => Err(not_found("Repository not found")),
        Err(e) => Err(internal(e)),
    }
}
