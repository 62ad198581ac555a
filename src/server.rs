//! JSON HTTP API.
//!
//! Exposes the knowledge-base pipeline and the progress prediction engine
//! to the issue-tracker integration frontend.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/documents` | List knowledge-base documents |
//! | `POST` | `/documents` | Upload documents, start a rebuild |
//! | `DELETE` | `/documents/{filename}` | Delete a document, start a rebuild |
//! | `GET`  | `/tasks/{id}` | Poll rebuild progress |
//! | `POST` | `/index/reload` | Re-point to the persisted index generation |
//! | `POST` | `/chat` | Retrieval-augmented question answering |
//! | `POST` | `/progress/project` | Weekly project forecast |
//! | `POST` | `/progress/issue` | Daily single-issue forecast |
//! | `POST` | `/analysis` | Generated project-management analysis |
//!
//! # Error Contract
//!
//! All error responses share one schema:
//!
//! ```json
//! { "error": { "code": "conflict", "message": "an index rebuild is already in progress" } }
//! ```
//!
//! Codes mirror the crate error taxonomy: `validation` (400), `conflict`
//! (409), `not_found` (404), `extraction` (422), `embedding`/`generation`
//! (502), `internal` (500).
//!
//! Uploads and deletes return `202 Accepted` with a task id immediately;
//! the rebuild runs on a background worker and callers poll `/tasks/{id}`.
//! Query and prediction endpoints are read-only and run concurrently with
//! rebuilds against the still-active generation.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use base64::Engine;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use uuid::Uuid;

use crate::chat::{analyze_issues, QueryPipeline};
use crate::config::Config;
use crate::embedding::create_embedder;
use crate::error::{Error, Result};
use crate::generate::{create_chat_model, ChatModel};
use crate::index::{Generation, IndexHandle};
use crate::indexer::Indexer;
use crate::models::{ChatMessage, Citation, IssueRecord};
use crate::predict::{PredictionEngine, ProgressForecast};
use crate::store::DocumentStore;
use crate::tasks::{TaskRegistry, TaskSnapshot};

/// Shared application state: every component wired from one [`Config`].
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    indexer: Arc<Indexer>,
    pipeline: Arc<QueryPipeline>,
    engine: Arc<PredictionEngine>,
    chat: Arc<dyn ChatModel>,
}

impl AppState {
    /// Wires the document store, embedder, chat model, task registry,
    /// index handle, and prediction engine from configuration.
    ///
    /// When a persisted index generation exists it becomes the active one,
    /// so a restart serves the last completed build without a rebuild.
    pub fn from_config(config: Config) -> Result<Self> {
        let store = DocumentStore::open(&config.storage.data_dir)?;
        let embedder = create_embedder(&config.embedding)?;
        let chat = create_chat_model(&config.generation)?;
        let registry = Arc::new(TaskRegistry::new(Duration::from_secs(
            config.tasks.retention_secs,
        )));

        let initial = match Generation::load(&config.storage.index_dir) {
            Ok(generation) => {
                if !generation.is_empty() && generation.dims() != embedder.dims() {
                    warn!(
                        persisted = generation.dims(),
                        configured = embedder.dims(),
                        "persisted index generation does not match the configured embedding dimensions; queries will fail until a rebuild"
                    );
                }
                info!(
                    chunks = generation.len(),
                    model = generation.model_name(),
                    "loaded persisted index generation"
                );
                generation
            }
            Err(Error::NotFound(_)) => Generation::empty(embedder.model_name(), embedder.dims()),
            Err(e) => return Err(e),
        };
        let handle = Arc::new(IndexHandle::new(initial));

        let indexer = Arc::new(Indexer::new(
            &config,
            store,
            Arc::clone(&embedder),
            Arc::clone(&handle),
            registry,
        ));
        let pipeline = Arc::new(QueryPipeline::new(
            embedder,
            Arc::clone(&chat),
            handle,
            config.retrieval.top_k,
        ));
        let engine = Arc::new(PredictionEngine::new(&config.prediction));

        Ok(Self {
            config: Arc::new(config),
            indexer,
            pipeline,
            engine,
            chat,
        })
    }

    pub fn indexer(&self) -> &Arc<Indexer> {
        &self.indexer
    }

    pub fn pipeline(&self) -> &Arc<QueryPipeline> {
        &self.pipeline
    }
}

/// Builds the application router. Exposed for in-process integration tests.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/documents", get(handle_list_documents).post(handle_upload))
        .route("/documents/{filename}", delete(handle_delete_document))
        .route("/tasks/{id}", get(handle_task_status))
        .route("/index/reload", post(handle_reload_index))
        .route("/chat", post(handle_chat))
        .route("/progress/project", post(handle_project_progress))
        .route("/progress/issue", post(handle_issue_progress))
        .route("/analysis", post(handle_analysis))
        .layer(cors)
        .with_state(state)
}

/// Binds the configured address and serves until the process terminates.
pub async fn run_server(state: AppState) -> Result<()> {
    let bind_addr = state.config.server.bind.clone();
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Extraction(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Embedding(_) | Error::Generation(_) => StatusCode::BAD_GATEWAY,
            Error::Io(_) | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError {
            status,
            code: err.kind(),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
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

// ============ GET /documents ============

#[derive(Serialize)]
struct DocumentListResponse {
    documents: Vec<String>,
}

async fn handle_list_documents(
    State(state): State<AppState>,
) -> std::result::Result<Json<DocumentListResponse>, ApiError> {
    let documents = state.indexer.store().list()?;
    Ok(Json(DocumentListResponse { documents }))
}

// ============ POST /documents ============

#[derive(Deserialize)]
struct UploadRequest {
    files: Vec<UploadedFile>,
}

#[derive(Deserialize)]
struct UploadedFile {
    filename: String,
    content_base64: String,
}

#[derive(Serialize)]
struct TaskAccepted {
    task_id: Uuid,
    message: String,
}

async fn handle_upload(
    State(state): State<AppState>,
    Json(request): Json<UploadRequest>,
) -> std::result::Result<(StatusCode, Json<TaskAccepted>), ApiError> {
    let mut files = Vec::with_capacity(request.files.len());
    for file in request.files {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(file.content_base64.as_bytes())
            .map_err(|e| {
                Error::validation(format!(
                    "invalid base64 content for '{}': {}",
                    file.filename, e
                ))
            })?;
        files.push((file.filename, bytes));
    }

    let task_id = state.indexer.upload(&files)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(TaskAccepted {
            task_id,
            message: "upload stored; index rebuild started".to_string(),
        }),
    ))
}

// ============ DELETE /documents/{filename} ============

async fn handle_delete_document(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> std::result::Result<(StatusCode, Json<TaskAccepted>), ApiError> {
    let task_id = state.indexer.remove(&filename)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(TaskAccepted {
            task_id,
            message: format!("deleted {}; index rebuild started", filename),
        }),
    ))
}

// ============ GET /tasks/{id} ============

async fn handle_task_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> std::result::Result<Json<TaskSnapshot>, ApiError> {
    let id = Uuid::parse_str(&id)
        .map_err(|_| Error::validation(format!("invalid task id: {}", id)))?;
    let snapshot = state.indexer.registry().status(id)?;
    Ok(Json(snapshot))
}

// ============ POST /index/reload ============

#[derive(Serialize)]
struct ReloadResponse {
    message: String,
    chunks: usize,
}

async fn handle_reload_index(
    State(state): State<AppState>,
) -> std::result::Result<Json<ReloadResponse>, ApiError> {
    let generation = Generation::load(&state.config.storage.index_dir)?;
    let chunks = generation.len();
    state.indexer.handle().activate(generation);
    Ok(Json(ReloadResponse {
        message: "persisted index generation is now active".to_string(),
        chunks,
    }))
}

// ============ POST /chat ============

#[derive(Deserialize)]
struct ChatRequest {
    question: String,
    #[serde(default)]
    history: Vec<ChatMessage>,
}

#[derive(Serialize)]
struct ChatResponse {
    answer: String,
    sources: Vec<Citation>,
}

async fn handle_chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> std::result::Result<Json<ChatResponse>, ApiError> {
    let answer = state
        .pipeline
        .answer(&request.question, &request.history)
        .await?;
    Ok(Json(ChatResponse {
        answer: answer.answer,
        sources: answer.sources,
    }))
}

// ============ POST /progress/project ============

#[derive(Deserialize)]
struct ProjectProgressRequest {
    issues: Vec<IssueRecord>,
}

async fn handle_project_progress(
    State(state): State<AppState>,
    Json(request): Json<ProjectProgressRequest>,
) -> std::result::Result<Json<ProgressForecast>, ApiError> {
    let today = Utc::now().date_naive();
    let forecast = state.engine.project_progress(&request.issues, today)?;
    Ok(Json(forecast))
}

// ============ POST /progress/issue ============

#[derive(Deserialize)]
struct IssueProgressRequest {
    issue: IssueRecord,
}

async fn handle_issue_progress(
    State(state): State<AppState>,
    Json(request): Json<IssueProgressRequest>,
) -> std::result::Result<Json<ProgressForecast>, ApiError> {
    let today = Utc::now().date_naive();
    let forecast = state.engine.issue_progress(&request.issue, today)?;
    Ok(Json(forecast))
}

// ============ POST /analysis ============

#[derive(Deserialize)]
struct AnalysisRequest {
    issues: Vec<IssueRecord>,
}

#[derive(Serialize)]
struct AnalysisResponse {
    analysis: String,
}

async fn handle_analysis(
    State(state): State<AppState>,
    Json(request): Json<AnalysisRequest>,
) -> std::result::Result<Json<AnalysisResponse>, ApiError> {
    let analysis = analyze_issues(state.chat.as_ref(), &request.issues).await?;
    Ok(Json(AnalysisResponse { analysis }))
}
