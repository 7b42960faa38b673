//! HTTP server.
//!
//! Exposes ingestion and retrieval as a JSON HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/ingest` | Multipart upload (`file`, `owner`, optional `doc_id`) |
//! | `POST` | `/ingest/url` | Ingest pre-fetched HTML by URL |
//! | `POST` | `/search` | Hybrid search |
//! | `GET`  | `/documents` | List documents for an owner |
//! | `GET`  | `/documents/{id}/status` | Status of one document |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! All error responses follow the same schema:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "owner is required" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500).
//!
//! An ingest attempt that parses and commits nothing is still a 200: the
//! response carries `status = "failed"` and the error message, because the
//! attempt itself completed and was recorded.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients.

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::config::Config;
use crate::docs;
use crate::ingest::{IngestOutcome, IngestRequest, IngestionPipeline};
use crate::models::DocumentStatus;
use crate::search::{HybridSearchEngine, SearchFilters};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub pipeline: Arc<IngestionPipeline>,
    pub engine: Arc<HybridSearchEngine>,
}

/// Starts the HTTP server on the address configured in `[server].bind`.
/// Runs until the process is terminated.
pub async fn run_server(config: &Config, state: AppState) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = router(state).layer(cors);

    println!("docshelf server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ingest", post(handle_ingest))
        .route("/ingest/url", post(handle_ingest_url))
        .route("/search", post(handle_search))
        .route("/documents", get(handle_list_documents))
        .route("/documents/{id}/status", get(handle_document_status))
        .route("/health", get(handle_health))
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`, `"not_found"`).
    code: String,
    /// Human-readable error message.
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

// ============ Ingest ============

#[derive(Serialize)]
struct IngestResponse {
    doc_id: String,
    filename: String,
    status: DocumentStatus,
    chunks: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
}

impl From<IngestOutcome> for IngestResponse {
    fn from(outcome: IngestOutcome) -> Self {
        Self {
            doc_id: outcome.doc_id,
            filename: outcome.filename,
            status: outcome.status,
            chunks: outcome.chunks,
            error_message: outcome.error_message,
        }
    }
}

async fn handle_ingest(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<IngestResponse>, AppError> {
    let mut bytes: Option<Vec<u8>> = None;
    let mut filename = String::new();
    let mut content_type = String::new();
    let mut owner: Option<String> = None;
    let mut doc_id: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("invalid multipart body: {}", e)))?
    {
        match field.name().unwrap_or("") {
            "file" => {
                filename = field.file_name().unwrap_or("upload").to_string();
                content_type = field.content_type().unwrap_or("").to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| bad_request(format!("failed to read file field: {}", e)))?;
                bytes = Some(data.to_vec());
            }
            "owner" => {
                owner = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| bad_request(format!("invalid owner field: {}", e)))?,
                );
            }
            "doc_id" => {
                doc_id = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| bad_request(format!("invalid doc_id field: {}", e)))?,
                );
            }
            _ => {}
        }
    }

    let bytes = bytes.ok_or_else(|| bad_request("file field is required"))?;
    let owner = owner
        .filter(|o| !o.trim().is_empty())
        .ok_or_else(|| bad_request("owner is required"))?;
    let doc_id = doc_id
        .filter(|d| !d.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let outcome = state
        .pipeline
        .ingest(IngestRequest {
            doc_id,
            owner,
            filename,
            content_type,
            bytes,
        })
        .await;

    Ok(Json(outcome.into()))
}

#[derive(Deserialize)]
struct IngestUrlRequest {
    url: String,
    html: String,
    #[serde(default = "default_html_content_type")]
    content_type: String,
    owner: String,
}

fn default_html_content_type() -> String {
    "text/html".to_string()
}

async fn handle_ingest_url(
    State(state): State<AppState>,
    Json(req): Json<IngestUrlRequest>,
) -> Result<Json<IngestResponse>, AppError> {
    if req.owner.trim().is_empty() {
        return Err(bad_request("owner is required"));
    }
    if req.url.trim().is_empty() {
        return Err(bad_request("url is required"));
    }

    let outcome = state
        .pipeline
        .ingest_url(&req.url, req.html.as_bytes(), &req.content_type, &req.owner)
        .await;

    Ok(Json(outcome.into()))
}

// ============ Search ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    owner: String,
    top_k: Option<i64>,
    doc_ids: Option<Vec<String>>,
}

#[derive(Serialize)]
struct SearchResponse {
    chunks: Vec<SearchResultChunk>,
    total: usize,
}

#[derive(Serialize)]
struct SearchResultChunk {
    doc_id: String,
    chunk_id: String,
    text: String,
    source: String,
    score: f64,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    if req.owner.trim().is_empty() {
        return Err(bad_request("owner is required"));
    }

    let filters = SearchFilters {
        doc_ids: req.doc_ids,
    };
    let hits = state
        .engine
        .search(&req.query, &req.owner, req.top_k, &filters)
        .await
        .map_err(|e| internal(format!("{:#}", e)))?;

    let chunks: Vec<SearchResultChunk> = hits
        .into_iter()
        .map(|hit| SearchResultChunk {
            source: hit.source().to_string(),
            doc_id: hit.doc_id,
            chunk_id: hit.chunk_id,
            text: hit.text,
            score: hit.score,
        })
        .collect();

    let total = chunks.len();
    Ok(Json(SearchResponse { chunks, total }))
}

// ============ Documents ============

#[derive(Deserialize)]
struct ListQuery {
    owner: String,
    #[serde(default = "default_limit")]
    limit: i64,
    #[serde(default)]
    offset: i64,
}

fn default_limit() -> i64 {
    50
}

async fn handle_list_documents(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<docs::DocumentList>, AppError> {
    if query.owner.trim().is_empty() {
        return Err(bad_request("owner is required"));
    }
    let list = docs::list_documents(&state.pool, &query.owner, query.limit, query.offset)
        .await
        .map_err(|e| internal(format!("{:#}", e)))?;
    Ok(Json(list))
}

#[derive(Deserialize)]
struct StatusQuery {
    owner: String,
}

async fn handle_document_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<docs::DocumentSummary>, AppError> {
    let summary = docs::document_status(&state.pool, &id, &query.owner)
        .await
        .map_err(|e| internal(format!("{:#}", e)))?
        .ok_or_else(|| not_found(format!("document {} not found", id)))?;
    Ok(Json(summary))
}

// ============ Health ============

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
