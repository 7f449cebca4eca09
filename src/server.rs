//! HTTP API over a [`SyncEngine`].
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/health` | Health check (returns version) |
//! | `POST`   | `/sync` | Full two-phase sync, returns the report |
//! | `PUT`    | `/documents/{*path}` | Save the request body as the document at `path` |
//! | `GET`    | `/documents/{*path}` | Document with outgoing links and backlinks |
//! | `DELETE` | `/ids/{id}` | Delete a document by id |
//! | `GET`    | `/search?q=&limit=` | Semantic search |
//! | `GET`    | `/stats` | Store counts |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "q must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404),
//! `service_unavailable` (503), `internal` (500).

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

use crate::error::is_service_unavailable;
use crate::models::{Document, Link, SearchHit, StoreStats};
use crate::scan::validate_path;
use crate::sync::{SyncEngine, SyncReport};

/// Bind to `[server].bind` and serve until the process is terminated.
pub async fn run_server(engine: Arc<SyncEngine>) -> anyhow::Result<()> {
    let bind_addr = engine.config().server.bind.clone();
    let listener = TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "server listening");
    serve(listener, engine).await
}

/// Serve on an already bound listener.
pub async fn serve(listener: TcpListener, engine: Arc<SyncEngine>) -> anyhow::Result<()> {
    axum::serve(listener, router(engine)).await?;
    Ok(())
}

pub fn router(engine: Arc<SyncEngine>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/sync", post(handle_sync))
        .route(
            "/documents/{*path}",
            get(handle_get_document).put(handle_save_document),
        )
        .route("/ids/{id}", delete(handle_delete))
        .route("/search", get(handle_search))
        .route("/stats", get(handle_stats))
        .layer(cors)
        .with_state(engine)
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

/// 503 for a missing embedding provider, 500 for everything else.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        if is_service_unavailable(&err) {
            return AppError {
                status: StatusCode::SERVICE_UNAVAILABLE,
                code: "service_unavailable".to_string(),
                message: err.to_string(),
            };
        }
        tracing::warn!(error = %format!("{:#}", err), "request failed");
        AppError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal".to_string(),
            message: format!("{:#}", err),
        }
    }
}

type ApiResult<T> = Result<Json<T>, AppError>;

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

// ============ POST /sync ============

async fn handle_sync(State(engine): State<Arc<SyncEngine>>) -> ApiResult<SyncReport> {
    Ok(Json(engine.sync_all().await?))
}

// ============ /documents/{*path} ============

/// A document together with its place in the link graph.
#[derive(Serialize)]
struct DocumentView {
    document: Document,
    outgoing: Vec<Link>,
    backlinks: Vec<Link>,
}

async fn handle_get_document(
    State(engine): State<Arc<SyncEngine>>,
    Path(path): Path<String>,
) -> ApiResult<DocumentView> {
    let document = engine
        .get_by_path(&path)
        .await?
        .ok_or_else(|| not_found(format!("document not found: {}", path)))?;
    let outgoing = engine.outgoing(&document.id).await?;
    let backlinks = engine.backlinks(&document.id).await?;
    Ok(Json(DocumentView {
        document,
        outgoing,
        backlinks,
    }))
}

async fn handle_save_document(
    State(engine): State<Arc<SyncEngine>>,
    Path(path): Path<String>,
    body: String,
) -> ApiResult<Document> {
    validate_path(&path, engine.filter()).map_err(|e| bad_request(e.to_string()))?;
    Ok(Json(engine.save(&path, &body).await?))
}

// ============ DELETE /ids/{id} ============

#[derive(Serialize)]
struct DeleteResponse {
    deleted: bool,
}

async fn handle_delete(
    State(engine): State<Arc<SyncEngine>>,
    Path(id): Path<String>,
) -> ApiResult<DeleteResponse> {
    if engine.delete(&id).await? {
        Ok(Json(DeleteResponse { deleted: true }))
    } else {
        Err(not_found(format!("document not found: {}", id)))
    }
}

// ============ GET /search ============

#[derive(Deserialize)]
struct SearchParams {
    #[serde(default)]
    q: String,
    limit: Option<usize>,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<SearchHit>,
}

async fn handle_search(
    State(engine): State<Arc<SyncEngine>>,
    Query(params): Query<SearchParams>,
) -> ApiResult<SearchResponse> {
    if params.q.trim().is_empty() {
        return Err(bad_request("q must not be empty"));
    }
    let limit = params
        .limit
        .unwrap_or(engine.config().search.default_limit)
        .max(1);
    let results = engine.search(&params.q, limit).await?;
    Ok(Json(SearchResponse { results }))
}

// ============ GET /stats ============

async fn handle_stats(State(engine): State<Arc<SyncEngine>>) -> ApiResult<StoreStats> {
    Ok(Json(engine.stats().await?))
}
