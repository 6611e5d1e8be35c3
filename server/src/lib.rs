use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use search_core::document::columns;
use search_core::{BuildStats, DocumentMeta, IndexBuilder, SearchEngine, SearchResult};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::{Component, PathBuf};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

type ApiError = (StatusCode, Json<serde_json::Value>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

#[derive(Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: Option<String>,
    /// Result count; absent means every match, for client-side paging.
    #[serde(default)]
    pub k: Option<usize>,
}

#[derive(Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub took_ms: u128,
    pub took_s: f64,
    pub total_hits: usize,
    pub results: Vec<SearchResult>,
}

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SearchEngine>,
    /// Directory holding downloaded attachments, addressed by their `files:path` entries.
    pub files_root: PathBuf,
    pub admin_token: Option<String>,
}

impl AppState {
    pub fn new(engine: SearchEngine, files_root: impl Into<PathBuf>) -> Self {
        Self {
            engine: Arc::new(engine),
            files_root: files_root.into(),
            admin_token: std::env::var("ADMIN_TOKEN").ok().filter(|t| !t.is_empty()),
        }
    }

    pub fn with_admin_token(mut self, token: Option<String>) -> Self {
        self.admin_token = token;
        self
    }
}

pub fn build_app(state: AppState) -> Router {
    // CORS: read CORS_ALLOW_ORIGIN (comma-separated) or allow Any by default
    let cors = match std::env::var("CORS_ALLOW_ORIGIN") {
        Ok(val) => {
            let origins: Vec<_> = val.split(',').filter_map(|s| s.trim().parse().ok()).collect();
            if origins.is_empty() {
                CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
            } else {
                CorsLayer::new().allow_origin(AllowOrigin::list(origins)).allow_methods(Any).allow_headers(Any)
            }
        }
        Err(_) => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
    };

    let files = ServeDir::new(&state.files_root);
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/search", get(search_handler))
        .route("/doc/:doc_id", get(doc_handler))
        .route("/download/*path", get(download_handler))
        .route("/index/rebuild", post(rebuild_handler))
        .nest_service("/file", files)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

pub async fn search_handler(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, ApiError> {
    let query = params.q.unwrap_or_default();
    if query.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "Query is required"));
    }
    let start = std::time::Instant::now();
    let engine = state.engine.clone();
    let q = query.clone();
    let k = params.k;
    let results = tokio::task::spawn_blocking(move || engine.search(&q, k))
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("search task failed: {e}")))?;

    let elapsed = start.elapsed();
    Ok(Json(SearchResponse {
        query,
        took_ms: elapsed.as_millis(),
        took_s: elapsed.as_secs_f64(),
        total_hits: results.len(),
        results,
    }))
}

pub async fn doc_handler(
    State(state): State<AppState>,
    Path(doc_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let engine = state.engine.clone();
    let id = doc_id.clone();
    let row = tokio::task::spawn_blocking(move || {
        let store = engine.connection().ensure_connected()?;
        store.row(&engine.config().document_table, &id, &[])
    })
    .await
    .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
    .map_err(|e| api_error(StatusCode::SERVICE_UNAVAILABLE, e.to_string()))?;

    let row = row.ok_or_else(|| api_error(StatusCode::NOT_FOUND, "not found"))?;
    let meta = DocumentMeta::from_row(&doc_id, &row);
    let text = row.get(columns::TEXT).map(|t| String::from_utf8_lossy(t).into_owned()).unwrap_or_default();
    Ok(Json(json!({
        "doc_id": doc_id,
        "title": meta.title,
        "url": meta.display_url(),
        "parent_url": meta.parent_url,
        "type": meta.doc_type,
        "date": meta.date,
        "file_paths": meta.file_paths,
        "text": text,
    })))
}

/// Relative attachment path with every component a plain name.
fn safe_relative(raw: &str) -> Option<PathBuf> {
    let path = std::path::Path::new(raw);
    let ok = !raw.is_empty() && path.components().all(|c| matches!(c, Component::Normal(_)));
    ok.then(|| path.to_path_buf())
}

pub async fn download_handler(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let rel = safe_relative(&path).ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "invalid path"))?;
    let bytes = tokio::fs::read(state.files_root.join(rel))
        .await
        .map_err(|_| api_error(StatusCode::NOT_FOUND, "file not found"))?;
    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream"), (header::CONTENT_DISPOSITION, "attachment")],
        bytes,
    ))
}

pub async fn rebuild_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<BuildStats>, ApiError> {
    authorize(&state, &headers)?;
    let engine = state.engine.clone();
    let stats = tokio::task::spawn_blocking(move || -> anyhow::Result<BuildStats> {
        let store = engine.connection().ensure_connected()?;
        IndexBuilder::new(engine.config()).build(store.as_ref(), store.as_ref())
    })
    .await
    .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
    .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}")))?;
    tracing::info!(documents = stats.documents_processed, entries = stats.entries_written, "index rebuilt");
    Ok(Json(stats))
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let required = match &state.admin_token {
        Some(t) => t,
        None => return Err(api_error(StatusCode::UNAUTHORIZED, "ADMIN_TOKEN not set")),
    };
    let provided = headers.get("X-ADMIN-TOKEN").and_then(|v| v.to_str().ok()).unwrap_or("");
    if provided == required {
        Ok(())
    } else {
        Err(api_error(StatusCode::UNAUTHORIZED, "invalid admin token"))
    }
}
