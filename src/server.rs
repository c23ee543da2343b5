//! HTTP server for `trail serve`.
//!
//! A thin JSON layer over the same operations the CLI runs.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/search` | Lexical, semantic, or hybrid search |
//! | `POST` | `/ask` | Grounded answer with cited sources |
//! | `GET`  | `/records/{id}` | Fetch one record |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `embeddings_disabled` (400),
//! `timeout` (408), `completion_failed` (502), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so a local browser
//! extension or page can call the API.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use webtrail_core::completion::CompletionProvider;
use webtrail_core::embedding::EmbeddingProvider;
use webtrail_core::error::{kind_of, TrailError};
use webtrail_core::models::SearchResult;
use webtrail_core::rag::Answer;
use webtrail_core::search::{SearchMode, SearchRequest};
use webtrail_core::store::RecordStore;

use crate::ask::{answer_question, ask_options};
use crate::config::Config;
use crate::db;
use crate::embedding;
use crate::get::{get_record, RecordResponse};
use crate::llm;
use crate::search::{search_records, FilterArgs};
use crate::sqlite_store::SqliteStore;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    store: Arc<dyn RecordStore>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    completer: Option<Arc<dyn CompletionProvider>>,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn RecordStore>,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        completer: Option<Arc<dyn CompletionProvider>>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            store,
            embedder,
            completer,
        }
    }
}

/// Build the router with CORS applied.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/search", post(handle_search))
        .route("/ask", post(handle_ask))
        .route("/records/{id}", get(handle_get_record))
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server on `[server].bind` and runs until the process
/// is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let pool = db::connect(config).await?;
    let store: Arc<dyn RecordStore> = Arc::new(SqliteStore::new(pool));
    let embedder = embedding::create_provider(&config.embedding)?;
    let completer = llm::create_completer(&config.llm)?;

    let state = AppState::new(config.clone(), store, embedder, completer);
    let app = router(state);

    println!("webtrail server listening on http://{}", bind_addr);
    tracing::info!(bind = %bind_addr, "server started");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
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

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
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

fn app_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> AppError {
    AppError {
        status,
        code,
        message: message.into(),
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    app_error(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn not_found(message: impl Into<String>) -> AppError {
    app_error(StatusCode::NOT_FOUND, "not_found", message)
}

fn embeddings_disabled() -> AppError {
    app_error(
        StatusCode::BAD_REQUEST,
        "embeddings_disabled",
        "semantic search requires an embedding provider",
    )
}

/// Map a failed operation to a status by its [`TrailError`] kind.
fn classify_error(err: anyhow::Error) -> AppError {
    let msg = err.to_string();
    match kind_of(&err) {
        Some(TrailError::Timeout { .. }) => {
            app_error(StatusCode::REQUEST_TIMEOUT, "timeout", msg)
        }
        Some(TrailError::CompletionFailure { .. }) => {
            app_error(StatusCode::BAD_GATEWAY, "completion_failed", msg)
        }
        Some(TrailError::MalformedInput { .. }) => bad_request(msg),
        _ => {
            tracing::error!(error = %msg, "request failed");
            app_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", msg)
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    embeddings: bool,
    completion: bool,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        embeddings: state.embedder.is_some(),
        completion: state.completer.is_some(),
    })
}

// ============ POST /search ============

#[derive(Debug, Deserialize)]
pub struct SearchBody {
    pub query: String,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default)]
    pub since: Option<String>,
    #[serde(default)]
    pub until: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Serialize)]
struct SearchResponse {
    mode: &'static str,
    results: Vec<SearchResult>,
}

fn filter_args(
    categories: Vec<String>,
    domains: Vec<String>,
    since: Option<String>,
    until: Option<String>,
) -> FilterArgs {
    FilterArgs {
        categories,
        domains,
        since,
        until,
    }
}

async fn handle_search(
    State(state): State<AppState>,
    Json(body): Json<SearchBody>,
) -> Result<Json<SearchResponse>, AppError> {
    if body.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let mode = match body.mode.as_deref() {
        Some(m) => m.parse::<SearchMode>().map_err(|e| bad_request(e.to_string()))?,
        None => SearchMode::Hybrid,
    };
    if mode == SearchMode::Semantic && state.embedder.is_none() {
        return Err(embeddings_disabled());
    }
    let limit = body.limit.unwrap_or(state.config.retrieval.final_limit);
    if limit == 0 {
        return Err(bad_request("limit must be >= 1"));
    }
    let filters = filter_args(body.categories, body.domains, body.since, body.until)
        .build()
        .map_err(|e| bad_request(e.to_string()))?;

    let req = SearchRequest {
        query: body.query,
        mode,
        filters,
        limit,
        rrf_k: state.config.retrieval.rrf_k,
    };
    let timeout = body
        .timeout_secs
        .unwrap_or(state.config.retrieval.timeout_secs);
    let results = search_records(state.store.as_ref(), state.embedder.as_deref(), &req, timeout)
        .await
        .map_err(classify_error)?;

    Ok(Json(SearchResponse {
        mode: mode.as_str(),
        results,
    }))
}

// ============ POST /ask ============

#[derive(Debug, Deserialize)]
pub struct AskBody {
    pub question: String,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default)]
    pub since: Option<String>,
    #[serde(default)]
    pub until: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

async fn handle_ask(
    State(state): State<AppState>,
    Json(body): Json<AskBody>,
) -> Result<Json<Answer>, AppError> {
    if body.question.trim().is_empty() {
        return Err(bad_request("question must not be empty"));
    }
    let Some(completer) = state.completer.as_deref() else {
        return Err(bad_request("ask requires a completion provider"));
    };
    let filters = filter_args(body.categories, body.domains, body.since, body.until);
    let opts = ask_options(&state.config, body.limit, &filters)
        .map_err(|e| bad_request(e.to_string()))?;
    let timeout = body
        .timeout_secs
        .unwrap_or(state.config.retrieval.timeout_secs);

    let answer = answer_question(
        state.store.as_ref(),
        state.embedder.as_deref(),
        completer,
        &body.question,
        &opts,
        timeout,
    )
    .await
    .map_err(classify_error)?;

    Ok(Json(answer))
}

// ============ GET /records/{id} ============

async fn handle_get_record(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RecordResponse>, AppError> {
    match get_record(state.store.as_ref(), &id).await {
        Ok(Some(rec)) => Ok(Json(rec)),
        Ok(None) => Err(not_found(format!("record not found: {}", id))),
        Err(e) => Err(classify_error(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_classify_error_by_kind() {
        let e = classify_error(TrailError::Timeout { seconds: 3 }.into());
        assert_eq!(e.status, StatusCode::REQUEST_TIMEOUT);
        assert_eq!(e.code, "timeout");

        let e = classify_error(
            anyhow::Error::from(TrailError::CompletionFailure {
                reason: "503".into(),
            })
            .context("ask"),
        );
        assert_eq!(e.status, StatusCode::BAD_GATEWAY);
        assert_eq!(e.code, "completion_failed");

        let e = classify_error(anyhow!("disk I/O error"));
        assert_eq!(e.code, "internal");
    }
}
