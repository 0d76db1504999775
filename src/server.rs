//! HTTP surface for the assistant.
//!
//! Exposes the ingest/ask/forget pipeline as a JSON API. The process
//! holds a single session slot behind a mutex: `POST /ingest` replaces
//! it, questions run against it, and the mutex serializes requests so
//! turns never interleave.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/ingest` | Ingest a document (`{content_base64, format}`), open a session |
//! | `POST` | `/ask` | Ask within the session's conversation (`{question}`) |
//! | `POST` | `/ask_detached` | Ask without reading or extending history |
//! | `POST` | `/forget` | Evict the session's index and drop the session |
//! | `GET`  | `/session` | Current session status |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! All error responses share one shape:
//!
//! ```json
//! { "error": { "code": "payload_too_large", "message": "document is ... bytes" } }
//! ```
//!
//! Error codes: `bad_request` (400), `credential_rejected` (401),
//! `not_found` (404), `timeout` (408), `payload_too_large` (413),
//! `unsupported_format` (415), `empty_document` / `extraction_failed`
//! (422), `internal` (500), `embedding_service` / `generation_service`
//! (502).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support
//! browser-based clients.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};

use crate::assistant::Assistant;
use crate::config::Config;
use crate::error::Error;
use crate::extract::DocumentFormat;
use crate::models::{Credential, ScoredPassage};
use crate::session::{Session, SessionStatus};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    assistant: Arc<Assistant>,
    /// The process-wide session slot. Each ingest replaces it; the mutex
    /// serializes requests so only one question runs at a time.
    session: Arc<Mutex<Option<Session>>>,
    credential: Credential,
}

/// Starts the HTTP server.
///
/// Binds to the address configured in `[server].bind` and runs until the
/// process is terminated. The credential is fixed at startup and used
/// for every ingestion.
pub async fn run_server(
    config: &Config,
    assistant: Arc<Assistant>,
    credential: Credential,
) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();

    let state = AppState {
        assistant,
        session: Arc::new(Mutex::new(None)),
        credential,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/ingest", post(handle_ingest))
        .route("/ask", post(handle_ask))
        .route("/ask_detached", post(handle_ask_detached))
        .route("/forget", post(handle_forget))
        .route("/session", get(handle_session))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    println!("lectern listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

/// Inner error detail with a machine-readable code and human-readable message.
#[derive(Serialize)]
struct ErrorDetail {
    code: String,
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

/// Constructs a 400 Bad Request error.
fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

/// Constructs a 404 Not Found error.
fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

/// Maps each pipeline error kind to its HTTP status and error code.
fn map_error(err: Error) -> AppError {
    let message = err.to_string();
    let (status, code) = match err {
        Error::PayloadTooLarge { .. } => (StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large"),
        Error::UnsupportedFormat(_) => (StatusCode::UNSUPPORTED_MEDIA_TYPE, "unsupported_format"),
        Error::EmptyDocument => (StatusCode::UNPROCESSABLE_ENTITY, "empty_document"),
        Error::Extraction(_) => (StatusCode::UNPROCESSABLE_ENTITY, "extraction_failed"),
        Error::Credential(_) => (StatusCode::UNAUTHORIZED, "credential_rejected"),
        Error::Timeout { .. } => (StatusCode::REQUEST_TIMEOUT, "timeout"),
        Error::IndexNotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        Error::EmbeddingService(_) => (StatusCode::BAD_GATEWAY, "embedding_service"),
        Error::GenerationService(_) => (StatusCode::BAD_GATEWAY, "generation_service"),
        Error::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
    };
    AppError {
        status,
        code: code.to_string(),
        message,
    }
}

// ============ GET /health ============

/// JSON response body for `GET /health`.
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

/// Handler for `GET /health`.
async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /ingest ============

/// JSON request body for `POST /ingest`.
#[derive(Deserialize)]
struct IngestRequest {
    /// Document bytes, base64-encoded (standard alphabet).
    content_base64: String,
    /// Document format: `"text"` or `"epub"`.
    format: String,
}

/// Handler for `POST /ingest`.
///
/// Decodes the document, ingests it, and installs the resulting session
/// in the process slot, replacing any previous one. On failure the slot
/// is emptied: a botched upload never leaves a stale conversation behind.
async fn handle_ingest(
    State(state): State<AppState>,
    Json(req): Json<IngestRequest>,
) -> Result<Json<SessionStatus>, AppError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(&req.content_base64)
        .map_err(|e| bad_request(format!("content_base64 is not valid base64: {}", e)))?;
    let format: DocumentFormat = req.format.parse().map_err(map_error)?;

    let mut slot = state.session.lock().await;
    match state
        .assistant
        .ingest(bytes, format, &state.credential)
        .await
    {
        Ok(session) => {
            let status = session.status();
            *slot = Some(session);
            Ok(Json(status))
        }
        Err(err) => {
            *slot = None;
            Err(map_error(err))
        }
    }
}

// ============ POST /ask, POST /ask_detached ============

/// JSON request body for the ask endpoints.
#[derive(Deserialize)]
struct AskRequest {
    question: String,
}

/// JSON response body for the ask endpoints.
#[derive(Serialize)]
struct AskResponse {
    answer: String,
    sources: Vec<ScoredPassage>,
}

/// Handler for `POST /ask`.
async fn handle_ask(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> Result<Json<AskResponse>, AppError> {
    if req.question.trim().is_empty() {
        return Err(bad_request("question must not be empty"));
    }

    let mut slot = state.session.lock().await;
    let session = slot
        .as_mut()
        .ok_or_else(|| not_found("no active session; ingest a document first"))?;

    let answer = state
        .assistant
        .ask(session, &req.question)
        .await
        .map_err(map_error)?;

    Ok(Json(AskResponse {
        answer: answer.text,
        sources: answer.sources,
    }))
}

/// Handler for `POST /ask_detached`.
///
/// Same as `/ask` but the conversation history is neither consulted nor
/// extended.
async fn handle_ask_detached(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> Result<Json<AskResponse>, AppError> {
    if req.question.trim().is_empty() {
        return Err(bad_request("question must not be empty"));
    }

    let slot = state.session.lock().await;
    let session = slot
        .as_ref()
        .ok_or_else(|| not_found("no active session; ingest a document first"))?;

    let answer = state
        .assistant
        .ask_detached(session, &req.question)
        .await
        .map_err(map_error)?;

    Ok(Json(AskResponse {
        answer: answer.text,
        sources: answer.sources,
    }))
}

// ============ POST /forget ============

/// JSON response body for `POST /forget`.
#[derive(Serialize)]
struct ForgetResponse {
    forgotten: bool,
}

/// Handler for `POST /forget`.
///
/// Evicts the session's index and empties the slot. Calling with no
/// active session succeeds and reports `forgotten: false`.
async fn handle_forget(State(state): State<AppState>) -> Result<Json<ForgetResponse>, AppError> {
    let mut slot = state.session.lock().await;
    match slot.as_mut() {
        Some(session) => {
            state.assistant.forget(session).await.map_err(map_error)?;
            *slot = None;
            Ok(Json(ForgetResponse { forgotten: true }))
        }
        None => Ok(Json(ForgetResponse { forgotten: false })),
    }
}

// ============ GET /session ============

/// Handler for `GET /session`.
async fn handle_session(State(state): State<AppState>) -> Result<Json<SessionStatus>, AppError> {
    let slot = state.session.lock().await;
    match slot.as_ref() {
        Some(session) => Ok(Json(session.status())),
        None => Err(not_found("no active session")),
    }
}
