//! HTTP API.
//!
//! | Route          | Purpose                                           |
//! |----------------|---------------------------------------------------|
//! | `GET /health`  | Liveness probe, `{"ok": true}`                    |
//! | `POST /api/chat` | One chat turn, optionally enriched with jobs    |
//! | `POST /api/resume` | Multipart resume upload, extraction, critique |
//!
//! Errors are returned as `{"detail": "..."}` with the matching status.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Multipart, Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::chat::{ChatOrchestrator, ChatReply, ChatRequest, ResumeAnalysis};
use crate::extract::TextExtractor;
use crate::{AppError, Result};

/// Shared state of the HTTP handlers.
pub struct ApiState {
    /// Chat flow.
    pub orchestrator: ChatOrchestrator,
    /// Resume text extraction.
    pub extractor: Arc<dyn TextExtractor>,
    /// Directory receiving uploaded files.
    pub upload_dir: PathBuf,
    /// CORS allow-list; `"*"` allows any origin.
    pub allow_origins: Vec<String>,
}

/// Error body returned by handlers.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn bad_request(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            detail: detail.into(),
        }
    }

    fn internal(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            detail: detail.into(),
        }
    }
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::Completion(msg) => Self::internal(format!("NIM error: {msg}")),
            AppError::Extract(msg) | AppError::Http(msg) => Self::bad_request(msg),
            other => Self::internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

/// Build the application router.
pub fn router(state: Arc<ApiState>) -> Router {
    let origins = Arc::new(state.allow_origins.clone());

    Router::new()
        .route("/health", get(health))
        .route("/api/chat", post(chat))
        .route("/api/resume", post(upload_resume))
        .with_state(state)
        .layer(middleware::from_fn(move |request: Request, next: Next| {
            let origins = Arc::clone(&origins);
            async move { cors(&origins, request, next).await }
        }))
}

/// Serve the API on `listener` until `ct` fires.
///
/// # Errors
///
/// Returns `AppError::Http` if the server fails.
pub async fn serve(listener: TcpListener, state: Arc<ApiState>, ct: CancellationToken) -> Result<()> {
    let addr = listener
        .local_addr()
        .map_err(|err| AppError::Http(format!("listener has no address: {err}")))?;
    info!(%addr, "http api listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { ct.cancelled().await })
        .await
        .map_err(|err| AppError::Http(format!("http server failed: {err}")))?;

    info!("http api shut down");
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "ok": true }))
}

async fn chat(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<ChatRequest>,
) -> std::result::Result<Json<ChatReply>, ApiError> {
    let reply = state.orchestrator.chat(&request).await.map_err(|err| {
        error!(%err, "chat turn failed");
        ApiError::from(err)
    })?;
    Ok(Json(reply))
}

async fn upload_resume(
    State(state): State<Arc<ApiState>>,
    mut multipart: Multipart,
) -> std::result::Result<Json<ResumeAnalysis>, ApiError> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::bad_request(format!("invalid multipart body: {err}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or("upload").to_owned();
        let bytes = field
            .bytes()
            .await
            .map_err(|err| ApiError::bad_request(format!("failed to read upload: {err}")))?;
        upload = Some((file_name, bytes));
        break;
    }
    let (file_name, bytes) = upload.ok_or_else(|| ApiError::bad_request("missing `file` field"))?;

    tokio::fs::create_dir_all(&state.upload_dir)
        .await
        .map_err(|err| ApiError::internal(format!("cannot create upload dir: {err}")))?;
    let dest = state
        .upload_dir
        .join(format!("{}-{}", uuid::Uuid::new_v4(), sanitize_file_name(&file_name)));
    tokio::fs::write(&dest, &bytes)
        .await
        .map_err(|err| ApiError::internal(format!("cannot store upload: {err}")))?;
    info!(file = %dest.display(), size = bytes.len(), "resume uploaded");

    let extractor = Arc::clone(&state.extractor);
    let path = dest.clone();
    let (text, mime) = tokio::task::spawn_blocking(move || extractor.extract(&path))
        .await
        .map_err(|err| ApiError::internal(format!("extraction task failed: {err}")))?
        .map_err(|err| {
            warn!(%err, "resume extraction failed");
            ApiError::from(err)
        })?;
    info!(%mime, chars = text.len(), "resume text extracted");

    let analysis = state.orchestrator.analyze_resume(text).await.map_err(|err| {
        error!(%err, "resume analysis failed");
        ApiError::from(err)
    })?;
    Ok(Json(analysis))
}

/// Keep only the final path component and replace anything unusual.
fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.trim_matches('.').is_empty() {
        "upload".to_owned()
    } else {
        cleaned
    }
}

/// Add CORS headers and answer preflight requests.
async fn cors(origins: &[String], request: Request, next: Next) -> Response {
    let origin = request
        .headers()
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let allowed = origin
        .filter(|o| origins.iter().any(|a| a == "*" || a == o))
        .and_then(|o| HeaderValue::from_str(&o).ok());

    let mut response = if *request.method() == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(request).await
    };

    if let Some(origin) = allowed {
        let headers = response.headers_mut();
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
            HeaderValue::from_static("true"),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("GET, POST, OPTIONS"),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("content-type, authorization"),
        );
        headers.insert(header::VARY, HeaderValue::from_static("origin"));
    }
    response
}
