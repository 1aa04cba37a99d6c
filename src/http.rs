//! HTTP/JSON presentation adapter
//!
//! Endpoints:
//! - POST /api/merge-pdf      (`files`)
//! - POST /api/split-pdf      (`file`, `page_range`)
//! - POST /api/compress-pdf   (`file`, `quality`)
//! - POST /api/rotate-pdf     (`file`, `degrees`)
//! - POST /api/watermark-pdf  (`file`, `text`, `opacity`)
//! - POST /api/protect-pdf    (`file`, `password`)
//! - POST /api/unlock-pdf     (`file`, `password`)
//! - POST /api/pdf-info       (`file`)
//! - GET  /api/download/:name?clean=true|false
//! - GET  /api/download-all?files=a,b&clean=true|false
//! - GET  /health

use crate::config::ServiceConfig;
use crate::error::{Error, Result};
use crate::ops::{
    parse_opacity, CompressionQuality, InfoOutcome, MergeOutcome, OperationExecutor,
    SplitOutcome, SplitSelection, TransformOutcome, UploadedFile,
};
use crate::ratelimit::RateLimiter;
use crate::workspace::{ArtifactName, FetchedArtifact};
use async_trait::async_trait;
use axum::{
    extract::{ConnectInfo, DefaultBodyLimit, FromRequestParts, Multipart, Path, Query, State},
    http::{header, request::Parts, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

// ============================================================================
// State
// ============================================================================

#[derive(Clone)]
pub struct HttpState {
    pub executor: Arc<OperationExecutor>,
    pub limiter: Arc<RateLimiter>,
}

impl HttpState {
    pub fn new(executor: Arc<OperationExecutor>, limiter: Arc<RateLimiter>) -> Self {
        Self { executor, limiter }
    }

    pub fn from_config(config: &ServiceConfig) -> Result<Self> {
        Ok(Self::new(
            Arc::new(OperationExecutor::from_config(config)?),
            Arc::new(RateLimiter::new(config.rate_limit)),
        ))
    }
}

// ============================================================================
// Error Response
// ============================================================================

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

fn status_of(err: &Error) -> StatusCode {
    match err {
        Error::NoInputProvided
        | Error::NoValidInput { .. }
        | Error::InvalidFileType { .. }
        | Error::InvalidArgument { .. }
        | Error::InvalidParameter { .. }
        | Error::InvalidPageRange { .. }
        | Error::PageOutOfBounds { .. }
        | Error::InvalidPdf { .. }
        | Error::Base64Decode(_) => StatusCode::BAD_REQUEST,
        Error::ArtifactNotFound { .. } => StatusCode::NOT_FOUND,
        Error::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        Error::ToolTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = status_of(&self);
        if status.is_server_error() {
            tracing::error!(error = %self, code = self.code(), "Request failed");
        } else {
            tracing::warn!(error = %self, code = self.code(), "Request rejected");
        }

        let details = match &self {
            Error::ToolExecution { exit_code, .. } => Some(format!("exit code {}", exit_code)),
            Error::RateLimited { retry_after_secs } => {
                Some(format!("retry after {}s", retry_after_secs))
            }
            e if status == StatusCode::BAD_REQUEST => Some(e.to_string()),
            _ => None,
        };

        let body = Json(ErrorResponse {
            error: self.client_message(),
            code: self.code(),
            details,
        });

        let mut response = (status, body).into_response();
        if let Error::RateLimited { retry_after_secs } = self {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

// ============================================================================
// Client identity
// ============================================================================

/// Rate-limit key: peer address, else first `X-Forwarded-For` entry, else `unknown`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientKey(pub String);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for ClientKey {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> std::result::Result<Self, Self::Rejection> {
        if let Some(ConnectInfo(addr)) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
            return Ok(ClientKey(addr.ip().to_string()));
        }

        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());

        Ok(ClientKey(forwarded.unwrap_or("unknown").to_string()))
    }
}

// ============================================================================
// Multipart form
// ============================================================================

#[derive(Debug, Default)]
struct UploadForm {
    files: Vec<(String, UploadedFile)>,
    fields: HashMap<String, String>,
}

impl UploadForm {
    async fn read(mut multipart: Multipart) -> Result<Self> {
        let mut form = Self::default();

        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            let name = field.name().unwrap_or_default().to_string();
            match field.file_name().map(str::to_string) {
                Some(filename) => {
                    let data = field.bytes().await.map_err(multipart_error)?;
                    form.files
                        .push((name, UploadedFile::new(filename, data.to_vec())));
                }
                None => {
                    let text = field.text().await.map_err(multipart_error)?;
                    form.fields.insert(name, text);
                }
            }
        }

        Ok(form)
    }

    /// First upload under `name`
    fn file(&mut self, name: &str) -> Result<UploadedFile> {
        let index = self
            .files
            .iter()
            .position(|(field, _)| field == name)
            .ok_or(Error::NoInputProvided)?;
        Ok(self.files.remove(index).1)
    }

    fn files_named(self, name: &str) -> Vec<UploadedFile> {
        self.files
            .into_iter()
            .filter(|(field, _)| field == name)
            .map(|(_, file)| file)
            .collect()
    }

    fn text(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

fn multipart_error(e: axum::extract::multipart::MultipartError) -> Error {
    Error::InvalidParameter {
        name: "form".to_string(),
        reason: e.body_text(),
    }
}

// ============================================================================
// Router
// ============================================================================

/// Build the router with tracing and the upload size limit applied
pub fn router(state: HttpState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/api/merge-pdf", post(merge_pdf))
        .route("/api/split-pdf", post(split_pdf))
        .route("/api/compress-pdf", post(compress_pdf))
        .route("/api/rotate-pdf", post(rotate_pdf))
        .route("/api/watermark-pdf", post(watermark_pdf))
        .route("/api/protect-pdf", post(protect_pdf))
        .route("/api/unlock-pdf", post(unlock_pdf))
        .route("/api/pdf-info", post(pdf_info))
        .route("/api/download/:name", get(download))
        .route("/api/download-all", get(download_all))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve HTTP on `addr` until the process is stopped
pub async fn serve(config: &ServiceConfig, addr: SocketAddr) -> anyhow::Result<()> {
    let state = HttpState::from_config(config)?;
    let app = router(state, config.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "PDF workbench HTTP server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

async fn merge_pdf(
    State(state): State<HttpState>,
    ClientKey(client): ClientKey,
    multipart: Multipart,
) -> Result<Json<MergeOutcome>> {
    state.limiter.check(&client)?;
    let form = UploadForm::read(multipart).await?;
    let files = form.files_named("files");
    Ok(Json(state.executor.merge(&files).await?))
}

async fn split_pdf(
    State(state): State<HttpState>,
    ClientKey(client): ClientKey,
    multipart: Multipart,
) -> Result<Json<SplitOutcome>> {
    state.limiter.check(&client)?;
    let mut form = UploadForm::read(multipart).await?;
    let file = form.file("file")?;
    let selection = SplitSelection::parse(form.text("page_range"))?;
    Ok(Json(state.executor.split(&file, &selection).await?))
}

async fn compress_pdf(
    State(state): State<HttpState>,
    ClientKey(client): ClientKey,
    multipart: Multipart,
) -> Result<Json<TransformOutcome>> {
    state.limiter.check(&client)?;
    let mut form = UploadForm::read(multipart).await?;
    let file = form.file("file")?;
    let quality = CompressionQuality::parse_or_default(form.text("quality"));
    Ok(Json(state.executor.compress(&file, quality).await?))
}

async fn rotate_pdf(
    State(state): State<HttpState>,
    ClientKey(client): ClientKey,
    multipart: Multipart,
) -> Result<Json<TransformOutcome>> {
    state.limiter.check(&client)?;
    let mut form = UploadForm::read(multipart).await?;
    let file = form.file("file")?;
    let degrees = match form.text("degrees").map(str::trim) {
        None | Some("") => 90,
        Some(raw) => raw.parse::<i32>().map_err(|_| Error::InvalidParameter {
            name: "degrees".to_string(),
            reason: format!("not an integer: {:?}", raw),
        })?,
    };
    Ok(Json(state.executor.rotate(&file, degrees).await?))
}

async fn watermark_pdf(
    State(state): State<HttpState>,
    ClientKey(client): ClientKey,
    multipart: Multipart,
) -> Result<Json<TransformOutcome>> {
    state.limiter.check(&client)?;
    let mut form = UploadForm::read(multipart).await?;
    let file = form.file("file")?;
    let text = form.text("text").unwrap_or_default().to_string();
    let opacity = parse_opacity(form.text("opacity"));
    Ok(Json(state.executor.watermark(&file, &text, opacity).await?))
}

async fn protect_pdf(
    State(state): State<HttpState>,
    ClientKey(client): ClientKey,
    multipart: Multipart,
) -> Result<Json<TransformOutcome>> {
    state.limiter.check(&client)?;
    let mut form = UploadForm::read(multipart).await?;
    let file = form.file("file")?;
    let password = form.text("password").unwrap_or_default().to_string();
    Ok(Json(state.executor.protect(&file, &password).await?))
}

async fn unlock_pdf(
    State(state): State<HttpState>,
    ClientKey(client): ClientKey,
    multipart: Multipart,
) -> Result<Json<TransformOutcome>> {
    state.limiter.check(&client)?;
    let mut form = UploadForm::read(multipart).await?;
    let file = form.file("file")?;
    let password = form.text("password").unwrap_or_default().to_string();
    Ok(Json(state.executor.unlock(&file, &password).await?))
}

async fn pdf_info(
    State(state): State<HttpState>,
    ClientKey(client): ClientKey,
    multipart: Multipart,
) -> Result<Json<InfoOutcome>> {
    state.limiter.check(&client)?;
    let mut form = UploadForm::read(multipart).await?;
    let file = form.file("file")?;
    Ok(Json(state.executor.info(&file).await?))
}

#[derive(Debug, Deserialize)]
struct DownloadQuery {
    #[serde(default)]
    clean: Option<String>,
    #[serde(default)]
    files: Option<String>,
}

impl DownloadQuery {
    fn clean(&self) -> bool {
        self.clean
            .as_deref()
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }
}

/// GET /api/download/:name
async fn download(
    State(state): State<HttpState>,
    Path(name): Path<String>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response> {
    let store = state.executor.workspaces().store().clone();
    let clean = query.clean();
    let fetched = tokio::task::spawn_blocking(move || store.fetch(&name, clean))
        .await
        .map_err(|e| Error::Internal {
            reason: format!("Task join error: {}", e),
        })??;
    Ok(attachment(fetched))
}

/// GET /api/download-all?files=a,b
///
/// Zips the named artifacts into a transient bundle that is removed once
/// served. With `clean=true` the named artifacts are removed too.
async fn download_all(
    State(state): State<HttpState>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response> {
    let names: Vec<String> = query
        .files
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .collect();
    if names.is_empty() {
        return Err(Error::InvalidParameter {
            name: "files".to_string(),
            reason: "no files specified".to_string(),
        });
    }

    let store = state.executor.workspaces().store().clone();
    let clean = query.clean();
    let fetched = tokio::task::spawn_blocking(move || -> Result<FetchedArtifact> {
        let bundle = store.bundle(&names, ArtifactName::tagged("pdf_files", "zip"))?;
        let fetched = store.fetch(&bundle.name, true)?;

        if clean {
            for name in names.iter().filter_map(|n| ArtifactName::parse(n).ok()) {
                if let Err(e) = store.remove(&name) {
                    tracing::warn!(artifact = %name, error = %e, "Failed to remove artifact");
                }
            }
        }
        Ok(fetched)
    })
    .await
    .map_err(|e| Error::Internal {
        reason: format!("Task join error: {}", e),
    })??;

    Ok(attachment(fetched))
}

fn attachment(fetched: FetchedArtifact) -> Response {
    let content_type = if fetched.download_name.ends_with(".zip") {
        "application/zip"
    } else if fetched.download_name.ends_with(".pdf") {
        "application/pdf"
    } else {
        "application/octet-stream"
    };
    let disposition = format!(
        "attachment; filename=\"{}\"",
        fetched.download_name.replace('"', "")
    );

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        fetched.data,
    )
        .into_response()
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_of(&Error::NoInputProvided), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_of(&Error::ArtifactNotFound {
                name: "x".to_string()
            }),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(&Error::RateLimited { retry_after_secs: 5 }),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            status_of(&Error::ToolTimeout { seconds: 60 }),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            status_of(&Error::ToolExecution {
                exit_code: 1,
                stderr: String::new()
            }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_of(&Error::ToolSpawn {
                reason: "missing".to_string()
            }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_rate_limited_sets_retry_after() {
        let response = Error::RateLimited { retry_after_secs: 7 }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "7");
    }

    #[tokio::test]
    async fn test_client_key_forwarded_for() {
        let request = axum::http::Request::builder()
            .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
            .body(())
            .unwrap();
        let (mut parts, _) = request.into_parts();
        let key = ClientKey::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(key, ClientKey("203.0.113.9".to_string()));

        let (mut parts, _) = axum::http::Request::new(()).into_parts();
        let key = ClientKey::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(key, ClientKey("unknown".to_string()));
    }

    #[tokio::test]
    async fn test_client_key_prefers_peer() {
        let (mut parts, _) = axum::http::Request::builder()
            .header("x-forwarded-for", "203.0.113.9")
            .body(())
            .unwrap()
            .into_parts();
        let addr: SocketAddr = "192.0.2.1:5000".parse().unwrap();
        parts.extensions.insert(ConnectInfo(addr));

        let key = ClientKey::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(key, ClientKey("192.0.2.1".to_string()));
    }
}
