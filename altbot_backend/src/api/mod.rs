//! Public HTTP API: alt-text for uploaded images, authorised by API key.

mod alt_text;
pub mod queue;

use crate::api_keys::{ApiKeyError, ApiKeyStore};
use anyhow::Result;
use axum::extract::DefaultBodyLimit;
use axum::http::{header::AUTHORIZATION, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

pub use queue::AltTextQueue;

pub const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub keys: Arc<ApiKeyStore>,
    pub queue: AltTextQueue,
    pub monthly_limit: u32,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/alt-text", post(alt_text::create_alt_text))
        .route("/api/v1/usage", get(alt_text::usage))
        .route("/api/v1/health", get(health_handler))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

const PORT_SEARCH_SPAN: u16 = 100;

/// Binds `start_port`, or the first free port above it.
async fn bind_from(start_port: u16) -> Result<(TcpListener, u16)> {
    let last = start_port.saturating_add(PORT_SEARCH_SPAN - 1);
    for port in start_port..=last {
        match TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port))).await {
            Ok(listener) => return Ok((listener, port)),
            Err(err) if port == start_port => {
                tracing::debug!(port, error = %err, "API port in use, searching upward");
            }
            Err(_) => {}
        }
    }
    anyhow::bail!("no free port in {start_port}-{last}")
}

/// Serves the API until `cancel` fires.
pub async fn serve_http(state: AppState, port: u16, cancel: CancellationToken) -> Result<()> {
    let router = router(state);

    let (listener, actual_port) = bind_from(port).await?;
    if actual_port != port {
        tracing::warn!(requested_port = port, actual_port, "configured API port busy");
    }
    tracing::info!(port = actual_port, "API server listening");
    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: crate::utils::VERSION,
    })
}

/// Accepts `Authorization: Bearer <key>` or the bare key.
pub(crate) fn extract_api_key(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    let key = raw.strip_prefix("Bearer ").unwrap_or(raw).trim();
    (!key.is_empty()).then(|| key.to_string())
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    status: u16,
}

#[derive(Debug)]
pub enum ApiError {
    Unauthorized(String),
    QuotaExceeded(String),
    BadRequest(String),
    Busy,
    Timeout,
    Generation(anyhow::Error),
    Internal(anyhow::Error),
}

impl ApiError {
    fn into_response_parts(self) -> (StatusCode, String) {
        match self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::QuotaExceeded(msg) => (StatusCode::TOO_MANY_REQUESTS, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Busy => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Server busy, please try again later".into(),
            ),
            ApiError::Timeout => (StatusCode::GATEWAY_TIMEOUT, "Request timeout".into()),
            ApiError::Generation(err) => {
                tracing::warn!(error = ?err, "API alt-text generation failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Failed to generate alt-text: {err}"),
                )
            }
            ApiError::Internal(err) => {
                tracing::error!(error = ?err, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".into())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = self.into_response_parts();
        let body = Json(ErrorResponse {
            error: message,
            status: status.as_u16(),
        });
        (status, body).into_response()
    }
}

impl From<ApiKeyError> for ApiError {
    fn from(err: ApiKeyError) -> Self {
        match err {
            ApiKeyError::QuotaExceeded { .. } => ApiError::QuotaExceeded(err.to_string()),
            ApiKeyError::Persist(_) => ApiError::Internal(anyhow::Error::new(err)),
            ApiKeyError::Invalid | ApiKeyError::Deactivated | ApiKeyError::Expired | ApiKeyError::NotFound => {
                ApiError::Unauthorized(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn api_key_accepts_bearer_and_bare_forms() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_api_key(&headers), None);
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer altbot_abc"));
        assert_eq!(extract_api_key(&headers).as_deref(), Some("altbot_abc"));
        headers.insert(AUTHORIZATION, HeaderValue::from_static("altbot_def"));
        assert_eq!(extract_api_key(&headers).as_deref(), Some("altbot_def"));
    }

    #[test]
    fn key_errors_map_to_statuses() {
        let status = |err: ApiKeyError| ApiError::from(err).into_response().status();
        assert_eq!(status(ApiKeyError::Expired), StatusCode::UNAUTHORIZED);
        assert_eq!(
            status(ApiKeyError::QuotaExceeded { used: 5, limit: 5 }),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            status(ApiKeyError::Persist("disk full".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
