//! HTTP surface: a thin axum layer over [`Extractor`].
//!
//! ```text
//! GET  /health                    → {"status":"ok"}
//! POST /analyze   (/api/analyze)  → {"success":true, …} | {"success":false, …}
//! ```
//!
//! The analyze routes sit behind a shared-secret header check that runs
//! before the body is even parsed, so an unauthenticated caller never
//! triggers a download or a model call.

use crate::error::{ErrorKind, ExtractError};
use crate::extract::Extractor;
use crate::output::{ExtractionResult, ResourceKind};
use crate::request::AnalysisRequest;
use axum::{
    extract::{rejection::JsonRejection, Request, State},
    http::{header::RETRY_AFTER, HeaderName, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

/// Default header carrying the shared secret.
pub const DEFAULT_SECRET_HEADER: &str = "x-api-key";

/// Shared-secret guard settings.
#[derive(Clone)]
pub struct AuthConfig {
    secret: Option<String>,
    header: HeaderName,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("header", &self.header)
            .finish()
    }
}

impl AuthConfig {
    /// Guard with `secret` in `header` (case-insensitive name).
    ///
    /// An empty secret disables the guard, as does `None`.
    pub fn new(secret: Option<String>, header: &str) -> Result<Self, ExtractError> {
        let header = HeaderName::from_bytes(header.trim().to_ascii_lowercase().as_bytes())
            .map_err(|e| {
                ExtractError::InvalidConfig(format!("bad secret header '{header}': {e}"))
            })?;
        Ok(Self {
            secret: secret.filter(|s| !s.is_empty()),
            header,
        })
    }

    /// No guard at all.
    pub fn disabled() -> Self {
        Self {
            secret: None,
            header: HeaderName::from_static(DEFAULT_SECRET_HEADER),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.secret.is_some()
    }

    fn accepts(&self, presented: Option<&HeaderValue>) -> bool {
        match (&self.secret, presented) {
            (None, _) => true,
            (Some(expected), Some(value)) => {
                constant_time_eq(expected.as_bytes(), value.as_bytes())
            }
            (Some(_), None) => false,
        }
    }
}

/// Equality whose running time does not depend on where inputs differ.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    extractor: Extractor,
    auth: Arc<AuthConfig>,
}

/// Build the service router.
pub fn router(extractor: Extractor, auth: AuthConfig) -> Router {
    if !auth.is_enabled() {
        warn!("No shared secret configured: /analyze is open to any caller");
    }

    let state = AppState {
        extractor,
        auth: Arc::new(auth),
    };

    let analyze = Router::new()
        .route("/analyze", post(handle_analyze))
        .route("/api/analyze", post(handle_analyze))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_secret));

    Router::new()
        .route("/health", get(handle_health))
        .merge(analyze)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── Handlers ─────────────────────────────────────────────────────────────

async fn handle_health() -> Json<Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Success body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeResponse {
    pub success: bool,
    pub source_kind: ResourceKind,
    pub structured: Value,
    pub raw: String,
    pub pages: usize,
}

impl From<ExtractionResult> for AnalyzeResponse {
    fn from(r: ExtractionResult) -> Self {
        Self {
            success: true,
            source_kind: r.source_kind,
            structured: r.structured,
            raw: r.raw_text,
            pages: r.pages_sent,
        }
    }
}

async fn handle_analyze(
    State(state): State<AppState>,
    payload: Result<Json<AnalysisRequest>, JsonRejection>,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    let Json(request) = payload.map_err(|rejection| {
        ApiError(ExtractError::Validation(format!(
            "request body is not a valid analysis request: {}",
            rejection.body_text()
        )))
    })?;

    let result = state.extractor.analyze(&request).await.map_err(ApiError)?;
    Ok(Json(result.into()))
}

async fn require_secret(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if state.auth.accepts(request.headers().get(&state.auth.header)) {
        return next.run(request).await;
    }
    warn!("Rejected {} without a valid shared secret", request.uri().path());
    let body = FailureBody {
        success: false,
        error: "unauthorized",
        kind: "unauthorized",
        details: format!("missing or invalid '{}' header", state.auth.header),
    };
    (StatusCode::UNAUTHORIZED, Json(body)).into_response()
}

// ── Errors ───────────────────────────────────────────────────────────────

/// Failure body.
#[derive(Debug, Serialize)]
struct FailureBody {
    success: bool,
    error: &'static str,
    kind: &'static str,
    details: String,
}

/// [`ExtractError`] rendered as an HTTP failure envelope.
#[derive(Debug)]
pub struct ApiError(pub ExtractError);

/// HTTP status for each error kind.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::ValidationError => StatusCode::BAD_REQUEST,
        ErrorKind::TooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::FetchError
        | ErrorKind::UpstreamError
        | ErrorKind::EmptyOutput
        | ErrorKind::MalformedJson => StatusCode::BAD_GATEWAY,
        ErrorKind::RenderError | ErrorKind::InvalidConfig | ErrorKind::Internal => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = status_for(kind);
        let error = if kind == ErrorKind::ValidationError {
            "invalid request"
        } else {
            "service failed"
        };

        if status.is_server_error() {
            error!("Request failed ({}): {}", kind.as_str(), self.0);
        } else {
            warn!("Request rejected ({}): {}", kind.as_str(), self.0);
        }

        let retry_after = match &self.0 {
            ExtractError::Upstream {
                retry_after_secs: Some(secs),
                ..
            } => Some(*secs),
            _ => None,
        };

        let body = FailureBody {
            success: false,
            error,
            kind: kind.as_str(),
            details: self.0.to_string(),
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}
