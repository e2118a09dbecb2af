//! Error types for the edgequake-extract library.
//!
//! Every failure a request can hit is a variant of [`ExtractError`]. The
//! variants follow the pipeline stages so a caller can tell *where* a request
//! died without parsing messages:
//!
//! * **Validation**: the request itself is unusable; no work was attempted.
//! * **Source acquisition**: [`ExtractError::Fetch`], [`ExtractError::TooLarge`],
//!   [`ExtractError::Timeout`].
//! * **Rasterisation**: [`ExtractError::Render`].
//! * **Extraction backend**: [`ExtractError::Upstream`].
//! * **Response shape**: [`ExtractError::EmptyOutput`],
//!   [`ExtractError::MalformedJson`].
//!
//! [`ExtractError::kind`] maps each variant to a stable, serialisable
//! [`ErrorKind`] that the HTTP layer puts in its failure envelope. Nothing is
//! retried internally; retry policy belongs to the caller.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// All errors returned by the edgequake-extract library.
#[derive(Debug, Error)]
pub enum ExtractError {
    // ── Request errors ───────────────────────────────────────────────────
    /// The request is missing a field or carries a malformed one.
    #[error("Invalid request: {0}")]
    Validation(String),

    // ── Source acquisition errors ────────────────────────────────────────
    /// The document could not be downloaded (network error or non-2xx status).
    #[error("Failed to fetch '{url}': {reason}")]
    Fetch { url: String, reason: String },

    /// The document exceeds the configured byte ceiling.
    #[error("Source '{url}' exceeds the {limit_bytes}-byte limit{}", observed_suffix(.observed_bytes))]
    TooLarge {
        url: String,
        limit_bytes: u64,
        observed_bytes: Option<u64>,
    },

    /// A bounded stage (download, render, or extraction call) ran out of time.
    #[error("{stage} timed out after {secs}s")]
    Timeout { stage: &'static str, secs: u64 },

    // ── Rasterisation errors ─────────────────────────────────────────────
    /// The document is corrupt, unsupported, has no pages, or the rendering
    /// backend is unavailable.
    #[error("Rasterisation failed: {detail}")]
    Render { detail: String },

    // ── Extraction backend errors ────────────────────────────────────────
    /// The extraction backend rejected the call or could not be reached.
    ///
    /// `status` is the HTTP status when one was received. `rate_limited` and
    /// `auth_failed` are set for 429 and 401/403 respectively.
    #[error("Extraction backend '{backend}' failed{}: {detail}", status_suffix(.status))]
    Upstream {
        backend: String,
        status: Option<u16>,
        rate_limited: bool,
        auth_failed: bool,
        retry_after_secs: Option<u64>,
        detail: String,
    },

    // ── Response shape errors ────────────────────────────────────────────
    /// No textual payload was found in any recognised envelope location.
    #[error("Extraction backend returned no text output")]
    EmptyOutput,

    /// Text was present but is not JSON, or not shaped like the schema.
    #[error("Extraction output is not valid structured JSON: {detail}")]
    MalformedJson { detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed or a backend is not configured.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

fn observed_suffix(observed: &Option<u64>) -> String {
    observed
        .map(|n| format!(" (saw at least {n} bytes)"))
        .unwrap_or_default()
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" with HTTP {s}")).unwrap_or_default()
}

/// Machine-readable error category carried in failure responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ValidationError,
    FetchError,
    TooLarge,
    Timeout,
    RenderError,
    UpstreamError,
    EmptyOutput,
    MalformedJson,
    InvalidConfig,
    Internal,
}

impl ErrorKind {
    /// The snake_case wire name, identical to the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::FetchError => "fetch_error",
            ErrorKind::TooLarge => "too_large",
            ErrorKind::Timeout => "timeout",
            ErrorKind::RenderError => "render_error",
            ErrorKind::UpstreamError => "upstream_error",
            ErrorKind::EmptyOutput => "empty_output",
            ErrorKind::MalformedJson => "malformed_json",
            ErrorKind::InvalidConfig => "invalid_config",
            ErrorKind::Internal => "internal",
        }
    }
}

impl ExtractError {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExtractError::Validation(_) => ErrorKind::ValidationError,
            ExtractError::Fetch { .. } => ErrorKind::FetchError,
            ExtractError::TooLarge { .. } => ErrorKind::TooLarge,
            ExtractError::Timeout { .. } => ErrorKind::Timeout,
            ExtractError::Render { .. } => ErrorKind::RenderError,
            ExtractError::Upstream { .. } => ErrorKind::UpstreamError,
            ExtractError::EmptyOutput => ErrorKind::EmptyOutput,
            ExtractError::MalformedJson { .. } => ErrorKind::MalformedJson,
            ExtractError::InvalidConfig(_) => ErrorKind::InvalidConfig,
            ExtractError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Shorthand for a [`ExtractError::Render`] with the given detail.
    pub fn render(detail: impl Into<String>) -> Self {
        ExtractError::Render {
            detail: detail.into(),
        }
    }

    /// Shorthand for a transport-level [`ExtractError::Upstream`] (no status).
    pub fn upstream(backend: impl Into<String>, detail: impl Into<String>) -> Self {
        ExtractError::Upstream {
            backend: backend.into(),
            status: None,
            rate_limited: false,
            auth_failed: false,
            retry_after_secs: None,
            detail: detail.into(),
        }
    }
}
