//! Source acquisition: download a document into a bounded in-memory buffer.
//!
//! ## Why not trust Content-Length?
//!
//! Servers omit it, and sometimes lie. The declared length is checked first
//! so obviously oversized files fail before any body bytes move, and the body
//! is then read chunk by chunk with a running total so a missing or wrong
//! header cannot push us past the ceiling either.
//!
//! The whole download, headers included, runs under one timeout. A slow-drip
//! server cannot hold a request slot open indefinitely.

use crate::error::ExtractError;
use futures::StreamExt;
use reqwest::header::CONTENT_LENGTH;
use std::time::Duration;
use tracing::{debug, info};

/// Maximum redirect hops followed for source downloads.
pub const MAX_REDIRECTS: usize = 5;

/// Limits applied to a single download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchLimits {
    pub max_bytes: u64,
    pub timeout_secs: u64,
}

/// A fully downloaded source document.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub url: String,
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

impl SourceDocument {
    /// True when the body starts with the `%PDF` magic bytes.
    pub fn looks_like_pdf(&self) -> bool {
        self.bytes.starts_with(b"%PDF")
    }

    /// First bytes of the body, for diagnostics.
    pub fn magic(&self) -> [u8; 4] {
        let mut magic = [0u8; 4];
        let n = self.bytes.len().min(4);
        magic[..n].copy_from_slice(&self.bytes[..n]);
        magic
    }
}

/// Build the HTTP client used for source downloads.
///
/// Redirects are followed conservatively; timeouts are applied per call in
/// [`fetch_document`] so one client can serve every request.
pub fn build_fetch_client() -> Result<reqwest::Client, ExtractError> {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .user_agent(concat!("edgequake-extract/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ExtractError::Internal(format!("Failed to build HTTP client: {e}")))
}

/// Download `url` fully, enforcing the byte ceiling and the timeout.
pub async fn fetch_document(
    client: &reqwest::Client,
    url: &str,
    limits: FetchLimits,
) -> Result<SourceDocument, ExtractError> {
    info!("Fetching source document: {}", url);

    match tokio::time::timeout(
        Duration::from_secs(limits.timeout_secs),
        fetch_inner(client, url, limits.max_bytes),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(ExtractError::Timeout {
            stage: "download",
            secs: limits.timeout_secs,
        }),
    }
}

async fn fetch_inner(
    client: &reqwest::Client,
    url: &str,
    max_bytes: u64,
) -> Result<SourceDocument, ExtractError> {
    let fetch_err = |reason: String| ExtractError::Fetch {
        url: url.to_string(),
        reason,
    };

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| fetch_err(e.to_string()))?;

    if !response.status().is_success() {
        return Err(fetch_err(format!("HTTP {}", response.status())));
    }

    let declared = response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if let Some(len) = declared {
        if len > max_bytes {
            return Err(ExtractError::TooLarge {
                url: url.to_string(),
                limit_bytes: max_bytes,
                observed_bytes: Some(len),
            });
        }
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let mut bytes: Vec<u8> = Vec::with_capacity(declared.unwrap_or(0) as usize);
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| fetch_err(format!("body read failed: {e}")))?;
        let total = bytes.len() as u64 + chunk.len() as u64;
        if total > max_bytes {
            return Err(ExtractError::TooLarge {
                url: url.to_string(),
                limit_bytes: max_bytes,
                observed_bytes: Some(total),
            });
        }
        bytes.extend_from_slice(&chunk);
    }

    debug!("Fetched {} bytes from {}", bytes.len(), url);

    Ok(SourceDocument {
        url: url.to_string(),
        bytes,
        content_type,
    })
}
