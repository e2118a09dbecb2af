//! Inbound request types.
//!
//! An [`AnalysisRequest`] is what a caller hands the relay: a URL, an optional
//! type hint, and free-form context used to enrich the instruction text. It is
//! validated once, up front, so no later stage has to re-check it.

use crate::error::ExtractError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A request to analyse one image or document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    /// HTTP(S) URL of the image or document.
    #[serde(default, alias = "url", alias = "pdfUrl", alias = "imageUrl")]
    pub resource_url: String,

    /// Optional type hint, e.g. `"pdf"`, `"png"`, `"image/jpeg"`.
    #[serde(default, alias = "fileType", skip_serializing_if = "Option::is_none")]
    pub declared_type: Option<String>,

    /// Free-form fields (project, address, builder, community, docType, …).
    #[serde(default)]
    pub context: RequestContext,
}

impl AnalysisRequest {
    /// Create a request for `url` with no hint and no context.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            resource_url: url.into(),
            declared_type: None,
            context: RequestContext::default(),
        }
    }

    pub fn with_declared_type(mut self, declared: impl Into<String>) -> Self {
        self.declared_type = Some(declared.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key, value);
        self
    }

    /// Reject requests no stage could work with.
    pub fn validate(&self) -> Result<(), ExtractError> {
        let url = self.resource_url.trim();
        if url.is_empty() {
            return Err(ExtractError::Validation("resourceUrl is required".into()));
        }
        let parsed = reqwest::Url::parse(url).map_err(|e| {
            ExtractError::Validation(format!("resourceUrl '{url}' is not a valid URL: {e}"))
        })?;
        match parsed.scheme() {
            "http" | "https" => Ok(()),
            other => Err(ExtractError::Validation(format!(
                "resourceUrl must use http or https, got '{other}'"
            ))),
        }
    }
}

/// Context fields that enrich the instruction text.
///
/// Backed by a `BTreeMap` so the rendered instruction is identical for
/// identical requests regardless of JSON key order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestContext(BTreeMap<String, String>);

impl RequestContext {
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    /// Non-empty entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .iter()
            .filter(|(_, v)| !v.trim().is_empty())
            .map(|(k, v)| (k.as_str(), v.trim()))
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }
}

/// A parsed type hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclaredType {
    /// A raster image type (png, jpeg, gif, webp, or a generic "image").
    Image,
    /// The paginated-document type (pdf).
    Pdf,
}

impl DeclaredType {
    /// Parse a caller-supplied hint. Unknown hints yield `None` and are ignored.
    ///
    /// Accepts bare names (`png`), extensions (`.png`) and MIME types
    /// (`image/png`, `application/pdf`), case-insensitively.
    pub fn parse(hint: &str) -> Option<Self> {
        let h = hint.trim().to_ascii_lowercase();
        let h = h.trim_start_matches('.');
        let h = h.split(';').next().unwrap_or(h).trim();
        match h {
            "image" | "png" | "jpg" | "jpeg" | "gif" | "webp" => Some(DeclaredType::Image),
            "pdf" | "application/pdf" | "document" => Some(DeclaredType::Pdf),
            mime if mime.starts_with("image/") => Some(DeclaredType::Image),
            _ => None,
        }
    }
}
