//! Per-request pipeline values: what the classifier decides, what the
//! rasteriser produces, and what the caller gets back.
//!
//! None of these outlive a request. A [`PageSet`] is built, handed to the
//! assembler, and dropped; an [`ExtractionResult`] is serialised into the
//! response and dropped.

use crate::error::ExtractError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What kind of resource a URL points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// A single raster image the backend can fetch itself.
    Image,
    /// A multi-page document that must be rendered (or ingested directly).
    PaginatedDocument,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Image => "image",
            ResourceKind::PaginatedDocument => "paginated_document",
        }
    }
}

/// Encoded image bytes with their MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl EncodedImage {
    pub fn png(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            mime_type: "image/png".to_string(),
        }
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }

    /// `data:<mime>;base64,<payload>` form accepted by multimodal APIs.
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.to_base64())
    }
}

/// One rendered page, 1-indexed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterPage {
    pub index: usize,
    pub image: EncodedImage,
}

/// The ordered, bounded set of pages rendered for one request.
#[derive(Debug, Clone)]
pub struct PageSet {
    pages: Vec<RasterPage>,
    dpi: u32,
    source_page_count: usize,
}

impl PageSet {
    /// Build a page set, enforcing that pages are non-empty, 1-based and
    /// contiguous.
    pub fn new(
        pages: Vec<RasterPage>,
        dpi: u32,
        source_page_count: usize,
    ) -> Result<Self, ExtractError> {
        if pages.is_empty() {
            return Err(ExtractError::render("rendering produced no pages"));
        }
        for (i, page) in pages.iter().enumerate() {
            if page.index != i + 1 {
                return Err(ExtractError::Internal(format!(
                    "page set out of order: position {} holds page {}",
                    i + 1,
                    page.index
                )));
            }
        }
        Ok(Self {
            pages,
            dpi,
            source_page_count,
        })
    }

    pub fn pages(&self) -> &[RasterPage] {
        &self.pages
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// Always false for a constructed set; present for API symmetry.
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// DPI the pages were rendered at.
    pub fn dpi(&self) -> u32 {
        self.dpi
    }

    /// Page count of the source document, which may exceed [`Self::len`].
    pub fn source_page_count(&self) -> usize {
        self.source_page_count
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RasterPage> {
        self.pages.iter()
    }
}

/// Structured output relayed to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    /// How the resource was classified.
    pub source_kind: ResourceKind,
    /// Parsed JSON, checked against the extraction schema.
    pub structured: Value,
    /// Exact text the model returned.
    pub raw_text: String,
    /// Number of image blocks sent (0 for direct document ingestion).
    #[serde(default)]
    pub pages_sent: usize,
}
