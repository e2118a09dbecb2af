//! Per-request orchestration.
//!
//! An [`Extractor`] is built once at start-up from an [`ExtractionConfig`]
//! and shared (it is cheap to clone and immutable). Each
//! [`Extractor::analyze`] call runs the stages strictly in order:
//!
//! ```text
//! validate → classify → [fetch → rasterize] → assemble → extract → normalize
//! ```
//!
//! The bracketed stages only run for paginated documents in
//! [`DocumentMode::Rasterize`]. Every failure is returned as an
//! [`ExtractError`]; nothing is retried and nothing survives the call.

use crate::config::{DocumentMode, ExtractionConfig};
use crate::error::ExtractError;
use crate::output::{EncodedImage, ExtractionResult, ResourceKind};
use crate::pipeline::assemble::{assemble, ContentBlock, PayloadSource};
use crate::pipeline::classify::classify;
use crate::pipeline::fetch::{build_fetch_client, fetch_document, FetchLimits, SourceDocument};
use crate::pipeline::llm::{build_backend, ExtractionBackend};
use crate::pipeline::normalize::normalize;
use crate::pipeline::render::{backend_from_config, rasterize, RasterBackend};
use crate::prompts::build_instruction;
use crate::request::AnalysisRequest;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// The extraction service core.
#[derive(Clone)]
pub struct Extractor {
    config: Arc<ExtractionConfig>,
    http: reqwest::Client,
    rasterizer: Arc<dyn RasterBackend>,
    backend: Arc<dyn ExtractionBackend>,
}

impl fmt::Debug for Extractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extractor")
            .field("config", &self.config)
            .field("rasterizer", &self.rasterizer.name())
            .field("backend", &self.backend.name())
            .finish()
    }
}

impl Extractor {
    /// Build an extractor with the backends `config` selects.
    ///
    /// Fails with [`ExtractError::InvalidConfig`] when no extraction backend
    /// can be constructed (no API key and no provider).
    pub fn from_config(config: ExtractionConfig) -> Result<Self, ExtractError> {
        let rasterizer = backend_from_config(&config);
        let backend = build_backend(&config)?;
        Self::with_backends(config, rasterizer, backend)
    }

    /// Build an extractor around explicit backends.
    pub fn with_backends(
        config: ExtractionConfig,
        rasterizer: Arc<dyn RasterBackend>,
        backend: Arc<dyn ExtractionBackend>,
    ) -> Result<Self, ExtractError> {
        info!(
            "Extractor ready: raster={}, backend={}, mode={:?}, model={}",
            rasterizer.name(),
            backend.name(),
            config.document_mode,
            config.model
        );
        Ok(Self {
            config: Arc::new(config),
            http: build_fetch_client()?,
            rasterizer,
            backend,
        })
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    fn fetch_limits(&self) -> FetchLimits {
        FetchLimits {
            max_bytes: self.config.max_source_bytes,
            timeout_secs: self.config.download_timeout_secs,
        }
    }

    /// Run one request end to end.
    pub async fn analyze(
        &self,
        request: &AnalysisRequest,
    ) -> Result<ExtractionResult, ExtractError> {
        let start = Instant::now();
        request.validate()?;

        let url = request.resource_url.trim();
        let kind = classify(
            url,
            request.declared_type.as_deref(),
            self.config.ambiguous_kind,
        );
        info!("Analyzing {} as {}", url, kind.as_str());

        let config = &self.config;
        let instruction =
            |pages| build_instruction(config.instructions.as_deref(), &request.context, kind, pages);
        let blocks = match (kind, config.document_mode) {
            (ResourceKind::Image, _) if self.backend.accepts_remote_images() => {
                assemble(instruction(0), kind, PayloadSource::Remote(url))
            }
            (ResourceKind::Image, _) => {
                let source = fetch_document(&self.http, url, self.fetch_limits()).await?;
                let image = inline_image(source)?;
                assemble(instruction(1), kind, PayloadSource::Inline(&image))
            }
            (ResourceKind::PaginatedDocument, DocumentMode::DirectIngest) => {
                assemble(instruction(0), kind, PayloadSource::Remote(url))
            }
            (ResourceKind::PaginatedDocument, DocumentMode::Rasterize) => {
                let source = fetch_document(&self.http, url, self.fetch_limits()).await?;
                let pages =
                    rasterize(&source, self.rasterizer.as_ref(), config.raster_options()).await?;
                assemble(instruction(pages.len()), kind, PayloadSource::Pages(&pages))
            }
        };

        let pages_sent = blocks
            .iter()
            .filter(|b| matches!(b, ContentBlock::ImageData { .. } | ContentBlock::ImageUrl { .. }))
            .count();
        debug!("Assembled {} block(s), {} image(s)", blocks.len(), pages_sent);

        let envelope = self.backend.extract(&blocks, &config.schema).await?;
        let result = normalize(&envelope, kind, &config.schema, pages_sent)?;

        info!(
            "Analysis of {} complete in {}ms",
            url,
            start.elapsed().as_millis()
        );
        Ok(result)
    }
}

/// Wrap a downloaded image for inline transport.
///
/// The MIME type comes from the image bytes themselves; a server's
/// `Content-Type` is only used when it already names an image type and the
/// bytes are not recognised.
fn inline_image(source: SourceDocument) -> Result<EncodedImage, ExtractError> {
    let sniffed = image::guess_format(&source.bytes)
        .ok()
        .map(|f| f.to_mime_type().to_string());
    let declared = source
        .content_type
        .as_deref()
        .map(|ct| ct.split(';').next().unwrap_or(ct).trim().to_ascii_lowercase())
        .filter(|ct| ct.starts_with("image/"));

    let mime_type = sniffed.or(declared).ok_or_else(|| ExtractError::Fetch {
        url: source.url.clone(),
        reason: format!("body is not a recognised image (first bytes {:?})", source.magic()),
    })?;

    Ok(EncodedImage {
        bytes: source.bytes,
        mime_type,
    })
}
