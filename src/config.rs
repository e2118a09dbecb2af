//! Configuration for the extraction relay.
//!
//! All behaviour is controlled through [`ExtractionConfig`], built via its
//! [`ExtractionConfigBuilder`]. The config is constructed once at process
//! start and handed to [`crate::Extractor`]; nothing reads settings from
//! globals afterwards, so tests can build an extractor with any combination
//! of limits and substituted backends.
//!
//! # Design choice: builder over constructor
//! A twenty-field constructor is unreadable and breaks on every new field.
//! The builder lets callers set only what they care about and rely on
//! documented defaults for the rest. Setters clamp out-of-range values;
//! [`ExtractionConfigBuilder::build`] rejects combinations that cannot work.

use crate::error::ExtractError;
use crate::output::ResourceKind;
use crate::schema::ExtractionSchema;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration for the extraction pipeline.
///
/// # Example
/// ```rust
/// use edgequake_extract::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .target_dpi(200)
///     .max_pages(4)
///     .model("gpt-4.1-mini")
///     .api_key("sk-test")
///     .build()
///     .unwrap();
/// assert_eq!(config.max_pages, 4);
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Preferred rendering DPI. Range: 36–400. Default: 150.
    ///
    /// Lowered per document when the first page would exceed
    /// `max_pixels_per_page`; never raised.
    pub target_dpi: u32,

    /// Maximum number of leading pages rendered and sent. Default: 3.
    ///
    /// Plan sets put the site and utility sheets first, so later sheets are
    /// skipped. This is a product convention, not a law; raise it for
    /// documents that bury relevant content deeper.
    pub max_pages: usize,

    /// Pixel-area ceiling for one rendered page. Default: 12 000 000.
    ///
    /// A 24×36 in sheet at 150 DPI is 3600×5400 = 19.4 MP; the ceiling
    /// brings that down to 117 DPI instead of failing the request.
    pub max_pixels_per_page: u64,

    /// Largest accepted source document in bytes. Default: 50 MiB.
    pub max_source_bytes: u64,

    /// Download timeout for source documents in seconds. Default: 60.
    pub download_timeout_secs: u64,

    /// Timeout for rendering one document in seconds. Default: 90.
    pub render_timeout_secs: u64,

    /// Per-extraction-call timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Classification for URLs with no type hint and no recognised extension.
    /// Default: [`ResourceKind::PaginatedDocument`].
    ///
    /// Most extension-less links in practice are storage links to PDFs; a
    /// deployment fed mostly photos can flip this.
    pub ambiguous_kind: ResourceKind,

    /// Whether documents are rasterised locally or handed to the backend as a
    /// URL. Default: [`DocumentMode::Rasterize`].
    pub document_mode: DocumentMode,

    /// Which rasteriser renders PDF pages. Default: [`RasterBackendKind::Pdfium`].
    pub raster_backend: RasterBackendKind,

    /// Path to a pdfium shared library (file or containing directory).
    /// If None, binds to the system library.
    pub pdfium_lib_path: Option<PathBuf>,

    /// Directory holding `pdfinfo` / `pdftoppm`. If None, uses `PATH`.
    pub poppler_bin_dir: Option<PathBuf>,

    /// Model identifier, e.g. "gpt-4.1", "gpt-4.1-mini". Default: "gpt-4.1".
    pub model: String,

    /// Base URL of the Responses-style extraction API.
    /// Default: `https://api.openai.com/v1`.
    pub api_base_url: String,

    /// Bearer token for the Responses-style API.
    pub api_key: Option<String>,

    /// edgequake-llm provider name (e.g. "anthropic", "gemini", "ollama").
    /// When set, extraction goes through that provider instead of the
    /// Responses-style API.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Maximum output tokens per extraction call. Default: 4096.
    pub max_output_tokens: usize,

    /// Image detail hint passed with every image block. Default: "high".
    ///
    /// Fine print on plan sheets (dimensions, callouts) is lost at "low".
    pub image_detail: String,

    /// Output contract. Default: [`ExtractionSchema::plan_review`].
    pub schema: ExtractionSchema,

    /// Custom instruction text. If None, uses the built-in default.
    pub instructions: Option<String>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            target_dpi: 150,
            max_pages: 3,
            max_pixels_per_page: 12_000_000,
            max_source_bytes: 50 * 1024 * 1024,
            download_timeout_secs: 60,
            render_timeout_secs: 90,
            api_timeout_secs: 120,
            ambiguous_kind: ResourceKind::PaginatedDocument,
            document_mode: DocumentMode::default(),
            raster_backend: RasterBackendKind::default(),
            pdfium_lib_path: None,
            poppler_bin_dir: None,
            model: "gpt-4.1".to_string(),
            api_base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            provider_name: None,
            provider: None,
            temperature: 0.1,
            max_output_tokens: 4096,
            image_detail: "high".to_string(),
            schema: ExtractionSchema::default(),
            instructions: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("target_dpi", &self.target_dpi)
            .field("max_pages", &self.max_pages)
            .field("max_pixels_per_page", &self.max_pixels_per_page)
            .field("max_source_bytes", &self.max_source_bytes)
            .field("download_timeout_secs", &self.download_timeout_secs)
            .field("render_timeout_secs", &self.render_timeout_secs)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("ambiguous_kind", &self.ambiguous_kind)
            .field("document_mode", &self.document_mode)
            .field("raster_backend", &self.raster_backend)
            .field("model", &self.model)
            .field("api_base_url", &self.api_base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_output_tokens", &self.max_output_tokens)
            .field("schema", &format_args!("{} v{}", self.schema.name, self.schema.version))
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Rasteriser limits derived from this config.
    pub fn raster_options(&self) -> RasterOptions {
        RasterOptions {
            target_dpi: self.target_dpi,
            max_pages: self.max_pages,
            max_pixels_per_page: self.max_pixels_per_page,
            render_timeout_secs: self.render_timeout_secs,
        }
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn target_dpi(mut self, dpi: u32) -> Self {
        self.config.target_dpi = dpi.clamp(36, 400);
        self
    }

    pub fn max_pages(mut self, n: usize) -> Self {
        self.config.max_pages = n.max(1);
        self
    }

    pub fn max_pixels_per_page(mut self, px: u64) -> Self {
        self.config.max_pixels_per_page = px.max(10_000);
        self
    }

    pub fn max_source_bytes(mut self, bytes: u64) -> Self {
        self.config.max_source_bytes = bytes;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn render_timeout_secs(mut self, secs: u64) -> Self {
        self.config.render_timeout_secs = secs;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn ambiguous_kind(mut self, kind: ResourceKind) -> Self {
        self.config.ambiguous_kind = kind;
        self
    }

    pub fn document_mode(mut self, mode: DocumentMode) -> Self {
        self.config.document_mode = mode;
        self
    }

    pub fn raster_backend(mut self, kind: RasterBackendKind) -> Self {
        self.config.raster_backend = kind;
        self
    }

    pub fn pdfium_lib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_lib_path = Some(path.into());
        self
    }

    pub fn poppler_bin_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.poppler_bin_dir = Some(dir.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.api_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_output_tokens(mut self, n: usize) -> Self {
        self.config.max_output_tokens = n;
        self
    }

    pub fn image_detail(mut self, detail: impl Into<String>) -> Self {
        self.config.image_detail = detail.into();
        self
    }

    pub fn schema(mut self, schema: ExtractionSchema) -> Self {
        self.config.schema = schema;
        self
    }

    pub fn instructions(mut self, text: impl Into<String>) -> Self {
        self.config.instructions = Some(text.into());
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, ExtractError> {
        let c = &self.config;
        if c.target_dpi < 36 || c.target_dpi > 400 {
            return Err(ExtractError::InvalidConfig(format!(
                "DPI must be 36–400, got {}",
                c.target_dpi
            )));
        }
        if c.max_pages == 0 {
            return Err(ExtractError::InvalidConfig("max_pages must be ≥ 1".into()));
        }
        if c.max_source_bytes == 0 {
            return Err(ExtractError::InvalidConfig(
                "max_source_bytes must be > 0".into(),
            ));
        }
        if c.download_timeout_secs == 0 || c.render_timeout_secs == 0 || c.api_timeout_secs == 0 {
            return Err(ExtractError::InvalidConfig(
                "timeouts must be at least 1 second".into(),
            ));
        }
        if c.schema.fields.is_empty() {
            return Err(ExtractError::InvalidConfig(format!(
                "schema '{}' declares no fields",
                c.schema.name
            )));
        }
        if !c
            .schema
            .name
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-')
        {
            return Err(ExtractError::InvalidConfig(format!(
                "schema name '{}' may only contain letters, digits, '_' and '-'",
                c.schema.name
            )));
        }
        Ok(self.config)
    }
}

/// Limits handed to the rasteriser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasterOptions {
    pub target_dpi: u32,
    pub max_pages: usize,
    pub max_pixels_per_page: u64,
    pub render_timeout_secs: u64,
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How paginated documents reach the extraction backend.
///
/// A deployment-time choice: it depends on what the backend can ingest, not
/// on the content of any particular request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentMode {
    /// Render the leading pages locally and send them as images. (default)
    #[default]
    Rasterize,
    /// Send the document URL itself; the backend reads the file.
    DirectIngest,
}

/// Which rasteriser implementation renders PDF pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RasterBackendKind {
    /// In-process pdfium via `pdfium-render`. (default)
    #[default]
    Pdfium,
    /// Poppler's `pdfinfo` + `pdftoppm` run as subprocesses.
    Poppler,
}
