//! # edgequake-extract
//!
//! Turn a link to a construction drawing (a multi-page PDF plan set or a
//! site photo) into schema-checked JSON using a Vision Language Model.
//!
//! ## Why this crate?
//!
//! Plan sets are scanned or exported drawings. Text extraction on them
//! returns title-block fragments in random order and misses everything drawn
//! rather than typed: service runs, callouts, dimension strings. Instead this
//! crate rasterises the leading sheets and lets a VLM read them as a
//! reviewer would, then holds the reply to a fixed JSON schema.
//!
//! ## Pipeline Overview
//!
//! ```text
//! URL + hint + context
//!  │
//!  ├─ 1. Classify   image or paginated document (no network)
//!  ├─ 2. Fetch      bounded download (documents only)
//!  ├─ 3. Render     probe, plan DPI, rasterise first N pages
//!  ├─ 4. Assemble   instruction + page images as ordered blocks
//!  ├─ 5. Extract    one structured-output call to the model
//!  └─ 6. Normalize  locate reply text, parse, check against the schema
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_extract::{AnalysisRequest, ExtractionConfig, Extractor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ExtractionConfig::builder()
//!         .api_key(std::env::var("OPENAI_API_KEY")?)
//!         .max_pages(3)
//!         .build()?;
//!     let extractor = Extractor::from_config(config)?;
//!
//!     let request = AnalysisRequest::new("https://example.com/plans/lot-12.pdf")
//!         .with_context("builder", "Acme Homes");
//!     let result = extractor.analyze(&request).await?;
//!     println!("{}", serde_json::to_string_pretty(&result.structured)?);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `server` | on      | axum router with shared-secret guard ([`server`]) |
//! | `cli`    | on      | Enables the `edgequake-extract` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable both when embedding only the pipeline:
//! ```toml
//! edgequake-extract = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extract;
pub mod output;
pub mod pipeline;
pub mod prompts;
pub mod request;
pub mod schema;
#[cfg(feature = "server")]
pub mod server;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    DocumentMode, ExtractionConfig, ExtractionConfigBuilder, RasterBackendKind, RasterOptions,
};
pub use error::{ErrorKind, ExtractError};
pub use extract::Extractor;
pub use output::{EncodedImage, ExtractionResult, PageSet, RasterPage, ResourceKind};
pub use pipeline::assemble::{ContentBlock, PayloadSource};
pub use pipeline::llm::{ExtractionBackend, LlmProviderBackend, ResponsesApiBackend};
pub use pipeline::render::{
    DocumentProbe, PageGeometry, PdfiumBackend, PopplerBackend, RasterBackend,
};
pub use request::{AnalysisRequest, DeclaredType, RequestContext};
pub use schema::{ExtractionSchema, FieldSpec, FieldType};
