//! In-process rasterisation via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async contexts.
//! `tokio::task::spawn_blocking` moves the work onto the blocking pool so
//! Tokio worker threads keep serving other requests while a large sheet
//! renders.
//!
//! The library is bound per call. Binding is cheap next to rendering, and it
//! keeps the backend free of shared state between requests.

use super::{DocumentProbe, PageGeometry, RasterBackend, POINTS_PER_INCH};
use crate::error::ExtractError;
use crate::output::EncodedImage;
use crate::pipeline::encode::encode_png;
use async_trait::async_trait;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Rasteriser backed by the pdfium shared library.
#[derive(Debug, Clone, Default)]
pub struct PdfiumBackend {
    /// Directory (or full path) of the pdfium library. `None` searches the
    /// current directory, then the system library path.
    lib_path: Option<PathBuf>,
}

impl PdfiumBackend {
    pub fn new(lib_path: Option<PathBuf>) -> Self {
        Self { lib_path }
    }
}

#[async_trait]
impl RasterBackend for PdfiumBackend {
    fn name(&self) -> &'static str {
        "pdfium"
    }

    async fn probe(&self, pdf: &[u8], max_pages: usize) -> Result<DocumentProbe, ExtractError> {
        let bytes = pdf.to_vec();
        let lib_path = self.lib_path.clone();
        tokio::task::spawn_blocking(move || probe_blocking(lib_path.as_deref(), &bytes, max_pages))
            .await
            .map_err(|e| ExtractError::Internal(format!("Probe task panicked: {e}")))?
    }

    async fn render(
        &self,
        pdf: &[u8],
        last_page: usize,
        dpi: u32,
    ) -> Result<Vec<EncodedImage>, ExtractError> {
        let bytes = pdf.to_vec();
        let lib_path = self.lib_path.clone();
        tokio::task::spawn_blocking(move || {
            render_blocking(lib_path.as_deref(), &bytes, last_page, dpi)
        })
        .await
        .map_err(|e| ExtractError::Internal(format!("Render task panicked: {e}")))?
    }
}

fn bind(lib_path: Option<&Path>) -> Result<Pdfium, ExtractError> {
    let bindings = match lib_path {
        Some(p) if p.is_file() => Pdfium::bind_to_library(p),
        Some(dir) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir)),
        None => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library()),
    }
    .map_err(|e| ExtractError::render(format!("pdfium library unavailable: {e:?}")))?;
    Ok(Pdfium::new(bindings))
}

fn probe_blocking(
    lib_path: Option<&Path>,
    pdf: &[u8],
    max_pages: usize,
) -> Result<DocumentProbe, ExtractError> {
    let pdfium = bind(lib_path)?;
    let document = pdfium
        .load_pdf_from_byte_slice(pdf, None)
        .map_err(|e| ExtractError::render(format!("could not open PDF: {e:?}")))?;

    let pages = document.pages();
    let page_count = pages.len() as usize;
    let sizes = (0..page_count.min(max_pages)).filter_map(|idx| {
        pages.get(idx as u16).ok().map(|p| PageGeometry {
            width_pt: p.width().value as f64,
            height_pt: p.height().value as f64,
        })
    });
    let largest_page = PageGeometry::largest(sizes);

    debug!("pdfium probe: {} pages, largest {:?}", page_count, largest_page);
    Ok(DocumentProbe {
        page_count,
        largest_page,
    })
}

fn render_blocking(
    lib_path: Option<&Path>,
    pdf: &[u8],
    last_page: usize,
    dpi: u32,
) -> Result<Vec<EncodedImage>, ExtractError> {
    let pdfium = bind(lib_path)?;
    let document = pdfium
        .load_pdf_from_byte_slice(pdf, None)
        .map_err(|e| ExtractError::render(format!("could not open PDF: {e:?}")))?;

    let pages = document.pages();
    let last_page = last_page.min(pages.len() as usize);
    let render_config =
        PdfRenderConfig::new().scale_page_by_factor(dpi as f32 / POINTS_PER_INCH as f32);

    let mut images = Vec::with_capacity(last_page);
    for idx in 0..last_page {
        let page = pages
            .get(idx as u16)
            .map_err(|e| ExtractError::render(format!("page {}: {e:?}", idx + 1)))?;

        let image = page
            .render_with_config(&render_config)
            .map_err(|e| ExtractError::render(format!("page {}: {e:?}", idx + 1)))?
            .as_image();
        debug!(
            "Rendered page {} → {}x{} px",
            idx + 1,
            image.width(),
            image.height()
        );

        images.push(encode_png(&image)?);
    }

    Ok(images)
}
