//! PDF rasterisation: turn a downloaded document into a bounded [`PageSet`].
//!
//! The pipeline logic here is backend-agnostic. Rendering itself sits behind
//! [`RasterBackend`], with two implementations chosen at deployment time:
//!
//! * [`PdfiumBackend`]: in-process pdfium, run on the blocking pool.
//! * [`PopplerBackend`]: `pdfinfo` / `pdftoppm` as subprocesses.
//!
//! ## Why plan DPI before rendering?
//!
//! Plan sheets range from letter to 36×48 in, often in the same file: a
//! letter cover followed by full-size sheets. At a fixed DPI the large ones
//! blow past any sane pixel budget, and rendering first and downscaling after
//! wastes exactly the CPU and memory the budget exists to protect. So the
//! pages about to be rendered are probed, and the DPI lowered up front for
//! the largest of them by the square root of the overage ratio. One DPI
//! serves the whole set, and every page in it stays within the budget.

mod pdfium;
mod poppler;

pub use pdfium::PdfiumBackend;
pub use poppler::{parse_pdfinfo, PopplerBackend};

use crate::config::{ExtractionConfig, RasterBackendKind, RasterOptions};
use crate::error::ExtractError;
use crate::output::{EncodedImage, PageSet, RasterPage};
use crate::pipeline::fetch::SourceDocument;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// PDF user-space units per inch.
pub const POINTS_PER_INCH: f64 = 72.0;

/// Page size in PDF points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageGeometry {
    pub width_pt: f64,
    pub height_pt: f64,
}

impl PageGeometry {
    /// Rendered pixel area at `dpi`.
    pub fn pixel_area(&self, dpi: u32) -> f64 {
        let scale = dpi as f64 / POINTS_PER_INCH;
        (self.width_pt * scale) * (self.height_pt * scale)
    }

    /// The page with the greatest area, if any.
    pub fn largest(pages: impl IntoIterator<Item = PageGeometry>) -> Option<PageGeometry> {
        pages
            .into_iter()
            .max_by(|a, b| (a.width_pt * a.height_pt).total_cmp(&(b.width_pt * b.height_pt)))
    }
}

/// What a backend learns about a document before rendering it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DocumentProbe {
    pub page_count: usize,
    /// Largest page among those that will be rendered, when the backend can
    /// tell.
    pub largest_page: Option<PageGeometry>,
}

/// A page rasteriser.
///
/// Implementations behave as a pure function of
/// `(document bytes, page range, dpi)`; they keep no state between calls and
/// release any temporary storage before returning.
#[async_trait]
pub trait RasterBackend: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Page count and the largest geometry among pages `1..=max_pages`.
    async fn probe(&self, pdf: &[u8], max_pages: usize) -> Result<DocumentProbe, ExtractError>;

    /// Render pages `1..=last_page` at `dpi`, one encoded image per page, in
    /// page order.
    async fn render(
        &self,
        pdf: &[u8],
        last_page: usize,
        dpi: u32,
    ) -> Result<Vec<EncodedImage>, ExtractError>;
}

/// Construct the backend selected in `config`.
pub fn backend_from_config(config: &ExtractionConfig) -> Arc<dyn RasterBackend> {
    match config.raster_backend {
        RasterBackendKind::Pdfium => Arc::new(PdfiumBackend::new(config.pdfium_lib_path.clone())),
        RasterBackendKind::Poppler => Arc::new(PopplerBackend::new(config.poppler_bin_dir.clone())),
    }
}

/// Choose the render DPI for a page of the given geometry.
///
/// Returns `target_dpi` when the page fits the budget (or its size is
/// unknown), otherwise the largest integer DPI whose pixel area is within
/// `max_pixels`. Never below 1.
pub fn plan_dpi(geometry: Option<PageGeometry>, target_dpi: u32, max_pixels: u64) -> u32 {
    let Some(g) = geometry else {
        return target_dpi;
    };
    if g.width_pt <= 0.0 || g.height_pt <= 0.0 {
        return target_dpi;
    }

    let area = g.pixel_area(target_dpi);
    if area <= max_pixels as f64 {
        return target_dpi;
    }

    let ratio = max_pixels as f64 / area;
    let mut dpi = ((target_dpi as f64) * ratio.sqrt()).floor() as u32;
    // Float error can land one step either side of the ceiling.
    while dpi > 1 && g.pixel_area(dpi) > max_pixels as f64 {
        dpi -= 1;
    }
    while dpi < target_dpi && g.pixel_area(dpi + 1) <= max_pixels as f64 {
        dpi += 1;
    }
    dpi.max(1)
}

/// Rasterise the leading pages of `source`.
///
/// Fails with [`ExtractError::Render`] for non-PDF input, zero-page documents
/// and renders that yield nothing, and with [`ExtractError::Timeout`] when
/// the backend exceeds `render_timeout_secs`. Dropping the render future on
/// timeout releases the backend's temporary storage.
pub async fn rasterize(
    source: &SourceDocument,
    backend: &dyn RasterBackend,
    options: RasterOptions,
) -> Result<PageSet, ExtractError> {
    if !source.looks_like_pdf() {
        return Err(ExtractError::render(format!(
            "'{}' is not a PDF (first bytes {:?})",
            source.url,
            source.magic()
        )));
    }

    let timeout = Duration::from_secs(options.render_timeout_secs);
    let work = async {
        let probe = backend.probe(&source.bytes, options.max_pages).await?;
        if probe.page_count == 0 {
            return Err(ExtractError::render("document has no pages"));
        }

        let dpi = plan_dpi(probe.largest_page, options.target_dpi, options.max_pixels_per_page);
        if dpi < options.target_dpi {
            info!(
                "Lowering DPI {} → {} to stay within {} px/page",
                options.target_dpi, dpi, options.max_pixels_per_page
            );
        }

        let last_page = probe.page_count.min(options.max_pages);
        if probe.page_count > last_page {
            debug!(
                "Rendering first {} of {} pages",
                last_page, probe.page_count
            );
        }

        let images = backend.render(&source.bytes, last_page, dpi).await?;
        Ok((probe, dpi, images))
    };

    let (probe, dpi, mut images) = match tokio::time::timeout(timeout, work).await {
        Ok(result) => result?,
        Err(_) => {
            warn!("{} backend timed out on {}", backend.name(), source.url);
            return Err(ExtractError::Timeout {
                stage: "render",
                secs: options.render_timeout_secs,
            });
        }
    };

    if images.is_empty() {
        return Err(ExtractError::render(format!(
            "{} backend produced no pages for a {}-page document",
            backend.name(),
            probe.page_count
        )));
    }
    images.truncate(options.max_pages);

    let pages: Vec<RasterPage> = images
        .into_iter()
        .enumerate()
        .map(|(i, image)| RasterPage {
            index: i + 1,
            image,
        })
        .collect();

    info!(
        "Rasterised {} page(s) at {} DPI via {}",
        pages.len(),
        dpi,
        backend.name()
    );

    PageSet::new(pages, dpi, probe.page_count)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LETTER: PageGeometry = PageGeometry {
        width_pt: 612.0,
        height_pt: 792.0,
    };
    const ARCH_D: PageGeometry = PageGeometry {
        width_pt: 24.0 * 72.0,
        height_pt: 36.0 * 72.0,
    };

    #[test]
    fn small_pages_keep_target_dpi() {
        assert_eq!(plan_dpi(Some(LETTER), 150, 12_000_000), 150);
    }

    #[test]
    fn unknown_geometry_keeps_target_dpi() {
        assert_eq!(plan_dpi(None, 200, 1_000), 200);
    }

    #[test]
    fn oversized_pages_get_largest_fitting_dpi() {
        let dpi = plan_dpi(Some(ARCH_D), 150, 12_000_000);
        assert_eq!(dpi, 117);
        assert!(ARCH_D.pixel_area(dpi) <= 12_000_000.0);
        assert!(ARCH_D.pixel_area(dpi + 1) > 12_000_000.0);
    }

    #[test]
    fn dpi_never_drops_below_one() {
        assert_eq!(plan_dpi(Some(ARCH_D), 150, 1), 1);
    }

    // ── rasterize() against a scripted backend ──────────────────────────

    struct Scripted {
        pages: usize,
        /// Per-page sizes; pages past the end repeat the last entry.
        geometry: Vec<PageGeometry>,
        render_nothing: bool,
        delay: Option<Duration>,
        seen_dpi: std::sync::Mutex<Option<u32>>,
    }

    impl Scripted {
        fn new(pages: usize) -> Self {
            Self {
                pages,
                geometry: vec![LETTER],
                render_nothing: false,
                delay: None,
                seen_dpi: std::sync::Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl RasterBackend for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn probe(
            &self,
            _pdf: &[u8],
            max_pages: usize,
        ) -> Result<DocumentProbe, ExtractError> {
            let sizes = (0..self.pages.min(max_pages)).filter_map(|i| {
                self.geometry
                    .get(i)
                    .or_else(|| self.geometry.last())
                    .copied()
            });
            Ok(DocumentProbe {
                page_count: self.pages,
                largest_page: PageGeometry::largest(sizes),
            })
        }

        async fn render(
            &self,
            _pdf: &[u8],
            last_page: usize,
            dpi: u32,
        ) -> Result<Vec<EncodedImage>, ExtractError> {
            if let Some(d) = self.delay {
                tokio::time::sleep(d).await;
            }
            *self.seen_dpi.lock().unwrap() = Some(dpi);
            if self.render_nothing {
                return Ok(vec![]);
            }
            Ok((1..=last_page)
                .map(|p| EncodedImage::png(vec![p as u8]))
                .collect())
        }
    }

    fn pdf() -> SourceDocument {
        SourceDocument {
            url: "https://x/y/plan.pdf".into(),
            bytes: b"%PDF-1.7 test".to_vec(),
            content_type: Some("application/pdf".into()),
        }
    }

    fn options(max_pages: usize) -> RasterOptions {
        RasterOptions {
            target_dpi: 150,
            max_pages,
            max_pixels_per_page: 12_000_000,
            render_timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn caps_pages_and_indexes_from_one() {
        let backend = Scripted::new(7);
        let set = rasterize(&pdf(), &backend, options(3)).await.unwrap();
        assert_eq!(set.len(), 3);
        assert_eq!(set.source_page_count(), 7);
        let indices: Vec<_> = set.iter().map(|p| p.index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
        assert_eq!(set.pages()[2].image.bytes, vec![3]);
    }

    #[tokio::test]
    async fn short_documents_render_every_page() {
        let backend = Scripted::new(2);
        let set = rasterize(&pdf(), &backend, options(3)).await.unwrap();
        assert_eq!(set.len(), 2);
    }

    #[tokio::test]
    async fn zero_pages_is_render_error() {
        let backend = Scripted::new(0);
        let err = rasterize(&pdf(), &backend, options(3)).await.unwrap_err();
        assert!(matches!(err, ExtractError::Render { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn empty_render_is_render_error() {
        let mut backend = Scripted::new(4);
        backend.render_nothing = true;
        let err = rasterize(&pdf(), &backend, options(3)).await.unwrap_err();
        assert!(matches!(err, ExtractError::Render { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn non_pdf_is_render_error() {
        let backend = Scripted::new(1);
        let mut doc = pdf();
        doc.bytes = b"<!doctype html>".to_vec();
        let err = rasterize(&doc, &backend, options(3)).await.unwrap_err();
        assert!(matches!(err, ExtractError::Render { .. }));
    }

    #[tokio::test]
    async fn oversized_first_page_lowers_dpi_before_render() {
        let mut backend = Scripted::new(1);
        backend.geometry = vec![ARCH_D];
        let set = rasterize(&pdf(), &backend, options(3)).await.unwrap();
        assert_eq!(set.dpi(), 117);
        assert_eq!(*backend.seen_dpi.lock().unwrap(), Some(117));
    }

    #[tokio::test]
    async fn oversized_later_page_lowers_dpi_for_the_set() {
        let mut backend = Scripted::new(3);
        backend.geometry = vec![LETTER, ARCH_D, LETTER];
        let set = rasterize(&pdf(), &backend, options(3)).await.unwrap();
        assert_eq!(set.dpi(), 117);
        assert_eq!(*backend.seen_dpi.lock().unwrap(), Some(117));
        assert!(ARCH_D.pixel_area(set.dpi()) <= 12_000_000.0);
    }

    #[tokio::test]
    async fn oversized_page_past_the_cap_is_ignored() {
        let mut backend = Scripted::new(5);
        backend.geometry = vec![LETTER, LETTER, LETTER, ARCH_D];
        let set = rasterize(&pdf(), &backend, options(3)).await.unwrap();
        assert_eq!(set.dpi(), 150);
    }

    #[test]
    fn largest_picks_greatest_area() {
        let tall = PageGeometry {
            width_pt: 100.0,
            height_pt: 3000.0,
        };
        assert_eq!(PageGeometry::largest([LETTER, ARCH_D, tall]), Some(ARCH_D));
        assert_eq!(PageGeometry::largest(Vec::new()), None);
    }

    #[tokio::test]
    async fn slow_backend_times_out() {
        let mut backend = Scripted::new(1);
        backend.delay = Some(Duration::from_secs(3));
        let mut opts = options(3);
        opts.render_timeout_secs = 1;
        let err = rasterize(&pdf(), &backend, opts).await.unwrap_err();
        assert!(matches!(err, ExtractError::Timeout { stage: "render", .. }));
    }
}
