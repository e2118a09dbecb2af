//! Subprocess rasterisation via poppler-utils (`pdfinfo`, `pdftoppm`).
//!
//! Useful where shipping the pdfium shared library is awkward but the
//! distribution packages poppler. Every call works inside its own
//! [`tempfile::TempDir`], and child processes are spawned with
//! `kill_on_drop`, so a timed-out render leaves neither processes nor files
//! behind.

use super::{DocumentProbe, PageGeometry, RasterBackend};
use crate::error::ExtractError;
use crate::output::EncodedImage;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Output;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::debug;

static PAGES_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^Pages:\s+(\d+)\s*$").expect("valid pages regex"));

// `Page size:` for a whole-document query, `Page    N size:` with `-f`/`-l`.
static PAGE_SIZE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^Page\s*(?:\d+\s+)?size:\s+([\d.]+)\s+x\s+([\d.]+)\s+pts")
        .expect("valid page size regex")
});

static PAGE_FILE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"-(\d+)\.png$").expect("valid page file regex"));

/// Rasteriser that shells out to poppler-utils.
#[derive(Debug, Clone, Default)]
pub struct PopplerBackend {
    /// Directory holding `pdfinfo` and `pdftoppm`. `None` uses `PATH`.
    bin_dir: Option<PathBuf>,
}

impl PopplerBackend {
    pub fn new(bin_dir: Option<PathBuf>) -> Self {
        Self { bin_dir }
    }

    fn tool(&self, name: &str) -> PathBuf {
        match &self.bin_dir {
            Some(dir) => dir.join(name),
            None => PathBuf::from(name),
        }
    }

    async fn run(&self, tool: &str, args: &[&std::ffi::OsStr]) -> Result<Output, ExtractError> {
        let output = Command::new(self.tool(tool))
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ExtractError::render(format!("failed to run {tool}: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractError::render(format!(
                "{tool} exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(output)
    }
}

/// Write the PDF into a fresh scratch directory.
async fn stage(pdf: &[u8]) -> Result<(TempDir, PathBuf), ExtractError> {
    let dir = tempfile::tempdir()
        .map_err(|e| ExtractError::Internal(format!("Failed to create temp dir: {e}")))?;
    let path = dir.path().join("source.pdf");
    tokio::fs::write(&path, pdf)
        .await
        .map_err(|e| ExtractError::Internal(format!("Failed to stage PDF: {e}")))?;
    Ok((dir, path))
}

#[async_trait]
impl RasterBackend for PopplerBackend {
    fn name(&self) -> &'static str {
        "poppler"
    }

    async fn probe(&self, pdf: &[u8], max_pages: usize) -> Result<DocumentProbe, ExtractError> {
        let (_dir, path) = stage(pdf).await?;
        let last = max_pages.max(1).to_string();
        let output = self
            .run(
                "pdfinfo",
                &["-f".as_ref(), "1".as_ref(), "-l".as_ref(), last.as_ref(), path.as_os_str()],
            )
            .await?;
        let probe = parse_pdfinfo(&String::from_utf8_lossy(&output.stdout))?;
        debug!("pdfinfo probe: {:?}", probe);
        Ok(probe)
    }

    async fn render(
        &self,
        pdf: &[u8],
        last_page: usize,
        dpi: u32,
    ) -> Result<Vec<EncodedImage>, ExtractError> {
        let (dir, path) = stage(pdf).await?;
        let prefix = dir.path().join("page");
        let dpi = dpi.to_string();
        let last = last_page.to_string();

        self.run(
            "pdftoppm",
            &[
                "-png".as_ref(),
                "-r".as_ref(),
                dpi.as_ref(),
                "-f".as_ref(),
                "1".as_ref(),
                "-l".as_ref(),
                last.as_ref(),
                path.as_os_str(),
                prefix.as_os_str(),
            ],
        )
        .await?;

        let files = rendered_pages(dir.path()).await?;
        let mut images = Vec::with_capacity(files.len());
        for file in files {
            let bytes = tokio::fs::read(&file)
                .await
                .map_err(|e| ExtractError::render(format!("reading {}: {e}", file.display())))?;
            images.push(EncodedImage::png(bytes));
        }
        Ok(images)
    }
}

/// PNG files written by `pdftoppm`, in page order.
///
/// `pdftoppm` zero-pads page numbers based on the document's page count, so
/// sorting by name alone is not reliable; sort by the parsed number.
async fn rendered_pages(dir: &Path) -> Result<Vec<PathBuf>, ExtractError> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| ExtractError::Internal(format!("Failed to list temp dir: {e}")))?;

    let mut numbered = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| ExtractError::Internal(format!("Failed to list temp dir: {e}")))?
    {
        let path = entry.path();
        if let Some(n) = page_number(&path) {
            numbered.push((n, path));
        }
    }
    numbered.sort_by_key(|(n, _)| *n);
    Ok(numbered.into_iter().map(|(_, p)| p).collect())
}

fn page_number(path: &Path) -> Option<usize> {
    let name = path.file_name()?.to_str()?;
    PAGE_FILE.captures(name)?.get(1)?.as_str().parse().ok()
}

/// Parse `pdfinfo` output into a probe.
///
/// Every size line present counts toward the largest page, so the caller
/// limits the range with `-f`/`-l`. A missing `Pages:` line is a render
/// error. Missing or malformed size lines only leave the geometry unknown.
pub fn parse_pdfinfo(stdout: &str) -> Result<DocumentProbe, ExtractError> {
    let page_count = PAGES_LINE
        .captures(stdout)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<usize>().ok())
        .ok_or_else(|| ExtractError::render("pdfinfo output has no page count"))?;

    let sizes = PAGE_SIZE_LINE.captures_iter(stdout).filter_map(|c| {
        let w = c.get(1)?.as_str().parse::<f64>().ok()?;
        let h = c.get(2)?.as_str().parse::<f64>().ok()?;
        Some(PageGeometry {
            width_pt: w,
            height_pt: h,
        })
    });

    Ok(DocumentProbe {
        page_count,
        largest_page: PageGeometry::largest(sizes),
    })
}
