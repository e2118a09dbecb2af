//! Shared fakes for the integration tests: a scripted rasteriser, a
//! recording extraction backend, and a loopback HTTP fixture server.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{body::Body, extract::State, http::header, response::IntoResponse, routing::get, Router};
use edgequake_extract::{
    ContentBlock, DocumentProbe, EncodedImage, ExtractError, ExtractionBackend, ExtractionConfig,
    ExtractionSchema, Extractor, PageGeometry, RasterBackend,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ── Rasteriser ───────────────────────────────────────────────────────────────

/// Reports a fixed page count and renders one tiny PNG per page.
pub struct FakeRaster {
    pub pages: usize,
    pub renders: AtomicUsize,
}

impl FakeRaster {
    pub fn new(pages: usize) -> Arc<Self> {
        Arc::new(Self {
            pages,
            renders: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl RasterBackend for FakeRaster {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn probe(&self, _pdf: &[u8], _max_pages: usize) -> Result<DocumentProbe, ExtractError> {
        Ok(DocumentProbe {
            page_count: self.pages,
            largest_page: Some(PageGeometry {
                width_pt: 612.0,
                height_pt: 792.0,
            }),
        })
    }

    async fn render(
        &self,
        _pdf: &[u8],
        last_page: usize,
        _dpi: u32,
    ) -> Result<Vec<EncodedImage>, ExtractError> {
        self.renders.fetch_add(1, Ordering::SeqCst);
        Ok((1..=last_page)
            .map(|p| EncodedImage::png(format!("page-{p}").into_bytes()))
            .collect())
    }
}

// ── Extraction backend ───────────────────────────────────────────────────────

/// What the mock backend answers.
#[derive(Clone)]
pub enum Reply {
    Envelope(Value),
    RateLimited(u64),
}

/// Records every call and answers with a canned reply.
pub struct MockBackend {
    pub reply: Reply,
    pub remote_images: bool,
    pub calls: Mutex<Vec<Vec<ContentBlock>>>,
}

impl MockBackend {
    pub fn answering(text: &str) -> Arc<Self> {
        Self::with_reply(Reply::Envelope(json!({ "output_text": text })))
    }

    pub fn with_reply(reply: Reply) -> Arc<Self> {
        Arc::new(Self {
            reply,
            remote_images: true,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn inline_only(text: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Reply::Envelope(json!({ "output_text": text })),
            remote_images: false,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn last_blocks(&self) -> Vec<ContentBlock> {
        self.calls.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl ExtractionBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn accepts_remote_images(&self) -> bool {
        self.remote_images
    }

    async fn extract(
        &self,
        blocks: &[ContentBlock],
        _schema: &ExtractionSchema,
    ) -> Result<Value, ExtractError> {
        self.calls.lock().unwrap().push(blocks.to_vec());
        match &self.reply {
            Reply::Envelope(v) => Ok(v.clone()),
            Reply::RateLimited(secs) => Err(ExtractError::Upstream {
                backend: "mock".into(),
                status: Some(429),
                rate_limited: true,
                auth_failed: false,
                retry_after_secs: Some(*secs),
                detail: "rate limited".into(),
            }),
        }
    }
}

pub fn extractor(
    config: ExtractionConfig,
    raster: Arc<FakeRaster>,
    backend: Arc<MockBackend>,
) -> Extractor {
    Extractor::with_backends(config, raster, backend).expect("extractor builds")
}

// ── Fixture server ───────────────────────────────────────────────────────────

pub const FAKE_PDF: &[u8] = b"%PDF-1.7\n% fixture body\n%%EOF\n";

/// A loopback server exposing fixture documents.
pub struct Fixture {
    pub addr: SocketAddr,
    pub hits: Arc<AtomicUsize>,
}

impl Fixture {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn hit_count(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

fn tiny_png() -> Vec<u8> {
    let img = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
        4,
        4,
        image::Rgb([200, 200, 200]),
    ));
    let mut buf = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

/// Start the fixture server on an ephemeral port.
///
/// Routes:
/// * `/y/plan.pdf`: small fake PDF
/// * `/download?file=…`: same PDF behind a query-string name
/// * `/photo.png`: a real 4×4 PNG
/// * `/big.pdf`: 64 KiB body with Content-Length
/// * `/stream.pdf`: 64 KiB body streamed without Content-Length
/// * `/page.pdf`: an HTML page served under a PDF name
/// * `/slow.pdf`: the small PDF, after a 5 s stall
/// * anything else: 404
pub async fn start_fixture() -> Fixture {
    let hits = Arc::new(AtomicUsize::new(0));

    async fn count(State(hits): State<Arc<AtomicUsize>>) {
        hits.fetch_add(1, Ordering::SeqCst);
    }

    let app = Router::new()
        .route(
            "/y/plan.pdf",
            get(|s: State<Arc<AtomicUsize>>| async move {
                count(s).await;
                ([(header::CONTENT_TYPE, "application/pdf")], FAKE_PDF)
            }),
        )
        .route(
            "/download",
            get(|s: State<Arc<AtomicUsize>>| async move {
                count(s).await;
                ([(header::CONTENT_TYPE, "application/octet-stream")], FAKE_PDF)
            }),
        )
        .route(
            "/photo.png",
            get(|s: State<Arc<AtomicUsize>>| async move {
                count(s).await;
                ([(header::CONTENT_TYPE, "image/png")], tiny_png())
            }),
        )
        .route(
            "/big.pdf",
            get(|s: State<Arc<AtomicUsize>>| async move {
                count(s).await;
                let mut body = FAKE_PDF.to_vec();
                body.resize(64 * 1024, b' ');
                body
            }),
        )
        .route(
            "/stream.pdf",
            get(|s: State<Arc<AtomicUsize>>| async move {
                count(s).await;
                let chunks = (0..64).map(|_| Ok::<_, std::io::Error>(vec![b'%'; 1024]));
                Body::from_stream(futures::stream::iter(chunks)).into_response()
            }),
        )
        .route(
            "/page.pdf",
            get(|s: State<Arc<AtomicUsize>>| async move {
                count(s).await;
                ([(header::CONTENT_TYPE, "text/html")], "<!doctype html><p>login</p>")
            }),
        )
        .route(
            "/slow.pdf",
            get(|s: State<Arc<AtomicUsize>>| async move {
                count(s).await;
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                ([(header::CONTENT_TYPE, "application/pdf")], FAKE_PDF)
            }),
        )
        .with_state(Arc::clone(&hits));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Fixture { addr, hits }
}
