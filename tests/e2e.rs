//! End-to-end pipeline tests for edgequake-extract.
//!
//! Every stage runs for real except the two expensive edges: rendering uses
//! a scripted rasteriser and the model is a recording mock. Documents are
//! served by a loopback axum fixture, so download limits and
//! status handling are exercised over actual HTTP.
//!
//! The `live_*` tests call a real model and a real renderer. They are gated
//! behind `E2E_ENABLED` and skip themselves otherwise:
//!
//!   E2E_ENABLED=1 OPENAI_API_KEY=sk-… E2E_PLAN_URL=https://… \
//!     cargo test --test e2e live -- --nocapture

#![cfg(feature = "server")]

mod common;

use common::{extractor, start_fixture, FakeRaster, MockBackend};
use edgequake_extract::{
    AnalysisRequest, ContentBlock, DocumentMode, ExtractError, ExtractionConfig,
    ExtractionSchema, Extractor, ResourceKind,
};
use pretty_assertions::assert_eq;
use serde_json::json;

const OK_REPLY: &str = r#"{"quick_summary":"ok"}"#;

fn config() -> ExtractionConfig {
    ExtractionConfig::builder().max_pages(3).build().unwrap()
}

fn image_count(blocks: &[ContentBlock]) -> usize {
    blocks
        .iter()
        .filter(|b| matches!(b, ContentBlock::ImageData { .. }))
        .count()
}

// ── Paginated documents ──────────────────────────────────────────────────────

#[tokio::test]
async fn pdf_is_fetched_rendered_and_extracted() {
    let fixture = start_fixture().await;
    let raster = FakeRaster::new(2);
    let backend = MockBackend::answering(OK_REPLY);
    let ex = extractor(config(), raster.clone(), backend.clone());

    let request = AnalysisRequest::new(fixture.url("/y/plan.pdf")).with_context("builder", "Acme");
    let result = ex.analyze(&request).await.expect("analysis succeeds");

    assert_eq!(result.source_kind, ResourceKind::PaginatedDocument);
    assert_eq!(result.structured["quick_summary"], "ok");
    assert_eq!(result.raw_text, OK_REPLY);
    assert_eq!(result.pages_sent, 2);

    let blocks = backend.last_blocks();
    assert_eq!(blocks.len(), 3);
    match &blocks[0] {
        ContentBlock::Instruction { text } => {
            assert!(text.contains("Builder: Acme"));
            assert!(text.contains("first 2 pages"));
        }
        other => panic!("first block should be the instruction, got {other:?}"),
    }
    assert_eq!(image_count(&blocks), 2);
    assert_eq!(fixture.hit_count(), 1);
}

#[tokio::test]
async fn long_documents_are_capped_at_max_pages() {
    let fixture = start_fixture().await;
    let backend = MockBackend::answering(OK_REPLY);
    let ex = extractor(config(), FakeRaster::new(40), backend.clone());

    let result = ex
        .analyze(&AnalysisRequest::new(fixture.url("/y/plan.pdf")))
        .await
        .unwrap();

    assert_eq!(result.pages_sent, 3);
    assert_eq!(image_count(&backend.last_blocks()), 3);
}

#[tokio::test]
async fn ambiguous_link_uses_configured_fallback() {
    let fixture = start_fixture().await;
    let backend = MockBackend::answering(OK_REPLY);
    let ex = extractor(config(), FakeRaster::new(1), backend.clone());

    // "/download" has no extension and no file-like query value.
    let result = ex
        .analyze(&AnalysisRequest::new(fixture.url("/download?id=77")))
        .await
        .unwrap();
    assert_eq!(result.source_kind, ResourceKind::PaginatedDocument);
    assert_eq!(fixture.hit_count(), 1);
}

#[tokio::test]
async fn query_string_file_name_is_honoured() {
    let fixture = start_fixture().await;
    let backend = MockBackend::answering(OK_REPLY);
    let ex = extractor(
        ExtractionConfig::builder()
            .ambiguous_kind(ResourceKind::Image)
            .build()
            .unwrap(),
        FakeRaster::new(1),
        backend.clone(),
    );

    let result = ex
        .analyze(&AnalysisRequest::new(fixture.url("/download?file=plans.pdf")))
        .await
        .unwrap();
    assert_eq!(result.source_kind, ResourceKind::PaginatedDocument);
    assert_eq!(image_count(&backend.last_blocks()), 1);
}

#[tokio::test]
async fn direct_ingest_skips_download_and_render() {
    let fixture = start_fixture().await;
    let raster = FakeRaster::new(2);
    let backend = MockBackend::answering(OK_REPLY);
    let ex = extractor(
        ExtractionConfig::builder()
            .document_mode(DocumentMode::DirectIngest)
            .build()
            .unwrap(),
        raster.clone(),
        backend.clone(),
    );

    let url = fixture.url("/y/plan.pdf");
    let result = ex.analyze(&AnalysisRequest::new(url.clone())).await.unwrap();

    assert_eq!(result.pages_sent, 0);
    assert_eq!(backend.last_blocks()[1], ContentBlock::DocumentUrl { url });
    assert_eq!(fixture.hit_count(), 0);
    assert_eq!(raster.renders.load(std::sync::atomic::Ordering::SeqCst), 0);
}

// ── Images ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn image_link_is_passed_through_without_fetching() {
    let fixture = start_fixture().await;
    let backend = MockBackend::answering(OK_REPLY);
    let ex = extractor(config(), FakeRaster::new(1), backend.clone());

    let url = fixture.url("/photo.png");
    let result = ex.analyze(&AnalysisRequest::new(url.clone())).await.unwrap();

    assert_eq!(result.source_kind, ResourceKind::Image);
    assert_eq!(result.pages_sent, 1);
    assert_eq!(backend.last_blocks()[1], ContentBlock::ImageUrl { url });
    assert_eq!(fixture.hit_count(), 0);
}

#[tokio::test]
async fn image_is_inlined_for_backends_without_link_support() {
    let fixture = start_fixture().await;
    let backend = MockBackend::inline_only(OK_REPLY);
    let ex = extractor(config(), FakeRaster::new(1), backend.clone());

    ex.analyze(&AnalysisRequest::new(fixture.url("/photo.png")))
        .await
        .unwrap();

    match &backend.last_blocks()[1] {
        ContentBlock::ImageData {
            page, mime_type, ..
        } => {
            assert_eq!(*page, 1);
            assert_eq!(mime_type, "image/png");
        }
        other => panic!("expected inline image, got {other:?}"),
    }
    assert_eq!(fixture.hit_count(), 1);
}

#[tokio::test]
async fn declared_type_overrides_extension() {
    let fixture = start_fixture().await;
    let backend = MockBackend::answering(OK_REPLY);
    let ex = extractor(config(), FakeRaster::new(1), backend.clone());

    let request =
        AnalysisRequest::new(fixture.url("/y/plan.pdf")).with_declared_type("image/png");
    let result = ex.analyze(&request).await.unwrap();
    assert_eq!(result.source_kind, ResourceKind::Image);
}

// ── Failures ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn invalid_requests_never_reach_the_backend() {
    let backend = MockBackend::answering(OK_REPLY);
    let ex = extractor(config(), FakeRaster::new(1), backend.clone());

    for url in ["", "   ", "ftp://x/plan.pdf", "not a url"] {
        let err = ex.analyze(&AnalysisRequest::new(url)).await.unwrap_err();
        assert!(matches!(err, ExtractError::Validation(_)), "{url:?}: {err:?}");
    }
    assert_eq!(backend.call_count(), 0);
}

#[tokio::test]
async fn missing_document_is_fetch_error() {
    let fixture = start_fixture().await;
    let backend = MockBackend::answering(OK_REPLY);
    let ex = extractor(config(), FakeRaster::new(1), backend.clone());

    let err = ex
        .analyze(&AnalysisRequest::new(fixture.url("/nope.pdf")))
        .await
        .unwrap_err();
    assert!(matches!(err, ExtractError::Fetch { .. }), "{err:?}");
    assert_eq!(backend.call_count(), 0);
}

#[tokio::test]
async fn oversized_documents_are_rejected() {
    let fixture = start_fixture().await;
    let backend = MockBackend::answering(OK_REPLY);
    let cfg = ExtractionConfig::builder()
        .max_source_bytes(16 * 1024)
        .build()
        .unwrap();
    let ex = extractor(cfg, FakeRaster::new(1), backend.clone());

    for path in ["/big.pdf", "/stream.pdf"] {
        let err = ex
            .analyze(&AnalysisRequest::new(fixture.url(path)))
            .await
            .unwrap_err();
        match err {
            ExtractError::TooLarge { limit_bytes, .. } => assert_eq!(limit_bytes, 16 * 1024),
            other => panic!("{path}: expected TooLarge, got {other:?}"),
        }
    }
    assert_eq!(backend.call_count(), 0);
}

#[tokio::test]
async fn stalled_download_times_out() {
    let fixture = start_fixture().await;
    let backend = MockBackend::answering(OK_REPLY);
    let raster = FakeRaster::new(1);
    let cfg = ExtractionConfig::builder()
        .download_timeout_secs(1)
        .build()
        .unwrap();
    let ex = extractor(cfg, raster.clone(), backend.clone());

    let started = std::time::Instant::now();
    let err = ex
        .analyze(&AnalysisRequest::new(fixture.url("/slow.pdf")))
        .await
        .unwrap_err();

    assert!(
        matches!(err, ExtractError::Timeout { stage: "download", secs: 1 }),
        "{err:?}"
    );
    assert!(started.elapsed() < std::time::Duration::from_secs(4));
    assert_eq!(fixture.hit_count(), 1);
    assert_eq!(raster.renders.load(std::sync::atomic::Ordering::SeqCst), 0);
    assert_eq!(backend.call_count(), 0);
}

#[tokio::test]
async fn html_served_as_pdf_is_render_error() {
    let fixture = start_fixture().await;
    let backend = MockBackend::answering(OK_REPLY);
    let ex = extractor(config(), FakeRaster::new(1), backend.clone());

    let err = ex
        .analyze(&AnalysisRequest::new(fixture.url("/page.pdf")))
        .await
        .unwrap_err();
    assert!(matches!(err, ExtractError::Render { .. }), "{err:?}");
    assert_eq!(backend.call_count(), 0);
}

#[tokio::test]
async fn unparseable_reply_is_malformed_json() {
    let fixture = start_fixture().await;
    let backend = MockBackend::answering("Sure! Here is the JSON you asked for.");
    let ex = extractor(config(), FakeRaster::new(1), backend);

    let err = ex
        .analyze(&AnalysisRequest::new(fixture.url("/y/plan.pdf")))
        .await
        .unwrap_err();
    assert!(matches!(err, ExtractError::MalformedJson { .. }), "{err:?}");
}

#[tokio::test]
async fn empty_envelope_is_empty_output() {
    let fixture = start_fixture().await;
    let backend = MockBackend::with_reply(common::Reply::Envelope(json!({ "output": [] })));
    let ex = extractor(config(), FakeRaster::new(1), backend);

    let err = ex
        .analyze(&AnalysisRequest::new(fixture.url("/y/plan.pdf")))
        .await
        .unwrap_err();
    assert!(matches!(err, ExtractError::EmptyOutput), "{err:?}");
}

#[tokio::test]
async fn defaults_fill_missing_optional_fields() {
    let fixture = start_fixture().await;
    let backend = MockBackend::answering(OK_REPLY);

    let mut schema = ExtractionSchema::plan_review();
    for field in schema.fields.iter_mut().filter(|f| f.name.ends_with("_length_method")) {
        field.default = Some(json!("not stated"));
    }
    let cfg = ExtractionConfig::builder().schema(schema).build().unwrap();
    let ex = extractor(cfg, FakeRaster::new(1), backend);

    let result = ex
        .analyze(&AnalysisRequest::new(fixture.url("/y/plan.pdf")))
        .await
        .unwrap();
    assert_eq!(result.structured["sewer_length_method"], "not stated");
    assert_eq!(result.structured.get("notes"), None);
}

// ── Live (gated) ─────────────────────────────────────────────────────────────

/// Skip unless E2E_ENABLED and the named variable are set; yields its value.
macro_rules! e2e_skip_unless_ready {
    ($var:expr) => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP: set E2E_ENABLED=1 to run live tests");
            return;
        }
        match std::env::var($var) {
            Ok(v) if !v.is_empty() => v,
            _ => {
                println!("SKIP: {} not set", $var);
                return;
            }
        }
    }};
}

#[tokio::test]
async fn live_plan_review_against_responses_api() {
    let url = e2e_skip_unless_ready!("E2E_PLAN_URL");
    let key = e2e_skip_unless_ready!("OPENAI_API_KEY");
    let _ = tracing_subscriber::fmt()
        .with_env_filter("edgequake_extract=debug")
        .with_test_writer()
        .try_init();

    let config = ExtractionConfig::builder()
        .api_key(key)
        .max_pages(2)
        .build()
        .unwrap();
    let ex = Extractor::from_config(config).expect("extractor");

    let result = ex
        .analyze(&AnalysisRequest::new(url))
        .await
        .expect("live analysis succeeds");

    let summary = result.structured["quick_summary"].as_str().unwrap_or_default();
    assert!(!summary.trim().is_empty(), "quick_summary must be filled in");
    println!("{}", serde_json::to_string_pretty(&result.structured).unwrap());
}
