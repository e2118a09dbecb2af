//! Pipeline stages for URL-to-structured-JSON extraction.
//!
//! Each submodule implements exactly one transformation step.
//! Keeping stages separate makes each independently testable and lets us
//! swap implementations (e.g. rendering or model backend) without touching
//! other stages.
//!
//! ## Data Flow
//!
//! ```text
//! classify ──▶ fetch ──▶ render ──▶ assemble ──▶ llm ──▶ normalize
//!  (kind)     (bytes)   (PageSet)   (blocks)   (envelope)  (JSON)
//! ```
//!
//! 1. [`classify`]: image or paginated document, from URL and hint alone
//! 2. [`fetch`]: bounded download of documents that need rendering
//! 3. [`render`]: probe, plan DPI, rasterise the leading pages; pdfium
//!    runs in `spawn_blocking`, poppler in child processes
//! 4. [`encode`]: PNG-encode rendered pages
//! 5. [`assemble`]: instruction + images (or links) as ordered blocks
//! 6. [`llm`]: one call to the extraction backend
//! 7. [`normalize`]: find the text in the envelope, parse, check the schema
//!
//! Images skip steps 2–4: their link goes straight to the backend, or is
//! fetched and inlined when the backend cannot follow links.

pub mod assemble;
pub mod classify;
pub mod encode;
pub mod fetch;
pub mod llm;
pub mod normalize;
pub mod render;
