//! Request assembly: instruction + payload → ordered content blocks.
//!
//! The blocks are backend-neutral. Each [`crate::pipeline::llm::ExtractionBackend`]
//! maps them onto its own wire shape, so the pipeline never deals in
//! provider JSON.

use crate::output::{EncodedImage, PageSet, ResourceKind};

/// One element of the multimodal request sent to the extraction backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentBlock {
    /// Instruction text. Always first, always exactly one.
    Instruction { text: String },
    /// An image the backend fetches itself.
    ImageUrl { url: String },
    /// An inline rendered page.
    ImageData {
        page: usize,
        mime_type: String,
        /// Base64 payload, no `data:` prefix.
        data: String,
    },
    /// A whole document the backend ingests itself.
    DocumentUrl { url: String },
}

/// Where the visual payload comes from.
#[derive(Debug, Clone, Copy)]
pub enum PayloadSource<'a> {
    /// Pass the original link through untouched.
    Remote(&'a str),
    /// Inline pages rendered locally.
    Pages(&'a PageSet),
    /// Inline a downloaded image, for backends that cannot follow links.
    Inline(&'a EncodedImage),
}

/// Build the ordered content blocks for one extraction call.
///
/// `kind` only matters for [`PayloadSource::Remote`]: an image link becomes
/// an [`ContentBlock::ImageUrl`], a document link a
/// [`ContentBlock::DocumentUrl`]. For `N` rendered pages the result has
/// `N + 1` blocks.
pub fn assemble(
    instruction: impl Into<String>,
    kind: ResourceKind,
    source: PayloadSource<'_>,
) -> Vec<ContentBlock> {
    let mut blocks = vec![ContentBlock::Instruction {
        text: instruction.into(),
    }];

    match source {
        PayloadSource::Remote(url) => blocks.push(match kind {
            ResourceKind::Image => ContentBlock::ImageUrl {
                url: url.to_string(),
            },
            ResourceKind::PaginatedDocument => ContentBlock::DocumentUrl {
                url: url.to_string(),
            },
        }),
        PayloadSource::Pages(set) => {
            blocks.reserve(set.len());
            blocks.extend(set.iter().map(|p| ContentBlock::ImageData {
                page: p.index,
                mime_type: p.image.mime_type.clone(),
                data: p.image.to_base64(),
            }));
        }
        PayloadSource::Inline(image) => blocks.push(ContentBlock::ImageData {
            page: 1,
            mime_type: image.mime_type.clone(),
            data: image.to_base64(),
        }),
    }

    blocks
}
