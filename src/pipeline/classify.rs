//! Input classification: image or paginated document?
//!
//! A pure function of the URL and the caller's hint. No network access, no
//! failure mode. Decision order, first match wins:
//!
//! 1. explicit image hint
//! 2. explicit document hint
//! 3. an image extension on the path's final segment or on any
//!    query-parameter value (`?preview=thumb.png`)
//! 4. the `pdf` extension in the same places (`?file=plan.pdf`)
//! 5. the configured fallback for ambiguous links

use crate::output::ResourceKind;
use crate::request::DeclaredType;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp"];
const DOCUMENT_EXTENSION: &str = "pdf";

static EXTENSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.([A-Za-z0-9]{1,5})$").expect("valid extension regex"));

/// Classify a resource reference.
pub fn classify(
    resource_url: &str,
    declared_type: Option<&str>,
    fallback: ResourceKind,
) -> ResourceKind {
    let kind = classify_inner(resource_url, declared_type).unwrap_or(fallback);
    debug!("Classified '{}' (hint {:?}) as {:?}", resource_url, declared_type, kind);
    kind
}

fn classify_inner(resource_url: &str, declared_type: Option<&str>) -> Option<ResourceKind> {
    match declared_type.and_then(DeclaredType::parse) {
        Some(DeclaredType::Image) => return Some(ResourceKind::Image),
        Some(DeclaredType::Pdf) => return Some(ResourceKind::PaginatedDocument),
        None => {}
    }

    let (path, query_values) = split_url(resource_url);
    let extensions: Vec<String> = std::iter::once(path.as_str())
        .chain(query_values.iter().map(String::as_str))
        .filter_map(extension_of)
        .collect();

    if extensions.iter().any(|e| IMAGE_EXTENSIONS.contains(&e.as_str())) {
        Some(ResourceKind::Image)
    } else if extensions.iter().any(|e| e == DOCUMENT_EXTENSION) {
        Some(ResourceKind::PaginatedDocument)
    } else {
        None
    }
}

/// Lower-cased extension of a file name's final path segment.
fn extension_of(name: &str) -> Option<String> {
    let last = name.trim_end_matches('/').rsplit('/').next().unwrap_or(name);
    let ext = EXTENSION.captures(last)?.get(1)?.as_str();
    Some(ext.to_ascii_lowercase())
}

/// Split a URL into its decoded path and decoded query values.
///
/// Falls back to string slicing when the URL does not parse, so
/// classification still succeeds on odd input.
fn split_url(resource_url: &str) -> (String, Vec<String>) {
    match reqwest::Url::parse(resource_url.trim()) {
        Ok(url) => {
            let values = url.query_pairs().map(|(_, v)| v.into_owned()).collect();
            (url.path().to_string(), values)
        }
        Err(_) => {
            let no_fragment = resource_url.split('#').next().unwrap_or_default();
            let mut parts = no_fragment.splitn(2, '?');
            let path = parts.next().unwrap_or_default().to_string();
            let values = parts
                .next()
                .map(|q| {
                    q.split('&')
                        .filter_map(|pair| pair.split_once('=').map(|(_, v)| v.to_string()))
                        .collect()
                })
                .unwrap_or_default();
            (path, values)
        }
    }
}
