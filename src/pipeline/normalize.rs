//! Response normalisation: envelope → schema-checked JSON.
//!
//! Backends disagree on where the model's text lives. Rather than one
//! function that knows every shape, the locations are an ordered list of
//! small pure strategies; the first that yields non-empty text wins. Adding
//! a backend shape is one more entry in [`STRATEGIES`].
//!
//! The text must then parse as JSON and pass [`ExtractionSchema::check`].
//! There is no partial recovery: no fence stripping, no "find the first
//! brace". A reply that needs repair is reported as
//! [`ExtractError::MalformedJson`] so the caller sees it.

use crate::error::ExtractError;
use crate::output::{ExtractionResult, ResourceKind};
use crate::schema::ExtractionSchema;
use serde_json::Value;
use tracing::{debug, warn};

type Strategy = fn(&Value) -> Option<String>;

/// Text locations tried in order.
const STRATEGIES: &[(&str, Strategy)] = &[
    ("output_text", top_level_output_text),
    ("output[].content[]", output_items),
    ("choices[0].message", chat_completion),
];

fn non_empty(s: &str) -> Option<String> {
    (!s.trim().is_empty()).then(|| s.to_string())
}

fn top_level_output_text(envelope: &Value) -> Option<String> {
    envelope.get("output_text")?.as_str().and_then(non_empty)
}

fn output_items(envelope: &Value) -> Option<String> {
    envelope
        .get("output")?
        .as_array()?
        .iter()
        .filter_map(|item| item.get("content")?.as_array())
        .flatten()
        .filter(|part| {
            matches!(
                part.get("type").and_then(Value::as_str),
                Some("output_text") | Some("text")
            )
        })
        .find_map(|part| part.get("text")?.as_str().and_then(non_empty))
}

fn chat_completion(envelope: &Value) -> Option<String> {
    envelope
        .get("choices")?
        .get(0)?
        .get("message")?
        .get("content")?
        .as_str()
        .and_then(non_empty)
}

/// Locate the model's text in `envelope`.
pub fn extract_text(envelope: &Value) -> Option<String> {
    STRATEGIES.iter().find_map(|(name, strategy)| {
        let text = strategy(envelope)?;
        debug!("Envelope text found via {}", name);
        Some(text)
    })
}

/// Turn a backend envelope into an [`ExtractionResult`].
pub fn normalize(
    envelope: &Value,
    kind: ResourceKind,
    schema: &ExtractionSchema,
    pages_sent: usize,
) -> Result<ExtractionResult, ExtractError> {
    let raw_text = extract_text(envelope).ok_or(ExtractError::EmptyOutput)?;

    let parsed: Value = serde_json::from_str(&raw_text).map_err(|e| {
        warn!("Model reply is not JSON ({} chars)", raw_text.len());
        ExtractError::MalformedJson {
            detail: format!("not JSON: {e}"),
        }
    })?;

    let structured = schema
        .check(parsed)
        .map_err(|detail| ExtractError::MalformedJson { detail })?;

    Ok(ExtractionResult {
        source_kind: kind,
        structured,
        raw_text,
        pages_sent,
    })
}
