//! Instruction text for extraction calls.
//!
//! Centralising prompts here keeps wording changes out of the pipeline code
//! and lets unit tests inspect them without a live model. Callers can replace
//! the base text via [`crate::config::ExtractionConfig::instructions`]; the
//! request context is appended either way.

use crate::output::ResourceKind;
use crate::request::RequestContext;
use crate::schema::ExtractionSchema;

/// Default instruction text for reviewing a plan document or photo.
pub const DEFAULT_INSTRUCTIONS: &str = r#"You are reviewing construction documents for a residential utility installer.

Read every supplied image carefully, including title blocks, legends, callouts and dimension strings.

Rules:
1. Report only what is visible. Do not guess values that are not shown.
2. Give lengths in feet as plain numbers. When a length is scaled or estimated rather than dimensioned, say so in the matching *_length_method field.
3. Leave a field null when the document does not show it.
4. quick_summary must always be filled in.
5. Respond with a single JSON object that matches the provided schema. No prose, no markdown fences."#;

/// Human-readable labels for well-known context keys.
fn context_label(key: &str) -> &str {
    match key {
        "project" | "projectName" => "Project",
        "address" => "Address",
        "builder" => "Builder",
        "community" => "Community",
        "docType" | "documentType" => "Document type",
        other => other,
    }
}

/// Build the instruction block for one request.
///
/// Deterministic for identical inputs: context entries are emitted in key
/// order.
pub fn build_instruction(
    base: Option<&str>,
    context: &RequestContext,
    kind: ResourceKind,
    pages_attached: usize,
) -> String {
    let mut text = base.unwrap_or(DEFAULT_INSTRUCTIONS).trim_end().to_string();

    if !context.is_empty() {
        text.push_str("\n\nKnown context (use it to resolve ambiguity, do not copy it blindly):");
        for (key, value) in context.iter() {
            text.push_str(&format!("\n- {}: {}", context_label(key), value));
        }
    }

    let source = match (kind, pages_attached) {
        (ResourceKind::Image, _) => "\n\nThe attached image is a photo or single-sheet scan.".to_string(),
        (ResourceKind::PaginatedDocument, 0) => {
            "\n\nThe attached file is a multi-page document.".to_string()
        }
        (ResourceKind::PaginatedDocument, 1) => {
            "\n\nThe attached image is the first page of the document.".to_string()
        }
        (ResourceKind::PaginatedDocument, n) => format!(
            "\n\nThe {n} attached images are the first {n} pages of the document, in order."
        ),
    };
    text.push_str(&source);
    text
}

/// System message carrying the schema, for backends that cannot take a
/// structured output constraint natively.
pub fn schema_instruction(schema: &ExtractionSchema) -> String {
    let rendered = serde_json::to_string_pretty(&schema.to_json_schema())
        .unwrap_or_else(|_| "{}".to_string());
    format!(
        "Reply with exactly one JSON object conforming to this JSON Schema \
         (schema '{}' version {}). Output the JSON only.\n\n{}",
        schema.name, schema.version, rendered
    )
}
