//! Extraction client: send assembled blocks to a vision model, get back the
//! raw response envelope.
//!
//! Two backends sit behind [`ExtractionBackend`]:
//!
//! * [`ResponsesApiBackend`] talks to an OpenAI-compatible `/responses`
//!   endpoint directly with `reqwest`. It is the only path that can enforce
//!   the schema server-side (`strict` JSON-schema output) and pass document
//!   links through for direct ingestion.
//! * [`LlmProviderBackend`] wraps any `edgequake_llm` provider (OpenAI,
//!   Anthropic, Gemini, Ollama …). The schema travels as a system message and
//!   is enforced after the fact by the normalizer.
//!
//! ## No retries
//!
//! Exactly one outbound call per request. 429s and transient 5xx surface as
//! [`ExtractError::Upstream`] with `rate_limited` / `retry_after_secs` set, so
//! the caller, who knows its own latency budget, decides whether to retry.

use crate::config::ExtractionConfig;
use crate::error::ExtractError;
use crate::pipeline::assemble::ContentBlock;
use crate::prompts::schema_instruction;
use crate::schema::ExtractionSchema;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Longest slice of an upstream error body kept in error details.
const MAX_ERROR_BODY: usize = 512;

/// A vision model that turns content blocks into a response envelope.
#[async_trait]
pub trait ExtractionBackend: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &str;

    /// Whether [`ContentBlock::ImageUrl`] blocks can be sent as-is. Backends
    /// that return `false` get images inlined as [`ContentBlock::ImageData`].
    fn accepts_remote_images(&self) -> bool {
        true
    }

    /// Make exactly one call. The returned value is the backend's response
    /// body, handed unchanged to the normalizer.
    async fn extract(
        &self,
        blocks: &[ContentBlock],
        schema: &ExtractionSchema,
    ) -> Result<Value, ExtractError>;
}

/// Pick the extraction backend for `config`.
///
/// Most specific wins:
///
/// 1. a pre-built provider (`config.provider`),
/// 2. a named provider (`config.provider_name`), built through
///    [`ProviderFactory::create_llm_provider`],
/// 3. the Responses API, which needs `config.api_key`.
pub fn build_backend(
    config: &ExtractionConfig,
) -> Result<Arc<dyn ExtractionBackend>, ExtractError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::new(LlmProviderBackend::new(Arc::clone(provider), config)));
    }

    if let Some(ref name) = config.provider_name {
        let provider = ProviderFactory::create_llm_provider(name, &config.model).map_err(|e| {
            ExtractError::InvalidConfig(format!("provider '{name}' is not configured: {e}"))
        })?;
        return Ok(Arc::new(LlmProviderBackend::new(provider, config)));
    }

    Ok(Arc::new(ResponsesApiBackend::from_config(config)?))
}

// ── Responses API ────────────────────────────────────────────────────────

/// Direct client for an OpenAI-compatible `POST /responses` endpoint.
#[derive(Clone)]
pub struct ResponsesApiBackend {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_output_tokens: usize,
    image_detail: String,
    timeout_secs: u64,
}

impl std::fmt::Debug for ResponsesApiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponsesApiBackend")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("timeout_secs", &self.timeout_secs)
            .finish_non_exhaustive()
    }
}

impl ResponsesApiBackend {
    pub fn from_config(config: &ExtractionConfig) -> Result<Self, ExtractError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                ExtractError::InvalidConfig(
                    "no extraction backend configured: set an API key or a provider".into(),
                )
            })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.api_timeout_secs))
            .build()
            .map_err(|e| ExtractError::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/responses", config.api_base_url),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
            image_detail: config.image_detail.clone(),
            timeout_secs: config.api_timeout_secs,
        })
    }

    /// JSON body for one call.
    pub fn request_body(&self, blocks: &[ContentBlock], schema: &ExtractionSchema) -> Value {
        let content: Vec<Value> = blocks
            .iter()
            .map(|block| match block {
                ContentBlock::Instruction { text } => json!({
                    "type": "input_text",
                    "text": text,
                }),
                ContentBlock::ImageUrl { url } => json!({
                    "type": "input_image",
                    "image_url": url,
                    "detail": self.image_detail,
                }),
                ContentBlock::ImageData {
                    mime_type, data, ..
                } => json!({
                    "type": "input_image",
                    "image_url": format!("data:{mime_type};base64,{data}"),
                    "detail": self.image_detail,
                }),
                ContentBlock::DocumentUrl { url } => json!({
                    "type": "input_file",
                    "file_url": url,
                }),
            })
            .collect();

        json!({
            "model": self.model,
            "input": [{ "role": "user", "content": content }],
            "text": {
                "format": {
                    "type": "json_schema",
                    "name": schema.name,
                    // Strict mode only accepts closed objects.
                    "strict": !schema.additional_properties,
                    "schema": schema.to_json_schema(),
                }
            },
            "temperature": self.temperature,
            "max_output_tokens": self.max_output_tokens,
        })
    }

    fn transport_error(&self, e: reqwest::Error) -> ExtractError {
        if e.is_timeout() {
            ExtractError::Timeout {
                stage: "extraction",
                secs: self.timeout_secs,
            }
        } else {
            ExtractError::upstream(self.name(), e.to_string())
        }
    }
}

#[async_trait]
impl ExtractionBackend for ResponsesApiBackend {
    fn name(&self) -> &str {
        "responses_api"
    }

    async fn extract(
        &self,
        blocks: &[ContentBlock],
        schema: &ExtractionSchema,
    ) -> Result<Value, ExtractError> {
        let start = Instant::now();
        let body = self.request_body(blocks, schema);
        info!(
            "Calling {} ({}) with {} block(s)",
            self.endpoint,
            self.model,
            blocks.len()
        );

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            let text = response.text().await.unwrap_or_default();
            warn!("{} answered {}", self.endpoint, status);
            return Err(status_error(self.name(), status, retry_after, &text));
        }

        let envelope: Value = response.json().await.map_err(|e| {
            if e.is_timeout() {
                self.transport_error(e)
            } else {
                ExtractError::upstream(self.name(), format!("response is not JSON: {e}"))
            }
        })?;

        debug!("Extraction call finished in {:?}", start.elapsed());
        Ok(envelope)
    }
}

/// Map a non-2xx response to [`ExtractError::Upstream`].
fn status_error(
    backend: &str,
    status: StatusCode,
    retry_after_secs: Option<u64>,
    body: &str,
) -> ExtractError {
    let mut detail: String = body.chars().take(MAX_ERROR_BODY).collect();
    if detail.is_empty() {
        detail = status.canonical_reason().unwrap_or("no body").to_string();
    }
    let rate_limited = status == StatusCode::TOO_MANY_REQUESTS;
    ExtractError::Upstream {
        backend: backend.to_string(),
        status: Some(status.as_u16()),
        rate_limited,
        auth_failed: matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN),
        retry_after_secs: if rate_limited { retry_after_secs } else { None },
        detail,
    }
}

// ── edgequake-llm provider ───────────────────────────────────────────────

/// Extraction through an `edgequake_llm` chat provider.
pub struct LlmProviderBackend {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
    image_detail: String,
    timeout_secs: u64,
}

impl LlmProviderBackend {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &ExtractionConfig) -> Self {
        Self {
            provider,
            options: CompletionOptions {
                temperature: Some(config.temperature),
                max_tokens: Some(config.max_output_tokens),
                ..Default::default()
            },
            image_detail: config.image_detail.clone(),
            timeout_secs: config.api_timeout_secs,
        }
    }
}

/// Chat messages for one provider call: the schema as a system message, then
/// one user turn with the instruction and every inline image.
pub fn chat_messages(
    blocks: &[ContentBlock],
    schema: &ExtractionSchema,
    image_detail: &str,
) -> Result<Vec<ChatMessage>, ExtractError> {
    let mut text = String::new();
    let mut images = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Instruction { text: t } => text.push_str(t),
            ContentBlock::ImageData {
                mime_type, data, ..
            } => {
                let image = ImageData::new(data.clone(), mime_type.as_str());
                images.push(image.with_detail(image_detail));
            }
            ContentBlock::ImageUrl { .. } => {
                return Err(ExtractError::InvalidConfig(
                    "chat providers take inline images only".into(),
                ))
            }
            ContentBlock::DocumentUrl { .. } => {
                return Err(ExtractError::InvalidConfig(
                    "direct document ingestion needs the Responses API backend".into(),
                ))
            }
        }
    }

    Ok(vec![
        ChatMessage::system(schema_instruction(schema)),
        ChatMessage::user_with_images(text, images),
    ])
}

#[async_trait]
impl ExtractionBackend for LlmProviderBackend {
    fn name(&self) -> &str {
        "llm_provider"
    }

    fn accepts_remote_images(&self) -> bool {
        false
    }

    async fn extract(
        &self,
        blocks: &[ContentBlock],
        schema: &ExtractionSchema,
    ) -> Result<Value, ExtractError> {
        let messages = chat_messages(blocks, schema, &self.image_detail)?;
        let start = Instant::now();

        let call = self.provider.chat(&messages, Some(&self.options));
        let response = tokio::time::timeout(Duration::from_secs(self.timeout_secs), call)
            .await
            .map_err(|_| ExtractError::Timeout {
                stage: "extraction",
                secs: self.timeout_secs,
            })?
            .map_err(|e| ExtractError::upstream(self.name(), e.to_string()))?;

        debug!(
            "{}: {} input tokens, {} output tokens, {:?}",
            self.name(),
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );

        Ok(json!({ "output_text": response.content }))
    }
}
