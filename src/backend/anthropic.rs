//! Anthropic adapter: messages API with base64 image blocks. No audio.

use super::prompts::{IMAGE_PROMPT, SYSTEM_PROMPT, TEXT_PROMPT};
use super::{
    accepts_mime, send, unsupported, unsupported_media, verdict_from_body, AnalysisBackend,
    AnalysisInput, TEMPERATURE,
};
use crate::config::BackendsConfig;
use crate::error::Result;
use crate::types::{BackendKind, ContentType, RawAnalysis};
use crate::vault::Secret;
use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

const API_VERSION: &str = "2023-06-01";

/// Image formats accepted in base64 blocks.
const IMAGE_MIME_TYPES: &[&str] = &["image/jpeg", "image/png", "image/gif", "image/webp"];

/// Anthropic backend bound to one API key.
pub struct AnthropicBackend {
    client: reqwest::Client,
    base_url: String,
    model: String,
    max_tokens: u32,
    timeout: Duration,
    api_key: Secret,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

impl AnthropicBackend {
    /// Create the adapter.
    #[must_use]
    pub fn new(client: reqwest::Client, config: &BackendsConfig, api_key: Secret) -> Self {
        Self {
            client,
            base_url: config.anthropic_base_url.trim_end_matches('/').to_string(),
            model: config.anthropic_model.clone(),
            max_tokens: config.max_tokens,
            timeout: config.timeout(),
            api_key,
        }
    }

    async fn message(&self, user_content: Value) -> Result<RawAnalysis> {
        let body = messages_body(&self.model, self.max_tokens, user_content);
        let request = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", self.api_key.expose())
            .header("anthropic-version", API_VERSION)
            .json(&body);
        let response = send(BackendKind::Anthropic, request, self.timeout).await?;
        Ok(verdict_from_body(&response, extract_text))
    }
}

impl AnalysisBackend for AnthropicBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Anthropic
    }

    fn analyze<'a>(&'a self, input: AnalysisInput<'a>) -> BoxFuture<'a, Result<RawAnalysis>> {
        Box::pin(async move {
            match input.content_type {
                ContentType::Text => {
                    let prompt = format!("{TEXT_PROMPT}{}", input.content.to_text());
                    self.message(Value::String(prompt)).await
                }
                ContentType::Image if !accepts_mime(IMAGE_MIME_TYPES, input.mime_type) => {
                    debug!("Anthropic cannot read {}", input.mime_type);
                    Ok(unsupported_media(BackendKind::Anthropic, input.mime_type, "is not accepted"))
                }
                ContentType::Image => {
                    self.message(image_blocks(input.mime_type, &input.base64()))
                        .await
                }
                ContentType::Audio | ContentType::Video => {
                    debug!("Anthropic cannot analyse {}", input.content_type);
                    Ok(unsupported(BackendKind::Anthropic, input.content_type))
                }
            }
        })
    }
}

fn messages_body(model: &str, max_tokens: u32, user_content: Value) -> Value {
    json!({
        "model": model,
        "max_tokens": max_tokens,
        "temperature": TEMPERATURE,
        "system": SYSTEM_PROMPT,
        "messages": [{ "role": "user", "content": user_content }],
    })
}

fn image_blocks(mime_type: &str, base64: &str) -> Value {
    json!([
        {
            "type": "image",
            "source": { "type": "base64", "media_type": mime_type, "data": base64 },
        },
        { "type": "text", "text": IMAGE_PROMPT },
    ])
}

/// Concatenate the text blocks of a response.
fn extract_text(body: &str) -> Option<String> {
    let response: MessagesResponse = serde_json::from_str(body).ok()?;
    let text: String = response
        .content
        .into_iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text)
        .collect();
    (!text.is_empty()).then_some(text)
}
