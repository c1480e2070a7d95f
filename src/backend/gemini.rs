//! Gemini adapter: `generateContent` with inline media for images and audio.

use super::prompts::{AUDIO_PROMPT, IMAGE_PROMPT, SYSTEM_PROMPT, TEXT_PROMPT};
use super::{
    accepts_mime, send, unsupported_media, verdict_from_body, AnalysisBackend, AnalysisInput,
    TEMPERATURE,
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

/// Media formats accepted as inline data.
const INLINE_MIME_TYPES: &[&str] = &[
    "image/png",
    "image/jpeg",
    "image/webp",
    "audio/wav",
    "audio/mpeg",
    "audio/ogg",
    "audio/flac",
    "video/mp4",
    "video/webm",
    "video/quicktime",
];

/// Request size limit for inline data, after base64 encoding.
pub const INLINE_MAX_BYTES: usize = 20 * 1024 * 1024;

/// Gemini backend bound to one API key.
pub struct GeminiBackend {
    client: reqwest::Client,
    base_url: String,
    model: String,
    max_tokens: u32,
    timeout: Duration,
    api_key: Secret,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<TextPart>,
}

#[derive(Debug, Deserialize)]
struct TextPart {
    text: Option<String>,
}

impl GeminiBackend {
    /// Create the adapter.
    #[must_use]
    pub fn new(client: reqwest::Client, config: &BackendsConfig, api_key: Secret) -> Self {
        Self {
            client,
            base_url: config.gemini_base_url.trim_end_matches('/').to_string(),
            model: config.gemini_model.clone(),
            max_tokens: config.max_tokens,
            timeout: config.timeout(),
            api_key,
        }
    }

    async fn generate(&self, parts: Value) -> Result<RawAnalysis> {
        let body = generate_body(self.max_tokens, parts);
        // Key goes in a header so it never appears in a URL or a transport error.
        let request = self
            .client
            .post(format!(
                "{}/v1beta/models/{}:generateContent",
                self.base_url, self.model
            ))
            .header("x-goog-api-key", self.api_key.expose())
            .json(&body);
        let response = send(BackendKind::Gemini, request, self.timeout).await?;
        Ok(verdict_from_body(&response, extract_text))
    }
}

impl AnalysisBackend for GeminiBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Gemini
    }

    fn analyze<'a>(&'a self, input: AnalysisInput<'a>) -> BoxFuture<'a, Result<RawAnalysis>> {
        Box::pin(async move {
            if input.content_type != ContentType::Text {
                if !accepts_mime(INLINE_MIME_TYPES, input.mime_type) {
                    debug!("Gemini cannot read {}", input.mime_type);
                    return Ok(unsupported_media(
                        BackendKind::Gemini,
                        input.mime_type,
                        "is not accepted",
                    ));
                }
                if input.content.len().div_ceil(3) * 4 > INLINE_MAX_BYTES {
                    debug!("{} bytes exceed the Gemini inline limit", input.content.len());
                    return Ok(unsupported_media(
                        BackendKind::Gemini,
                        input.mime_type,
                        "exceeds the 20 MB inline limit",
                    ));
                }
            }
            let parts = match input.content_type {
                ContentType::Text => json!([{
                    "text": format!("{SYSTEM_PROMPT}\n\n{TEXT_PROMPT}{}", input.content.to_text()),
                }]),
                ContentType::Image => media_parts(IMAGE_PROMPT, input.mime_type, &input.base64()),
                // Video goes through the audio prompt; Gemini reads the track inline.
                ContentType::Audio | ContentType::Video => {
                    media_parts(AUDIO_PROMPT, input.mime_type, &input.base64())
                }
            };
            self.generate(parts).await
        })
    }
}

fn generate_body(max_tokens: u32, parts: Value) -> Value {
    json!({
        "contents": [{ "role": "user", "parts": parts }],
        "generationConfig": {
            "temperature": TEMPERATURE,
            "maxOutputTokens": max_tokens,
            "responseMimeType": "application/json",
        },
    })
}

fn media_parts(prompt: &str, mime_type: &str, base64: &str) -> Value {
    json!([
        { "text": format!("{SYSTEM_PROMPT}\n\n{prompt}") },
        { "inlineData": { "mimeType": mime_type, "data": base64 } },
    ])
}

fn extract_text(body: &str) -> Option<String> {
    let response: GenerateResponse = serde_json::from_str(body).ok()?;
    let content = response.candidates.into_iter().next()?.content?;
    let text: String = content.parts.into_iter().filter_map(|p| p.text).collect();
    (!text.is_empty()).then_some(text)
}
