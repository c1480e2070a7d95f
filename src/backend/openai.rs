//! OpenAI adapter: chat completions with vision, Whisper for audio.

use super::prompts::{transcript_prompt, IMAGE_PROMPT, SYSTEM_PROMPT, TEXT_PROMPT};
use super::{
    accepts_mime, send, unsupported_media, verdict_from_body, AnalysisBackend, AnalysisInput,
    TEMPERATURE,
};
use crate::config::BackendsConfig;
use crate::error::{Error, Result};
use crate::types::{BackendKind, ContentType, RawAnalysis};
use crate::vault::Secret;
use futures::future::BoxFuture;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

/// Image formats the vision endpoint takes.
const IMAGE_MIME_TYPES: &[&str] = &["image/png", "image/jpeg", "image/gif", "image/webp"];

/// Containers Whisper takes.
const TRANSCRIPTION_MIME_TYPES: &[&str] = &[
    "audio/mpeg",
    "audio/wav",
    "audio/ogg",
    "audio/webm",
    "audio/mp4",
    "audio/flac",
    "video/mp4",
    "video/webm",
    "video/ogg",
];

/// Whisper upload limit.
pub const TRANSCRIPTION_MAX_BYTES: usize = 25 * 1024 * 1024;

/// OpenAI backend bound to one API key.
pub struct OpenAiBackend {
    client: reqwest::Client,
    base_url: String,
    model: String,
    transcription_model: String,
    max_tokens: u32,
    timeout: Duration,
    api_key: Secret,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

impl OpenAiBackend {
    /// Create the adapter.
    #[must_use]
    pub fn new(client: reqwest::Client, config: &BackendsConfig, api_key: Secret) -> Self {
        Self {
            client,
            base_url: config.openai_base_url.trim_end_matches('/').to_string(),
            model: config.openai_model.clone(),
            transcription_model: config.transcription_model.clone(),
            max_tokens: config.max_tokens,
            timeout: config.timeout(),
            api_key,
        }
    }

    async fn chat(&self, user_content: Value) -> Result<RawAnalysis> {
        let body = chat_body(&self.model, self.max_tokens, user_content);
        let request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose())
            .json(&body);
        let response = send(BackendKind::OpenAi, request, self.timeout).await?;
        Ok(verdict_from_body(&response, extract_text))
    }

    async fn transcribe(&self, input: AnalysisInput<'_>) -> Result<String> {
        let file = Part::bytes(input.content.as_bytes().to_vec())
            .file_name(upload_name(input.mime_type))
            .mime_str(input.mime_type)
            .map_err(|_| {
                Error::Validation(format!("invalid MIME type: {}", input.mime_type))
            })?;
        let form = Form::new()
            .text("model", self.transcription_model.clone())
            .part("file", file);

        let request = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(self.api_key.expose())
            .multipart(form);
        let body = send(BackendKind::OpenAi, request, self.timeout).await?;

        let transcription: TranscriptionResponse =
            serde_json::from_str(&body).map_err(|e| Error::BackendUnavailable {
                backend: BackendKind::OpenAi,
                reason: format!("unreadable transcription response: {e}"),
            })?;
        debug!("Transcribed {} bytes of audio", input.content.len());
        Ok(transcription.text)
    }
}

impl AnalysisBackend for OpenAiBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::OpenAi
    }

    fn analyze<'a>(&'a self, input: AnalysisInput<'a>) -> BoxFuture<'a, Result<RawAnalysis>> {
        Box::pin(async move {
            match input.content_type {
                ContentType::Text => {
                    let prompt = format!("{TEXT_PROMPT}{}", input.content.to_text());
                    self.chat(Value::String(prompt)).await
                }
                ContentType::Image if !accepts_mime(IMAGE_MIME_TYPES, input.mime_type) => {
                    debug!("OpenAI vision cannot read {}", input.mime_type);
                    Ok(unsupported_media(BackendKind::OpenAi, input.mime_type, "is not accepted"))
                }
                ContentType::Image => {
                    let url = data_url(input.mime_type, &input.base64());
                    self.chat(json!([
                        { "type": "text", "text": IMAGE_PROMPT },
                        { "type": "image_url", "image_url": { "url": url } },
                    ]))
                    .await
                }
                ContentType::Audio | ContentType::Video
                    if !accepts_mime(TRANSCRIPTION_MIME_TYPES, input.mime_type) =>
                {
                    debug!("Whisper cannot read {}", input.mime_type);
                    Ok(unsupported_media(BackendKind::OpenAi, input.mime_type, "is not accepted"))
                }
                ContentType::Audio | ContentType::Video
                    if input.content.len() > TRANSCRIPTION_MAX_BYTES =>
                {
                    debug!("{} bytes exceed the Whisper upload limit", input.content.len());
                    Ok(unsupported_media(
                        BackendKind::OpenAi,
                        input.mime_type,
                        "exceeds the 25 MB transcription limit",
                    ))
                }
                // Video goes through the audio track.
                ContentType::Audio | ContentType::Video => {
                    let transcript = self.transcribe(input).await?;
                    self.chat(Value::String(transcript_prompt(&transcript))).await
                }
            }
        })
    }
}

fn chat_body(model: &str, max_tokens: u32, user_content: Value) -> Value {
    json!({
        "model": model,
        "messages": [
            { "role": "system", "content": SYSTEM_PROMPT },
            { "role": "user", "content": user_content },
        ],
        "response_format": { "type": "json_object" },
        "temperature": TEMPERATURE,
        "max_tokens": max_tokens,
    })
}

fn data_url(mime_type: &str, base64: &str) -> String {
    format!("data:{mime_type};base64,{base64}")
}

/// Whisper infers the container from the file extension.
fn upload_name(mime_type: &str) -> String {
    let extension = match mime_type {
        "audio/mpeg" => "mp3",
        "audio/ogg" | "video/ogg" => "ogg",
        "audio/webm" | "video/webm" => "webm",
        "audio/mp4" | "video/mp4" => "mp4",
        "audio/flac" => "flac",
        _ => "wav",
    };
    format!("audio.{extension}")
}

fn extract_text(body: &str) -> Option<String> {
    let response: ChatCompletionResponse = serde_json::from_str(body).ok()?;
    response.choices.into_iter().next()?.message.content
}
