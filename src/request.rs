//! Inbound request validation.
//!
//! Everything here runs before the orchestrator sees a request: malformed
//! input never costs a rate-limit slot or a quota check.

use crate::error::{Error, Result};
use crate::types::{BackendKind, Content, ContentType, VerificationRequest};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// MIME types accepted for each content kind.
#[must_use]
pub fn accepted_mime_types(content_type: ContentType) -> &'static [&'static str] {
    match content_type {
        ContentType::Image => &["image/jpeg", "image/png", "image/gif", "image/webp", "image/bmp"],
        ContentType::Audio => &[
            "audio/mpeg",
            "audio/wav",
            "audio/ogg",
            "audio/webm",
            "audio/mp4",
            "audio/flac",
        ],
        ContentType::Video => &["video/mp4", "video/webm", "video/ogg", "video/quicktime"],
        ContentType::Text => &["text/plain", "text/markdown", "text/html", "application/pdf"],
    }
}

/// Content kind for a MIME type, if it is one we accept.
#[must_use]
pub fn detect_content_type(mime_type: &str) -> Option<ContentType> {
    let mime_type = mime_type.trim().to_ascii_lowercase();
    ContentType::ALL
        .into_iter()
        .find(|ct| accepted_mime_types(*ct).contains(&mime_type.as_str()))
}

/// Request body as received. Media content is base64, optionally as a
/// `data:` URL; text content is sent as is.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundRequest {
    /// `image`, `audio`, `video` or `text`.
    pub content_type: String,
    /// Payload.
    pub content: String,
    /// MIME type of the payload.
    #[serde(default)]
    pub mime_type: Option<String>,
    /// Preferred backend.
    #[serde(default, alias = "backendPreference")]
    pub provider: Option<String>,
    /// Original file name.
    #[serde(default)]
    pub file_name: Option<String>,
    /// Declared file size in bytes.
    #[serde(default)]
    pub file_size: Option<u64>,
}

impl InboundRequest {
    /// Parse a JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the body is not a valid request.
    pub fn from_json(body: &str) -> Result<Self> {
        serde_json::from_str(body).map_err(|e| Error::Validation(format!("malformed body: {e}")))
    }

    /// Validate into a [`VerificationRequest`].
    ///
    /// `backend_override` is the out-of-band backend signal (a request
    /// header); it wins over the body's `provider`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] describing the first problem found.
    pub fn validate(self, backend_override: Option<&str>) -> Result<VerificationRequest> {
        let content_type: ContentType = self.content_type.trim().parse()?;
        if self.content.is_empty() {
            return Err(Error::Validation("content is required".to_string()));
        }

        let mut mime_type = self
            .mime_type
            .as_deref()
            .map(|m| m.trim().to_ascii_lowercase())
            .filter(|m| !m.is_empty());

        let content = if content_type == ContentType::Text {
            Content::Text(self.content)
        } else {
            let (data_mime, bytes) = decode_media(&self.content)?;
            mime_type = mime_type.or(data_mime);
            Content::Binary(bytes)
        };

        if content.is_empty() {
            return Err(Error::Validation("content is required".to_string()));
        }
        let max = content_type.max_size();
        if content.len() > max || self.file_size.is_some_and(|s| s > max as u64) {
            return Err(Error::Validation(format!(
                "{content_type} content too large, maximum {} MB",
                max / (1024 * 1024)
            )));
        }

        if let Some(mime) = &mime_type {
            let accepted = accepted_mime_types(content_type);
            if !accepted.contains(&mime.as_str()) {
                return Err(Error::Validation(format!(
                    "unsupported file type {mime}, accepted: {}",
                    accepted.join(", ")
                )));
            }
        }

        let backend_preference = backend_override
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .or(self.provider.as_deref())
            .map(str::parse::<BackendKind>)
            .transpose()?;

        Ok(VerificationRequest {
            content_type,
            content,
            mime_type,
            backend_preference,
            file_name: self.file_name,
            file_size: self.file_size,
        })
    }
}

/// Decode base64 media, accepting a `data:<mime>;base64,` prefix.
fn decode_media(content: &str) -> Result<(Option<String>, Bytes)> {
    let (mime, payload) = match content.strip_prefix("data:") {
        Some(rest) => {
            let (header, payload) = rest
                .split_once(',')
                .ok_or_else(|| Error::Validation("malformed data URL".to_string()))?;
            let mime = header
                .strip_suffix(";base64")
                .ok_or_else(|| Error::Validation("data URL must be base64".to_string()))?;
            (Some(mime.to_ascii_lowercase()).filter(|m| !m.is_empty()), payload)
        }
        None => (None, content),
    };

    let cleaned: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let bytes = STANDARD
        .decode(cleaned)
        .map_err(|_| Error::Validation("media content must be base64".to_string()))?;
    Ok((mime, Bytes::from(bytes)))
}
