//! Analysis backends.
//!
//! Every third-party service sits behind [`AnalysisBackend`] and returns the
//! same [`RawAnalysis`], clamped, so the orchestrator never branches on which
//! backend it is talking to.
//!
//! # Error model
//!
//! ```text
//! transport timeout      ──► Error::BackendTimeout
//! HTTP 401 / 403         ──► Error::CredentialRejected
//! HTTP 400/413/415/422   ──► Error::Validation (not retryable)
//! other transport / HTTP ──► Error::BackendUnavailable
//! unusable verdict text  ──► neutral RawAnalysis (confidence 0)
//! unsupported modality   ──► neutral RawAnalysis (confidence 0)
//! unsupported MIME/size  ──► neutral RawAnalysis (confidence 0)
//! ```

mod anthropic;
mod gemini;
mod openai;
pub mod parse;
pub mod prompts;

pub use anthropic::AnthropicBackend;
pub use gemini::GeminiBackend;
pub use openai::OpenAiBackend;

use crate::config::BackendsConfig;
use crate::error::{Error, Result};
use crate::types::{BackendKind, Content, ContentType, RawAnalysis};
use crate::vault::Secret;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use futures::future::BoxFuture;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, warn};

/// Sampling temperature sent to every backend.
pub const TEMPERATURE: f64 = 0.1;

const ERROR_BODY_PREVIEW: usize = 200;

/// What an adapter needs to analyse one piece of content.
#[derive(Debug, Clone, Copy)]
pub struct AnalysisInput<'a> {
    /// Kind of content.
    pub content_type: ContentType,
    /// The content.
    pub content: &'a Content,
    /// MIME type, already defaulted.
    pub mime_type: &'a str,
}

impl AnalysisInput<'_> {
    /// Payload as standard base64.
    #[must_use]
    pub fn base64(&self) -> String {
        STANDARD.encode(self.content.as_bytes())
    }
}

/// A third-party analysis service bound to one credential.
pub trait AnalysisBackend: Send + Sync {
    /// Which backend this is.
    fn kind(&self) -> BackendKind;

    /// Analyse content. The result is clamped to `[0, 100]`.
    fn analyze<'a>(&'a self, input: AnalysisInput<'a>) -> BoxFuture<'a, Result<RawAnalysis>>;
}

/// Builds a backend for a kind and a resolved credential.
pub trait BackendFactory: Send + Sync {
    /// Create the adapter for `kind` using `secret`.
    ///
    /// # Errors
    ///
    /// Returns an error if the adapter cannot be constructed.
    fn create(&self, kind: BackendKind, secret: Secret) -> Result<Box<dyn AnalysisBackend>>;
}

/// Default backend when the caller states no preference.
///
/// A static table, not a capability probe. OpenAI covers every modality:
/// vision for images, Whisper for audio and video.
#[must_use]
pub fn best_backend_for(content_type: ContentType) -> BackendKind {
    match content_type {
        ContentType::Image | ContentType::Audio | ContentType::Video | ContentType::Text => {
            BackendKind::OpenAi
        }
    }
}

/// Zero-confidence result for a modality a backend cannot handle.
#[must_use]
pub fn unsupported(backend: BackendKind, content_type: ContentType) -> RawAnalysis {
    RawAnalysis::neutral(format!(
        "unsupported: {content_type} analysis is not available on the {backend} backend"
    ))
}

/// Zero-confidence result for a payload a backend cannot take: a MIME type
/// outside its accepted list, or a body over its upload limit.
#[must_use]
pub fn unsupported_media(backend: BackendKind, mime_type: &str, detail: &str) -> RawAnalysis {
    RawAnalysis::neutral(format!(
        "unsupported: {mime_type} {detail} on the {backend} backend"
    ))
}

/// Whether `mime_type` is in an adapter's accepted list.
pub(crate) fn accepts_mime(accepted: &[&str], mime_type: &str) -> bool {
    accepted
        .iter()
        .any(|candidate| candidate.eq_ignore_ascii_case(mime_type.trim()))
}

/// Statuses a backend returns for input it will never accept.
fn rejects_input(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::BAD_REQUEST
            | StatusCode::PAYLOAD_TOO_LARGE
            | StatusCode::UNSUPPORTED_MEDIA_TYPE
            | StatusCode::UNPROCESSABLE_ENTITY
    )
}

/// Factory for the HTTP adapters. One shared connection pool.
#[derive(Debug, Clone)]
pub struct HttpBackendFactory {
    client: reqwest::Client,
    config: BackendsConfig,
}

impl HttpBackendFactory {
    /// Create the factory.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: BackendsConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("prooflayer-node/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("HTTP client: {e}")))?;
        Ok(Self { client, config })
    }
}

impl BackendFactory for HttpBackendFactory {
    fn create(&self, kind: BackendKind, secret: Secret) -> Result<Box<dyn AnalysisBackend>> {
        if secret.is_empty() {
            return Err(Error::BackendUnavailable {
                backend: kind,
                reason: "empty credential".to_string(),
            });
        }
        debug!("Creating {kind} backend");
        let client = self.client.clone();
        let config = &self.config;
        let backend: Box<dyn AnalysisBackend> = match kind {
            BackendKind::OpenAi => Box::new(OpenAiBackend::new(client, config, secret)),
            BackendKind::Anthropic => Box::new(AnthropicBackend::new(client, config, secret)),
            BackendKind::Gemini => Box::new(GeminiBackend::new(client, config, secret)),
        };
        Ok(backend)
    }
}

/// Send a request and return the body of a successful response.
pub(crate) async fn send(
    backend: BackendKind,
    request: reqwest::RequestBuilder,
    timeout: Duration,
) -> Result<String> {
    let response = request
        .send()
        .await
        .map_err(|e| transport_error(backend, e, timeout))?;

    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        warn!("{backend} rejected the credential (HTTP {status})");
        return Err(Error::CredentialRejected { backend });
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let preview: String = body.chars().take(ERROR_BODY_PREVIEW).collect();
        warn!("{backend} answered HTTP {status}: {preview}");
        if rejects_input(status) {
            return Err(Error::Validation(format!(
                "{backend} backend rejected the content (HTTP {})",
                status.as_u16()
            )));
        }
        return Err(Error::BackendUnavailable {
            backend,
            reason: format!("HTTP {}", status.as_u16()),
        });
    }

    response
        .text()
        .await
        .map_err(|e| transport_error(backend, e, timeout))
}

fn transport_error(backend: BackendKind, err: reqwest::Error, timeout: Duration) -> Error {
    if err.is_timeout() {
        Error::BackendTimeout { backend, timeout }
    } else {
        Error::BackendUnavailable {
            backend,
            reason: err.without_url().to_string(),
        }
    }
}

/// Verdict from a response body, given the adapter's text extractor.
pub(crate) fn verdict_from_body(body: &str, extract: fn(&str) -> Option<String>) -> RawAnalysis {
    extract(body).map_or_else(
        || RawAnalysis::neutral(parse::PARSE_FAILURE_REASONING),
        |text| parse::parse_verdict(&text),
    )
}
