//! Core data model shared by every pipeline stage.

use crate::error::{Error, Result};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of content submitted for verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    /// Still image.
    Image,
    /// Audio clip.
    Audio,
    /// Video clip.
    Video,
    /// Plain text.
    Text,
}

impl ContentType {
    /// All supported content types.
    pub const ALL: [Self; 4] = [Self::Image, Self::Audio, Self::Video, Self::Text];

    /// Lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Text => "text",
        }
    }

    /// Maximum accepted payload size in bytes.
    #[must_use]
    pub fn max_size(self) -> usize {
        const MIB: usize = 1024 * 1024;
        match self {
            Self::Image => 10 * MIB,
            Self::Audio => 25 * MIB,
            Self::Video => 50 * MIB,
            Self::Text => MIB,
        }
    }

    /// MIME type assumed when the caller did not send one.
    #[must_use]
    pub fn default_mime(self) -> &'static str {
        match self {
            Self::Image => "image/jpeg",
            Self::Audio | Self::Video => "audio/wav",
            Self::Text => "text/plain",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "image" => Ok(Self::Image),
            "audio" => Ok(Self::Audio),
            "video" => Ok(Self::Video),
            "text" => Ok(Self::Text),
            other => Err(Error::Validation(format!("unsupported content type: {other}"))),
        }
    }
}

/// Third-party analysis backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// OpenAI chat completions + Whisper transcription.
    OpenAi,
    /// Anthropic messages API (no audio).
    Anthropic,
    /// Google Gemini generateContent.
    Gemini,
}

impl BackendKind {
    /// All supported backends, in default priority order.
    pub const ALL: [Self; 3] = [Self::OpenAi, Self::Anthropic, Self::Gemini];

    /// Lowercase name used on the wire and in stores.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "gemini" => Ok(Self::Gemini),
            other => Err(Error::Validation(format!("unsupported backend: {other}"))),
        }
    }
}

/// Subscription plan of a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    /// Entry plan.
    #[default]
    Starter,
    /// Pro plan.
    Pro,
    /// Growth plan.
    Growth,
    /// Enterprise plan (unlimited BYOK scans).
    Enterprise,
}

/// Monthly scan allowances of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanLimits {
    /// Platform-funded scans per billing period.
    pub platform_scans: u64,
    /// Caller-funded scans per billing period; `None` is unbounded.
    pub byok_scans: Option<u64>,
}

impl PlanTier {
    /// Scan allowances from the plan catalogue.
    #[must_use]
    pub fn monthly_limits(self) -> PlanLimits {
        match self {
            Self::Starter => PlanLimits {
                platform_scans: 500,
                byok_scans: Some(2_500),
            },
            Self::Pro => PlanLimits {
                platform_scans: 5_000,
                byok_scans: Some(25_000),
            },
            Self::Growth => PlanLimits {
                platform_scans: 50_000,
                byok_scans: Some(250_000),
            },
            Self::Enterprise => PlanLimits {
                platform_scans: 500_000,
                byok_scans: None,
            },
        }
    }
}

impl fmt::Display for PlanTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Starter => "starter",
            Self::Pro => "pro",
            Self::Growth => "growth",
            Self::Enterprise => "enterprise",
        })
    }
}

/// Who pays for the backend call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FundingMode {
    /// Platform-held credential; counts against the platform quota.
    Platform,
    /// Caller-held credential; counts against the BYOK quota.
    Byok,
}

impl fmt::Display for FundingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Platform => "platform",
            Self::Byok => "byok",
        })
    }
}

/// Caller profile as read from the identity store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    /// Caller identifier.
    pub id: String,
    /// Subscription plan.
    pub plan: PlanTier,
    /// Platform-funded scans used this period.
    pub platform_scans_used: u64,
    /// Platform-funded scan limit.
    pub platform_scan_limit: u64,
    /// Caller-funded scans used this period.
    pub byok_scans_used: u64,
    /// Caller-funded scan limit; `None` is unbounded.
    pub byok_scan_limit: Option<u64>,
    /// Whether the caller may use its own backend credentials.
    pub byok_enabled: bool,
}

impl Caller {
    /// Create a caller with the plan's catalogue limits and zero usage.
    #[must_use]
    pub fn new(id: impl Into<String>, plan: PlanTier) -> Self {
        let limits = plan.monthly_limits();
        Self {
            id: id.into(),
            plan,
            platform_scans_used: 0,
            platform_scan_limit: limits.platform_scans,
            byok_scans_used: 0,
            byok_scan_limit: limits.byok_scans,
            byok_enabled: false,
        }
    }

    /// Usage and limit of the quota matching `mode`.
    #[must_use]
    pub fn usage(&self, mode: FundingMode) -> (u64, Option<u64>) {
        match mode {
            FundingMode::Platform => (self.platform_scans_used, Some(self.platform_scan_limit)),
            FundingMode::Byok => (self.byok_scans_used, self.byok_scan_limit),
        }
    }
}

/// Submitted content. Held in memory for one request only.
#[derive(Clone, PartialEq, Eq)]
pub enum Content {
    /// UTF-8 text.
    Text(String),
    /// Decoded media bytes.
    Binary(Bytes),
}

impl Content {
    /// The exact submitted bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => &bytes[..],
        }
    }

    /// Payload length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }

    /// Text view of the payload; binary content is decoded lossily.
    #[must_use]
    pub fn to_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Binary(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        }
    }
}

// Content is user data; keep it out of logs.
impl fmt::Debug for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => write!(f, "Content::Text({} bytes)", text.len()),
            Self::Binary(bytes) => write!(f, "Content::Binary({} bytes)", bytes.len()),
        }
    }
}

/// A validated verification request.
#[derive(Debug, Clone)]
pub struct VerificationRequest {
    /// Kind of content.
    pub content_type: ContentType,
    /// The content itself.
    pub content: Content,
    /// MIME type, if the caller sent one.
    pub mime_type: Option<String>,
    /// Backend the caller would like to use.
    pub backend_preference: Option<BackendKind>,
    /// Original file name, for the scan record.
    pub file_name: Option<String>,
    /// Declared file size, for the scan record.
    pub file_size: Option<u64>,
}

impl VerificationRequest {
    /// Text request with no preferences.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content_type: ContentType::Text,
            content: Content::Text(text.into()),
            mime_type: None,
            backend_preference: None,
            file_name: None,
            file_size: None,
        }
    }

    /// MIME type to send to the backend.
    #[must_use]
    pub fn effective_mime(&self) -> &str {
        self.mime_type
            .as_deref()
            .unwrap_or_else(|| self.content_type.default_mime())
    }
}

/// Supporting evidence returned by a backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisDetails {
    /// Free-form explanation.
    pub reasoning: String,
    /// Detection signals (textual patterns, visual artifacts, audio markers).
    #[serde(default)]
    pub signals: Vec<String>,
    /// Backend-specific extra data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Normalized output of one backend call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAnalysis {
    /// Probability that the content is AI-generated, 0-100.
    pub ai_probability: f64,
    /// Backend verdict.
    pub is_ai_generated: bool,
    /// Generator named by the backend.
    pub model_fingerprint: Option<String>,
    /// Kind of manipulation named by the backend.
    pub manipulation_type: Option<String>,
    /// Backend confidence in its verdict, 0-100.
    pub confidence: f64,
    /// Evidence.
    pub details: AnalysisDetails,
}

impl RawAnalysis {
    /// Neutral, zero-confidence result with the given explanation.
    #[must_use]
    pub fn neutral(reasoning: impl Into<String>) -> Self {
        Self {
            ai_probability: 50.0,
            is_ai_generated: false,
            model_fingerprint: None,
            manipulation_type: None,
            confidence: 0.0,
            details: AnalysisDetails {
                reasoning: reasoning.into(),
                signals: Vec::new(),
                metadata: None,
            },
        }
    }

    /// Clamp probability and confidence into `[0, 100]`. NaN becomes the
    /// neutral value for probability and zero for confidence.
    #[must_use]
    pub fn clamped(mut self) -> Self {
        self.ai_probability = clamp_percent(self.ai_probability, 50.0);
        self.confidence = clamp_percent(self.confidence, 0.0);
        self
    }
}

fn clamp_percent(value: f64, nan_default: f64) -> f64 {
    if value.is_nan() {
        nan_default
    } else {
        value.clamp(0.0, 100.0)
    }
}

/// Derived, immutable trust score for one analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustScore {
    /// Normalized score, 0-100; higher is more likely human.
    pub score: f64,
    /// Backend probability of AI generation.
    pub ai_probability: f64,
    /// Backend verdict.
    pub is_ai_generated: bool,
    /// Backend confidence.
    pub confidence: f64,
    /// Generator fingerprint, if any.
    pub model_fingerprint: Option<String>,
    /// Manipulation type, if any.
    pub manipulation_type: Option<String>,
    /// Backend that produced the analysis.
    pub backend: BackendKind,
    /// Whether a caller-held credential was used.
    pub is_byok: bool,
    /// Wall time spent producing the analysis.
    pub processing_time_ms: u64,
}

/// Outbound result of a verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    /// Scan identifier.
    pub id: String,
    /// Normalized trust score.
    pub trust_score: f64,
    /// Backend probability of AI generation.
    pub ai_probability: f64,
    /// Backend verdict.
    pub is_ai_generated: bool,
    /// Backend confidence.
    pub confidence: f64,
    /// Identified generator, if any.
    pub model_fingerprint: Option<String>,
    /// Manipulation type, if any.
    pub manipulation_type: Option<String>,
    /// Backend reasoning.
    pub reasoning: String,
    /// Detection signals.
    pub signals: Vec<String>,
    /// Backend used.
    pub backend: BackendKind,
    /// Whether a caller-held credential was used.
    pub is_byok: bool,
    /// Processing time; zero for cached results.
    pub processing_time_ms: u64,
    /// Kind of content analysed.
    pub content_type: ContentType,
    /// When the analysis was produced.
    pub created_at: DateTime<Utc>,
    /// Set when the result was served from the content cache.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cached: bool,
}

impl VerificationResult {
    /// Copy of this result marked as served from cache.
    #[must_use]
    pub fn as_cached(&self) -> Self {
        Self {
            processing_time_ms: 0,
            cached: true,
            ..self.clone()
        }
    }
}
