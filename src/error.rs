//! Error types for prooflayer-node.
//!
//! Every failure the pipeline can report maps to one [`ErrorKind`], which in
//! turn has a stable machine-readable code and a distinct status. Clients act
//! on the kind; the message is for humans.

use crate::types::{BackendKind, FundingMode};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the verification pipeline.
#[derive(Debug, Error)]
pub enum Error {
    /// Missing, malformed, inactive or revoked credential.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The credential resolved but the caller profile does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The caller exhausted its request window.
    #[error("rate limit exceeded, window resets at {reset_at}")]
    RateLimited {
        /// When the current window closes.
        reset_at: DateTime<Utc>,
        /// Time left until `reset_at`, measured when the request was rejected.
        retry_after: Duration,
    },

    /// The caller exhausted the monthly scan quota for its funding mode.
    #[error("{quota} scan quota exhausted ({used}/{limit})")]
    QuotaExceeded {
        /// Which quota was exhausted.
        quota: FundingMode,
        /// Scans used in the current billing period.
        used: u64,
        /// Scan limit for the current billing period.
        limit: u64,
    },

    /// Malformed inbound request.
    #[error("invalid request: {0}")]
    Validation(String),

    /// The analysis backend could not be reached or returned an error.
    #[error("backend {backend} unavailable: {reason}")]
    BackendUnavailable {
        /// Backend that failed.
        backend: BackendKind,
        /// Failure detail (never contains secrets).
        reason: String,
    },

    /// The analysis backend did not answer in time.
    #[error("backend {backend} timed out after {timeout:?}")]
    BackendTimeout {
        /// Backend that timed out.
        backend: BackendKind,
        /// Configured timeout.
        timeout: Duration,
    },

    /// The analysis backend refused the credential it was called with.
    #[error("backend {backend} rejected the supplied credential")]
    CredentialRejected {
        /// Backend that rejected the credential.
        backend: BackendKind,
    },

    /// A stored credential could not be decrypted.
    #[error("decryption failure: {0}")]
    Decryption(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Unexpected internal failure.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Stable classification of [`Error`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// See [`Error::Unauthorized`].
    Unauthorized,
    /// See [`Error::NotFound`].
    NotFound,
    /// See [`Error::RateLimited`].
    RateLimited,
    /// See [`Error::QuotaExceeded`].
    QuotaExceeded,
    /// See [`Error::Validation`].
    ValidationError,
    /// See [`Error::BackendUnavailable`].
    BackendUnavailable,
    /// See [`Error::BackendTimeout`].
    BackendTimeout,
    /// See [`Error::CredentialRejected`].
    CredentialRejected,
    /// See [`Error::Decryption`].
    DecryptionFailure,
    /// Configuration, I/O and internal errors.
    InternalError,
}

impl ErrorKind {
    /// Machine-readable error code.
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::NotFound => "not_found",
            Self::RateLimited => "rate_limited",
            Self::QuotaExceeded => "quota_exceeded",
            Self::ValidationError => "validation_error",
            Self::BackendUnavailable => "backend_unavailable",
            Self::BackendTimeout => "backend_timeout",
            Self::CredentialRejected => "credential_rejected",
            Self::DecryptionFailure => "decryption_failure",
            Self::InternalError => "internal_error",
        }
    }

    /// HTTP-style status code. Distinct per kind.
    #[must_use]
    pub fn status_code(self) -> u16 {
        match self {
            Self::Unauthorized => 401,
            Self::NotFound => 404,
            Self::RateLimited => 429,
            Self::QuotaExceeded => 403,
            Self::ValidationError => 400,
            Self::BackendUnavailable => 503,
            Self::BackendTimeout => 504,
            Self::CredentialRejected => 424,
            Self::DecryptionFailure => 422,
            Self::InternalError => 500,
        }
    }
}

impl Error {
    /// Classify this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::QuotaExceeded { .. } => ErrorKind::QuotaExceeded,
            Self::Validation(_) => ErrorKind::ValidationError,
            Self::BackendUnavailable { .. } => ErrorKind::BackendUnavailable,
            Self::BackendTimeout { .. } => ErrorKind::BackendTimeout,
            Self::CredentialRejected { .. } => ErrorKind::CredentialRejected,
            Self::Decryption(_) => ErrorKind::DecryptionFailure,
            Self::Config(_) | Self::Io(_) | Self::Internal(_) => ErrorKind::InternalError,
        }
    }

    /// Status code for this error.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        self.kind().status_code()
    }

    /// Whether the same request may succeed if retried later unchanged.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::BackendUnavailable { .. } | Self::BackendTimeout { .. }
        )
    }

    /// Message that is safe to return to a client.
    ///
    /// Internal, decryption and backend-availability failures are reported
    /// opaquely; their detail stays in the server-side log.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::Decryption(_) => "stored credential could not be used".to_string(),
            Self::Config(_) | Self::Io(_) | Self::Internal(_) => {
                "internal server error".to_string()
            }
            Self::BackendUnavailable { backend, .. } => {
                format!("analysis backend {backend} is temporarily unavailable")
            }
            Self::QuotaExceeded { quota: FundingMode::Platform, .. } => {
                "Scan limit reached for this month. Upgrade your plan or use BYOK.".to_string()
            }
            Self::QuotaExceeded { quota: FundingMode::Byok, .. } => {
                "BYOK scan limit reached for this month".to_string()
            }
            other => other.to_string(),
        }
    }

    /// Build the machine-readable payload for this error.
    #[must_use]
    pub fn to_body(&self) -> ErrorBody {
        let kind = self.kind();
        ErrorBody {
            error: self.public_message(),
            code: kind.code(),
            status: kind.status_code(),
            retry_after_secs: match self {
                Self::RateLimited { retry_after, .. } => Some(ceil_secs(*retry_after)),
                _ => None,
            },
            quota: match self {
                Self::QuotaExceeded { quota, .. } => Some(*quota),
                _ => None,
            },
        }
    }
}

/// Machine-readable error payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    /// Human-readable message.
    pub error: String,
    /// Stable error code.
    pub code: &'static str,
    /// Status code.
    pub status: u16,
    /// Seconds until a rate-limited caller may retry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
    /// Which quota was exhausted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quota: Option<FundingMode>,
}

fn ceil_secs(d: Duration) -> u64 {
    let secs = d.as_secs();
    if d.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}
