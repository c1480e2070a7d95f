//! Contracts with the external collaborators of the pipeline.
//!
//! The pipeline owns none of this state. It reads caller profiles and
//! credentials, asks for atomic counter increments, and hands finished scans
//! and usage records to a sink. [`memory`] holds single-process reference
//! implementations used by the CLI and the tests.

pub mod memory;

use crate::error::Result;
use crate::types::{BackendKind, Caller, ContentType, FundingMode};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

pub use memory::{InMemoryCredentialStore, InMemoryIdentityStore, InMemoryResultSink};

/// A service-issued key as held by the key store. Only the digest is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceKeyRecord {
    /// Key record identifier.
    pub id: String,
    /// Owner of the key.
    pub caller_id: String,
    /// Inactive keys authenticate nobody.
    pub is_active: bool,
}

/// Caller identities, profiles and scan counters.
pub trait IdentityStore: Send + Sync {
    /// Look up a service key by the SHA-256 hex digest of its plaintext.
    fn find_service_key<'a>(&'a self, key_hash: &'a str)
        -> BoxFuture<'a, Result<Option<ServiceKeyRecord>>>;

    /// Record when a service key was last used.
    fn touch_service_key<'a>(&'a self, key_id: &'a str, at: DateTime<Utc>)
        -> BoxFuture<'a, Result<()>>;

    /// Resolve a session token to a caller id.
    fn resolve_session<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<Option<String>>>;

    /// Read a caller profile.
    fn caller<'a>(&'a self, caller_id: &'a str) -> BoxFuture<'a, Result<Option<Caller>>>;

    /// Atomically charge one scan to the counter for `mode`.
    ///
    /// The limit is re-checked under the same lock or transaction as the
    /// increment, so concurrent requests cannot both take the last scan.
    /// Returns the updated profile, or [`Error::QuotaExceeded`] without
    /// changing anything.
    ///
    /// [`Error::QuotaExceeded`]: crate::Error::QuotaExceeded
    fn increment_scans<'a>(&'a self, caller_id: &'a str, mode: FundingMode)
        -> BoxFuture<'a, Result<Caller>>;
}

/// A caller-held backend credential at rest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCredential {
    /// Credential identifier.
    pub id: String,
    /// Owner.
    pub caller_id: String,
    /// Backend the credential is for.
    pub backend: BackendKind,
    /// Vault envelope.
    pub encrypted_secret: String,
    /// Inactive credentials are never used.
    pub is_active: bool,
    /// Last time a backend accepted the credential.
    pub last_verified_at: Option<DateTime<Utc>>,
}

/// Caller-held backend credentials.
pub trait CredentialStore: Send + Sync {
    /// Active credential of `caller_id` for `backend`, if any.
    fn find_active<'a>(
        &'a self,
        caller_id: &'a str,
        backend: BackendKind,
    ) -> BoxFuture<'a, Result<Option<StoredCredential>>>;

    /// Credential `credential_id` owned by `caller_id`, active or not.
    fn find<'a>(
        &'a self,
        caller_id: &'a str,
        credential_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<StoredCredential>>>;

    /// Mark a credential inactive.
    fn deactivate<'a>(&'a self, credential_id: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Record that a backend accepted the credential. Reactivates it.
    fn mark_verified<'a>(&'a self, credential_id: &'a str, at: DateTime<Utc>)
        -> BoxFuture<'a, Result<()>>;
}

/// Persisted summary of one completed analysis. Never carries the content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRecord {
    /// Scan identifier, same as the result id.
    pub id: String,
    /// Caller.
    pub caller_id: String,
    /// Kind of content.
    pub content_type: ContentType,
    /// SHA-256 hex of the content.
    pub content_hash: String,
    /// Original file name.
    pub file_name: Option<String>,
    /// Declared file size.
    pub file_size: Option<u64>,
    /// Trust score.
    pub trust_score: f64,
    /// Backend probability of AI generation.
    pub ai_probability: f64,
    /// Backend verdict.
    pub is_ai_generated: bool,
    /// Identified generator.
    pub model_fingerprint: Option<String>,
    /// Manipulation type.
    pub manipulation_type: Option<String>,
    /// Backend reasoning.
    pub reasoning: String,
    /// Detection signals.
    pub signals: Vec<String>,
    /// Backend confidence.
    pub confidence: f64,
    /// Backend used.
    pub backend: BackendKind,
    /// Whether a caller-held credential was used.
    pub is_byok: bool,
    /// Processing time.
    pub processing_time_ms: u64,
    /// When the analysis completed.
    pub created_at: DateTime<Utc>,
}

/// One usage-log line, emitted for every authenticated request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    /// Caller.
    pub caller_id: String,
    /// Backend, once one was selected.
    pub backend: Option<BackendKind>,
    /// Whether a caller-held credential was used.
    pub is_byok: bool,
    /// Wall time spent on the request.
    pub processing_time_ms: u64,
    /// Status code of the response.
    pub status_code: u16,
}

/// Storage and metrics handoff for finished requests.
pub trait ResultSink: Send + Sync {
    /// Persist a scan summary.
    fn record_scan(&self, record: ScanRecord) -> BoxFuture<'_, Result<()>>;

    /// Append a usage record.
    fn record_usage(&self, record: UsageRecord) -> BoxFuture<'_, Result<()>>;
}
