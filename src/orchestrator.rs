//! Verification orchestrator.
//!
//! Sequences the pipeline for one request:
//!
//! ```text
//! Authenticating ─► RateChecking ─► QuotaChecking ─► CacheLookup ─┬─ hit ──────────────────────────────► Responding
//!                                                                 └─ miss ─► Dispatching ─► Scoring ─► Persisting ─► Responding
//! ```
//!
//! Any stage may fail the request with a typed [`Error`]. Persisting is a
//! best-effort handoff: by then the caller has been charged and the result
//! exists, so a storage failure is logged and the result still returned.
//!
//! Quota is checked read-only before dispatch and charged afterwards with the
//! identity store's conditional increment. An exhausted quota is only
//! enforced on a cache miss: a caller at its limit can still fetch results it
//! already paid for. A timeout or backend failure charges nothing and caches
//! nothing.

use crate::auth::{AuthContext, RequestAuthenticator};
use crate::backend::{best_backend_for, AnalysisInput, BackendFactory};
use crate::cache::{content_hash, CacheEntry, ContentHash, InMemoryResultCache, ResultCache};
use crate::clock::{Clock, SystemClock};
use crate::config::{CacheConfig, RateLimitConfig, ServiceConfig};
use crate::error::{Error, ErrorKind, Result};
use crate::fingerprint::identify_model;
use crate::limits::{ensure_within_quota, InMemoryRateLimiter, RateLimiter};
use crate::scoring::score_analysis;
use crate::store::{CredentialStore, IdentityStore, ResultSink, ScanRecord, UsageRecord};
use crate::types::{
    BackendKind, Content, RawAnalysis, VerificationRequest, VerificationResult,
};
use crate::vault::{CredentialVault, PlatformCredentials, Secret};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Text sent to a backend to check that a credential works.
const PROBE_TEXT: &str = "This is a short probe message used to confirm that an API key works.";

/// Pipeline stage, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Resolving the caller.
    Authenticating,
    /// Request-rate gate.
    RateChecking,
    /// Monthly quota pre-check.
    QuotaChecking,
    /// Content cache lookup.
    CacheLookup,
    /// Backend call.
    Dispatching,
    /// Trust score, fingerprint and quota charge.
    Scoring,
    /// Handoff to the result sink.
    Persisting,
    /// Returning the result.
    Responding,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Authenticating => "authenticating",
            Self::RateChecking => "rate_checking",
            Self::QuotaChecking => "quota_checking",
            Self::CacheLookup => "cache_lookup",
            Self::Dispatching => "dispatching",
            Self::Scoring => "scoring",
            Self::Persisting => "persisting",
            Self::Responding => "responding",
        })
    }
}

/// One verification call: the credential and the validated request.
#[derive(Debug, Clone)]
pub struct VerifyCall {
    /// Raw `Authorization` header value.
    pub authorization: Option<String>,
    /// Validated request.
    pub request: VerificationRequest,
}

/// Outcome of a credential probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialCheck {
    /// The backend accepted the credential.
    Valid,
    /// The credential is unusable and has been deactivated.
    Rejected {
        /// Why.
        reason: String,
    },
}

/// What the usage record needs to know about a request so far.
#[derive(Debug, Default)]
struct UsageDraft {
    caller_id: Option<String>,
    backend: Option<BackendKind>,
    is_byok: bool,
}

/// The verification pipeline.
pub struct Verifier {
    authenticator: RequestAuthenticator,
    identity: Arc<dyn IdentityStore>,
    credentials: Arc<dyn CredentialStore>,
    vault: Option<Arc<CredentialVault>>,
    rate_limiter: Arc<dyn RateLimiter>,
    cache: Arc<dyn ResultCache>,
    backends: Arc<dyn BackendFactory>,
    platform: PlatformCredentials,
    sink: Arc<dyn ResultSink>,
    clock: Arc<dyn Clock>,
    backend_timeout: Duration,
    /// Usage writes spawned but not yet finished.
    usage_in_flight: Arc<watch::Sender<usize>>,
}

impl Verifier {
    /// Start building a verifier around its required collaborators.
    #[must_use]
    pub fn builder(
        identity: Arc<dyn IdentityStore>,
        credentials: Arc<dyn CredentialStore>,
        backends: Arc<dyn BackendFactory>,
        sink: Arc<dyn ResultSink>,
    ) -> VerifierBuilder {
        VerifierBuilder::new(identity, credentials, backends, sink)
    }

    /// Run one request through the pipeline.
    ///
    /// Emits one usage record for every request that got past
    /// authentication, successful or not.
    ///
    /// # Errors
    ///
    /// Returns the typed failure of the first stage that failed.
    pub async fn verify(&self, call: VerifyCall) -> Result<VerificationResult> {
        let started = Instant::now();
        let mut usage = UsageDraft::default();

        let outcome = self.run(call, &mut usage, started).await;

        let status_code = match &outcome {
            Ok(result) => {
                info!(
                    "Verified {} for {} via {} (score={}, cached={})",
                    result.content_type,
                    usage.caller_id.as_deref().unwrap_or("-"),
                    result.backend,
                    result.trust_score,
                    result.cached
                );
                200
            }
            Err(e) => {
                log_failure(e, usage.caller_id.as_deref());
                e.status_code()
            }
        };

        if let Some(caller_id) = usage.caller_id {
            self.emit_usage(UsageRecord {
                caller_id,
                backend: usage.backend,
                is_byok: usage.is_byok,
                processing_time_ms: elapsed_ms(started),
                status_code,
            });
        }

        outcome
    }

    async fn run(
        &self,
        call: VerifyCall,
        usage: &mut UsageDraft,
        started: Instant,
    ) -> Result<VerificationResult> {
        let VerifyCall {
            authorization,
            request,
        } = call;

        enter(Stage::Authenticating);
        let auth = self
            .authenticator
            .authenticate(authorization.as_deref(), request.backend_preference)
            .await?;
        usage.caller_id = Some(auth.caller.id.clone());
        usage.is_byok = auth.is_byok();
        let caller = &auth.caller;

        enter(Stage::RateChecking);
        let decision = self.rate_limiter.check(&caller.id, caller.plan).await?;
        debug!("{} has {} request(s) left in window", caller.id, decision.remaining);

        enter(Stage::QuotaChecking);
        let quota = ensure_within_quota(caller, auth.funding_mode());

        enter(Stage::CacheLookup);
        let hash = content_hash(&request.content);
        if let Some(hit) = self.cache.get(&caller.id, &hash).await {
            debug!("Cache hit {hash:?} for {}", caller.id);
            usage.backend = Some(hit.backend);
            enter(Stage::Responding);
            return Ok(hit.as_cached());
        }
        // Cache hits are free; only a miss needs quota.
        quota?;

        enter(Stage::Dispatching);
        let (backend, secret) = self.resolve_backend(&auth, &request)?;
        usage.backend = Some(backend);
        let analysis = self
            .dispatch(backend, secret, &request, &auth)
            .await?;

        enter(Stage::Scoring);
        let result = self.score(analysis, backend, &auth, &request, started);
        // A concurrent request may have taken the last scan since the
        // pre-check; the conditional increment is the authority.
        self.identity
            .increment_scans(&caller.id, auth.funding_mode())
            .await?;
        self.cache
            .put(CacheEntry {
                content_hash: hash,
                caller_id: caller.id.clone(),
                result: result.clone(),
                created_at: result.created_at,
            })
            .await;

        enter(Stage::Persisting);
        let record = scan_record(&result, &caller.id, &hash, &request);
        if let Err(e) = self.sink.record_scan(record).await {
            warn!("Failed to persist scan {} for {}: {e}", result.id, caller.id);
        }

        enter(Stage::Responding);
        Ok(result)
    }

    fn resolve_backend(
        &self,
        auth: &AuthContext,
        request: &VerificationRequest,
    ) -> Result<(BackendKind, Secret)> {
        if let Some(byok) = &auth.byok {
            return Ok((byok.backend, byok.secret.clone()));
        }
        let backend = request
            .backend_preference
            .unwrap_or_else(|| best_backend_for(request.content_type));
        let secret = self
            .platform
            .get(backend)
            .cloned()
            .ok_or_else(|| Error::BackendUnavailable {
                backend,
                reason: "no platform credential configured".to_string(),
            })?;
        Ok((backend, secret))
    }

    async fn dispatch(
        &self,
        backend: BackendKind,
        secret: Secret,
        request: &VerificationRequest,
        auth: &AuthContext,
    ) -> Result<RawAnalysis> {
        let outcome = self
            .analyze_with(backend, secret, &request.content, request)
            .await;

        match (&outcome, &auth.byok) {
            (Ok(_), Some(byok)) => {
                let now = self.clock.now();
                if let Err(e) = self.credentials.mark_verified(&byok.credential_id, now).await {
                    warn!("Failed to record verification of {}: {e}", byok.credential_id);
                }
            }
            (Err(Error::CredentialRejected { .. }), Some(byok)) => {
                warn!(
                    "{backend} rejected credential {} of {}, deactivating",
                    byok.credential_id, auth.caller.id
                );
                if let Err(e) = self.credentials.deactivate(&byok.credential_id).await {
                    warn!("Failed to deactivate credential {}: {e}", byok.credential_id);
                }
            }
            (Err(Error::CredentialRejected { .. }), None) => {
                error!("{backend} rejected the platform credential");
                return Err(Error::BackendUnavailable {
                    backend,
                    reason: "platform credential rejected".to_string(),
                });
            }
            _ => {}
        }
        outcome
    }

    /// Call the backend under the configured timeout.
    async fn analyze_with(
        &self,
        backend: BackendKind,
        secret: Secret,
        content: &Content,
        request: &VerificationRequest,
    ) -> Result<RawAnalysis> {
        let adapter = self.backends.create(backend, secret)?;
        let input = AnalysisInput {
            content_type: request.content_type,
            content,
            mime_type: request.effective_mime(),
        };
        match tokio::time::timeout(self.backend_timeout, adapter.analyze(input)).await {
            Ok(result) => result.map(RawAnalysis::clamped),
            Err(_) => Err(Error::BackendTimeout {
                backend,
                timeout: self.backend_timeout,
            }),
        }
    }

    fn score(
        &self,
        analysis: RawAnalysis,
        backend: BackendKind,
        auth: &AuthContext,
        request: &VerificationRequest,
        started: Instant,
    ) -> VerificationResult {
        let mut trust = score_analysis(&analysis, backend, auth.is_byok(), elapsed_ms(started));
        trust.model_fingerprint = identify_model(
            &analysis.details.signals,
            request.content_type,
            analysis.model_fingerprint.as_deref(),
        );

        VerificationResult {
            id: Uuid::new_v4().to_string(),
            trust_score: trust.score,
            ai_probability: trust.ai_probability,
            is_ai_generated: trust.is_ai_generated,
            confidence: trust.confidence,
            model_fingerprint: trust.model_fingerprint,
            manipulation_type: trust.manipulation_type,
            reasoning: analysis.details.reasoning,
            signals: analysis.details.signals,
            backend,
            is_byok: trust.is_byok,
            processing_time_ms: trust.processing_time_ms,
            content_type: request.content_type,
            created_at: self.clock.now(),
            cached: false,
        }
    }

    fn emit_usage(&self, record: UsageRecord) {
        let sink = Arc::clone(&self.sink);
        let in_flight = Arc::clone(&self.usage_in_flight);
        in_flight.send_modify(|n| *n += 1);
        tokio::spawn(async move {
            if let Err(e) = sink.record_usage(record).await {
                warn!("Failed to record usage: {e}");
            }
            in_flight.send_modify(|n| *n = n.saturating_sub(1));
        });
    }

    /// Wait until every usage record emitted so far has been written.
    pub async fn flush_usage(&self) {
        let mut idle = self.usage_in_flight.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = idle.wait_for(|n| *n == 0).await;
    }

    /// Probe a caller's stored credential with a short text analysis.
    ///
    /// A credential that cannot be decrypted or that the backend refuses is
    /// deactivated; one that works is marked verified and reactivated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown credential and the backend
    /// error for transient failures, which change nothing.
    pub async fn test_credential(
        &self,
        caller_id: &str,
        credential_id: &str,
    ) -> Result<CredentialCheck> {
        let stored = self
            .credentials
            .find(caller_id, credential_id)
            .await?
            .ok_or_else(|| Error::NotFound("credential not found".to_string()))?;
        let vault = self
            .vault
            .as_ref()
            .ok_or_else(|| Error::Config("credential vault is not configured".to_string()))?;

        let secret = match vault.decrypt(&stored.encrypted_secret) {
            Ok(secret) => secret,
            Err(e) => {
                warn!("Credential {credential_id} failed to decrypt: {e}");
                self.credentials.deactivate(credential_id).await?;
                return Ok(CredentialCheck::Rejected {
                    reason: e.public_message(),
                });
            }
        };

        let probe = VerificationRequest::text(PROBE_TEXT);
        match self
            .analyze_with(stored.backend, secret, &probe.content, &probe)
            .await
        {
            Ok(_) => {
                self.credentials
                    .mark_verified(credential_id, self.clock.now())
                    .await?;
                info!("Credential {credential_id} ({}) verified", stored.backend);
                Ok(CredentialCheck::Valid)
            }
            Err(e @ Error::CredentialRejected { .. }) => {
                self.credentials.deactivate(credential_id).await?;
                info!("Credential {credential_id} ({}) rejected", stored.backend);
                Ok(CredentialCheck::Rejected {
                    reason: e.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }
}

impl fmt::Debug for Verifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Verifier")
            .field("backend_timeout", &self.backend_timeout)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Verifier`].
///
/// Rate limiter and cache default to the in-memory implementations, built on
/// the builder's clock.
pub struct VerifierBuilder {
    identity: Arc<dyn IdentityStore>,
    credentials: Arc<dyn CredentialStore>,
    backends: Arc<dyn BackendFactory>,
    sink: Arc<dyn ResultSink>,
    vault: Option<Arc<CredentialVault>>,
    platform: PlatformCredentials,
    rate_limiter: Option<Arc<dyn RateLimiter>>,
    cache: Option<Arc<dyn ResultCache>>,
    rate_limits: RateLimitConfig,
    cache_config: CacheConfig,
    clock: Arc<dyn Clock>,
    backend_timeout: Duration,
}

impl VerifierBuilder {
    /// Create a builder around the required collaborators.
    #[must_use]
    pub fn new(
        identity: Arc<dyn IdentityStore>,
        credentials: Arc<dyn CredentialStore>,
        backends: Arc<dyn BackendFactory>,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        Self {
            identity,
            credentials,
            backends,
            sink,
            vault: None,
            platform: PlatformCredentials::default(),
            rate_limiter: None,
            cache: None,
            rate_limits: RateLimitConfig::default(),
            cache_config: CacheConfig::default(),
            clock: Arc::new(SystemClock),
            backend_timeout: Duration::from_secs(60),
        }
    }

    /// Apply the limits, cache and timeout settings of a service config.
    #[must_use]
    pub fn config(mut self, config: &ServiceConfig) -> Self {
        self.rate_limits = config.rate_limits.clone();
        self.cache_config = config.cache.clone();
        self.backend_timeout = config.backends.timeout();
        self
    }

    /// Vault for caller-held credentials.
    #[must_use]
    pub fn vault(mut self, vault: Arc<CredentialVault>) -> Self {
        self.vault = Some(vault);
        self
    }

    /// Platform-held backend credentials.
    #[must_use]
    pub fn platform_credentials(mut self, platform: PlatformCredentials) -> Self {
        self.platform = platform;
        self
    }

    /// Replace the rate limiter.
    #[must_use]
    pub fn rate_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    /// Replace the result cache.
    #[must_use]
    pub fn cache(mut self, cache: Arc<dyn ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Per-plan limits for the default rate limiter.
    #[must_use]
    pub fn rate_limits(mut self, limits: RateLimitConfig) -> Self {
        self.rate_limits = limits;
        self
    }

    /// Time source.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Upper bound on one backend analysis.
    #[must_use]
    pub fn backend_timeout(mut self, timeout: Duration) -> Self {
        self.backend_timeout = timeout;
        self
    }

    /// Build the verifier.
    #[must_use]
    pub fn build(self) -> Verifier {
        let clock = self.clock;
        let rate_limiter = self.rate_limiter.unwrap_or_else(|| {
            Arc::new(InMemoryRateLimiter::new(self.rate_limits, Arc::clone(&clock)))
        });
        let cache = self.cache.unwrap_or_else(|| {
            Arc::new(InMemoryResultCache::with_capacity(
                self.cache_config.capacity,
                self.cache_config.ttl(),
                Arc::clone(&clock),
            ))
        });
        let authenticator = RequestAuthenticator::new(
            Arc::clone(&self.identity),
            Arc::clone(&self.credentials),
            self.vault.clone(),
            Arc::clone(&clock),
        );

        info!(
            "Verifier ready (backend_timeout={:?}, byok_vault={})",
            self.backend_timeout,
            self.vault.is_some()
        );

        Verifier {
            authenticator,
            identity: self.identity,
            credentials: self.credentials,
            vault: self.vault,
            rate_limiter,
            cache,
            backends: self.backends,
            platform: self.platform,
            sink: self.sink,
            clock,
            backend_timeout: self.backend_timeout,
            usage_in_flight: Arc::new(watch::channel(0).0),
        }
    }
}

fn enter(stage: Stage) {
    debug!("Stage: {stage}");
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn log_failure(e: &Error, caller_id: Option<&str>) {
    let caller_id = caller_id.unwrap_or("-");
    match e.kind() {
        ErrorKind::InternalError => error!("Verification for {caller_id} failed: {e:?}"),
        ErrorKind::BackendUnavailable
        | ErrorKind::BackendTimeout
        | ErrorKind::CredentialRejected
        | ErrorKind::DecryptionFailure => warn!("Verification for {caller_id} failed: {e}"),
        _ => info!("Verification for {caller_id} refused: {e}"),
    }
}

fn scan_record(
    result: &VerificationResult,
    caller_id: &str,
    hash: &ContentHash,
    request: &VerificationRequest,
) -> ScanRecord {
    ScanRecord {
        id: result.id.clone(),
        caller_id: caller_id.to_string(),
        content_type: result.content_type,
        content_hash: hash.to_hex(),
        file_name: request.file_name.clone(),
        file_size: request.file_size,
        trust_score: result.trust_score,
        ai_probability: result.ai_probability,
        is_ai_generated: result.is_ai_generated,
        model_fingerprint: result.model_fingerprint.clone(),
        manipulation_type: result.manipulation_type.clone(),
        reasoning: result.reasoning.clone(),
        signals: result.signals.clone(),
        confidence: result.confidence,
        backend: result.backend,
        is_byok: result.is_byok,
        processing_time_ms: result.processing_time_ms,
        created_at: result.created_at,
    }
}
