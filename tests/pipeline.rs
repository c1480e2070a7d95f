//! End-to-end tests of the verification pipeline.
//!
//! Every collaborator is in-memory and the backends are scripted, so these
//! run without network access or credentials.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use chrono::{TimeZone, Utc};
use futures::future::{join_all, BoxFuture};
use parking_lot::Mutex;
use prooflayer_node::backend::{AnalysisBackend, AnalysisInput, BackendFactory};
use prooflayer_node::cache::{ContentHash, InMemoryResultCache};
use prooflayer_node::clock::{Clock, ManualClock};
use prooflayer_node::config::{RateLimit, RateLimitConfig};
use prooflayer_node::store::{
    CredentialStore, InMemoryCredentialStore, InMemoryIdentityStore, InMemoryResultSink,
    ResultSink, ScanRecord, UsageRecord,
};
use prooflayer_node::types::RawAnalysis;
use prooflayer_node::vault::{CredentialVault, PlatformCredentials, Secret};
use prooflayer_node::{
    BackendKind, Caller, CredentialCheck, Error, FundingMode, PlanTier, Result,
    VerificationRequest, VerificationResult, Verifier, VerifyCall,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::assert_ok;

const PLATFORM_OPENAI_KEY: &str = "sk-platform-openai";
const CALLER_GEMINI_KEY: &str = "sk-caller-gemini";

// =============================================================================
// Scripted backends
// =============================================================================

#[derive(Debug, Clone)]
enum Script {
    Verdict(RawAnalysis),
    Hang,
    Reject,
    Unavailable,
    RejectInput,
}

struct ScriptedBackend {
    kind: BackendKind,
    script: Script,
}

impl AnalysisBackend for ScriptedBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn analyze<'a>(&'a self, _input: AnalysisInput<'a>) -> BoxFuture<'a, Result<RawAnalysis>> {
        Box::pin(async move {
            // Let concurrent requests interleave around the backend call.
            tokio::task::yield_now().await;
            match &self.script {
                Script::Verdict(raw) => Ok(raw.clone()),
                Script::Hang => {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok(RawAnalysis::neutral("too late"))
                }
                Script::Reject => Err(Error::CredentialRejected { backend: self.kind }),
                Script::Unavailable => Err(Error::BackendUnavailable {
                    backend: self.kind,
                    reason: "HTTP 500".to_string(),
                }),
                Script::RejectInput => Err(Error::Validation(format!(
                    "{} backend rejected the content (HTTP 400)",
                    self.kind
                ))),
            }
        })
    }
}

struct ScriptedFactory {
    script: Mutex<Script>,
    created: Mutex<Vec<(BackendKind, String)>>,
}

impl ScriptedFactory {
    fn new(script: Script) -> Self {
        Self {
            script: Mutex::new(script),
            created: Mutex::new(Vec::new()),
        }
    }

    fn set(&self, script: Script) {
        *self.script.lock() = script;
    }

    fn calls(&self) -> usize {
        self.created.lock().len()
    }

    fn last_call(&self) -> Option<(BackendKind, String)> {
        self.created.lock().last().cloned()
    }
}

impl BackendFactory for ScriptedFactory {
    fn create(&self, kind: BackendKind, secret: Secret) -> Result<Box<dyn AnalysisBackend>> {
        self.created.lock().push((kind, secret.expose().to_string()));
        Ok(Box::new(ScriptedBackend {
            kind,
            script: self.script.lock().clone(),
        }))
    }
}

fn verdict(ai_probability: f64, confidence: f64, signals: &[&str]) -> RawAnalysis {
    let mut raw = RawAnalysis::neutral("scripted verdict");
    raw.ai_probability = ai_probability;
    raw.confidence = confidence;
    raw.is_ai_generated = ai_probability >= 50.0;
    raw.details.signals = signals.iter().map(|s| (*s).to_string()).collect();
    raw
}

/// Sink whose scan storage is down; usage still goes through.
struct FailingScanSink(Arc<InMemoryResultSink>);

impl ResultSink for FailingScanSink {
    fn record_scan(&self, _record: ScanRecord) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Err(Error::Internal("scan table unavailable".to_string())) })
    }

    fn record_usage(&self, record: UsageRecord) -> BoxFuture<'_, Result<()>> {
        self.0.record_usage(record)
    }
}

struct SlowUsageSink(Arc<InMemoryResultSink>);

impl ResultSink for SlowUsageSink {
    fn record_scan(&self, record: ScanRecord) -> BoxFuture<'_, Result<()>> {
        self.0.record_scan(record)
    }

    fn record_usage(&self, record: UsageRecord) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            self.0.record_usage(record).await
        })
    }
}

// =============================================================================
// Harness
// =============================================================================

struct Harness {
    identity: Arc<InMemoryIdentityStore>,
    credentials: Arc<InMemoryCredentialStore>,
    records: Arc<InMemoryResultSink>,
    factory: Arc<ScriptedFactory>,
    cache: InMemoryResultCache,
    clock: Arc<ManualClock>,
    vault: Arc<CredentialVault>,
    verifier: Verifier,
}

struct HarnessOptions {
    rate_limits: RateLimitConfig,
    backend_timeout: Duration,
    failing_scans: bool,
    slow_usage: bool,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            rate_limits: RateLimitConfig::default(),
            backend_timeout: Duration::from_secs(5),
            failing_scans: false,
            slow_usage: false,
        }
    }
}

impl Harness {
    fn new() -> Self {
        Self::with(HarnessOptions::default())
    }

    fn with(options: HarnessOptions) -> Self {
        let identity = Arc::new(InMemoryIdentityStore::new());
        let credentials = Arc::new(InMemoryCredentialStore::new());
        let records = Arc::new(InMemoryResultSink::new());
        let factory = Arc::new(ScriptedFactory::new(Script::Verdict(verdict(20.0, 80.0, &[]))));
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        ));
        let cache = InMemoryResultCache::new(Duration::from_secs(3600), clock.clone());
        let vault = Arc::new(CredentialVault::new(&[7u8; 32]).unwrap());

        let sink: Arc<dyn ResultSink> = if options.failing_scans {
            Arc::new(FailingScanSink(records.clone()))
        } else if options.slow_usage {
            Arc::new(SlowUsageSink(records.clone()))
        } else {
            records.clone()
        };

        let verifier = Verifier::builder(identity.clone(), credentials.clone(), factory.clone(), sink)
            .vault(vault.clone())
            .platform_credentials(
                PlatformCredentials::default()
                    .with(BackendKind::OpenAi, Secret::new(PLATFORM_OPENAI_KEY)),
            )
            .clock(clock.clone())
            .rate_limits(options.rate_limits)
            .cache(Arc::new(cache.clone()))
            .backend_timeout(options.backend_timeout)
            .build();

        Self {
            identity,
            credentials,
            records,
            factory,
            cache,
            clock,
            vault,
            verifier,
        }
    }

    /// Register a caller reachable through session token `tok-<id>`.
    fn caller(&self, id: &str, plan: PlanTier, platform_used: u64) {
        let mut caller = Caller::new(id, plan);
        caller.platform_scans_used = platform_used;
        self.identity.upsert_caller(caller);
        self.identity.add_session(&format!("tok-{id}"), id);
    }

    /// Give `id` BYOK access with a sealed credential for `backend`.
    fn byok(&self, id: &str, backend: BackendKind, secret: &str) -> String {
        let mut caller = self.identity.snapshot(id).unwrap();
        caller.byok_enabled = true;
        self.identity.upsert_caller(caller);
        let envelope = self.vault.encrypt(secret).unwrap();
        self.credentials.insert(id, backend, &envelope)
    }

    async fn verify(&self, id: &str, request: VerificationRequest) -> Result<VerificationResult> {
        self.verifier
            .verify(VerifyCall {
                authorization: Some(format!("Bearer tok-{id}")),
                request,
            })
            .await
    }

    fn platform_used(&self, id: &str) -> u64 {
        self.identity.snapshot(id).unwrap().platform_scans_used
    }

    fn byok_used(&self, id: &str) -> u64 {
        self.identity.snapshot(id).unwrap().byok_scans_used
    }

    /// Usage records are written off the request path; wait for them.
    async fn usage(&self, expected: usize) -> Vec<UsageRecord> {
        for _ in 0..100 {
            let usage = self.records.usage();
            if usage.len() >= expected {
                return usage;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.records.usage()
    }
}

fn text_with_backend(text: &str, backend: BackendKind) -> VerificationRequest {
    let mut request = VerificationRequest::text(text);
    request.backend_preference = Some(backend);
    request
}

const FIFTY_CHARS: &str = "The quick brown fox jumps over the lazy dog today.";

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_last_platform_scan_is_scored_and_charged() {
    let h = Harness::new();
    h.caller("alice", PlanTier::Starter, 499);
    assert_eq!(FIFTY_CHARS.len(), 50);

    let result = h
        .verify("alice", VerificationRequest::text(FIFTY_CHARS))
        .await
        .unwrap();

    assert!((result.trust_score - 74.0).abs() < 1e-9);
    assert!(!result.is_byok);
    assert!(!result.cached);
    assert_eq!(result.backend, BackendKind::OpenAi);
    assert_eq!(result.created_at, h.clock.now());
    assert_eq!(h.platform_used("alice"), 500);
    assert_eq!(
        h.factory.last_call(),
        Some((BackendKind::OpenAi, PLATFORM_OPENAI_KEY.to_string()))
    );

    let scans = h.records.scans();
    assert_eq!(scans.len(), 1);
    assert_eq!(scans[0].id, result.id);
    assert_eq!(
        scans[0].content_hash,
        ContentHash::of(FIFTY_CHARS.as_bytes()).to_hex()
    );

    // Resubmission at 500/500 is a free cache hit
    let again = h
        .verify("alice", VerificationRequest::text(FIFTY_CHARS))
        .await
        .unwrap();
    assert!(again.cached);
    assert_eq!(again.processing_time_ms, 0);
    assert_eq!(again.id, result.id);
    assert_eq!(h.platform_used("alice"), 500);

    // The next new submission is over quota
    let err = h
        .verify("alice", VerificationRequest::text("something else"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::QuotaExceeded {
            quota: FundingMode::Platform,
            used: 500,
            limit: 500
        }
    ));
    assert_eq!(h.factory.calls(), 1);
}

#[tokio::test]
async fn test_resubmission_served_from_cache() {
    let h = Harness::new();
    h.caller("alice", PlanTier::Starter, 0);

    let first = h.verify("alice", VerificationRequest::text("hello")).await.unwrap();
    let second = h.verify("alice", VerificationRequest::text("hello")).await.unwrap();

    assert!(second.cached);
    assert_eq!(second.processing_time_ms, 0);
    assert_eq!(second.id, first.id);
    assert!((second.trust_score - first.trust_score).abs() < f64::EPSILON);
    assert_eq!(h.platform_used("alice"), 1);
    assert_eq!(h.factory.calls(), 1);
    assert_eq!(h.records.scans().len(), 1);
    assert_eq!(h.cache.stats().hits, 1);

    // Cache hits are still logged as usage
    let usage = h.usage(2).await;
    assert_eq!(usage.len(), 2);
    assert!(usage.iter().all(|u| u.status_code == 200 && u.caller_id == "alice"));
}

#[tokio::test]
async fn test_cache_is_scoped_per_caller() {
    let h = Harness::new();
    h.caller("alice", PlanTier::Starter, 0);
    h.caller("bob", PlanTier::Starter, 0);

    h.verify("alice", VerificationRequest::text("same words")).await.unwrap();
    let bob = h.verify("bob", VerificationRequest::text("same words")).await.unwrap();

    assert!(!bob.cached);
    assert_eq!(h.factory.calls(), 2);
    assert_eq!(h.platform_used("bob"), 1);
}

#[tokio::test]
async fn test_expired_cache_entry_is_reanalysed() {
    let h = Harness::new();
    h.caller("alice", PlanTier::Starter, 0);

    h.verify("alice", VerificationRequest::text("hello")).await.unwrap();
    h.clock.advance(Duration::from_secs(3601));
    let again = h.verify("alice", VerificationRequest::text("hello")).await.unwrap();

    assert!(!again.cached);
    assert_eq!(h.factory.calls(), 2);
    assert_eq!(h.platform_used("alice"), 2);
}

#[tokio::test]
async fn test_byok_bypasses_exhausted_platform_quota() {
    let h = Harness::new();
    h.caller("alice", PlanTier::Pro, 5_000);
    let credential_id = h.byok("alice", BackendKind::Gemini, CALLER_GEMINI_KEY);

    let result = h
        .verify("alice", text_with_backend("mine to pay for", BackendKind::Gemini))
        .await
        .unwrap();

    assert!(result.is_byok);
    assert_eq!(result.backend, BackendKind::Gemini);
    assert_eq!(h.byok_used("alice"), 1);
    assert_eq!(h.platform_used("alice"), 5_000);
    assert_eq!(
        h.factory.last_call(),
        Some((BackendKind::Gemini, CALLER_GEMINI_KEY.to_string()))
    );
    assert!(h.credentials.get(&credential_id).unwrap().last_verified_at.is_some());
}

#[tokio::test]
async fn test_byok_without_credential_falls_back_to_platform() {
    let h = Harness::new();
    h.caller("alice", PlanTier::Pro, 0);
    h.byok("alice", BackendKind::Gemini, CALLER_GEMINI_KEY);

    let result = h
        .verify("alice", text_with_backend("platform please", BackendKind::OpenAi))
        .await
        .unwrap();

    assert!(!result.is_byok);
    assert_eq!(h.platform_used("alice"), 1);
    assert_eq!(h.byok_used("alice"), 0);
}

#[tokio::test]
async fn test_rejected_byok_credential_is_deactivated() {
    let h = Harness::new();
    h.caller("alice", PlanTier::Pro, 0);
    let credential_id = h.byok("alice", BackendKind::Gemini, CALLER_GEMINI_KEY);
    h.factory.set(Script::Reject);

    let err = h
        .verify("alice", text_with_backend("anything", BackendKind::Gemini))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::CredentialRejected {
            backend: BackendKind::Gemini
        }
    ));
    assert!(!h.credentials.get(&credential_id).unwrap().is_active);
    assert_eq!(h.byok_used("alice"), 0);
    assert!(h.records.scans().is_empty());
}

#[tokio::test]
async fn test_rejected_platform_credential_is_unavailable() {
    let h = Harness::new();
    h.caller("alice", PlanTier::Starter, 0);
    h.factory.set(Script::Reject);

    let err = h
        .verify("alice", VerificationRequest::text("anything"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::BackendUnavailable {
            backend: BackendKind::OpenAi,
            ..
        }
    ));
    assert_eq!(h.platform_used("alice"), 0);
}

#[tokio::test]
async fn test_backend_timeout_charges_nothing() {
    let h = Harness::with(HarnessOptions {
        backend_timeout: Duration::from_millis(50),
        ..HarnessOptions::default()
    });
    h.caller("alice", PlanTier::Starter, 10);
    h.factory.set(Script::Hang);

    let err = h
        .verify("alice", VerificationRequest::text("slow"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::BackendTimeout {
            backend: BackendKind::OpenAi,
            ..
        }
    ));
    assert!(err.is_retryable());
    assert_eq!(h.platform_used("alice"), 10);
    assert!(h.cache.is_empty());
    assert!(h.records.scans().is_empty());

    let usage = h.usage(1).await;
    assert_eq!(usage[0].status_code, 504);
    assert_eq!(usage[0].backend, Some(BackendKind::OpenAi));
}

#[tokio::test]
async fn test_backend_failure_charges_nothing() {
    let h = Harness::new();
    h.caller("alice", PlanTier::Starter, 0);
    h.factory.set(Script::Unavailable);

    let err = h
        .verify("alice", VerificationRequest::text("x"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::BackendUnavailable { .. }));
    assert_eq!(h.platform_used("alice"), 0);
    assert!(h.cache.is_empty());
}

#[tokio::test]
async fn test_rejected_input_is_final_and_free() {
    let h = Harness::new();
    h.caller("alice", PlanTier::Starter, 3);
    h.factory.set(Script::RejectInput);

    let err = h
        .verify("alice", VerificationRequest::text("x"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert!(!err.is_retryable());
    assert_eq!(err.to_body().status, 400);
    assert_eq!(h.platform_used("alice"), 3);
    assert!(h.cache.is_empty());
    assert!(h.records.scans().is_empty());
}

#[tokio::test]
async fn test_rate_limit_rejects_and_resets() {
    let tight = RateLimit {
        max_requests: 2,
        window_secs: 60,
    };
    let h = Harness::with(HarnessOptions {
        rate_limits: RateLimitConfig {
            starter: tight,
            ..RateLimitConfig::default()
        },
        ..HarnessOptions::default()
    });
    h.caller("alice", PlanTier::Starter, 0);

    h.verify("alice", VerificationRequest::text("one")).await.unwrap();
    h.verify("alice", VerificationRequest::text("two")).await.unwrap();
    let err = h
        .verify("alice", VerificationRequest::text("three"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::RateLimited { retry_after, .. } if retry_after <= Duration::from_secs(60)
    ));
    assert_eq!(err.to_body().code, "rate_limited");
    assert_eq!(h.platform_used("alice"), 2);

    h.clock.advance(Duration::from_secs(61));
    h.verify("alice", VerificationRequest::text("three")).await.unwrap();
    assert_eq!(h.platform_used("alice"), 3);
}

#[tokio::test]
async fn test_concurrent_requests_take_last_scan_once() {
    let h = Harness::new();
    h.caller("alice", PlanTier::Starter, 499);

    let texts: Vec<String> = (0..5).map(|i| format!("distinct text {i}")).collect();
    let outcomes = join_all(
        texts
            .iter()
            .map(|text| h.verify("alice", VerificationRequest::text(text.as_str()))),
    )
    .await;

    let granted = outcomes.iter().filter(|o| o.is_ok()).count();
    assert_eq!(granted, 1);
    assert!(outcomes
        .iter()
        .filter_map(|o| o.as_ref().err())
        .all(|e| matches!(e, Error::QuotaExceeded { .. })));
    assert_eq!(h.platform_used("alice"), 500);
    assert_eq!(h.cache.len(), 1);
    assert_eq!(h.records.scans().len(), 1);
}

#[tokio::test]
async fn test_flush_waits_for_pending_usage() {
    let h = Harness::with(HarnessOptions {
        slow_usage: true,
        ..HarnessOptions::default()
    });
    h.caller("alice", PlanTier::Starter, 0);

    assert_ok!(h.verify("alice", VerificationRequest::text("one")).await);
    assert_ok!(h.verify("alice", VerificationRequest::text("two")).await);
    assert!(h.records.usage().is_empty());

    h.verifier.flush_usage().await;
    assert_eq!(h.records.usage().len(), 2);

    // Nothing pending: returns at once.
    h.verifier.flush_usage().await;
}

#[tokio::test]
async fn test_scan_persistence_failure_still_returns_result() {
    let h = Harness::with(HarnessOptions {
        failing_scans: true,
        ..HarnessOptions::default()
    });
    h.caller("alice", PlanTier::Starter, 0);

    let result = assert_ok!(h.verify("alice", VerificationRequest::text("keep going")).await);
    assert!(!result.cached);
    assert_eq!(h.platform_used("alice"), 1);
    assert_eq!(h.usage(1).await.len(), 1);
}

#[tokio::test]
async fn test_fingerprint_attached_from_signals() {
    let h = Harness::new();
    h.caller("alice", PlanTier::Starter, 0);
    h.factory.set(Script::Verdict(verdict(
        91.0,
        95.0,
        &["Structured lists", "hedging language"],
    )));

    let result = h
        .verify("alice", VerificationRequest::text("In conclusion, it depends."))
        .await
        .unwrap();
    assert_eq!(result.model_fingerprint.as_deref(), Some("GPT-4"));
    assert!(result.is_ai_generated);
    assert_eq!(result.signals.len(), 2);
}

#[tokio::test]
async fn test_unauthenticated_requests_emit_no_usage() {
    let h = Harness::new();
    h.caller("alice", PlanTier::Starter, 0);

    let err = h
        .verifier
        .verify(VerifyCall {
            authorization: None,
            request: VerificationRequest::text("x"),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Unauthorized(_)));

    h.verify("alice", VerificationRequest::text("x")).await.unwrap();
    let usage = h.usage(1).await;
    assert_eq!(usage.len(), 1);
    assert_eq!(usage[0].caller_id, "alice");
}

#[tokio::test]
async fn test_service_key_authenticates_pipeline() {
    let h = Harness::new();
    h.caller("alice", PlanTier::Growth, 0);
    h.identity.add_service_key("pl_alice_live", "alice");

    let result = h
        .verifier
        .verify(VerifyCall {
            authorization: Some("Bearer pl_alice_live".to_string()),
            request: VerificationRequest::text("via service key"),
        })
        .await
        .unwrap();
    assert!(!result.cached);
    assert_eq!(h.platform_used("alice"), 1);
}

#[tokio::test]
async fn test_credential_probe_valid_reactivates() {
    let h = Harness::new();
    h.caller("alice", PlanTier::Pro, 0);
    let credential_id = h.byok("alice", BackendKind::Gemini, CALLER_GEMINI_KEY);
    h.credentials.deactivate(&credential_id).await.unwrap();

    let check = h.verifier.test_credential("alice", &credential_id).await.unwrap();

    assert_eq!(check, CredentialCheck::Valid);
    let stored = h.credentials.get(&credential_id).unwrap();
    assert!(stored.is_active);
    assert!(stored.last_verified_at.is_some());
    // Probes are not scans
    assert_eq!(h.byok_used("alice"), 0);
}

#[tokio::test]
async fn test_credential_probe_rejected_deactivates() {
    let h = Harness::new();
    h.caller("alice", PlanTier::Pro, 0);
    let credential_id = h.byok("alice", BackendKind::Gemini, CALLER_GEMINI_KEY);
    h.factory.set(Script::Reject);

    let check = h.verifier.test_credential("alice", &credential_id).await.unwrap();

    assert!(matches!(check, CredentialCheck::Rejected { .. }));
    assert!(!h.credentials.get(&credential_id).unwrap().is_active);
}

#[tokio::test]
async fn test_credential_probe_transient_failure_changes_nothing() {
    let h = Harness::new();
    h.caller("alice", PlanTier::Pro, 0);
    let credential_id = h.byok("alice", BackendKind::Gemini, CALLER_GEMINI_KEY);
    h.factory.set(Script::Unavailable);

    let err = h
        .verifier
        .test_credential("alice", &credential_id)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::BackendUnavailable { .. }));
    let stored = h.credentials.get(&credential_id).unwrap();
    assert!(stored.is_active);
    assert!(stored.last_verified_at.is_none());
}

#[tokio::test]
async fn test_credential_probe_is_owner_scoped() {
    let h = Harness::new();
    h.caller("alice", PlanTier::Pro, 0);
    h.caller("bob", PlanTier::Pro, 0);
    let credential_id = h.byok("alice", BackendKind::Gemini, CALLER_GEMINI_KEY);

    let err = h
        .verifier
        .test_credential("bob", &credential_id)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}
