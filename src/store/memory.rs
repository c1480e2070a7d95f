//! In-memory collaborator stores.
//!
//! Each store guards its map with one `parking_lot` mutex, which is what
//! makes [`InMemoryIdentityStore::increment_scans`] atomic.

use super::{
    CredentialStore, IdentityStore, ResultSink, ScanRecord, ServiceKeyRecord, StoredCredential,
    UsageRecord,
};
use crate::auth::hash_service_key;
use crate::error::{Error, Result};
use crate::types::{BackendKind, Caller, FundingMode};
use chrono::{DateTime, Utc};
use futures::future::{self, BoxFuture};
use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct KeyRow {
    record: ServiceKeyRecord,
    last_used_at: Option<DateTime<Utc>>,
}

/// Identity store backed by process memory.
#[derive(Debug, Default)]
pub struct InMemoryIdentityStore {
    callers: Mutex<HashMap<String, Caller>>,
    keys: Mutex<HashMap<String, KeyRow>>,
    sessions: Mutex<HashMap<String, String>>,
}

impl InMemoryIdentityStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a caller profile.
    pub fn upsert_caller(&self, caller: Caller) {
        self.callers.lock().insert(caller.id.clone(), caller);
    }

    /// Register a service key for `caller_id`. Only its digest is kept.
    /// Returns the key record id.
    pub fn add_service_key(&self, plaintext_key: &str, caller_id: &str) -> String {
        let id = Uuid::new_v4().to_string();
        let row = KeyRow {
            record: ServiceKeyRecord {
                id: id.clone(),
                caller_id: caller_id.to_string(),
                is_active: true,
            },
            last_used_at: None,
        };
        self.keys.lock().insert(hash_service_key(plaintext_key), row);
        id
    }

    /// Revoke a service key by record id.
    pub fn revoke_service_key(&self, key_id: &str) {
        for row in self.keys.lock().values_mut() {
            if row.record.id == key_id {
                row.record.is_active = false;
            }
        }
    }

    /// When a service key was last used.
    #[must_use]
    pub fn key_last_used(&self, key_id: &str) -> Option<DateTime<Utc>> {
        self.keys
            .lock()
            .values()
            .find(|row| row.record.id == key_id)
            .and_then(|row| row.last_used_at)
    }

    /// Open a session for `caller_id`.
    pub fn add_session(&self, token: &str, caller_id: &str) {
        self.sessions
            .lock()
            .insert(token.to_string(), caller_id.to_string());
    }

    /// Current profile of `caller_id`.
    #[must_use]
    pub fn snapshot(&self, caller_id: &str) -> Option<Caller> {
        self.callers.lock().get(caller_id).cloned()
    }

    fn charge(&self, caller_id: &str, mode: FundingMode) -> Result<Caller> {
        let mut callers = self.callers.lock();
        let caller = callers
            .get_mut(caller_id)
            .ok_or_else(|| Error::NotFound(format!("caller {caller_id}")))?;

        let (used, limit) = caller.usage(mode);
        if let Some(limit) = limit {
            if used >= limit {
                return Err(Error::QuotaExceeded {
                    quota: mode,
                    used,
                    limit,
                });
            }
        }

        match mode {
            FundingMode::Platform => caller.platform_scans_used += 1,
            FundingMode::Byok => caller.byok_scans_used += 1,
        }
        Ok(caller.clone())
    }
}

impl IdentityStore for InMemoryIdentityStore {
    fn find_service_key<'a>(
        &'a self,
        key_hash: &'a str,
    ) -> BoxFuture<'a, Result<Option<ServiceKeyRecord>>> {
        let found = self.keys.lock().get(key_hash).map(|row| row.record.clone());
        Box::pin(future::ready(Ok(found)))
    }

    fn touch_service_key<'a>(
        &'a self,
        key_id: &'a str,
        at: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<()>> {
        for row in self.keys.lock().values_mut() {
            if row.record.id == key_id {
                row.last_used_at = Some(at);
            }
        }
        Box::pin(future::ready(Ok(())))
    }

    fn resolve_session<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<Option<String>>> {
        let found = self.sessions.lock().get(token).cloned();
        Box::pin(future::ready(Ok(found)))
    }

    fn caller<'a>(&'a self, caller_id: &'a str) -> BoxFuture<'a, Result<Option<Caller>>> {
        Box::pin(future::ready(Ok(self.snapshot(caller_id))))
    }

    fn increment_scans<'a>(
        &'a self,
        caller_id: &'a str,
        mode: FundingMode,
    ) -> BoxFuture<'a, Result<Caller>> {
        Box::pin(future::ready(self.charge(caller_id, mode)))
    }
}

/// Credential store backed by process memory.
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    rows: Mutex<HashMap<String, StoredCredential>>,
}

impl InMemoryCredentialStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a sealed credential. Returns its id.
    pub fn insert(&self, caller_id: &str, backend: BackendKind, envelope: &str) -> String {
        let id = Uuid::new_v4().to_string();
        self.rows.lock().insert(
            id.clone(),
            StoredCredential {
                id: id.clone(),
                caller_id: caller_id.to_string(),
                backend,
                encrypted_secret: envelope.to_string(),
                is_active: true,
                last_verified_at: None,
            },
        );
        id
    }

    /// Current state of a credential.
    #[must_use]
    pub fn get(&self, credential_id: &str) -> Option<StoredCredential> {
        self.rows.lock().get(credential_id).cloned()
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn find_active<'a>(
        &'a self,
        caller_id: &'a str,
        backend: BackendKind,
    ) -> BoxFuture<'a, Result<Option<StoredCredential>>> {
        let found = self
            .rows
            .lock()
            .values()
            .find(|c| c.caller_id == caller_id && c.backend == backend && c.is_active)
            .cloned();
        Box::pin(future::ready(Ok(found)))
    }

    fn find<'a>(
        &'a self,
        caller_id: &'a str,
        credential_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<StoredCredential>>> {
        let found = self
            .rows
            .lock()
            .get(credential_id)
            .filter(|c| c.caller_id == caller_id)
            .cloned();
        Box::pin(future::ready(Ok(found)))
    }

    fn deactivate<'a>(&'a self, credential_id: &'a str) -> BoxFuture<'a, Result<()>> {
        if let Some(row) = self.rows.lock().get_mut(credential_id) {
            row.is_active = false;
        }
        Box::pin(future::ready(Ok(())))
    }

    fn mark_verified<'a>(
        &'a self,
        credential_id: &'a str,
        at: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<()>> {
        if let Some(row) = self.rows.lock().get_mut(credential_id) {
            row.last_verified_at = Some(at);
            row.is_active = true;
        }
        Box::pin(future::ready(Ok(())))
    }
}

/// Sink that keeps every record in memory.
#[derive(Debug, Default)]
pub struct InMemoryResultSink {
    scans: Mutex<Vec<ScanRecord>>,
    usage: Mutex<Vec<UsageRecord>>,
}

impl InMemoryResultSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan records received so far.
    #[must_use]
    pub fn scans(&self) -> Vec<ScanRecord> {
        self.scans.lock().clone()
    }

    /// Usage records received so far.
    #[must_use]
    pub fn usage(&self) -> Vec<UsageRecord> {
        self.usage.lock().clone()
    }
}

impl ResultSink for InMemoryResultSink {
    fn record_scan(&self, record: ScanRecord) -> BoxFuture<'_, Result<()>> {
        self.scans.lock().push(record);
        Box::pin(future::ready(Ok(())))
    }

    fn record_usage(&self, record: UsageRecord) -> BoxFuture<'_, Result<()>> {
        self.usage.lock().push(record);
        Box::pin(future::ready(Ok(())))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::PlanTier;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_service_key_lookup_by_digest() {
        let store = InMemoryIdentityStore::new();
        let id = store.add_service_key("pl_abc", "c1");

        let found = store
            .find_service_key(&hash_service_key("pl_abc"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, id);
        assert!(store.find_service_key("pl_abc").await.unwrap().is_none());

        store.revoke_service_key(&id);
        let found = store
            .find_service_key(&hash_service_key("pl_abc"))
            .await
            .unwrap()
            .unwrap();
        assert!(!found.is_active);
    }

    #[tokio::test]
    async fn test_increment_is_conditional() {
        let store = InMemoryIdentityStore::new();
        let mut caller = Caller::new("c1", PlanTier::Starter);
        caller.platform_scans_used = 499;
        store.upsert_caller(caller);

        let updated = store.increment_scans("c1", FundingMode::Platform).await.unwrap();
        assert_eq!(updated.platform_scans_used, 500);

        let err = store
            .increment_scans("c1", FundingMode::Platform)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::QuotaExceeded { .. }));
        assert_eq!(store.snapshot("c1").unwrap().platform_scans_used, 500);

        let updated = store.increment_scans("c1", FundingMode::Byok).await.unwrap();
        assert_eq!(updated.byok_scans_used, 1);
    }

    #[tokio::test]
    async fn test_concurrent_increments_never_overshoot() {
        let store = Arc::new(InMemoryIdentityStore::new());
        let mut caller = Caller::new("c1", PlanTier::Starter);
        caller.platform_scans_used = 490;
        store.upsert_caller(caller);

        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.increment_scans("c1", FundingMode::Platform).await.is_ok()
            }));
        }
        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                granted += 1;
            }
        }
        assert_eq!(granted, 10);
        assert_eq!(store.snapshot("c1").unwrap().platform_scans_used, 500);
    }

    #[tokio::test]
    async fn test_credentials_scoped_to_owner() {
        let store = InMemoryCredentialStore::new();
        let id = store.insert("c1", BackendKind::Gemini, "aa:bb:cc");

        assert!(store.find("c2", &id).await.unwrap().is_none());
        assert!(store
            .find_active("c1", BackendKind::Gemini)
            .await
            .unwrap()
            .is_some());
        assert!(store
            .find_active("c1", BackendKind::OpenAi)
            .await
            .unwrap()
            .is_none());

        store.deactivate(&id).await.unwrap();
        assert!(store
            .find_active("c1", BackendKind::Gemini)
            .await
            .unwrap()
            .is_none());
        assert!(store.find("c1", &id).await.unwrap().is_some());
    }
}
