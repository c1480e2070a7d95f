//! Request authentication.
//!
//! Two credential shapes are accepted in the `Authorization` header:
//!
//! - service-issued keys, `pl_` prefixed, looked up by their SHA-256 digest;
//! - session tokens, resolved through the identity store.
//!
//! A caller with BYOK enabled who names a backend gets its own credential for
//! that backend, decrypted for this request only. Without a matching active
//! credential the request is platform-funded; that is not an error.

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::store::{CredentialStore, IdentityStore};
use crate::types::{BackendKind, Caller, FundingMode};
use crate::vault::{CredentialVault, Secret};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, warn};

/// Prefix of service-issued keys.
pub const SERVICE_KEY_PREFIX: &str = "pl_";

/// SHA-256 hex digest of a service key, as the key store holds it.
#[must_use]
pub fn hash_service_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// A caller-held credential, decrypted for one request.
#[derive(Debug, Clone)]
pub struct ByokCredential {
    /// Credential store id, for revalidation bookkeeping.
    pub credential_id: String,
    /// Backend it belongs to.
    pub backend: BackendKind,
    /// Plaintext secret.
    pub secret: Secret,
}

/// Outcome of authentication.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Caller profile as read during authentication.
    pub caller: Caller,
    /// Caller-held credential, when the request is caller-funded.
    pub byok: Option<ByokCredential>,
}

impl AuthContext {
    /// Whether the request is caller-funded.
    #[must_use]
    pub fn is_byok(&self) -> bool {
        self.byok.is_some()
    }

    /// Quota the request counts against.
    #[must_use]
    pub fn funding_mode(&self) -> FundingMode {
        if self.is_byok() {
            FundingMode::Byok
        } else {
            FundingMode::Platform
        }
    }
}

/// Resolves inbound credentials to callers.
pub struct RequestAuthenticator {
    identity: Arc<dyn IdentityStore>,
    credentials: Arc<dyn CredentialStore>,
    vault: Option<Arc<CredentialVault>>,
    clock: Arc<dyn Clock>,
}

impl RequestAuthenticator {
    /// Create an authenticator. Without a vault, BYOK credentials cannot be
    /// opened and requests that would use one fail.
    #[must_use]
    pub fn new(
        identity: Arc<dyn IdentityStore>,
        credentials: Arc<dyn CredentialStore>,
        vault: Option<Arc<CredentialVault>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            identity,
            credentials,
            vault,
            clock,
        }
    }

    /// Authenticate a request.
    ///
    /// # Errors
    ///
    /// - [`Error::Unauthorized`] for a missing, unknown or inactive credential
    /// - [`Error::NotFound`] if the credential resolves but the profile is gone
    /// - [`Error::Decryption`] if the caller's stored credential cannot be opened
    pub async fn authenticate(
        &self,
        authorization: Option<&str>,
        preference: Option<BackendKind>,
    ) -> Result<AuthContext> {
        let token = bearer_token(authorization)?;

        let caller_id = if token.starts_with(SERVICE_KEY_PREFIX) {
            self.resolve_service_key(token).await?
        } else {
            self.identity
                .resolve_session(token)
                .await?
                .ok_or_else(|| Error::Unauthorized("invalid session token".to_string()))?
        };

        let caller = self
            .identity
            .caller(&caller_id)
            .await?
            .ok_or_else(|| Error::NotFound("caller profile not found".to_string()))?;

        let byok = match preference {
            Some(backend) if caller.byok_enabled => self.byok_credential(&caller, backend).await?,
            _ => None,
        };

        debug!(
            "Authenticated {} (plan={}, byok={})",
            caller.id,
            caller.plan,
            byok.is_some()
        );
        Ok(AuthContext { caller, byok })
    }

    async fn resolve_service_key(&self, key: &str) -> Result<String> {
        let record = self
            .identity
            .find_service_key(&hash_service_key(key))
            .await?
            // Inactive and unknown keys are indistinguishable to the client.
            .filter(|record| record.is_active)
            .ok_or_else(|| Error::Unauthorized("invalid service key".to_string()))?;

        let identity = Arc::clone(&self.identity);
        let key_id = record.id.clone();
        let now = self.clock.now();
        tokio::spawn(async move {
            if let Err(e) = identity.touch_service_key(&key_id, now).await {
                warn!("Failed to record last use of service key {key_id}: {e}");
            }
        });

        Ok(record.caller_id)
    }

    async fn byok_credential(
        &self,
        caller: &Caller,
        backend: BackendKind,
    ) -> Result<Option<ByokCredential>> {
        let Some(stored) = self.credentials.find_active(&caller.id, backend).await? else {
            debug!("No active {backend} credential for {}, using platform funding", caller.id);
            return Ok(None);
        };

        let vault = self
            .vault
            .as_ref()
            .ok_or_else(|| Error::Config("credential vault is not configured".to_string()))?;

        match vault.decrypt(&stored.encrypted_secret) {
            Ok(secret) => Ok(Some(ByokCredential {
                credential_id: stored.id,
                backend,
                secret,
            })),
            Err(e) => {
                warn!(
                    "Stored {backend} credential {} of {} failed to decrypt, deactivating: {e}",
                    stored.id, caller.id
                );
                if let Err(store_err) = self.credentials.deactivate(&stored.id).await {
                    warn!("Failed to deactivate credential {}: {store_err}", stored.id);
                }
                Err(e)
            }
        }
    }
}

fn bearer_token(authorization: Option<&str>) -> Result<&str> {
    let header = authorization
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .ok_or_else(|| Error::Unauthorized("missing authorization header".to_string()))?;
    let token = header.strip_prefix("Bearer ").unwrap_or(header).trim();
    if token.is_empty() {
        return Err(Error::Unauthorized("empty credential".to_string()));
    }
    Ok(token)
}
