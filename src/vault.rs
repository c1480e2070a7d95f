//! Credential vault for caller-held backend secrets.
//!
//! Secrets are sealed with AES-256-GCM-SIV under a single process-wide master
//! key. The envelope is three colon-separated hex segments:
//!
//! ```text
//! nonce(12 bytes) : ciphertext : tag(16 bytes)
//! ```
//!
//! Opening an envelope fails closed: a malformed envelope, a wrong key or any
//! modified byte is an error, never a fallback to the input.

use crate::config::PlatformCredentialsEnv;
use crate::error::{Error, Result};
use crate::types::BackendKind;
use aes_gcm_siv::aead::{AeadCore, AeadInPlace, KeyInit, OsRng};
use aes_gcm_siv::{Aes256GcmSiv, Nonce, Tag};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info};

/// Master key length in bytes.
pub const MASTER_KEY_LEN: usize = 32;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// A plaintext backend credential.
///
/// Has no `Display` or `Serialize` implementation and a redacting `Debug`,
/// so it cannot end up in a log line or a response body by accident.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    /// Wrap a plaintext secret.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the plaintext. Only backend adapters should call this.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Whether the secret is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(****)")
    }
}

/// Symmetric vault keyed by the process-wide master key.
pub struct CredentialVault {
    cipher: Aes256GcmSiv,
}

impl fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialVault").finish_non_exhaustive()
    }
}

impl CredentialVault {
    /// Create a vault from raw key bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is not exactly 32 bytes.
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.len() != MASTER_KEY_LEN {
            return Err(Error::Config(format!(
                "vault master key must be {MASTER_KEY_LEN} bytes, got {}",
                key.len()
            )));
        }
        let cipher = Aes256GcmSiv::new_from_slice(key)
            .map_err(|_| Error::Config("invalid vault master key".to_string()))?;
        Ok(Self { cipher })
    }

    /// Create a vault from a hex-encoded key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is not valid hex or has the wrong length.
    pub fn from_hex(hex_key: &str) -> Result<Self> {
        let key = hex::decode(hex_key.trim())
            .map_err(|_| Error::Config("vault master key is not valid hex".to_string()))?;
        Self::new(&key)
    }

    /// Create a vault from the environment variable `var`.
    ///
    /// # Errors
    ///
    /// Returns an error if the variable is unset or holds an invalid key.
    pub fn from_env(var: &str) -> Result<Self> {
        let value = std::env::var(var)
            .map_err(|_| Error::Config(format!("{var} is not set")))?;
        let vault = Self::from_hex(&value)?;
        info!("Credential vault initialized from {var}");
        Ok(vault)
    }

    /// Seal `plaintext` into an envelope with a fresh random nonce.
    ///
    /// # Errors
    ///
    /// Returns an error if encryption fails.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce = Aes256GcmSiv::generate_nonce(&mut OsRng);
        let mut buffer = plaintext.as_bytes().to_vec();
        let tag = self
            .cipher
            .encrypt_in_place_detached(&nonce, b"", &mut buffer)
            .map_err(|_| Error::Internal("credential encryption failed".to_string()))?;

        Ok(format!(
            "{}:{}:{}",
            hex::encode(nonce),
            hex::encode(&buffer),
            hex::encode(tag)
        ))
    }

    /// Open an envelope produced by [`encrypt`](Self::encrypt).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decryption`] if the envelope is malformed, was sealed
    /// under another key, or has been modified.
    pub fn decrypt(&self, envelope: &str) -> Result<Secret> {
        let parts: Vec<&str> = envelope.split(':').collect();
        let [nonce_hex, ciphertext_hex, tag_hex] = parts.as_slice() else {
            return Err(Error::Decryption("invalid envelope format".to_string()));
        };

        let nonce = decode_segment(nonce_hex, "nonce")?;
        let mut buffer = decode_segment(ciphertext_hex, "ciphertext")?;
        let tag = decode_segment(tag_hex, "tag")?;

        if nonce.len() != NONCE_LEN {
            return Err(Error::Decryption(format!(
                "nonce must be {NONCE_LEN} bytes, got {}",
                nonce.len()
            )));
        }
        if tag.len() != TAG_LEN {
            return Err(Error::Decryption(format!(
                "tag must be {TAG_LEN} bytes, got {}",
                tag.len()
            )));
        }

        self.cipher
            .decrypt_in_place_detached(
                Nonce::from_slice(&nonce),
                b"",
                &mut buffer,
                Tag::from_slice(&tag),
            )
            .map_err(|_| Error::Decryption("authentication failed".to_string()))?;

        let plaintext = String::from_utf8(buffer)
            .map_err(|_| Error::Decryption("plaintext is not UTF-8".to_string()))?;
        debug!("Opened credential envelope");
        Ok(Secret(plaintext))
    }
}

fn decode_segment(segment: &str, name: &str) -> Result<Vec<u8>> {
    hex::decode(segment).map_err(|_| Error::Decryption(format!("{name} is not valid hex")))
}

/// Render a secret for operator display: first and last four characters.
#[must_use]
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

/// Platform-held backend credentials, loaded once at start-up.
#[derive(Debug, Clone, Default)]
pub struct PlatformCredentials {
    secrets: HashMap<BackendKind, Secret>,
}

impl PlatformCredentials {
    /// Load every backend credential that is present in the environment.
    #[must_use]
    pub fn from_env(vars: &PlatformCredentialsEnv) -> Self {
        let mut credentials = Self::default();
        for backend in BackendKind::ALL {
            match std::env::var(vars.var_for(backend)) {
                Ok(value) if !value.trim().is_empty() => {
                    credentials = credentials.with(backend, Secret::new(value.trim()));
                }
                _ => debug!("No platform credential for {backend}"),
            }
        }
        info!(
            "Loaded platform credentials for {} backend(s)",
            credentials.secrets.len()
        );
        credentials
    }

    /// Add or replace the credential for `backend`.
    #[must_use]
    pub fn with(mut self, backend: BackendKind, secret: Secret) -> Self {
        self.secrets.insert(backend, secret);
        self
    }

    /// Credential for `backend`, if configured.
    #[must_use]
    pub fn get(&self, backend: BackendKind) -> Option<&Secret> {
        self.secrets.get(&backend)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_vault() -> CredentialVault {
        CredentialVault::new(&[7u8; MASTER_KEY_LEN]).expect("valid key")
    }

    #[test]
    fn test_round_trip() {
        let vault = test_vault();
        let envelope = vault.encrypt("sk-live-1234567890").unwrap();
        assert_eq!(envelope.split(':').count(), 3);
        assert!(!envelope.contains("sk-live"));

        let secret = vault.decrypt(&envelope).unwrap();
        assert_eq!(secret.expose(), "sk-live-1234567890");
    }

    #[test]
    fn test_fresh_nonce_per_encryption() {
        let vault = test_vault();
        let a = vault.encrypt("same").unwrap();
        let b = vault.encrypt("same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_fails() {
        let envelope = test_vault().encrypt("sk-abcdef").unwrap();
        let other = CredentialVault::new(&[9u8; MASTER_KEY_LEN]).unwrap();
        assert!(matches!(other.decrypt(&envelope), Err(Error::Decryption(_))));
    }

    #[test]
    fn test_malformed_envelopes() {
        let vault = test_vault();
        for bad in ["", "plaintext-key", "aa:bb", "aa:bb:cc:dd", "zz:00:00", "00:00:00"] {
            assert!(
                matches!(vault.decrypt(bad), Err(Error::Decryption(_))),
                "{bad:?} must be rejected"
            );
        }
    }

    #[test]
    fn test_key_validation() {
        assert!(CredentialVault::new(&[0u8; 16]).is_err());
        assert!(CredentialVault::from_hex("not hex").is_err());
        assert!(CredentialVault::from_hex(&"ab".repeat(32)).is_ok());
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        let secret = Secret::new("sk-live-abc");
        assert_eq!(format!("{secret:?}"), "Secret(****)");
    }

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret("short"), "****");
        assert_eq!(mask_secret("sk-1234567890wxyz"), "sk-1...wxyz");
    }

    #[test]
    fn test_platform_credentials_lookup() {
        let creds = PlatformCredentials::default().with(BackendKind::Gemini, Secret::new("g"));
        assert!(creds.get(BackendKind::Gemini).is_some());
        assert!(creds.get(BackendKind::OpenAi).is_none());
    }

    proptest! {
        #[test]
        fn prop_round_trip(plaintext in ".{1,64}") {
            let vault = test_vault();
            let envelope = vault.encrypt(&plaintext).unwrap();
            let opened = vault.decrypt(&envelope).unwrap();
            prop_assert_eq!(opened.expose(), plaintext.as_str());
        }

        #[test]
        fn prop_any_flipped_bit_fails_closed(
            segment in 0usize..3,
            byte in any::<prop::sample::Index>(),
            bit in 0u8..8,
        ) {
            let vault = test_vault();
            let envelope = vault.encrypt("sk-abcdef").unwrap();
            let mut parts: Vec<String> = envelope.split(':').map(str::to_string).collect();

            let mut bytes = hex::decode(&parts[segment]).unwrap();
            let at = byte.index(bytes.len());
            bytes[at] ^= 1 << bit;
            parts[segment] = hex::encode(bytes);

            let result = vault.decrypt(&parts.join(":"));
            prop_assert!(
                matches!(result, Err(Error::Decryption(_))),
                "segment {} byte {} bit {} must fail",
                segment,
                at,
                bit
            );
        }
    }
}
