//! Configuration for prooflayer-node.
//!
//! Everything has a default so an empty TOML file is a valid configuration.
//! Secrets are never read from the file: the vault master key and the
//! platform backend credentials come from the environment variables named
//! here.

use crate::types::{BackendKind, PlanTier};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Per-plan request rate limits.
    #[serde(default)]
    pub rate_limits: RateLimitConfig,

    /// Seconds between sweeps of expired rate windows.
    #[serde(default = "default_cleanup_interval")]
    pub rate_cleanup_interval_secs: u64,

    /// Content cache configuration.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Analysis backend configuration.
    #[serde(default)]
    pub backends: BackendsConfig,

    /// Credential vault configuration.
    #[serde(default)]
    pub vault: VaultConfig,

    /// Environment variables holding the platform backend credentials.
    #[serde(default)]
    pub platform_credentials_env: PlatformCredentialsEnv,

    /// Caller used by the local CLI.
    #[serde(default)]
    pub local_caller: LocalCallerConfig,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Fixed-window limit for one plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    /// Requests allowed per window.
    pub max_requests: u32,
    /// Window length in seconds.
    pub window_secs: u64,
}

impl RateLimit {
    /// Window length.
    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Rate limits, one entry per plan tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Starter plan.
    #[serde(default = "starter_rate")]
    pub starter: RateLimit,
    /// Pro plan.
    #[serde(default = "pro_rate")]
    pub pro: RateLimit,
    /// Growth plan.
    #[serde(default = "growth_rate")]
    pub growth: RateLimit,
    /// Enterprise plan.
    #[serde(default = "enterprise_rate")]
    pub enterprise: RateLimit,
}

impl RateLimitConfig {
    /// Limit that applies to `plan`.
    #[must_use]
    pub fn for_plan(&self, plan: PlanTier) -> RateLimit {
        match plan {
            PlanTier::Starter => self.starter,
            PlanTier::Pro => self.pro,
            PlanTier::Growth => self.growth,
            PlanTier::Enterprise => self.enterprise,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            starter: starter_rate(),
            pro: pro_rate(),
            growth: growth_rate(),
            enterprise: enterprise_rate(),
        }
    }
}

/// Content cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Freshness window in seconds.
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
    /// Maximum number of cached results.
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
}

impl CacheConfig {
    /// Freshness window.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl(),
            capacity: default_cache_capacity(),
        }
    }
}

/// Analysis backend configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendsConfig {
    /// Timeout for one backend analysis, in seconds.
    #[serde(default = "default_backend_timeout")]
    pub timeout_secs: u64,
    /// OpenAI API base URL.
    #[serde(default = "default_openai_url")]
    pub openai_base_url: String,
    /// OpenAI analysis model.
    #[serde(default = "default_openai_model")]
    pub openai_model: String,
    /// OpenAI transcription model.
    #[serde(default = "default_transcription_model")]
    pub transcription_model: String,
    /// Anthropic API base URL.
    #[serde(default = "default_anthropic_url")]
    pub anthropic_base_url: String,
    /// Anthropic analysis model.
    #[serde(default = "default_anthropic_model")]
    pub anthropic_model: String,
    /// Gemini API base URL.
    #[serde(default = "default_gemini_url")]
    pub gemini_base_url: String,
    /// Gemini analysis model.
    #[serde(default = "default_gemini_model")]
    pub gemini_model: String,
    /// Maximum output tokens requested from the backends.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl BackendsConfig {
    /// Timeout for one backend analysis.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for BackendsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_backend_timeout(),
            openai_base_url: default_openai_url(),
            openai_model: default_openai_model(),
            transcription_model: default_transcription_model(),
            anthropic_base_url: default_anthropic_url(),
            anthropic_model: default_anthropic_model(),
            gemini_base_url: default_gemini_url(),
            gemini_model: default_gemini_model(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// Credential vault configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Environment variable holding the hex-encoded 256-bit master key.
    #[serde(default = "default_master_key_env")]
    pub master_key_env: String,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            master_key_env: default_master_key_env(),
        }
    }
}

/// Environment variable names for the platform backend credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformCredentialsEnv {
    /// OpenAI key variable.
    #[serde(default = "default_openai_env")]
    pub openai: String,
    /// Anthropic key variable.
    #[serde(default = "default_anthropic_env")]
    pub anthropic: String,
    /// Gemini key variable.
    #[serde(default = "default_gemini_env")]
    pub gemini: String,
}

impl PlatformCredentialsEnv {
    /// Variable name for `backend`.
    #[must_use]
    pub fn var_for(&self, backend: BackendKind) -> &str {
        match backend {
            BackendKind::OpenAi => &self.openai,
            BackendKind::Anthropic => &self.anthropic,
            BackendKind::Gemini => &self.gemini,
        }
    }
}

impl Default for PlatformCredentialsEnv {
    fn default() -> Self {
        Self {
            openai: default_openai_env(),
            anthropic: default_anthropic_env(),
            gemini: default_gemini_env(),
        }
    }
}

/// Caller profile used by the local CLI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalCallerConfig {
    /// Caller identifier.
    #[serde(default = "default_local_caller_id")]
    pub id: String,
    /// Plan tier.
    #[serde(default)]
    pub plan: PlanTier,
    /// Sealed caller-held backend credentials.
    #[serde(default)]
    pub byok_credentials: Vec<SealedCredentialConfig>,
}

impl Default for LocalCallerConfig {
    fn default() -> Self {
        Self {
            id: default_local_caller_id(),
            plan: PlanTier::default(),
            byok_credentials: Vec::new(),
        }
    }
}

/// A caller-held credential in vault envelope form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedCredentialConfig {
    /// Backend the credential belongs to.
    pub backend: BackendKind,
    /// Vault envelope (`nonce:ciphertext:tag`, hex).
    pub envelope: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            rate_limits: RateLimitConfig::default(),
            rate_cleanup_interval_secs: default_cleanup_interval(),
            cache: CacheConfig::default(),
            backends: BackendsConfig::default(),
            vault: VaultConfig::default(),
            platform_credentials_env: PlatformCredentialsEnv::default(),
            local_caller: LocalCallerConfig::default(),
            log_level: default_log_level(),
        }
    }
}

const fn starter_rate() -> RateLimit {
    RateLimit {
        max_requests: 20,
        window_secs: 60,
    }
}

const fn pro_rate() -> RateLimit {
    RateLimit {
        max_requests: 100,
        window_secs: 60,
    }
}

const fn growth_rate() -> RateLimit {
    RateLimit {
        max_requests: 500,
        window_secs: 60,
    }
}

const fn enterprise_rate() -> RateLimit {
    RateLimit {
        max_requests: 2000,
        window_secs: 60,
    }
}

const fn default_cleanup_interval() -> u64 {
    60
}

const fn default_cache_ttl() -> u64 {
    3600 // 1 hour
}

const fn default_cache_capacity() -> usize {
    100_000
}

const fn default_backend_timeout() -> u64 {
    60
}

const fn default_max_tokens() -> u32 {
    1000
}

fn default_openai_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o".to_string()
}

fn default_transcription_model() -> String {
    "whisper-1".to_string()
}

fn default_anthropic_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_anthropic_model() -> String {
    "claude-sonnet-4-5-20250929".to_string()
}

fn default_gemini_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_gemini_model() -> String {
    "gemini-2.0-flash".to_string()
}

fn default_master_key_env() -> String {
    "BYOK_ENCRYPTION_KEY".to_string()
}

fn default_openai_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_anthropic_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

fn default_gemini_env() -> String {
    "GOOGLE_GEMINI_API_KEY".to_string()
}

fn default_local_caller_id() -> String {
    "local".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ServiceConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::Error::Config(e.to_string()))
    }

    /// Save configuration to a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn to_file(&self, path: &std::path::Path) -> crate::Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| crate::Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Default location of the configuration file.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathBuf::from("prooflayer.toml")
    }
}
