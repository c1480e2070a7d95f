//! # prooflayer-node
//!
//! Verification request pipeline for AI-generated content detection.
//!
//! A request carries an image, audio clip, video clip or text. The pipeline
//! authenticates the caller, enforces its request rate and monthly scan
//! quota, answers repeated submissions from a content-addressed cache, and
//! otherwise dispatches the content to one of several third-party analysis
//! backends. The backend verdict is normalised into a trust score (0-100,
//! higher is more likely human-made) and tagged with the generator it most
//! resembles.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                         Verifier                              │
//! ├───────────────────────────────────────────────────────────────┤
//! │  auth ─► limits::rate ─► limits::quota ─► cache ─► backend    │
//! │                                                    │          │
//! │                           scoring + fingerprint ◄──┘          │
//! │                                   │                           │
//! │          IdentityStore::increment_scans, ResultSink           │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! Callers may bring their own backend credentials (BYOK). Those are kept
//! encrypted by the [`vault`] and decrypted for a single request; BYOK
//! requests count against a separate quota.
//!
//! ## Example
//!
//! ```rust,ignore
//! use prooflayer_node::{Verifier, VerifyCall, VerificationRequest};
//!
//! let verifier = Verifier::builder(identity, credentials, backends, sink)
//!     .platform_credentials(platform)
//!     .build();
//! let result = verifier
//!     .verify(VerifyCall {
//!         authorization: Some("Bearer pl_...".into()),
//!         request: VerificationRequest::text("Is this human?"),
//!     })
//!     .await?;
//! println!("trust score {}", result.trust_score);
//! ```

pub mod auth;
pub mod backend;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod limits;
pub mod orchestrator;
pub mod request;
pub mod scoring;
pub mod store;
pub mod types;
pub mod vault;

pub use config::ServiceConfig;
pub use error::{Error, ErrorBody, ErrorKind, Result};
pub use orchestrator::{CredentialCheck, Verifier, VerifierBuilder, VerifyCall};
pub use request::InboundRequest;
pub use types::{
    BackendKind, Caller, Content, ContentType, FundingMode, PlanTier, VerificationRequest,
    VerificationResult,
};
