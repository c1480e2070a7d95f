//! Admission gates: per-caller request rate and monthly scan quota.
//!
//! ```text
//! request ──► rate gate ──► quota pre-check ──► ... ──► analysis ok ──► atomic increment
//!              (window)       (read only)                               (store, conditional)
//! ```
//!
//! The rate gate is process-local. The quota counters live in the identity
//! store, which owns the atomic increment.

mod quota;
mod rate;

pub use quota::ensure_within_quota;
pub use rate::{InMemoryRateLimiter, RateDecision, RateLimiter};
