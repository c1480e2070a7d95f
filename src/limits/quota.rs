//! Monthly scan quota pre-check.
//!
//! This is the read-only gate that runs before any backend work. The charge
//! itself is the identity store's conditional increment, which re-checks the
//! limit atomically after a successful analysis.

use crate::error::{Error, Result};
use crate::types::{Caller, FundingMode};
use tracing::debug;

/// Reject the request if the counter for `mode` is at or over its limit.
///
/// # Errors
///
/// Returns [`Error::QuotaExceeded`] naming the exhausted quota.
pub fn ensure_within_quota(caller: &Caller, mode: FundingMode) -> Result<()> {
    let (used, limit) = caller.usage(mode);
    match limit {
        Some(limit) if used >= limit => {
            debug!("{mode} quota exhausted for {} ({used}/{limit})", caller.id);
            Err(Error::QuotaExceeded {
                quota: mode,
                used,
                limit,
            })
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::PlanTier;

    #[test]
    fn test_platform_exhausted_byok_open() {
        let mut caller = Caller::new("c1", PlanTier::Starter);
        caller.platform_scans_used = 500;

        let err = ensure_within_quota(&caller, FundingMode::Platform).unwrap_err();
        assert!(matches!(
            err,
            Error::QuotaExceeded {
                quota: FundingMode::Platform,
                used: 500,
                limit: 500
            }
        ));
        assert!(ensure_within_quota(&caller, FundingMode::Byok).is_ok());
    }

    #[test]
    fn test_one_below_limit_passes() {
        let mut caller = Caller::new("c1", PlanTier::Starter);
        caller.platform_scans_used = 499;
        assert!(ensure_within_quota(&caller, FundingMode::Platform).is_ok());
    }

    #[test]
    fn test_unbounded_byok() {
        let mut caller = Caller::new("c1", PlanTier::Enterprise);
        caller.byok_scans_used = u64::MAX;
        assert!(ensure_within_quota(&caller, FundingMode::Byok).is_ok());
    }

    #[test]
    fn test_byok_limit_enforced() {
        let mut caller = Caller::new("c1", PlanTier::Pro);
        caller.byok_scans_used = 25_000;
        let err = ensure_within_quota(&caller, FundingMode::Byok).unwrap_err();
        assert_eq!(err.to_body().quota, Some(FundingMode::Byok));
    }
}
