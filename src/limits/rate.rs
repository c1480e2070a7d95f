//! Fixed-window request rate limiting.

use crate::clock::{to_chrono, until, Clock};
use crate::config::RateLimitConfig;
use crate::error::{Error, Result};
use crate::types::PlanTier;
use chrono::{DateTime, Utc};
use futures::future::{self, BoxFuture};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// Outcome of an admitted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    /// Requests left in the current window.
    pub remaining: u32,
    /// When the current window closes.
    pub reset_at: DateTime<Utc>,
}

/// Per-caller request rate gate.
pub trait RateLimiter: Send + Sync {
    /// Count one request for `caller_id`.
    ///
    /// Fails with [`Error::RateLimited`] when the window is exhausted.
    fn check<'a>(&'a self, caller_id: &'a str, plan: PlanTier)
        -> BoxFuture<'a, Result<RateDecision>>;
}

#[derive(Debug, Clone, Copy)]
struct RateWindow {
    count: u32,
    reset_at: DateTime<Utc>,
}

/// Single-process fixed-window limiter.
///
/// Windows reset lazily on the next request after `reset_at`. A rejected
/// request does not count against the window.
pub struct InMemoryRateLimiter {
    windows: Mutex<HashMap<String, RateWindow>>,
    limits: RateLimitConfig,
    clock: Arc<dyn Clock>,
}

impl InMemoryRateLimiter {
    /// Create a limiter with per-plan limits.
    #[must_use]
    pub fn new(limits: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            limits,
            clock,
        }
    }

    fn admit(&self, caller_id: &str, plan: PlanTier) -> Result<RateDecision> {
        let limit = self.limits.for_plan(plan);
        let now = self.clock.now();

        let mut windows = self.windows.lock();
        let window = windows
            .entry(caller_id.to_string())
            .or_insert_with(|| RateWindow {
                count: 0,
                reset_at: now,
            });

        if window.count == 0 || now > window.reset_at {
            window.count = 0;
            window.reset_at = now + to_chrono(limit.window());
        }

        if window.count >= limit.max_requests {
            let reset_at = window.reset_at;
            debug!("Rate limit hit for {caller_id} ({plan}), window resets at {reset_at}");
            return Err(Error::RateLimited {
                reset_at,
                retry_after: until(now, reset_at),
            });
        }

        window.count += 1;
        Ok(RateDecision {
            remaining: limit.max_requests - window.count,
            reset_at: window.reset_at,
        })
    }

    /// Drop windows whose period has ended. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut windows = self.windows.lock();
        let before = windows.len();
        windows.retain(|_, w| now <= w.reset_at);
        before - windows.len()
    }

    /// Number of tracked windows.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.windows.lock().len()
    }

    /// Sweep expired windows every `every` until `shutdown_rx` turns true.
    pub fn spawn_cleanup(
        self: Arc<Self>,
        every: Duration,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        let removed = self.purge_expired();
                        if removed > 0 {
                            debug!("Purged {removed} expired rate window(s)");
                        }
                    }
                }
            }
            info!("Rate window cleanup stopped");
        })
    }
}

impl RateLimiter for InMemoryRateLimiter {
    fn check<'a>(
        &'a self,
        caller_id: &'a str,
        plan: PlanTier,
    ) -> BoxFuture<'a, Result<RateDecision>> {
        Box::pin(future::ready(self.admit(caller_id, plan)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::RateLimit;

    fn limiter(max: u32) -> (InMemoryRateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let mut limits = RateLimitConfig::default();
        limits.starter = RateLimit {
            max_requests: max,
            window_secs: 60,
        };
        (InMemoryRateLimiter::new(limits, clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_exactly_max_requests_pass() {
        let (limiter, clock) = limiter(3);
        for expected_remaining in [2, 1, 0] {
            let decision = limiter.check("c1", PlanTier::Starter).await.unwrap();
            assert_eq!(decision.remaining, expected_remaining);
        }

        let err = limiter.check("c1", PlanTier::Starter).await.unwrap_err();
        assert!(matches!(
            err,
            Error::RateLimited { reset_at, retry_after }
                if reset_at >= clock.now() && retry_after == Duration::from_secs(60)
        ));
    }

    #[tokio::test]
    async fn test_window_resets_after_period() {
        let (limiter, clock) = limiter(1);
        limiter.check("c1", PlanTier::Starter).await.unwrap();
        assert!(limiter.check("c1", PlanTier::Starter).await.is_err());

        clock.advance(Duration::from_secs(60));
        assert!(
            limiter.check("c1", PlanTier::Starter).await.is_err(),
            "window still open at reset_at"
        );

        clock.advance(Duration::from_millis(1));
        assert!(limiter.check("c1", PlanTier::Starter).await.is_ok());
    }

    #[tokio::test]
    async fn test_callers_are_independent() {
        let (limiter, _) = limiter(1);
        assert!(limiter.check("c1", PlanTier::Starter).await.is_ok());
        assert!(limiter.check("c2", PlanTier::Starter).await.is_ok());
        assert!(limiter.check("c1", PlanTier::Starter).await.is_err());
    }

    #[tokio::test]
    async fn test_plan_limits_apply() {
        let (limiter, _) = limiter(1);
        for _ in 0..100 {
            limiter.check("pro", PlanTier::Pro).await.unwrap();
        }
        assert!(limiter.check("pro", PlanTier::Pro).await.is_err());
    }

    #[tokio::test]
    async fn test_purge_keeps_open_windows() {
        let (limiter, clock) = limiter(5);
        limiter.check("old", PlanTier::Starter).await.unwrap();
        clock.advance(Duration::from_secs(45));
        limiter.check("new", PlanTier::Starter).await.unwrap();

        clock.advance(Duration::from_secs(20));
        assert_eq!(limiter.purge_expired(), 1);
        assert_eq!(limiter.tracked(), 1);

        // "new" keeps its count after the sweep
        for _ in 0..4 {
            limiter.check("new", PlanTier::Starter).await.unwrap();
        }
        assert!(limiter.check("new", PlanTier::Starter).await.is_err());
    }

    #[tokio::test]
    async fn test_cleanup_task_stops_on_shutdown() {
        let (limiter, _) = limiter(5);
        let (tx, rx) = watch::channel(false);
        let handle = Arc::new(limiter).spawn_cleanup(Duration::from_millis(10), rx);
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("cleanup task should stop")
            .unwrap();
    }
}
