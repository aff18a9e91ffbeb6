//! # Rate Limiter
//!
//! Fixed-window request budgeting. Each client key owns a window record
//! holding the window start and a counter; the counter resets when `now`
//! crosses the window boundary. Over-budget requests are denied with the
//! time until the window resets, so a denied client sees the same answer
//! for the remainder of the window rather than a fractional backoff.
//!
//! The client key is the authenticated subject id when identity is
//! available and the client network address otherwise, so co-located
//! authenticated users never share one budget.
//!
//! Storage sits behind [`RateLimitStore`]; the in-memory implementation
//! keeps its check-then-act sequence under the `DashMap` entry guard,
//! making each decision atomic with respect to concurrent requests for
//! the same key.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::auth::gate::ResolvedIdentity;
use crate::core::config::RateLimitConfig;
use crate::core::types::RequestDescriptor;

/// Windows idle for this many window lengths are evicted by the sweeper.
const IDLE_WINDOW_MULTIPLIER: u32 = 4;

/// Outcome of one budget check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// The configured ceiling, surfaced as `x-ratelimit-limit`.
    pub limit: u32,
    /// Requests left in the current window, surfaced as
    /// `x-ratelimit-remaining`.
    pub remaining: u32,
    /// Time until the window resets; present only on denial.
    pub retry_after: Option<Duration>,
}

/// Storage backend for window records.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Check and consume budget for `key`. The caller supplies `now` so
    /// decisions are reproducible under test.
    async fn check(&self, key: &str, limit: u32, window: Duration, now: Instant)
        -> RateLimitDecision;

    /// Drop windows idle longer than `max_idle`, returning how many were
    /// evicted.
    async fn sweep(&self, now: Instant, max_idle: Duration) -> usize;
}

#[derive(Debug, Clone, Copy)]
struct WindowState {
    window_start: Instant,
    count: u32,
}

/// `DashMap`-backed window storage.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    windows: DashMap<String, WindowState>,
}

#[async_trait]
impl RateLimitStore for InMemoryStore {
    async fn check(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
        now: Instant,
    ) -> RateLimitDecision {
        // The entry guard holds the shard lock for the whole reset/increment
        // sequence.
        let mut state = self
            .windows
            .entry(key.to_string())
            .or_insert(WindowState {
                window_start: now,
                count: 0,
            });

        if now.saturating_duration_since(state.window_start) >= window {
            state.window_start = now;
            state.count = 0;
        }

        if state.count < limit {
            state.count += 1;
            RateLimitDecision {
                allowed: true,
                limit,
                remaining: limit - state.count,
                retry_after: None,
            }
        } else {
            let elapsed = now.saturating_duration_since(state.window_start);
            RateLimitDecision {
                allowed: false,
                limit,
                remaining: 0,
                retry_after: Some(window.saturating_sub(elapsed)),
            }
        }
    }

    async fn sweep(&self, now: Instant, max_idle: Duration) -> usize {
        let before = self.windows.len();
        self.windows
            .retain(|_, state| now.saturating_duration_since(state.window_start) <= max_idle);
        before - self.windows.len()
    }
}

/// The budget key for a request: subject id when authenticated, network
/// address otherwise. Prefixes keep the two namespaces disjoint so a
/// crafted subject can never collide with an address key.
pub fn client_key(identity: &ResolvedIdentity, descriptor: &RequestDescriptor) -> String {
    match identity.subject() {
        Some(subject) => format!("sub:{}", subject),
        None => format!("ip:{}", descriptor.client_addr.ip()),
    }
}

/// Configured limiter facade over a store.
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    limit: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self::with_store(
            Arc::new(InMemoryStore::default()),
            config.max_requests,
            config.window,
        )
    }

    pub fn with_store(store: Arc<dyn RateLimitStore>, limit: u32, window: Duration) -> Self {
        Self {
            store,
            limit,
            window,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Check and consume budget for one request.
    pub async fn allow(&self, client_key: &str, now: Instant) -> RateLimitDecision {
        let decision = self.store.check(client_key, self.limit, self.window, now).await;
        if !decision.allowed {
            warn!(client_key, limit = self.limit, "rate limit exceeded");
        }
        decision
    }

    /// Spawn the background task that evicts idle windows, keeping the key
    /// map bounded. The task runs for the life of the process; dropping the
    /// handle detaches it.
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let max_idle = self.window * IDLE_WINDOW_MULTIPLIER;
        let period = self.window.max(Duration::from_secs(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let evicted = store.sweep(Instant::now(), max_idle).await;
                if evicted > 0 {
                    debug!(evicted, "evicted idle rate limit windows");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Claims, Plan, Role};
    use axum::http::{Method, Uri};
    use chrono::Utc;

    const WINDOW: Duration = Duration::from_millis(1000);

    fn limiter(limit: u32) -> RateLimiter {
        RateLimiter::with_store(Arc::new(InMemoryStore::default()), limit, WINDOW)
    }

    #[tokio::test]
    async fn budget_is_consumed_then_denied_then_restored() {
        let limiter = limiter(5);
        let start = Instant::now();

        for expected_remaining in (0..5).rev() {
            let decision = limiter.allow("sub:user-1", start).await;
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected_remaining);
            assert_eq!(decision.limit, 5);
        }

        let denied = limiter.allow("sub:user-1", start).await;
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.retry_after, Some(WINDOW));

        // One full window later the budget is fresh.
        let after_reset = limiter.allow("sub:user-1", start + WINDOW).await;
        assert!(after_reset.allowed);
        assert_eq!(after_reset.remaining, 4);
    }

    #[tokio::test]
    async fn denial_is_deterministic_until_the_window_resets() {
        let limiter = limiter(1);
        let start = Instant::now();

        assert!(limiter.allow("sub:user-2", start).await.allowed);

        let mid_window = start + Duration::from_millis(300);
        let denied = limiter.allow("sub:user-2", mid_window).await;
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after, Some(Duration::from_millis(700)));

        // Re-asking at the same instant yields the identical answer.
        let again = limiter.allow("sub:user-2", mid_window).await;
        assert_eq!(again, denied);

        let late = limiter.allow("sub:user-2", start + Duration::from_millis(999)).await;
        assert_eq!(late.retry_after, Some(Duration::from_millis(1)));
    }

    #[tokio::test]
    async fn keys_have_independent_budgets() {
        let limiter = limiter(1);
        let now = Instant::now();

        assert!(limiter.allow("sub:user-3", now).await.allowed);
        assert!(!limiter.allow("sub:user-3", now).await.allowed);
        assert!(limiter.allow("ip:203.0.113.7", now).await.allowed);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_requests_never_exceed_the_ceiling() {
        let limiter = Arc::new(limiter(10));
        let now = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..25 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                limiter.allow("sub:busy-user", now).await.allowed
            }));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 10);
    }

    #[tokio::test]
    async fn sweep_evicts_only_idle_windows() {
        let store = InMemoryStore::default();
        let t0 = Instant::now();

        store.check("stale", 5, WINDOW, t0).await;
        store.check("active", 1, WINDOW, t0 + WINDOW * 4).await;

        let evicted = store.sweep(t0 + WINDOW * 4 + WINDOW / 2, WINDOW * 4).await;
        assert_eq!(evicted, 1);

        // The stale key starts a fresh window; the active one still holds
        // its consumed budget.
        let now = t0 + WINDOW * 4 + WINDOW * 3 / 4;
        assert!(store.check("stale", 1, WINDOW, now).await.allowed);
        assert!(!store.check("active", 1, WINDOW, now).await.allowed);
    }

    #[test]
    fn client_key_prefers_subject_over_address() {
        let uri: Uri = "/api/content".parse().unwrap();
        let descriptor =
            RequestDescriptor::new(Method::GET, &uri, "203.0.113.9:55001".parse().unwrap());

        let now = Utc::now();
        let identity = ResolvedIdentity::Verified(Claims {
            sub: "user-7".to_string(),
            email: "seven@example.com".to_string(),
            role: Role::User,
            plan: Plan::Free,
            iat: now.timestamp(),
            exp: now.timestamp() + 600,
        });
        assert_eq!(client_key(&identity, &descriptor), "sub:user-7");

        assert_eq!(
            client_key(&ResolvedIdentity::Anonymous, &descriptor),
            "ip:203.0.113.9"
        );
    }
}
