//! Dual-tier admission controller.
//!
//! Every decision charges a shared global bucket first and the caller's own
//! bucket second. Both buckets live behind one mutex, so decisions are fully
//! serialized and the janitor sweep sees a consistent map.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::trace;

use crate::clock::{Clock, SystemClock};
use crate::config::LimiterConfig;
use crate::error::ConfigError;
use crate::janitor::Janitor;
use crate::token_bucket::TokenBucket;

/// Per-client plus global token-bucket rate limiter.
///
/// Cloning is cheap and clones share state.
pub struct RateLimiter<C: Clock = SystemClock> {
    inner: Arc<Inner<C>>,
}

struct Inner<C> {
    config: LimiterConfig,
    clock: C,
    state: Mutex<State>,
}

struct State {
    clients: HashMap<String, TokenBucket>,
    global: TokenBucket,
}

/// Point-in-time view of the limiter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LimiterStats {
    pub tracked_clients: usize,
    pub global_tokens_available: u64,
    pub ip_rate: f64,
    pub ip_burst: u32,
    pub global_rate: f64,
    pub global_burst: u32,
    pub sweep_interval_secs: u64,
}

impl<C: Clock> Clone for RateLimiter<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl RateLimiter<SystemClock> {
    pub fn new(config: LimiterConfig) -> Result<Self, ConfigError> {
        Self::with_clock(config, SystemClock)
    }

    /// Build a limiter and spawn its janitor on the current Tokio runtime.
    pub fn start(config: LimiterConfig) -> Result<(Self, Janitor), ConfigError> {
        let limiter = Self::new(config)?;
        let janitor = Janitor::spawn(limiter.clone());
        Ok((limiter, janitor))
    }
}

impl<C: Clock> RateLimiter<C> {
    pub fn with_clock(config: LimiterConfig, clock: C) -> Result<Self, ConfigError> {
        let config = config.validated()?;
        let global = TokenBucket::new(config.global_burst, config.global_rate, clock.now());

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                clock,
                state: Mutex::new(State {
                    clients: HashMap::new(),
                    global,
                }),
            }),
        })
    }

    pub fn config(&self) -> &LimiterConfig {
        &self.inner.config
    }

    /// Decide whether a request from `client_id` is admitted.
    ///
    /// The global bucket is checked and charged before the client bucket is
    /// looked at. A request the client bucket then rejects keeps its global
    /// charge.
    pub fn allow(&self, client_id: &str) -> bool {
        let mut state = self.lock();
        let now = self.inner.clock.now();

        state.global.refill(now);
        if !state.global.try_take() {
            trace!(client_id, "global budget exhausted");
            return false;
        }

        if let Some(bucket) = state.clients.get_mut(client_id) {
            bucket.refill(now);
            return take_client_token(bucket, client_id);
        }

        let config = &self.inner.config;
        let mut bucket = TokenBucket::new(config.ip_burst, config.ip_rate, now);
        let allowed = take_client_token(&mut bucket, client_id);
        state.clients.insert(client_id.to_string(), bucket);
        allowed
    }

    /// Evict idle client buckets.
    ///
    /// A bucket goes when its balance, refilled to now, is at capacity and it
    /// has not been touched for a full sweep interval. Returns how many were
    /// removed.
    pub fn sweep(&self) -> usize {
        let mut state = self.lock();
        let now = self.inner.clock.now();
        let idle_after = self.inner.config.sweep_interval;

        let before = state.clients.len();
        state.clients.retain(|_, bucket| {
            let idle = now.saturating_duration_since(bucket.last_refill()) > idle_after;
            !(idle && bucket.is_full_at(now))
        });

        before - state.clients.len()
    }

    pub fn stats(&self) -> LimiterStats {
        let state = self.lock();
        let now = self.inner.clock.now();
        let config = &self.inner.config;

        LimiterStats {
            tracked_clients: state.clients.len(),
            global_tokens_available: state.global.projected_tokens(now).floor() as u64,
            ip_rate: config.ip_rate,
            ip_burst: config.ip_burst,
            global_rate: config.global_rate,
            global_burst: config.global_burst,
            sweep_interval_secs: config.sweep_interval.as_secs(),
        }
    }

    pub fn tracked_clients(&self) -> usize {
        self.lock().clients.len()
    }

    /// Bucket balance for `client_id` as last recorded, if tracked.
    pub fn client_tokens(&self, client_id: &str) -> Option<f64> {
        self.lock().clients.get(client_id).map(TokenBucket::tokens)
    }

    pub fn global_tokens(&self) -> f64 {
        self.lock().global.tokens()
    }

    // The guarded state is plain numbers that are never left half-updated,
    // so a panic in another holder does not invalidate it.
    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn take_client_token(bucket: &mut TokenBucket, client_id: &str) -> bool {
    let allowed = bucket.try_take();
    if !allowed {
        trace!(client_id, "client budget exhausted");
    }
    allowed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::time::Duration;

    fn limiter(
        ip_rate: f64,
        ip_burst: u32,
        global_rate: f64,
        global_burst: u32,
    ) -> (RateLimiter<ManualClock>, ManualClock) {
        let clock = ManualClock::new();
        let config = LimiterConfig::new(ip_rate, ip_burst, global_rate, global_burst);
        let limiter = RateLimiter::with_clock(config, clock.clone()).unwrap();
        (limiter, clock)
    }

    #[test]
    fn test_burst_then_reject_then_refill() {
        let (limiter, clock) = limiter(1.0, 2, 100.0, 100);

        assert!(limiter.allow("1.1.1.1"));
        assert!(limiter.allow("1.1.1.1"));
        assert!(!limiter.allow("1.1.1.1"));

        clock.advance(Duration::from_secs(1));
        assert!(limiter.allow("1.1.1.1"));
        assert!(!limiter.allow("1.1.1.1"));
    }

    #[test]
    fn test_exact_burst_admission() {
        let (limiter, _clock) = limiter(1.0, 7, 1000.0, 1000);

        let admitted = (0..8).filter(|_| limiter.allow("client")).count();
        assert_eq!(admitted, 7);
    }

    #[test]
    fn test_refill_restores_exactly_one_token() {
        let (limiter, clock) = limiter(4.0, 3, 1000.0, 1000);
        for _ in 0..3 {
            assert!(limiter.allow("c"));
        }
        assert!(!limiter.allow("c"));

        clock.advance(Duration::from_millis(250));
        assert!(limiter.allow("c"));
        assert!(!limiter.allow("c"));
    }

    #[test]
    fn test_global_exhaustion_rejects_new_client() {
        let (limiter, _clock) = limiter(10.0, 10, 1.0, 1);

        assert!(limiter.allow("a"));
        assert!(!limiter.allow("b"));
        assert_eq!(limiter.client_tokens("b"), None);
        assert_eq!(limiter.tracked_clients(), 1);
    }

    #[test]
    fn test_clients_are_independent() {
        let (limiter, _clock) = limiter(1.0, 2, 100.0, 100);

        assert!(limiter.allow("a"));
        assert!(limiter.allow("a"));
        assert!(!limiter.allow("a"));

        assert!(limiter.allow("b"));
        assert!(limiter.allow("b"));
    }

    #[test]
    fn test_global_charge_kept_on_client_rejection() {
        let (limiter, _clock) = limiter(1.0, 1, 1.0, 10);

        assert!(limiter.allow("a"));
        assert_eq!(limiter.global_tokens(), 9.0);

        assert!(!limiter.allow("a"));
        assert!(!limiter.allow("a"));
        assert_eq!(limiter.global_tokens(), 7.0);
    }

    #[test]
    fn test_rejected_client_storm_drains_global_budget() {
        let (limiter, _clock) = limiter(1.0, 1, 1.0, 5);

        assert!(limiter.allow("noisy"));
        for _ in 0..4 {
            assert!(!limiter.allow("noisy"));
        }
        assert!(!limiter.allow("quiet"));
    }

    #[test]
    fn test_tokens_stay_within_bounds() {
        let (limiter, clock) = limiter(3.0, 4, 50.0, 20);

        for step in 0..200u64 {
            let client = format!("client-{}", step % 5);
            limiter.allow(&client);
            if step % 7 == 0 {
                clock.advance(Duration::from_millis(130));
            }

            let global = limiter.global_tokens();
            assert!((0.0..=20.0).contains(&global));
            let tokens = limiter.client_tokens(&client);
            if let Some(tokens) = tokens {
                assert!((0.0..=4.0).contains(&tokens));
            }
        }

        clock.advance(Duration::from_secs(3600));
        limiter.allow("client-0");
        assert!(limiter.client_tokens("client-0").unwrap() <= 4.0);
        assert!(limiter.global_tokens() <= 20.0);
    }

    #[test]
    fn test_sweep_evicts_idle_full_buckets() {
        let clock = ManualClock::new();
        let config = LimiterConfig::new(1.0, 2, 100.0, 100)
            .with_sweep_interval(Duration::from_secs(60));
        let limiter = RateLimiter::with_clock(config, clock.clone()).unwrap();

        limiter.allow("idle");
        clock.advance(Duration::from_secs(61));

        assert_eq!(limiter.sweep(), 1);
        assert_eq!(limiter.tracked_clients(), 0);
    }

    #[test]
    fn test_sweep_keeps_recent_buckets() {
        let clock = ManualClock::new();
        let config = LimiterConfig::new(1.0, 2, 100.0, 100)
            .with_sweep_interval(Duration::from_secs(60));
        let limiter = RateLimiter::with_clock(config, clock.clone()).unwrap();

        limiter.allow("recent");
        clock.advance(Duration::from_secs(30));

        assert_eq!(limiter.sweep(), 0);
        assert_eq!(limiter.tracked_clients(), 1);
    }

    #[test]
    fn test_sweep_never_evicts_non_full_bucket() {
        let clock = ManualClock::new();
        // A drained bucket needs 1000s to recover.
        let config = LimiterConfig::new(0.001, 1, 100.0, 100)
            .with_sweep_interval(Duration::from_secs(60));
        let limiter = RateLimiter::with_clock(config, clock.clone()).unwrap();

        limiter.allow("slow");
        for _ in 0..10 {
            clock.advance(Duration::from_secs(90));
            assert_eq!(limiter.sweep(), 0);
        }
        assert_eq!(limiter.tracked_clients(), 1);

        clock.advance(Duration::from_secs(200));
        assert_eq!(limiter.sweep(), 1);
    }

    #[test]
    fn test_sweep_does_not_touch_kept_buckets() {
        let clock = ManualClock::new();
        let config = LimiterConfig::new(0.001, 2, 100.0, 100)
            .with_sweep_interval(Duration::from_secs(60));
        let limiter = RateLimiter::with_clock(config, clock.clone()).unwrap();

        limiter.allow("c");
        clock.advance(Duration::from_secs(120));
        limiter.sweep();

        assert_eq!(limiter.client_tokens("c"), Some(1.0));
    }

    #[test]
    fn test_stats_snapshot() {
        let (limiter, _clock) = limiter(1.0, 2, 100.0, 100);
        limiter.allow("a");
        limiter.allow("b");

        let stats = limiter.stats();
        assert_eq!(stats.tracked_clients, 2);
        assert_eq!(stats.global_tokens_available, 98);
        assert_eq!(stats.ip_burst, 2);
        assert_eq!(stats.sweep_interval_secs, 600);
    }

    #[test]
    fn test_invalid_config_fails_fast() {
        let result = RateLimiter::new(LimiterConfig::new(1.0, 0, 1.0, 1));
        assert!(result.is_err());
    }

    #[test]
    fn test_concurrent_allow_respects_global_ceiling() {
        let limiter = RateLimiter::with_clock(
            LimiterConfig::new(1.0, 1000, 0.001, 500),
            ManualClock::new(),
        )
        .unwrap();

        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let limiter = limiter.clone();
                std::thread::spawn(move || {
                    let client = format!("worker-{worker}");
                    (0..200).filter(|_| limiter.allow(&client)).count()
                })
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 500);
    }
}
