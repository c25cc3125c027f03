//! Core rate limiter implementation.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::{debug, info, trace, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::LimiterConfig;

use super::bucket::TokenBucket;

/// The core rate limiter that manages one token bucket per client key.
///
/// This struct is thread-safe and can be shared across request-handling
/// threads behind an `Arc`. All state is volatile and rebuilt from zero on
/// process restart.
///
/// A bucket is created full on first sight of a key. Buckets idle for at
/// least the configured expiry window are evicted by a sweep that runs
/// opportunistically during checks; when an insert would push the store past
/// `max_entries`, expired buckets are purged and, if the store is still
/// full, the least-recently accessed bucket is displaced.
pub struct RateLimiter<C: Clock = SystemClock> {
    /// Token buckets indexed by client key
    store: RwLock<BucketStore>,
    /// Maximum tokens per bucket
    capacity: u32,
    /// Tokens credited back per refill period
    refill_tokens: u32,
    /// Interval between refills
    refill_period: Duration,
    /// Idle time before a bucket may be evicted
    expire_after_access: Duration,
    /// Soft cap on concurrently tracked keys
    max_entries: usize,
    /// Time source for refill and expiry math
    clock: C,
}

/// Bucket registry plus the sweep bookkeeping that travels with it under
/// the same lock.
struct BucketStore {
    buckets: HashMap<String, TokenBucket>,
    last_sweep: Instant,
}

impl RateLimiter<SystemClock> {
    /// Create a new rate limiter using the system clock.
    ///
    /// # Panics
    ///
    /// Panics if the configuration fails [`LimiterConfig::validate`]
    /// (a zero capacity, refill amount, period, expiry, or entry cap).
    pub fn new(config: &LimiterConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> RateLimiter<C> {
    /// Create a rate limiter with a custom [`Clock`].
    ///
    /// This is primarily useful for tests and deterministic scenarios.
    ///
    /// # Panics
    ///
    /// Panics if the configuration fails [`LimiterConfig::validate`].
    pub fn with_clock(config: &LimiterConfig, clock: C) -> Self {
        if let Err(e) = config.validate() {
            panic!("invalid rate limiter configuration: {}", e);
        }

        info!(
            capacity = config.capacity,
            refill_tokens = config.refill_tokens,
            refill_period_secs = config.refill_period_secs,
            expire_after_access_secs = config.expire_after_access_secs,
            max_entries = config.max_entries,
            "Rate limiter initialized"
        );

        let now = clock.now();
        Self {
            store: RwLock::new(BucketStore {
                buckets: HashMap::new(),
                last_sweep: now,
            }),
            capacity: config.capacity,
            refill_tokens: config.refill_tokens,
            refill_period: config.refill_period(),
            expire_after_access: config.expire_after_access(),
            max_entries: config.max_entries,
            clock,
        }
    }

    /// Decide whether a request for `key` is admitted.
    ///
    /// Fetches the key's bucket, creating a fresh full one if none exists,
    /// and attempts to consume a single token. Returns `true` to admit and
    /// `false` to reject; this operation never fails.
    pub fn allow_request(&self, key: &str) -> bool {
        let now = self.clock.now();
        let mut store = self.store.write();

        trace!(key = %key, "Checking rate limit");

        self.maybe_sweep(&mut store, now);

        if store.buckets.len() >= self.max_entries && !store.buckets.contains_key(key) {
            self.make_room(&mut store, now);
        }

        let bucket = store.buckets.entry(key.to_string()).or_insert_with(|| {
            debug!(key = %key, "Creating new rate limit bucket");
            TokenBucket::new(self.capacity, self.refill_tokens, self.refill_period, now)
        });

        let allowed = bucket.try_consume(now);
        if !allowed {
            warn!(key = %key, "Rate limit exceeded");
        }
        allowed
    }

    /// Remove the bucket for `key`, if present.
    ///
    /// Intended for "successful login clears the penalty" flows; a no-op
    /// for unknown keys.
    pub fn reset_limit(&self, key: &str) {
        let mut store = self.store.write();
        if store.buckets.remove(key).is_some() {
            debug!(key = %key, "Reset rate limit bucket");
        }
    }

    /// The number of live, non-expired buckets.
    ///
    /// Purges already-expired entries first so the count reflects evictions
    /// rather than a stale high-water mark.
    pub fn bucket_count(&self) -> usize {
        let now = self.clock.now();
        let mut store = self.store.write();
        self.purge_expired(&mut store, now);
        store.buckets.len()
    }

    /// Remove every tracked bucket immediately, regardless of idle time.
    ///
    /// Used for test isolation and operational resets.
    pub fn clear_all_buckets(&self) {
        let mut store = self.store.write();
        let count = store.buckets.len();
        store.buckets.clear();
        info!(count = count, "Cleared all rate limit buckets");
    }

    /// Run the idle-expiry sweep at most once per expiry window.
    fn maybe_sweep(&self, store: &mut BucketStore, now: Instant) {
        if now.saturating_duration_since(store.last_sweep) < self.expire_after_access {
            return;
        }
        self.purge_expired(store, now);
        store.last_sweep = now;
    }

    /// Drop every bucket idle for at least the expiry window.
    fn purge_expired(&self, store: &mut BucketStore, now: Instant) {
        let expire_after_access = self.expire_after_access;
        let before = store.buckets.len();
        store
            .buckets
            .retain(|_, bucket| bucket.idle_for(now) < expire_after_access);

        let evicted = before - store.buckets.len();
        if evicted > 0 {
            debug!(
                evicted = evicted,
                remaining = store.buckets.len(),
                "Evicted idle rate limit buckets"
            );
        }
    }

    /// Make room for one more bucket when the store is at capacity.
    fn make_room(&self, store: &mut BucketStore, now: Instant) {
        self.purge_expired(store, now);
        if store.buckets.len() < self.max_entries {
            return;
        }

        // Nothing expired: displace the bucket unused the longest.
        let oldest = store
            .buckets
            .iter()
            .max_by_key(|(_, bucket)| bucket.idle_for(now))
            .map(|(key, _)| key.clone());

        if let Some(key) = oldest {
            store.buckets.remove(&key);
            debug!(key = %key, "Displaced least-recently accessed rate limit bucket");
        }
    }
}

impl Default for RateLimiter<SystemClock> {
    fn default() -> Self {
        Self::new(&LimiterConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;

    fn test_config() -> LimiterConfig {
        LimiterConfig {
            capacity: 5,
            refill_tokens: 5,
            refill_period_secs: 60,
            expire_after_access_secs: 600,
            max_entries: 10_000,
        }
    }

    fn manual_limiter(config: &LimiterConfig) -> (RateLimiter<ManualClock>, ManualClock) {
        let clock = ManualClock::new();
        let limiter = RateLimiter::with_clock(config, clock.clone());
        (limiter, clock)
    }

    #[test]
    fn test_allows_requests_within_capacity() {
        let limiter = RateLimiter::new(&test_config());

        for i in 0..5 {
            assert!(
                limiter.allow_request("192.168.1.100"),
                "request {} should be admitted",
                i + 1
            );
        }
    }

    #[test]
    fn test_rejects_requests_beyond_capacity() {
        let limiter = RateLimiter::new(&test_config());

        for _ in 0..5 {
            limiter.allow_request("192.168.1.100");
        }

        assert!(!limiter.allow_request("192.168.1.100"));
    }

    #[test]
    fn test_keys_have_independent_buckets() {
        let limiter = RateLimiter::new(&test_config());

        for _ in 0..5 {
            limiter.allow_request("192.168.1.100");
        }
        assert!(!limiter.allow_request("192.168.1.100"));

        assert!(limiter.allow_request("192.168.1.101"));
    }

    #[test]
    fn test_reset_limit_clears_penalty() {
        let limiter = RateLimiter::new(&test_config());

        for _ in 0..5 {
            limiter.allow_request("192.168.1.100");
        }
        assert!(!limiter.allow_request("192.168.1.100"));

        limiter.reset_limit("192.168.1.100");

        assert!(limiter.allow_request("192.168.1.100"));
    }

    #[test]
    fn test_reset_limit_unknown_key_is_noop() {
        let limiter = RateLimiter::new(&test_config());
        limiter.reset_limit("never-seen");
        assert_eq!(limiter.bucket_count(), 0);
    }

    #[test]
    fn test_clear_all_buckets_resets_every_key() {
        let limiter = RateLimiter::new(&test_config());

        for key in ["client1", "client2", "client3"] {
            for _ in 0..6 {
                limiter.allow_request(key);
            }
            assert!(!limiter.allow_request(key));
        }

        limiter.clear_all_buckets();
        assert_eq!(limiter.bucket_count(), 0);

        for key in ["client1", "client2", "client3"] {
            assert!(limiter.allow_request(key));
        }
    }

    #[test]
    fn test_bucket_count_tracks_distinct_keys() {
        let limiter = RateLimiter::new(&test_config());
        assert_eq!(limiter.bucket_count(), 0);

        limiter.allow_request("client1");
        limiter.allow_request("client2");
        limiter.allow_request("client3");

        assert_eq!(limiter.bucket_count(), 3);
    }

    #[test]
    fn test_refill_after_full_period() {
        let (limiter, clock) = manual_limiter(&test_config());

        for _ in 0..5 {
            assert!(limiter.allow_request("client"));
        }
        assert!(!limiter.allow_request("client"));

        // Just short of a period: still rejected.
        clock.advance(Duration::from_secs(59));
        assert!(!limiter.allow_request("client"));

        // Crossing the period boundary refills the bucket.
        clock.advance(Duration::from_secs(2));
        assert!(limiter.allow_request("client"));
    }

    #[test]
    fn test_idle_bucket_never_accrues_past_capacity() {
        let (limiter, clock) = manual_limiter(&test_config());

        limiter.allow_request("client");

        // Idle across many refill periods, then one consume per token:
        // exactly capacity admissions, not capacity plus accrued credit.
        clock.advance(Duration::from_secs(60 * 100));
        for _ in 0..5 {
            assert!(limiter.allow_request("client"));
        }
        assert!(!limiter.allow_request("client"));
    }

    #[test]
    fn test_rewound_clock_is_harmless() {
        let (limiter, clock) = manual_limiter(&test_config());
        clock.advance(Duration::from_secs(3600));

        for _ in 0..5 {
            assert!(limiter.allow_request("client"));
        }

        clock.rewind(Duration::from_secs(120));
        assert!(!limiter.allow_request("client"));

        clock.advance(Duration::from_secs(120 + 61));
        assert!(limiter.allow_request("client"));
    }

    #[test]
    fn test_idle_buckets_expire() {
        let (limiter, clock) = manual_limiter(&test_config());

        limiter.allow_request("client1");
        limiter.allow_request("client2");
        assert_eq!(limiter.bucket_count(), 2);

        clock.advance(Duration::from_secs(601));
        assert_eq!(limiter.bucket_count(), 0);
    }

    #[test]
    fn test_sweep_runs_during_checks() {
        let (limiter, clock) = manual_limiter(&test_config());

        limiter.allow_request("stale");
        clock.advance(Duration::from_secs(601));

        // The check for a different key sweeps out the stale bucket.
        limiter.allow_request("fresh");

        let store = limiter.store.read();
        assert!(!store.buckets.contains_key("stale"));
        assert!(store.buckets.contains_key("fresh"));
    }

    #[test]
    fn test_recently_used_buckets_survive_sweep() {
        let (limiter, clock) = manual_limiter(&test_config());

        limiter.allow_request("client1");
        clock.advance(Duration::from_secs(599));

        // The check refreshes the access time.
        limiter.allow_request("client1");
        clock.advance(Duration::from_secs(300));

        assert_eq!(limiter.bucket_count(), 1);
    }

    #[test]
    fn test_store_never_exceeds_max_entries() {
        let config = LimiterConfig {
            max_entries: 3,
            ..test_config()
        };
        let (limiter, clock) = manual_limiter(&config);

        limiter.allow_request("a");
        clock.advance(Duration::from_secs(1));
        limiter.allow_request("b");
        clock.advance(Duration::from_secs(1));
        limiter.allow_request("c");
        clock.advance(Duration::from_secs(1));
        limiter.allow_request("d");

        assert_eq!(limiter.bucket_count(), 3);

        // "a" was the least-recently accessed and got displaced.
        let store = limiter.store.read();
        assert!(!store.buckets.contains_key("a"));
        assert!(store.buckets.contains_key("b"));
        assert!(store.buckets.contains_key("c"));
        assert!(store.buckets.contains_key("d"));
    }

    #[test]
    fn test_displaced_key_gets_fresh_bucket() {
        let config = LimiterConfig {
            capacity: 1,
            refill_tokens: 1,
            max_entries: 1,
            ..test_config()
        };
        let (limiter, clock) = manual_limiter(&config);

        assert!(limiter.allow_request("a"));
        assert!(!limiter.allow_request("a"));

        // "b" displaces "a"; a later check for "a" starts over with a
        // full bucket rather than resurrecting the exhausted one.
        clock.advance(Duration::from_secs(1));
        assert!(limiter.allow_request("b"));
        clock.advance(Duration::from_secs(1));
        assert!(limiter.allow_request("a"));
    }

    #[test]
    fn test_concurrent_callers_share_exact_capacity() {
        let config = LimiterConfig {
            capacity: 8,
            refill_tokens: 8,
            ..test_config()
        };
        let limiter = Arc::new(RateLimiter::new(&config));

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || limiter.allow_request("shared"))
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|handle| handle.join().expect("caller thread panicked"))
            .filter(|&allowed| allowed)
            .count();

        assert_eq!(admitted, 8);
    }

    #[test]
    fn test_concurrent_first_access_creates_one_bucket() {
        let limiter = Arc::new(RateLimiter::new(&test_config()));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || limiter.allow_request("fresh-key"))
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|handle| handle.join().expect("caller thread panicked"))
            .filter(|&allowed| allowed)
            .count();

        assert_eq!(admitted, 5);
        assert_eq!(limiter.bucket_count(), 1);
    }
}
