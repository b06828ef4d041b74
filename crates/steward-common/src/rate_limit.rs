// Copyright 2025 Steward Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Rate Limiting for governance policies
//!
//! Every rate-limit policy owns a token bucket; a policy that groups callers
//! by profile owns one bucket per `(policy, profile)` pair instead.
//!
//! # Algorithm
//!
//! Buckets are kept as a single atomic "theoretical arrival time" (TAT), the
//! generic cell rate formulation of a token bucket. Each admitted request
//! pushes the TAT one emission interval forward; a request is denied when
//! that would put the TAT further than `capacity` intervals ahead of now.
//! Refill therefore happens implicitly at acquisition time and an
//! acquisition is a single compare-and-swap loop with no lock.
//!
//! # Memory
//!
//! Profile buckets are created lazily. Entries idle for longer than the
//! configured TTL are pruned opportunistically by whichever caller first
//! notices the cleanup interval has elapsed.
//!
//! # Example
//!
//! ```
//! use steward_common::rate_limit::{RateLimitConfig, RateLimiter};
//!
//! let limiter = RateLimiter::new(1000.0);
//! limiter.register("checkout", RateLimitConfig::new(5.0, 5));
//!
//! for _ in 0..5 {
//!     assert!(limiter.try_acquire("checkout").is_allowed());
//! }
//! assert!(!limiter.try_acquire("checkout").is_allowed());
//! ```

use crate::clock::{Clock, SystemClock};
use arc_swap::ArcSwap;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const NANOS_PER_SEC: f64 = 1_000_000_000.0;

/// Default sustained rate for policies that do not configure one.
pub const DEFAULT_RATE: f64 = 1000.0;

/// Default idle time after which a profile bucket is forgotten.
pub const DEFAULT_PROFILE_TTL: Duration = Duration::from_secs(300);

/// Bucket parameters.
///
/// # Fields
///
/// * `rate` - Sustained refill rate in tokens per second
/// * `capacity` - Maximum number of tokens the bucket holds (burst size)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RateLimitConfig {
    pub rate: f64,
    pub capacity: u64,
}

impl RateLimitConfig {
    pub fn new(rate: f64, capacity: u64) -> Self {
        Self { rate, capacity }
    }

    /// Creates a configuration whose burst equals one second of traffic.
    ///
    /// # Example
    ///
    /// ```
    /// use steward_common::rate_limit::RateLimitConfig;
    ///
    /// let config = RateLimitConfig::per_second(10.0);
    /// assert_eq!(config.capacity, 10);
    /// ```
    pub fn per_second(rate: f64) -> Self {
        let capacity = rate.ceil().max(1.0) as u64;
        Self::new(rate, capacity)
    }

    fn interval_nanos(&self) -> u64 {
        if self.rate <= 0.0 {
            return u64::MAX;
        }
        (NANOS_PER_SEC / self.rate).round().max(1.0) as u64
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::per_second(DEFAULT_RATE)
    }
}

/// Result of a rate limit check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RateLimitResult {
    Allowed,
    RateLimited {
        /// Time until the next request will be allowed
        retry_after: Duration,
    },
}

impl RateLimitResult {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Allowed => None,
            Self::RateLimited { retry_after } => Some(*retry_after),
        }
    }
}

/// Lock-free token bucket.
#[derive(Debug)]
pub struct TokenBucket {
    config: RateLimitConfig,
    interval: u64,
    tolerance: u64,
    /// Theoretical arrival time in clock nanoseconds
    tat: AtomicU64,
    last_seen: AtomicU64,
}

impl TokenBucket {
    /// Creates a bucket that starts full.
    pub fn new(config: RateLimitConfig) -> Self {
        let interval = config.interval_nanos();
        let tolerance = interval.saturating_mul(config.capacity.max(1));
        Self {
            config,
            interval,
            tolerance,
            tat: AtomicU64::new(0),
            last_seen: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    /// Attempts to take one token at time `now` (clock nanoseconds).
    pub fn try_acquire(&self, now: u64) -> RateLimitResult {
        self.last_seen.fetch_max(now, Ordering::Relaxed);
        let mut current = self.tat.load(Ordering::Acquire);
        loop {
            let start = current.max(now);
            let next = start.saturating_add(self.interval);
            let ahead = next - now;
            if ahead > self.tolerance {
                let retry_after = Duration::from_nanos(ahead - self.tolerance);
                return RateLimitResult::RateLimited { retry_after };
            }
            match self
                .tat
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return RateLimitResult::Allowed,
                Err(actual) => current = actual,
            }
        }
    }

    fn idle_for(&self, now: u64) -> u64 {
        now.saturating_sub(self.last_seen.load(Ordering::Relaxed))
    }
}

/// Per-policy and per-profile rate limiter.
///
/// # Thread Safety
///
/// Policy buckets live in an immutable map behind an [`ArcSwap`]; looking one
/// up never blocks. Profile buckets live in a [`DashMap`] and are created on
/// first use.
pub struct RateLimiter {
    default_config: RateLimitConfig,
    policies: ArcSwap<HashMap<String, Arc<TokenBucket>>>,
    profiles: DashMap<(String, String), Arc<TokenBucket>>,
    clock: Arc<dyn Clock>,
    profile_ttl: Duration,
    cleanup_interval: Duration,
    last_cleanup: AtomicU64,
}

impl RateLimiter {
    /// Creates a limiter whose unregistered policies refill at `default_rate`.
    pub fn new(default_rate: f64) -> Self {
        Self::with_clock(default_rate, DEFAULT_PROFILE_TTL, Arc::new(SystemClock::new()))
    }

    /// Creates a limiter reading time from `clock`.
    ///
    /// # Arguments
    ///
    /// * `default_rate` - Rate for policies acquired without registration
    /// * `profile_ttl` - Idle time after which a profile bucket is pruned
    /// * `clock` - Time source for refill and pruning
    pub fn with_clock(default_rate: f64, profile_ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            default_config: RateLimitConfig::per_second(default_rate),
            policies: ArcSwap::from_pointee(HashMap::new()),
            profiles: DashMap::new(),
            clock,
            profile_ttl,
            cleanup_interval: profile_ttl / 5,
            last_cleanup: AtomicU64::new(0),
        }
    }

    /// Installs (or replaces) the bucket of `policy`.
    ///
    /// Replacing a policy resets its bucket and forgets its profile buckets.
    pub fn register(&self, policy: &str, config: RateLimitConfig) {
        let bucket = Arc::new(TokenBucket::new(config));
        self.policies.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(policy.to_string(), bucket.clone());
            next
        });
        self.profiles.retain(|(name, _), _| name != policy);
        debug!(
            "Registered rate limit for policy {}: {} tokens/s, capacity {}",
            policy, config.rate, config.capacity
        );
    }

    /// Takes one token from the bucket of `policy`.
    ///
    /// A policy that was never registered gets a bucket with the default rate.
    pub fn try_acquire(&self, policy: &str) -> RateLimitResult {
        let bucket = self.policy_bucket(policy);
        bucket.try_acquire(self.clock.now_nanos())
    }

    /// Takes one token from the bucket of `(policy, profile)`.
    ///
    /// The profile bucket is created on first use with the parameters of the
    /// policy bucket.
    pub fn try_acquire_for(&self, policy: &str, profile: &str) -> RateLimitResult {
        let now = self.clock.now_nanos();
        self.maybe_cleanup(now);

        let key = (policy.to_string(), profile.to_string());
        let bucket = match self.profiles.get(&key) {
            Some(bucket) => bucket.clone(),
            None => {
                let config = self.policy_bucket(policy).config();
                self.profiles
                    .entry(key)
                    .or_insert_with(|| Arc::new(TokenBucket::new(config)))
                    .clone()
            }
        };
        bucket.try_acquire(now)
    }

    /// Number of profile buckets currently tracked.
    pub fn tracked_bucket_count(&self) -> usize {
        self.profiles.len()
    }

    pub fn policy_count(&self) -> usize {
        self.policies.load().len()
    }

    fn policy_bucket(&self, policy: &str) -> Arc<TokenBucket> {
        if let Some(bucket) = self.policies.load().get(policy) {
            return bucket.clone();
        }
        let default_config = self.default_config;
        self.policies.rcu(|current| {
            if current.contains_key(policy) {
                return HashMap::clone(current);
            }
            let mut next = HashMap::clone(current);
            next.insert(
                policy.to_string(),
                Arc::new(TokenBucket::new(default_config)),
            );
            next
        });
        match self.policies.load().get(policy) {
            Some(bucket) => bucket.clone(),
            None => Arc::new(TokenBucket::new(default_config)),
        }
    }

    fn maybe_cleanup(&self, now: u64) {
        let interval = self.cleanup_interval.as_nanos() as u64;
        let last = self.last_cleanup.load(Ordering::Relaxed);
        if now.saturating_sub(last) < interval {
            return;
        }
        // only the caller that moves the mark performs the sweep
        if self
            .last_cleanup
            .compare_exchange(last, now, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            return;
        }
        let ttl = self.profile_ttl.as_nanos() as u64;
        let before = self.profiles.len();
        self.profiles.retain(|_, bucket| bucket.idle_for(now) < ttl);
        let pruned = before.saturating_sub(self.profiles.len());
        if pruned > 0 {
            debug!("Pruned {} idle profile buckets", pruned);
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_RATE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn limiter_with_clock() -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let limiter = RateLimiter::with_clock(DEFAULT_RATE, Duration::from_secs(10), clock.clone());
        (limiter, clock)
    }

    #[test]
    fn test_rate_limit_config_per_second() {
        let config = RateLimitConfig::per_second(10.0);
        assert_eq!(config.rate, 10.0);
        assert_eq!(config.capacity, 10);
    }

    #[test]
    fn test_rate_limit_config_default() {
        let config = RateLimitConfig::default();
        assert_eq!(config.rate, 1000.0);
        assert_eq!(config.capacity, 1000);
    }

    #[test]
    fn test_five_per_second_bucket() {
        let (limiter, clock) = limiter_with_clock();
        limiter.register("p", RateLimitConfig::new(5.0, 5));

        for _ in 0..5 {
            assert!(limiter.try_acquire("p").is_allowed());
        }
        let denied = limiter.try_acquire("p");
        assert!(!denied.is_allowed());
        assert_eq!(denied.retry_after(), Some(Duration::from_millis(200)));

        clock.advance(Duration::from_millis(200));
        assert!(limiter.try_acquire("p").is_allowed());
        assert!(!limiter.try_acquire("p").is_allowed());
    }

    #[test]
    fn test_refill_is_capped_at_capacity() {
        let (limiter, clock) = limiter_with_clock();
        limiter.register("p", RateLimitConfig::new(5.0, 5));

        clock.advance(Duration::from_secs(60));
        let allowed = (0..20).filter(|_| limiter.try_acquire("p").is_allowed()).count();
        assert_eq!(allowed, 5);
    }

    #[test]
    fn test_unregistered_policy_uses_default_rate() {
        let (limiter, _clock) = limiter_with_clock();
        let allowed = (0..1200)
            .filter(|_| limiter.try_acquire("unknown").is_allowed())
            .count();
        assert_eq!(allowed, 1000);
        assert_eq!(limiter.policy_count(), 1);
    }

    #[test]
    fn test_profiles_have_separate_buckets() {
        let (limiter, _clock) = limiter_with_clock();
        limiter.register("tenant", RateLimitConfig::new(2.0, 2));

        for _ in 0..2 {
            assert!(limiter.try_acquire_for("tenant", "acme").is_allowed());
            assert!(limiter.try_acquire_for("tenant", "globex").is_allowed());
        }
        assert!(!limiter.try_acquire_for("tenant", "acme").is_allowed());
        assert!(!limiter.try_acquire_for("tenant", "globex").is_allowed());
        assert_eq!(limiter.tracked_bucket_count(), 2);

        // the shared policy bucket is untouched by profile traffic
        assert!(limiter.try_acquire("tenant").is_allowed());
    }

    #[test]
    fn test_idle_profiles_are_pruned() {
        let (limiter, clock) = limiter_with_clock();
        limiter.register("tenant", RateLimitConfig::new(2.0, 2));

        limiter.try_acquire_for("tenant", "acme");
        clock.advance(Duration::from_secs(5));
        limiter.try_acquire_for("tenant", "globex");
        assert_eq!(limiter.tracked_bucket_count(), 2);

        clock.advance(Duration::from_secs(6));
        limiter.try_acquire_for("tenant", "globex");
        assert_eq!(limiter.tracked_bucket_count(), 1);
    }

    #[test]
    fn test_register_resets_profiles() {
        let (limiter, _clock) = limiter_with_clock();
        limiter.register("tenant", RateLimitConfig::new(1.0, 1));
        limiter.try_acquire_for("tenant", "acme");
        assert_eq!(limiter.tracked_bucket_count(), 1);

        limiter.register("tenant", RateLimitConfig::new(1.0, 1));
        assert_eq!(limiter.tracked_bucket_count(), 0);
        assert!(limiter.try_acquire_for("tenant", "acme").is_allowed());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_acquire_never_exceeds_capacity() {
        let clock = Arc::new(ManualClock::new());
        let limiter = Arc::new(RateLimiter::with_clock(
            DEFAULT_RATE,
            DEFAULT_PROFILE_TTL,
            clock,
        ));
        limiter.register("p", RateLimitConfig::new(10.0, 50));

        let mut join_set = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let limiter = limiter.clone();
            join_set.spawn(async move {
                (0..100)
                    .filter(|_| limiter.try_acquire("p").is_allowed())
                    .count()
            });
        }

        let mut allowed = 0;
        while let Some(result) = join_set.join_next().await {
            allowed += result.unwrap();
        }
        assert_eq!(allowed, 50);
    }
}
