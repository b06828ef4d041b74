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

use crate::snapshot::{LatencySummary, MetricsSnapshot, ServiceMetrics};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use steward_common::AlarmType;

const NUM_HISTOGRAM_BINS: usize = 100;

/// Logarithmic latency histogram.
///
/// Each decade of microseconds is split into bins by leading digit, so bin
/// `d * 10 + k` holds samples in `[k * 10^d, (k + 1) * 10^d)`. Bin 0 holds
/// zero-latency samples; everything beyond the last decade lands in the
/// last bin.
///
/// # Performance
///
/// - Lock-free recording with relaxed atomics
/// - O(bins) percentile estimation
/// - Constant memory regardless of sample count
#[derive(Debug)]
pub(crate) struct LatencyHistogram {
    bins: [AtomicU64; NUM_HISTOGRAM_BINS],
    total_latency: AtomicU64,
    sample_count: AtomicU64,
}

impl LatencyHistogram {
    pub(crate) fn new() -> Self {
        Self {
            bins: std::array::from_fn(|_| AtomicU64::new(0)),
            total_latency: AtomicU64::new(0),
            sample_count: AtomicU64::new(0),
        }
    }

    pub(crate) fn record(&self, latency_us: u64) {
        self.bins[Self::latency_to_bin(latency_us)].fetch_add(1, Ordering::Relaxed);
        self.total_latency.fetch_add(latency_us, Ordering::Relaxed);
        self.sample_count.fetch_add(1, Ordering::Relaxed);
    }

    fn latency_to_bin(latency_us: u64) -> usize {
        if latency_us == 0 {
            return 0;
        }
        let decade = latency_us.ilog10();
        let leading = latency_us / 10u64.pow(decade);
        (decade as usize * 10 + leading as usize).min(NUM_HISTOGRAM_BINS - 1)
    }

    /// Lower and upper bound of `bin` in microseconds.
    fn bin_bounds(bin: usize) -> (u64, u64) {
        if bin == 0 {
            return (0, 1);
        }
        let scale = 10u64.pow((bin / 10) as u32);
        let leading = (bin % 10) as u64;
        (leading * scale, (leading + 1) * scale)
    }

    /// Estimates the latency at `percentile` (0-100), interpolating linearly
    /// within the bin that holds it. Returns 0 without samples.
    pub(crate) fn estimate_percentile(&self, percentile: u64) -> u64 {
        let total = self.sample_count.load(Ordering::Relaxed);
        if total == 0 {
            return 0;
        }
        let target = (total * percentile).div_ceil(100).max(1);

        let mut cumulative = 0;
        for (bin, count) in self.bins.iter().enumerate() {
            let count = count.load(Ordering::Relaxed);
            if count > 0 && cumulative + count >= target {
                let (low, high) = Self::bin_bounds(bin);
                let fraction = (target - cumulative) as f64 / count as f64;
                return low + (fraction * (high - low) as f64) as u64;
            }
            cumulative += count;
        }
        // concurrent writers can leave the sample count ahead of the bins
        Self::bin_bounds(NUM_HISTOGRAM_BINS - 1).1
    }

    pub(crate) fn summary(&self) -> LatencySummary {
        let total = self.sample_count.load(Ordering::Relaxed);
        if total == 0 {
            return LatencySummary::default();
        }
        LatencySummary {
            avg_us: self.total_latency.load(Ordering::Relaxed) / total,
            p50_us: self.estimate_percentile(50),
            p95_us: self.estimate_percentile(95),
            p99_us: self.estimate_percentile(99),
        }
    }
}

/// Per-service counters.
#[derive(Debug)]
struct ServiceStats {
    call_count: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    unavailable_count: AtomicU64,
    latencies: LatencyHistogram,
    refresh_count: AtomicU64,
    isolations_opened: AtomicU64,
    isolations_closed: AtomicU64,
}

impl ServiceStats {
    fn new() -> Self {
        Self {
            call_count: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            unavailable_count: AtomicU64::new(0),
            latencies: LatencyHistogram::new(),
            refresh_count: AtomicU64::new(0),
            isolations_opened: AtomicU64::new(0),
            isolations_closed: AtomicU64::new(0),
        }
    }

    fn snapshot(&self) -> ServiceMetrics {
        ServiceMetrics {
            call_count: self.call_count.load(Ordering::Relaxed),
            success_count: self.success_count.load(Ordering::Relaxed),
            failure_count: self.failure_count.load(Ordering::Relaxed),
            unavailable_count: self.unavailable_count.load(Ordering::Relaxed),
            latency: self.latencies.summary(),
            refresh_count: self.refresh_count.load(Ordering::Relaxed),
            isolations_opened: self.isolations_opened.load(Ordering::Relaxed),
            isolations_closed: self.isolations_closed.load(Ordering::Relaxed),
        }
    }
}

/// Thread-safe metrics registry.
///
/// # Thread Safety
///
/// Counters are atomics updated with relaxed ordering; snapshots are
/// eventually consistent. The per-service and per-policy maps are behind
/// read-write locks taken for writing only when a new key appears.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use steward_metrics::MetricsRegistry;
///
/// let registry = MetricsRegistry::new();
/// registry.record_call("orders", true, Duration::from_micros(150));
/// registry.record_throttled("global");
///
/// let snapshot = registry.snapshot();
/// assert_eq!(snapshot.total_calls, 1);
/// assert_eq!(snapshot.throttled_calls, 1);
/// ```
#[derive(Debug)]
pub struct MetricsRegistry {
    total_calls: AtomicU64,
    successful_calls: AtomicU64,
    failed_calls: AtomicU64,
    throttled_calls: AtomicU64,
    services: RwLock<HashMap<String, Arc<ServiceStats>>>,
    throttled: RwLock<HashMap<String, Arc<AtomicU64>>>,
    start_time: Instant,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            total_calls: AtomicU64::new(0),
            successful_calls: AtomicU64::new(0),
            failed_calls: AtomicU64::new(0),
            throttled_calls: AtomicU64::new(0),
            services: RwLock::new(HashMap::new()),
            throttled: RwLock::new(HashMap::new()),
            start_time: Instant::now(),
        }
    }

    fn service(&self, name: &str) -> Arc<ServiceStats> {
        let existing = self
            .services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned();
        if let Some(stats) = existing {
            return stats;
        }
        self.services
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(ServiceStats::new()))
            .clone()
    }

    /// Records a completed call to `service`.
    ///
    /// # Arguments
    /// * `service` - Microservice the call went to
    /// * `success` - Whether the call succeeded
    /// * `latency` - Observed call latency
    pub fn record_call(&self, service: &str, success: bool, latency: Duration) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_calls.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_calls.fetch_add(1, Ordering::Relaxed);
        }

        let stats = self.service(service);
        stats.call_count.fetch_add(1, Ordering::Relaxed);
        if success {
            stats.success_count.fetch_add(1, Ordering::Relaxed);
        } else {
            stats.failure_count.fetch_add(1, Ordering::Relaxed);
        }
        stats
            .latencies
            .record(u64::try_from(latency.as_micros()).unwrap_or(u64::MAX));
    }

    /// Records a call that found no available instance of `service`.
    pub fn record_unavailable(&self, service: &str) {
        self.service(service)
            .unavailable_count
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Records a call throttled by `policy`.
    pub fn record_throttled(&self, policy: &str) {
        self.throttled_calls.fetch_add(1, Ordering::Relaxed);
        let existing = self
            .throttled
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(policy)
            .cloned();
        let counter = match existing {
            Some(counter) => counter,
            None => self
                .throttled
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(policy.to_string())
                .or_default()
                .clone(),
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_refresh(&self, service: &str) {
        self.service(service)
            .refresh_count
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_isolation(&self, service: &str, alarm: AlarmType) {
        let stats = self.service(service);
        let counter = match alarm {
            AlarmType::Open => &stats.isolations_opened,
            AlarmType::Close => &stats.isolations_closed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let services = self
            .services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, stats)| (name.clone(), stats.snapshot()))
            .collect();
        let throttled_by_policy = self
            .throttled
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(policy, count)| (policy.clone(), count.load(Ordering::Relaxed)))
            .collect();

        MetricsSnapshot {
            uptime_ms: self.uptime_ms(),
            total_calls: self.total_calls.load(Ordering::Relaxed),
            successful_calls: self.successful_calls.load(Ordering::Relaxed),
            failed_calls: self.failed_calls.load(Ordering::Relaxed),
            throttled_calls: self.throttled_calls.load(Ordering::Relaxed),
            services,
            throttled_by_policy,
        }
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_call_tracking() {
        let registry = MetricsRegistry::new();
        registry.record_call("orders", true, Duration::from_micros(100));
        registry.record_call("orders", true, Duration::from_micros(200));
        registry.record_call("orders", false, Duration::from_micros(50));
        registry.record_call("billing", true, Duration::from_micros(10));

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.total_calls, 4);
        assert_eq!(snapshot.successful_calls, 3);
        assert_eq!(snapshot.failed_calls, 1);

        let orders = snapshot.service("orders").unwrap();
        assert_eq!(orders.call_count, 3);
        assert_eq!(orders.success_count, 2);
        assert_eq!(orders.failure_count, 1);
        assert_eq!(orders.latency.avg_us, 116); // (100 + 200 + 50) / 3
        assert_eq!(snapshot.service("billing").unwrap().call_count, 1);
    }

    #[test]
    fn test_throttled_is_not_a_failure() {
        let registry = MetricsRegistry::new();
        registry.record_throttled("global");
        registry.record_throttled("global");
        registry.record_throttled("search");

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.throttled_calls, 3);
        assert_eq!(snapshot.failed_calls, 0);
        assert_eq!(snapshot.total_calls, 0);
        assert_eq!(snapshot.throttled_by_policy["global"], 2);
        assert_eq!(snapshot.throttled_by_policy["search"], 1);
    }

    #[test]
    fn test_refresh_and_isolation_counters() {
        let registry = MetricsRegistry::new();
        registry.record_refresh("orders");
        registry.record_refresh("orders");
        registry.record_isolation("orders", AlarmType::Open);
        registry.record_isolation("orders", AlarmType::Close);
        registry.record_isolation("orders", AlarmType::Open);
        registry.record_unavailable("orders");

        let orders = registry.snapshot().services.remove("orders").unwrap();
        assert_eq!(orders.refresh_count, 2);
        assert_eq!(orders.isolations_opened, 2);
        assert_eq!(orders.isolations_closed, 1);
        assert_eq!(orders.unavailable_count, 1);
        assert_eq!(orders.call_count, 0);
    }

    #[test]
    fn test_thread_safety() {
        let registry = Arc::new(MetricsRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        registry.record_call(&format!("svc-{}", i % 2), i % 4 != 0, Duration::from_micros(5));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.total_calls, 8000);
        assert_eq!(snapshot.failed_calls, 2000);
        assert_eq!(snapshot.service("svc-0").unwrap().call_count, 4000);
    }

    #[test]
    fn test_histogram_bin_mapping() {
        assert_eq!(LatencyHistogram::latency_to_bin(0), 0);
        assert_eq!(LatencyHistogram::latency_to_bin(1), 1);
        assert_eq!(LatencyHistogram::latency_to_bin(9), 9);
        assert_eq!(LatencyHistogram::latency_to_bin(10), 11);
        assert_eq!(LatencyHistogram::latency_to_bin(99), 19);
        assert_eq!(LatencyHistogram::latency_to_bin(250), 22);
        assert_eq!(LatencyHistogram::latency_to_bin(u64::MAX), NUM_HISTOGRAM_BINS - 1);
        assert_eq!(LatencyHistogram::bin_bounds(22), (200, 300));
    }

    #[test]
    fn test_histogram_percentiles() {
        let histogram = LatencyHistogram::new();
        for us in 1..=100 {
            histogram.record(us);
        }
        let summary = histogram.summary();
        assert_eq!(summary.avg_us, 50);
        assert!((45..=60).contains(&summary.p50_us), "p50 = {}", summary.p50_us);
        assert!((90..=110).contains(&summary.p99_us), "p99 = {}", summary.p99_us);
        assert!(summary.p50_us <= summary.p95_us && summary.p95_us <= summary.p99_us);
    }

    #[test]
    fn test_histogram_empty() {
        assert_eq!(LatencyHistogram::new().summary(), LatencySummary::default());
        assert_eq!(LatencyHistogram::new().estimate_percentile(50), 0);
    }
}
