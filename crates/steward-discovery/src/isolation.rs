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

//! Instance isolation.
//!
//! Every instance that has reported at least one outcome owns an
//! [`IsolationRecord`]. Its state machine is
//!
//! ```text
//! HEALTHY --trip--> ISOLATED --single test time--> PROBING --success--> HEALTHY
//!                      ^                              |
//!                      +-----------failure------------+
//! ```
//!
//! The state and the timestamp of the last transition are packed into one
//! `AtomicU64`, so every transition is a single compare-and-swap. The
//! ISOLATED to PROBING swap doubles as the probe lease: exactly one caller
//! wins it and is allowed to send the canary call. A lease whose holder never
//! reports back can be taken over once the probe timeout has elapsed. No
//! lease is granted, and no success recovers the instance, before the
//! minimum isolation time has passed since it was isolated.
//!
//! Timers are evaluated when the record is accessed; nothing ticks in the
//! background.

use crate::directory::EndpointDirectory;
use crate::rules::LatencyStats;
use crate::window::{RollingWindow, WindowTotals};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use steward_common::events::{AlarmEvent, AlarmType, DirectoryChanged, EventBus, ISOLATION_ALARM_ID};
use steward_common::{Clock, Instance, IsolationSettings, StewardConfig};
use tracing::{debug, info, warn};

const STATE_SHIFT: u32 = 62;
const TIMESTAMP_MASK: u64 = (1 << STATE_SHIFT) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IsolationState {
    Healthy,
    Isolated,
    Probing,
}

impl IsolationState {
    fn bits(self) -> u64 {
        match self {
            IsolationState::Healthy => 0,
            IsolationState::Isolated => 1,
            IsolationState::Probing => 2,
        }
    }

    fn from_bits(bits: u64) -> Self {
        match bits {
            1 => IsolationState::Isolated,
            2 => IsolationState::Probing,
            _ => IsolationState::Healthy,
        }
    }
}

fn pack(state: IsolationState, since_ms: u64) -> u64 {
    (state.bits() << STATE_SHIFT) | (since_ms & TIMESTAMP_MASK)
}

fn unpack(word: u64) -> (IsolationState, u64) {
    (
        IsolationState::from_bits(word >> STATE_SHIFT),
        word & TIMESTAMP_MASK,
    )
}

/// Whether an instance may receive the current call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    Excluded,
    /// The caller now holds the probe lease and must send the canary call.
    ProbeGranted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

/// Point-in-time view of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordStatus {
    pub state: IsolationState,
    pub window: WindowTotals,
    pub continuous_failures: u64,
    pub average_latency: Option<Duration>,
}

/// Per-instance counters and isolation state.
#[derive(Debug)]
pub struct IsolationRecord {
    service_name: String,
    instance_id: String,
    endpoint: String,
    state: AtomicU64,
    /// When the instance last went from HEALTHY to ISOLATED; a failed probe
    /// does not move it.
    isolated_at_ms: AtomicU64,
    window: RollingWindow,
    continuous_failures: AtomicU64,
    /// Exponentially weighted average latency in microseconds; 0 = no sample.
    average_latency_micros: AtomicU64,
}

impl IsolationRecord {
    fn new(instance: &Instance, settings: &IsolationSettings) -> Self {
        Self {
            service_name: instance.service_name.clone(),
            instance_id: instance.instance_id.clone(),
            endpoint: instance.endpoint.clone(),
            state: AtomicU64::new(pack(IsolationState::Healthy, 0)),
            isolated_at_ms: AtomicU64::new(0),
            window: RollingWindow::new(settings.window_ms, settings.window_buckets),
            continuous_failures: AtomicU64::new(0),
            average_latency_micros: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> IsolationState {
        unpack(self.state.load(Ordering::Acquire)).0
    }

    fn transition(&self, from: u64, to: IsolationState, now_ms: u64) -> bool {
        self.state
            .compare_exchange(from, pack(to, now_ms), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn record_latency(&self, latency: Duration) {
        let sample = (latency.as_micros() as u64).max(1);
        let _ = self
            .average_latency_micros
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if current == 0 {
                    Some(sample)
                } else {
                    Some((current * 7 + sample) / 8)
                }
            });
    }

    fn average_latency(&self) -> Option<Duration> {
        match self.average_latency_micros.load(Ordering::Acquire) {
            0 => None,
            micros => Some(Duration::from_micros(micros)),
        }
    }

    fn isolated_for(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.isolated_at_ms.load(Ordering::Acquire))
    }

    fn reset_counters(&self) {
        self.window.reset();
        self.continuous_failures.store(0, Ordering::Release);
    }
}

fn should_trip(settings: &IsolationSettings, totals: &WindowTotals, continuous: u64) -> bool {
    if totals.total() < settings.enable_request_threshold {
        return false;
    }
    let continuous_tripped = settings.continuous_failure_threshold > 0
        && continuous >= settings.continuous_failure_threshold;
    let percentage_tripped = settings.error_threshold_percentage > 0
        && totals.error_percentage() >= settings.error_threshold_percentage;
    continuous_tripped || percentage_tripped
}

/// Records of one microservice, by instance id.
type ServiceRecords = DashMap<String, Arc<IsolationRecord>>;

/// Tracks outcomes per instance and decides isolation.
pub struct IsolationTracker {
    records: DashMap<String, ServiceRecords>,
    defaults: IsolationSettings,
    overrides: HashMap<String, IsolationSettings>,
    clock: Arc<dyn Clock>,
    bus: Arc<EventBus>,
}

impl IsolationTracker {
    /// Creates a tracker using the isolation settings of `config`.
    pub fn new(config: &StewardConfig, bus: Arc<EventBus>, clock: Arc<dyn Clock>) -> Self {
        Self {
            records: DashMap::new(),
            defaults: config.isolation.clone(),
            overrides: config.isolation_overrides.clone(),
            clock,
            bus,
        }
    }

    pub fn settings_for(&self, service: &str) -> &IsolationSettings {
        self.overrides.get(service).unwrap_or(&self.defaults)
    }

    fn record(&self, instance: &Instance) -> Option<Arc<IsolationRecord>> {
        let service = self.records.get(instance.service_name.as_str())?;
        let record = service
            .get(instance.instance_id.as_str())
            .map(|r| r.value().clone());
        record
    }

    fn record_or_insert(&self, instance: &Instance) -> Arc<IsolationRecord> {
        if let Some(record) = self.record(instance) {
            return record;
        }
        let settings = self.settings_for(&instance.service_name);
        let service = self
            .records
            .entry(instance.service_name.clone())
            .or_default();
        let record = service
            .entry(instance.instance_id.clone())
            .or_insert_with(|| Arc::new(IsolationRecord::new(instance, settings)))
            .clone();
        record
    }

    /// Whether `record` has been isolated long enough to leave isolation.
    fn min_isolation_elapsed(
        record: &IsolationRecord,
        settings: &IsolationSettings,
        now_ms: u64,
    ) -> bool {
        record.isolated_for(now_ms) >= settings.min_isolation_time_ms
    }

    /// Decides whether `instance` may take the current call.
    ///
    /// Also performs the ISOLATED to PROBING transition when the single test
    /// time has elapsed; the caller that wins it receives
    /// [`Eligibility::ProbeGranted`].
    pub fn eligibility(&self, instance: &Instance) -> Eligibility {
        let settings = self.settings_for(&instance.service_name);
        if !settings.enabled {
            return Eligibility::Eligible;
        }
        let Some(record) = self.record(instance) else {
            return Eligibility::Eligible;
        };

        let now = self.clock.now_ms();
        let word = record.state.load(Ordering::Acquire);
        let (state, since) = unpack(word);
        let elapsed = now.saturating_sub(since);
        let lease_available = match state {
            IsolationState::Healthy => return Eligibility::Eligible,
            IsolationState::Isolated => {
                elapsed >= settings.single_test_time_ms
                    && Self::min_isolation_elapsed(&record, settings, now)
            }
            IsolationState::Probing => elapsed >= settings.probe_timeout_ms(),
        };
        if lease_available && record.transition(word, IsolationState::Probing, now) {
            debug!(
                "Probe lease granted for {}/{}",
                record.service_name, record.instance_id
            );
            return Eligibility::ProbeGranted;
        }
        Eligibility::Excluded
    }

    pub fn report_outcome(&self, instance: &Instance, outcome: Outcome, latency: Duration) {
        match outcome {
            Outcome::Success => self.report_success(instance, latency),
            Outcome::Failure => self.report_failure(instance, latency),
        }
    }

    pub fn report_success(&self, instance: &Instance, latency: Duration) {
        let record = self.record_or_insert(instance);
        let now = self.clock.now_ms();
        record.window.record(now, true);
        record.continuous_failures.store(0, Ordering::Release);
        record.record_latency(latency);

        let settings = self.settings_for(&instance.service_name);
        loop {
            let word = record.state.load(Ordering::Acquire);
            let (state, since) = unpack(word);
            let recovers = match state {
                IsolationState::Healthy => return,
                IsolationState::Probing => true,
                IsolationState::Isolated => {
                    now.saturating_sub(since) >= settings.single_test_time_ms
                }
            };
            if !recovers || !Self::min_isolation_elapsed(&record, settings, now) {
                return;
            }
            // cleared before the state leaves isolation
            let totals = record.window.totals(now);
            record.reset_counters();
            if record.transition(word, IsolationState::Healthy, now) {
                info!(
                    "Instance {}/{} recovered, isolation closed",
                    record.service_name, record.instance_id
                );
                self.bus
                    .post(&self.alarm(AlarmType::Close, &record, settings, &totals, 0));
                return;
            }
        }
    }

    pub fn report_failure(&self, instance: &Instance, latency: Duration) {
        let record = self.record_or_insert(instance);
        let now = self.clock.now_ms();
        record.window.record(now, false);
        let continuous = record.continuous_failures.fetch_add(1, Ordering::AcqRel) + 1;
        record.record_latency(latency);

        let settings = self.settings_for(&instance.service_name);
        if !settings.enabled {
            return;
        }
        loop {
            let word = record.state.load(Ordering::Acquire);
            match unpack(word).0 {
                IsolationState::Isolated => return,
                IsolationState::Probing => {
                    if record.transition(word, IsolationState::Isolated, now) {
                        info!(
                            "Probe to {}/{} failed, isolation restarted",
                            record.service_name, record.instance_id
                        );
                        return;
                    }
                }
                IsolationState::Healthy => {
                    let totals = record.window.totals(now);
                    if !should_trip(settings, &totals, continuous) {
                        return;
                    }
                    record.isolated_at_ms.store(now, Ordering::Release);
                    if record.transition(word, IsolationState::Isolated, now) {
                        warn!(
                            "Isolating instance {}/{} at {}: {} requests, {} continuous failures, {}% errors",
                            record.service_name,
                            record.instance_id,
                            record.endpoint,
                            totals.total(),
                            continuous,
                            totals.error_percentage()
                        );
                        self.bus.post(&self.alarm(
                            AlarmType::Open,
                            &record,
                            settings,
                            &totals,
                            continuous,
                        ));
                        return;
                    }
                }
            }
        }
    }

    fn alarm(
        &self,
        alarm_type: AlarmType,
        record: &IsolationRecord,
        settings: &IsolationSettings,
        totals: &WindowTotals,
        continuous: u64,
    ) -> AlarmEvent {
        AlarmEvent::new(alarm_type, ISOLATION_ALARM_ID)
            .with("microserviceName", record.service_name.as_str())
            .with("instanceId", record.instance_id.as_str())
            .with("endpoint", record.endpoint.as_str())
            .with("totalRequest", totals.total())
            .with("currentCountinuousFailureCount", continuous)
            .with("currentErrorPercentage", totals.error_percentage())
            .with("continuousFailureThreshold", settings.continuous_failure_threshold)
            .with("errorThresholdPercentage", settings.error_threshold_percentage)
            .with("enableRequestThreshold", settings.enable_request_threshold)
            .with("singleTestTime", settings.single_test_time_ms)
    }

    /// Current state of `instance`; instances without a record are healthy.
    pub fn state(&self, instance: &Instance) -> IsolationState {
        self.record(instance)
            .map(|record| record.state())
            .unwrap_or(IsolationState::Healthy)
    }

    pub fn status(&self, instance: &Instance) -> Option<RecordStatus> {
        let record = self.record(instance)?;
        let now = self.clock.now_ms();
        Some(RecordStatus {
            state: record.state(),
            window: record.window.totals(now),
            continuous_failures: record.continuous_failures.load(Ordering::Acquire),
            average_latency: record.average_latency(),
        })
    }

    pub fn record_count(&self) -> usize {
        self.records.iter().map(|service| service.len()).sum()
    }

    /// Drops the records of `service` whose instance id is not in `live`.
    ///
    /// Returns the number of records removed.
    pub fn retain_instances<'a>(
        &self,
        service: &str,
        live: impl IntoIterator<Item = &'a str>,
    ) -> usize {
        let live: std::collections::HashSet<&str> = live.into_iter().collect();
        let removed = match self.records.get(service) {
            Some(records) => {
                let before = records.len();
                records.retain(|id, _| live.contains(id.as_str()));
                before.saturating_sub(records.len())
            }
            None => return 0,
        };
        self.records.remove_if(service, |_, records| records.is_empty());
        if removed > 0 {
            debug!("Dropped {} isolation records of {}", removed, service);
        }
        removed
    }

    /// Prunes records whenever `directory` publishes a new snapshot.
    ///
    /// The subscription holds weak references, so it does not keep either
    /// component alive.
    pub fn attach(self: &Arc<Self>, directory: &Arc<EndpointDirectory>, bus: &EventBus) {
        let tracker: Weak<Self> = Arc::downgrade(self);
        let directory: Weak<EndpointDirectory> = Arc::downgrade(directory);
        bus.subscribe(move |event: &DirectoryChanged| {
            let (Some(tracker), Some(directory)) = (tracker.upgrade(), directory.upgrade()) else {
                return;
            };
            let snapshot = directory.get(&event.service_name);
            tracker.retain_instances(&event.service_name, snapshot.instance_ids());
        });
    }
}

impl LatencyStats for IsolationTracker {
    fn average_latency(&self, instance: &Instance) -> Option<Duration> {
        self.record(instance)?.average_latency()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{ZoneAndRegion, SAME_ZONE};
    use std::sync::Mutex;
    use steward_common::ManualClock;

    struct Fixture {
        tracker: Arc<IsolationTracker>,
        clock: Arc<ManualClock>,
        alarms: Arc<Mutex<Vec<AlarmEvent>>>,
        bus: Arc<EventBus>,
    }

    fn fixture(isolation: IsolationSettings) -> Fixture {
        let config = StewardConfig {
            isolation,
            ..Default::default()
        };
        let bus = Arc::new(EventBus::new());
        let clock = Arc::new(ManualClock::new());
        let alarms = Arc::new(Mutex::new(Vec::new()));
        let sink = alarms.clone();
        bus.subscribe(move |alarm: &AlarmEvent| sink.lock().unwrap().push(alarm.clone()));
        let tracker = Arc::new(IsolationTracker::new(&config, bus.clone(), clock.clone()));
        Fixture {
            tracker,
            clock,
            alarms,
            bus,
        }
    }

    fn settings(continuous: u64, enable: u64) -> IsolationSettings {
        IsolationSettings {
            continuous_failure_threshold: continuous,
            enable_request_threshold: enable,
            single_test_time_ms: 1_000,
            ..Default::default()
        }
    }

    fn instance() -> Instance {
        Instance::new("orders", "i-1", "rest://10.0.0.1:8080")
    }

    const LATENCY: Duration = Duration::from_millis(5);

    #[test]
    fn test_pack_roundtrip() {
        let word = pack(IsolationState::Probing, 123_456);
        assert_eq!(unpack(word), (IsolationState::Probing, 123_456));
        assert_eq!(unpack(0), (IsolationState::Healthy, 0));
    }

    #[test]
    fn test_unknown_instance_is_eligible() {
        let f = fixture(settings(3, 3));
        assert_eq!(f.tracker.eligibility(&instance()), Eligibility::Eligible);
        assert_eq!(f.tracker.state(&instance()), IsolationState::Healthy);
        assert_eq!(f.tracker.record_count(), 0);
    }

    #[test]
    fn test_enable_request_threshold_gates_tripping() {
        let f = fixture(settings(1, 10));
        for _ in 0..9 {
            f.tracker.report_failure(&instance(), LATENCY);
        }
        assert_eq!(f.tracker.state(&instance()), IsolationState::Healthy);

        f.tracker.report_failure(&instance(), LATENCY);
        assert_eq!(f.tracker.state(&instance()), IsolationState::Isolated);
    }

    #[test]
    fn test_three_failures_open_exactly_once() {
        let f = fixture(settings(3, 3));
        let target = instance();
        for _ in 0..3 {
            f.tracker.report_failure(&target, LATENCY);
        }
        assert_eq!(f.tracker.state(&target), IsolationState::Isolated);
        assert_eq!(f.tracker.eligibility(&target), Eligibility::Excluded);

        // further failures while isolated emit nothing new
        f.tracker.report_failure(&target, LATENCY);
        let alarms = f.alarms.lock().unwrap().clone();
        assert_eq!(alarms.len(), 1);
        let alarm = &alarms[0];
        assert_eq!(alarm.alarm_type, AlarmType::Open);
        assert_eq!(alarm.id, ISOLATION_ALARM_ID);
        assert_eq!(alarm.microservice_name(), Some("orders"));
        assert_eq!(alarm.get("totalRequest"), Some(&3u64.into()));
        assert_eq!(alarm.get("currentCountinuousFailureCount"), Some(&3u64.into()));
        assert_eq!(alarm.get("currentErrorPercentage"), Some(&100u64.into()));
        assert_eq!(alarm.get("continuousFailureThreshold"), Some(&3u64.into()));
        assert_eq!(alarm.get("singleTestTime"), Some(&1_000u64.into()));
    }

    #[test]
    fn test_success_while_isolated_has_no_effect_before_single_test_time() {
        let f = fixture(settings(3, 3));
        let target = instance();
        for _ in 0..3 {
            f.tracker.report_failure(&target, LATENCY);
        }
        f.clock.advance(Duration::from_millis(500));
        f.tracker.report_success(&target, LATENCY);
        assert_eq!(f.tracker.state(&target), IsolationState::Isolated);
        assert_eq!(f.alarms.lock().unwrap().len(), 1);

        f.clock.advance(Duration::from_millis(500));
        f.tracker.report_success(&target, LATENCY);
        assert_eq!(f.tracker.state(&target), IsolationState::Healthy);
        let alarms = f.alarms.lock().unwrap();
        assert_eq!(alarms.len(), 2);
        assert_eq!(alarms[1].alarm_type, AlarmType::Close);
    }

    #[test]
    fn test_probe_success_recovers() {
        let f = fixture(settings(3, 3));
        let target = instance();
        for _ in 0..3 {
            f.tracker.report_failure(&target, LATENCY);
        }
        f.clock.advance(Duration::from_millis(1_000));

        assert_eq!(f.tracker.eligibility(&target), Eligibility::ProbeGranted);
        assert_eq!(f.tracker.state(&target), IsolationState::Probing);
        assert_eq!(f.tracker.eligibility(&target), Eligibility::Excluded);

        f.tracker.report_success(&target, LATENCY);
        assert_eq!(f.tracker.state(&target), IsolationState::Healthy);
        assert_eq!(f.tracker.eligibility(&target), Eligibility::Eligible);

        let status = f.tracker.status(&target).unwrap();
        assert_eq!(status.window.total(), 0);
        assert_eq!(status.continuous_failures, 0);
    }

    #[test]
    fn test_probe_failure_restarts_timer() {
        let f = fixture(settings(3, 3));
        let target = instance();
        for _ in 0..3 {
            f.tracker.report_failure(&target, LATENCY);
        }
        f.clock.advance(Duration::from_millis(1_000));
        assert_eq!(f.tracker.eligibility(&target), Eligibility::ProbeGranted);

        f.tracker.report_failure(&target, LATENCY);
        assert_eq!(f.tracker.state(&target), IsolationState::Isolated);
        assert_eq!(f.tracker.eligibility(&target), Eligibility::Excluded);

        f.clock.advance(Duration::from_millis(999));
        assert_eq!(f.tracker.eligibility(&target), Eligibility::Excluded);
        f.clock.advance(Duration::from_millis(1));
        assert_eq!(f.tracker.eligibility(&target), Eligibility::ProbeGranted);
        // a failed probe is not a second OPEN
        assert_eq!(f.alarms.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_min_isolation_time_delays_recovery() {
        let mut isolation = settings(3, 3);
        isolation.min_isolation_time_ms = 3_000;
        let f = fixture(isolation);
        let target = instance();
        for _ in 0..3 {
            f.tracker.report_failure(&target, LATENCY);
        }

        f.clock.advance(Duration::from_millis(1_000));
        assert_eq!(f.tracker.eligibility(&target), Eligibility::Excluded);
        f.tracker.report_success(&target, LATENCY);
        assert_eq!(f.tracker.state(&target), IsolationState::Isolated);

        f.clock.advance(Duration::from_millis(2_000));
        assert_eq!(f.tracker.eligibility(&target), Eligibility::ProbeGranted);
        f.tracker.report_failure(&target, LATENCY);

        // the minimum counts from the original isolation, not the failed probe
        f.clock.advance(Duration::from_millis(1_000));
        assert_eq!(f.tracker.eligibility(&target), Eligibility::ProbeGranted);
        f.tracker.report_success(&target, LATENCY);
        assert_eq!(f.tracker.state(&target), IsolationState::Healthy);
    }

    #[test]
    fn test_failure_after_recovery_starts_from_empty_window() {
        let f = fixture(IsolationSettings {
            continuous_failure_threshold: 0,
            error_threshold_percentage: 50,
            enable_request_threshold: 3,
            single_test_time_ms: 1_000,
            ..Default::default()
        });
        let target = instance();
        for _ in 0..3 {
            f.tracker.report_failure(&target, LATENCY);
        }
        f.clock.advance(Duration::from_millis(1_000));
        f.tracker.report_success(&target, LATENCY);
        assert_eq!(f.tracker.state(&target), IsolationState::Healthy);

        f.tracker.report_failure(&target, LATENCY);
        assert_eq!(f.tracker.state(&target), IsolationState::Healthy);
        assert_eq!(f.alarms.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_failure_racing_recovery_does_not_reopen() {
        let f = fixture(IsolationSettings {
            continuous_failure_threshold: 0,
            error_threshold_percentage: 50,
            enable_request_threshold: 3,
            single_test_time_ms: 1_000,
            ..Default::default()
        });
        let target = instance();
        let cycles = 200;

        for _ in 0..cycles {
            for _ in 0..3 {
                f.tracker.report_failure(&target, LATENCY);
            }
            assert_eq!(f.tracker.state(&target), IsolationState::Isolated);
            f.clock.advance(Duration::from_millis(1_000));

            let barrier = std::sync::Barrier::new(2);
            std::thread::scope(|scope| {
                scope.spawn(|| {
                    barrier.wait();
                    f.tracker.report_success(&target, LATENCY);
                });
                scope.spawn(|| {
                    barrier.wait();
                    f.tracker.report_failure(&target, LATENCY);
                });
            });
            assert_eq!(f.tracker.state(&target), IsolationState::Healthy);
        }

        let alarms = f.alarms.lock().unwrap();
        let opened = alarms
            .iter()
            .filter(|alarm| alarm.alarm_type == AlarmType::Open)
            .count();
        assert_eq!(opened, cycles);
        assert_eq!(alarms.len(), cycles * 2);
    }

    #[test]
    fn test_stale_probe_lease_expires() {
        let mut isolation = settings(3, 3);
        isolation.probe_timeout_ms = Some(200);
        let f = fixture(isolation);
        let target = instance();
        for _ in 0..3 {
            f.tracker.report_failure(&target, LATENCY);
        }
        f.clock.advance(Duration::from_millis(1_000));
        assert_eq!(f.tracker.eligibility(&target), Eligibility::ProbeGranted);

        f.clock.advance(Duration::from_millis(100));
        assert_eq!(f.tracker.eligibility(&target), Eligibility::Excluded);
        f.clock.advance(Duration::from_millis(100));
        assert_eq!(f.tracker.eligibility(&target), Eligibility::ProbeGranted);
    }

    #[test]
    fn test_error_percentage_criterion() {
        let f = fixture(IsolationSettings {
            continuous_failure_threshold: 0,
            error_threshold_percentage: 50,
            enable_request_threshold: 4,
            ..Default::default()
        });
        let target = instance();
        f.tracker.report_failure(&target, LATENCY);
        f.tracker.report_success(&target, LATENCY);
        f.tracker.report_failure(&target, LATENCY);
        assert_eq!(f.tracker.state(&target), IsolationState::Healthy);

        f.tracker.report_success(&target, LATENCY);
        f.tracker.report_failure(&target, LATENCY);
        // 3 of 5 failed
        assert_eq!(f.tracker.state(&target), IsolationState::Isolated);
    }

    #[test]
    fn test_success_resets_continuous_failures() {
        let f = fixture(settings(3, 1));
        let target = instance();
        f.tracker.report_failure(&target, LATENCY);
        f.tracker.report_failure(&target, LATENCY);
        f.tracker.report_success(&target, LATENCY);
        f.tracker.report_failure(&target, LATENCY);
        f.tracker.report_failure(&target, LATENCY);
        assert_eq!(f.tracker.state(&target), IsolationState::Healthy);
        f.tracker.report_failure(&target, LATENCY);
        assert_eq!(f.tracker.state(&target), IsolationState::Isolated);
    }

    #[test]
    fn test_disabled_isolation_never_trips() {
        let mut isolation = settings(1, 1);
        isolation.enabled = false;
        let f = fixture(isolation);
        for _ in 0..10 {
            f.tracker.report_failure(&instance(), LATENCY);
        }
        assert_eq!(f.tracker.state(&instance()), IsolationState::Healthy);
        assert_eq!(f.tracker.eligibility(&instance()), Eligibility::Eligible);
    }

    #[test]
    fn test_per_service_override() {
        let mut config = StewardConfig {
            isolation: settings(1, 1),
            ..Default::default()
        };
        config
            .isolation_overrides
            .insert("billing".to_string(), settings(10, 10));
        let tracker = IsolationTracker::new(
            &config,
            Arc::new(EventBus::new()),
            Arc::new(ManualClock::new()),
        );

        let billing = Instance::new("billing", "b-1", "rest://b");
        tracker.report_failure(&billing, LATENCY);
        tracker.report_failure(&instance(), LATENCY);
        assert_eq!(tracker.state(&billing), IsolationState::Healthy);
        assert_eq!(tracker.state(&instance()), IsolationState::Isolated);
    }

    #[test]
    fn test_failures_decay_out_of_window() {
        let f = fixture(IsolationSettings {
            continuous_failure_threshold: 0,
            error_threshold_percentage: 50,
            enable_request_threshold: 3,
            ..Default::default()
        });
        let target = instance();
        f.tracker.report_failure(&target, LATENCY);
        f.tracker.report_failure(&target, LATENCY);
        f.clock.advance(Duration::from_secs(20));
        f.tracker.report_success(&target, LATENCY);
        f.tracker.report_success(&target, LATENCY);
        f.tracker.report_failure(&target, LATENCY);
        // the early failures no longer count: 1 of 3
        assert_eq!(f.tracker.state(&target), IsolationState::Healthy);
    }

    #[test]
    fn test_average_latency() {
        let f = fixture(settings(3, 3));
        let target = instance();
        assert_eq!(f.tracker.average_latency(&target), None);
        f.tracker
            .report_success(&target, Duration::from_millis(8));
        assert_eq!(
            f.tracker.average_latency(&target),
            Some(Duration::from_millis(8))
        );
        f.tracker
            .report_success(&target, Duration::from_millis(16));
        assert_eq!(
            f.tracker.average_latency(&target),
            Some(Duration::from_millis(9))
        );
    }

    #[test]
    fn test_records_pruned_on_directory_change() {
        let f = fixture(settings(3, 3));
        let directory = Arc::new(EndpointDirectory::new(f.bus.clone()));
        f.tracker.attach(&directory, &f.bus);

        let keep = Instance::new("orders", "keep", "rest://keep");
        let gone = Instance::new("orders", "gone", "rest://gone");
        f.tracker.report_failure(&keep, LATENCY);
        f.tracker.report_failure(&gone, LATENCY);
        f.tracker
            .report_failure(&Instance::new("billing", "b", "rest://b"), LATENCY);
        assert_eq!(f.tracker.record_count(), 3);

        let mut groups = ZoneAndRegion::new();
        groups.insert(SAME_ZONE.to_string(), Some(vec![keep.clone()]));
        directory.refresh("orders", groups).unwrap();

        assert_eq!(f.tracker.record_count(), 2);
        assert!(f.tracker.status(&keep).is_some());
        assert!(f.tracker.status(&gone).is_none());
    }

    #[test]
    fn test_records_are_scoped_by_service() {
        let f = fixture(settings(1, 1));
        let orders = Instance::new("orders", "i-1", "rest://10.0.0.1:8080");
        let billing = Instance::new("billing", "i-1", "rest://10.0.0.1:9090");
        f.tracker.report_failure(&orders, LATENCY);
        f.tracker.report_success(&billing, LATENCY);

        assert_eq!(f.tracker.record_count(), 2);
        assert_eq!(f.tracker.state(&orders), IsolationState::Isolated);
        assert_eq!(f.tracker.state(&billing), IsolationState::Healthy);

        assert_eq!(f.tracker.retain_instances("billing", []), 1);
        assert_eq!(f.tracker.retain_instances("billing", []), 0);
        assert_eq!(f.tracker.retain_instances("payments", ["i-1"]), 0);
        assert_eq!(f.tracker.record_count(), 1);
        assert_eq!(f.tracker.state(&orders), IsolationState::Isolated);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_single_probe_lease_under_contention() {
        let f = fixture(settings(3, 3));
        let target = instance();
        for _ in 0..3 {
            f.tracker.report_failure(&target, LATENCY);
        }
        f.clock.advance(Duration::from_millis(1_000));

        let mut join_set = tokio::task::JoinSet::new();
        for _ in 0..64 {
            let tracker = f.tracker.clone();
            let target = target.clone();
            join_set.spawn(async move { tracker.eligibility(&target) });
        }

        let mut granted = 0;
        while let Some(result) = join_set.join_next().await {
            match result.unwrap() {
                Eligibility::ProbeGranted => granted += 1,
                Eligibility::Excluded => {}
                Eligibility::Eligible => panic!("isolated instance reported eligible"),
            }
        }
        assert_eq!(granted, 1);
    }
}
