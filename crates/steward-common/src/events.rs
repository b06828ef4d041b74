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

//! In-process event bus.
//!
//! Each event kind has its own [`Topic`] holding a typed subscriber list.
//! The list lives behind an [`ArcSwap`], so `post` never takes a lock:
//! publishers load the current list and call every subscriber in turn.
//! Registering swaps in a new list; a post already in progress keeps
//! delivering to the list it loaded.
//!
//! # Subscriber contract
//!
//! Subscribers may be invoked concurrently from any publishing thread and
//! must not block. A subscriber that panics is logged and skipped; delivery
//! to the remaining subscribers continues.
//!
//! # Example
//!
//! ```
//! use steward_common::events::{DirectoryChanged, EventBus};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! let bus = EventBus::new();
//! let seen = Arc::new(AtomicUsize::new(0));
//! let counter = seen.clone();
//! bus.subscribe(move |_: &DirectoryChanged| {
//!     counter.fetch_add(1, Ordering::Relaxed);
//! });
//!
//! bus.post(&DirectoryChanged::new("orders"));
//! assert_eq!(seen.load(Ordering::Relaxed), 1);
//! ```

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;

/// Numeric alarm id carried by instance isolation alarms.
pub const ISOLATION_ALARM_ID: u64 = 1;

/// Receives events of kind `E`.
pub trait Subscriber<E>: Send + Sync {
    fn on_event(&self, event: &E);
}

/// Adapts a closure into a [`Subscriber`].
pub struct FnSubscriber<F>(pub F);

impl<E, F> Subscriber<E> for FnSubscriber<F>
where
    F: Fn(&E) + Send + Sync,
{
    fn on_event(&self, event: &E) {
        (self.0)(event)
    }
}

/// Subscriber list for one event kind.
pub struct Topic<E> {
    subscribers: ArcSwap<Vec<Arc<dyn Subscriber<E>>>>,
}

impl<E: 'static> Topic<E> {
    pub fn new() -> Self {
        Self {
            subscribers: ArcSwap::from_pointee(Vec::new()),
        }
    }

    pub fn register(&self, subscriber: Arc<dyn Subscriber<E>>) {
        self.subscribers.rcu(|current| {
            let mut next: Vec<Arc<dyn Subscriber<E>>> = current.iter().cloned().collect();
            next.push(subscriber.clone());
            next
        });
    }

    /// Delivers `event` to every subscriber and returns how many of them
    /// completed without panicking.
    pub fn post(&self, event: &E) -> usize {
        let subscribers = self.subscribers.load();
        let mut delivered = 0;
        for subscriber in subscribers.iter() {
            match catch_unwind(AssertUnwindSafe(|| subscriber.on_event(event))) {
                Ok(()) => delivered += 1,
                Err(_) => warn!(
                    "Subscriber for {} panicked, continuing delivery",
                    std::any::type_name::<E>()
                ),
            }
        }
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.load().len()
    }
}

impl<E: 'static> Default for Topic<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// An event kind routable through the [`EventBus`].
pub trait Event: Send + Sync + Sized + 'static {
    fn topic(bus: &EventBus) -> &Topic<Self>;
}

/// Posted after the endpoint directory replaced a service's snapshot.
///
/// Carries only the name: listeners re-read the directory, which stays the
/// single source of truth.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DirectoryChanged {
    pub service_name: String,
}

impl DirectoryChanged {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlarmType {
    Open,
    Close,
}

/// A state transition worth alerting on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmEvent {
    #[serde(rename = "type")]
    pub alarm_type: AlarmType,
    pub id: u64,
    pub message: BTreeMap<String, Value>,
}

impl AlarmEvent {
    pub fn new(alarm_type: AlarmType, id: u64) -> Self {
        Self {
            alarm_type,
            id,
            message: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.message.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.message.get(key)
    }

    pub fn microservice_name(&self) -> Option<&str> {
        self.get("microserviceName").and_then(Value::as_str)
    }
}

/// Process-wide event bus, constructed once by the bootstrap and shared
/// by reference.
#[derive(Default)]
pub struct EventBus {
    directory: Topic<DirectoryChanged>,
    alarms: Topic<AlarmEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<E: Event>(&self, subscriber: Arc<dyn Subscriber<E>>) {
        E::topic(self).register(subscriber);
    }

    pub fn subscribe<E, F>(&self, f: F)
    where
        E: Event,
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.register::<E>(Arc::new(FnSubscriber(f)));
    }

    pub fn post<E: Event>(&self, event: &E) -> usize {
        E::topic(self).post(event)
    }

    pub fn subscriber_count<E: Event>(&self) -> usize {
        E::topic(self).subscriber_count()
    }
}

impl Event for DirectoryChanged {
    fn topic(bus: &EventBus) -> &Topic<Self> {
        &bus.directory
    }
}

impl Event for AlarmEvent {
    fn topic(bus: &EventBus) -> &Topic<Self> {
        &bus.alarms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[test]
    fn test_post_without_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.post(&DirectoryChanged::new("orders")), 0);
    }

    #[test]
    fn test_topics_are_independent() {
        let bus = EventBus::new();
        let alarms = Arc::new(AtomicUsize::new(0));
        let counter = alarms.clone();
        bus.subscribe(move |_: &AlarmEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.post(&DirectoryChanged::new("orders"));
        assert_eq!(alarms.load(Ordering::SeqCst), 0);

        bus.post(&AlarmEvent::new(AlarmType::Open, ISOLATION_ALARM_ID));
        assert_eq!(alarms.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count::<AlarmEvent>(), 1);
        assert_eq!(bus.subscriber_count::<DirectoryChanged>(), 0);
    }

    #[test]
    fn test_poison_subscriber_does_not_block_others() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        bus.subscribe(|_: &DirectoryChanged| panic!("boom"));
        let sink = seen.clone();
        bus.subscribe(move |event: &DirectoryChanged| {
            sink.lock().unwrap().push(event.service_name.clone());
        });

        let delivered = bus.post(&DirectoryChanged::new("orders"));
        assert_eq!(delivered, 1);
        assert_eq!(*seen.lock().unwrap(), vec!["orders".to_string()]);
    }

    #[test]
    fn test_struct_subscriber() {
        struct Counter(AtomicUsize);
        impl Subscriber<DirectoryChanged> for Counter {
            fn on_event(&self, _: &DirectoryChanged) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let bus = EventBus::new();
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        bus.register::<DirectoryChanged>(counter.clone());
        bus.post(&DirectoryChanged::new("a"));
        bus.post(&DirectoryChanged::new("b"));
        assert_eq!(counter.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_alarm_event_message() {
        let alarm = AlarmEvent::new(AlarmType::Open, ISOLATION_ALARM_ID)
            .with("microserviceName", "orders")
            .with("totalRequest", 12u64);
        assert_eq!(alarm.microservice_name(), Some("orders"));
        assert_eq!(alarm.get("totalRequest"), Some(&Value::from(12u64)));

        let json = serde_json::to_value(&alarm).unwrap();
        assert_eq!(json["type"], "OPEN");
        assert_eq!(json["id"], 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_publishers_and_registration() {
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        bus.subscribe(move |_: &DirectoryChanged| {
            counter.fetch_add(1, Ordering::Relaxed);
        });

        let mut join_set = tokio::task::JoinSet::new();
        for i in 0..8 {
            let bus = bus.clone();
            join_set.spawn(async move {
                for _ in 0..100 {
                    bus.post(&DirectoryChanged::new(format!("svc-{}", i)));
                }
            });
        }
        let late = bus.clone();
        join_set.spawn(async move {
            late.subscribe(|_: &DirectoryChanged| {});
        });

        while let Some(result) = join_set.join_next().await {
            result.unwrap();
        }

        // the first subscriber sees every post regardless of late registration
        assert_eq!(seen.load(Ordering::Relaxed), 800);
        assert_eq!(bus.subscriber_count::<DirectoryChanged>(), 2);
    }
}
