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

use crate::registry::MetricsRegistry;
use std::sync::{Arc, Weak};
use steward_common::{AlarmEvent, DirectoryChanged, EventBus, ISOLATION_ALARM_ID};

impl MetricsRegistry {
    /// Subscribes this registry to directory and isolation events on `bus`.
    ///
    /// The subscriptions hold a weak reference; once the registry is dropped
    /// they become no-ops.
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::sync::Arc;
    /// use steward_common::{DirectoryChanged, EventBus};
    /// use steward_metrics::MetricsRegistry;
    ///
    /// let bus = EventBus::new();
    /// let metrics = Arc::new(MetricsRegistry::new());
    /// metrics.attach(&bus);
    ///
    /// bus.post(&DirectoryChanged::new("orders"));
    /// assert_eq!(metrics.snapshot().services["orders"].refresh_count, 1);
    /// ```
    pub fn attach(self: &Arc<Self>, bus: &EventBus) {
        let registry: Weak<Self> = Arc::downgrade(self);
        bus.subscribe(move |event: &DirectoryChanged| {
            if let Some(registry) = registry.upgrade() {
                registry.record_refresh(&event.service_name);
            }
        });

        let registry: Weak<Self> = Arc::downgrade(self);
        bus.subscribe(move |event: &AlarmEvent| {
            if event.id != ISOLATION_ALARM_ID {
                return;
            }
            if let (Some(registry), Some(service)) = (registry.upgrade(), event.microservice_name()) {
                registry.record_isolation(service, event.alarm_type);
            }
        });
    }
}
