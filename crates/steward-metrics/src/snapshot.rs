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

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Latency summary in microseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub avg_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
}

/// Metrics for one microservice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceMetrics {
    pub call_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    /// Calls rejected with no available instance
    pub unavailable_count: u64,
    pub latency: LatencySummary,
    /// Endpoint snapshots installed by the directory
    pub refresh_count: u64,
    /// Isolation OPEN alarms
    pub isolations_opened: u64,
    /// Isolation CLOSE alarms
    pub isolations_closed: u64,
}

/// Complete metrics snapshot.
///
/// Throttled calls are counted per policy and never as failures.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_ms: u64,
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub throttled_calls: u64,
    pub services: BTreeMap<String, ServiceMetrics>,
    pub throttled_by_policy: BTreeMap<String, u64>,
}

impl MetricsSnapshot {
    pub fn service(&self, name: &str) -> Option<&ServiceMetrics> {
        self.services.get(name)
    }

    /// Pretty-printed JSON rendering.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
