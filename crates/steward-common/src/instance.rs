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

/// Registration status of an instance as reported by the registry.
///
/// This is independent of isolation: an `Up` instance may still be isolated
/// by the caller because of its own observed failures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    #[default]
    Up,
    Down,
    Starting,
    OutOfService,
}

/// A remote microservice instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instance {
    #[serde(default)]
    pub service_name: String,
    pub instance_id: String,
    pub endpoint: String,
    #[serde(default)]
    pub zone: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub status: InstanceStatus,
}

impl Instance {
    pub fn new(
        service_name: impl Into<String>,
        instance_id: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            instance_id: instance_id.into(),
            endpoint: endpoint.into(),
            zone: String::new(),
            region: String::new(),
            status: InstanceStatus::Up,
        }
    }

    pub fn with_zone(mut self, zone: impl Into<String>) -> Self {
        self.zone = zone.into();
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    pub fn with_status(mut self, status: InstanceStatus) -> Self {
        self.status = status;
        self
    }

    pub fn is_up(&self) -> bool {
        self.status == InstanceStatus::Up
    }
}

/// The caller's own position in the zone/region topology.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locality {
    pub region: String,
    pub zone: String,
}

impl Locality {
    pub fn new(region: impl Into<String>, zone: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            zone: zone.into(),
        }
    }

    pub fn same_zone(&self, instance: &Instance) -> bool {
        self.same_region(instance) && self.zone == instance.zone
    }

    pub fn same_region(&self, instance: &Instance) -> bool {
        self.region == instance.region
    }
}
