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

//! Endpoint directory.
//!
//! Holds the last-known instance population of every microservice, split
//! into locality groups. The whole directory is an immutable map behind an
//! [`ArcSwap`]: a refresh builds a new [`EndpointSnapshot`], swaps in a new
//! map and posts [`DirectoryChanged`]. Readers load the map without locking
//! and keep the snapshot they read for the rest of their call.

use arc_swap::ArcSwap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use steward_common::events::{DirectoryChanged, EventBus};
use steward_common::{Instance, Locality, Result, StewardError};
use tracing::{debug, info, warn};

/// Group key for instances in the caller's zone.
pub const SAME_ZONE: &str = "sameZone";
/// Group key for instances in the caller's region.
pub const SAME_REGION: &str = "sameRegion";
/// Group key for the full population.
pub const ALL: &str = "all";

/// Registry payload for one microservice: group key → instances.
///
/// A `None` or missing group is treated as empty.
pub type ZoneAndRegion = HashMap<String, Option<Vec<Instance>>>;

/// Immutable locality-partitioned view of one microservice.
///
/// Groups are never absent: an empty group is an empty slice.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct EndpointSnapshot {
    service_name: String,
    same_zone: Vec<Arc<Instance>>,
    same_region: Vec<Arc<Instance>>,
    all: Vec<Arc<Instance>>,
}

impl EndpointSnapshot {
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn same_zone(&self) -> &[Arc<Instance>] {
        &self.same_zone
    }

    pub fn same_region(&self) -> &[Arc<Instance>] {
        &self.same_region
    }

    pub fn all(&self) -> &[Arc<Instance>] {
        &self.all
    }

    pub fn is_empty(&self) -> bool {
        self.same_zone.is_empty() && self.same_region.is_empty() && self.all.is_empty()
    }

    /// Ids of every instance published in any group.
    pub fn instance_ids(&self) -> HashSet<&str> {
        self.all
            .iter()
            .chain(self.same_zone.iter())
            .chain(self.same_region.iter())
            .map(|instance| instance.instance_id.as_str())
            .collect()
    }
}

/// Validates one refresh and interns instances by id.
struct SnapshotBuilder<'a> {
    service: &'a str,
    seen: HashMap<String, Arc<Instance>>,
}

impl<'a> SnapshotBuilder<'a> {
    fn new(service: &'a str) -> Self {
        Self {
            service,
            seen: HashMap::new(),
        }
    }

    fn group(&mut self, instances: Vec<Instance>) -> Result<Vec<Arc<Instance>>> {
        let mut group = Vec::with_capacity(instances.len());
        let mut ids = HashSet::new();
        for instance in instances {
            let instance = self.intern(instance)?;
            if ids.insert(instance.instance_id.clone()) {
                group.push(instance);
            }
        }
        Ok(group)
    }

    fn intern(&mut self, mut instance: Instance) -> Result<Arc<Instance>> {
        if instance.service_name.is_empty() {
            instance.service_name = self.service.to_string();
        } else if instance.service_name != self.service {
            return Err(StewardError::malformed(
                self.service,
                format!(
                    "instance {} belongs to microservice {}",
                    instance.instance_id, instance.service_name
                ),
            ));
        }
        if instance.instance_id.is_empty() {
            return Err(StewardError::malformed(self.service, "instance id is empty"));
        }

        if let Some(existing) = self.seen.get(&instance.instance_id) {
            if existing.endpoint != instance.endpoint {
                return Err(StewardError::malformed(
                    self.service,
                    format!(
                        "instance {} published with endpoints {} and {}",
                        instance.instance_id, existing.endpoint, instance.endpoint
                    ),
                ));
            }
            return Ok(existing.clone());
        }

        let instance = Arc::new(instance);
        self.seen
            .insert(instance.instance_id.clone(), instance.clone());
        Ok(instance)
    }
}

fn union(first: &[Arc<Instance>], second: &[Arc<Instance>]) -> Vec<Arc<Instance>> {
    let mut ids = HashSet::new();
    let mut merged = Vec::with_capacity(first.len() + second.len());
    for instance in first.iter().chain(second.iter()) {
        if ids.insert(instance.instance_id.clone()) {
            merged.push(instance.clone());
        }
    }
    merged
}

/// Normalizes a registry payload into a snapshot.
///
/// # Errors
///
/// Returns [`StewardError::MalformedSnapshot`] when the service name is
/// empty, a group key is unknown, an instance belongs to another service,
/// an instance id is empty, or one id is published with two endpoints.
pub fn normalize(service: &str, mut groups: ZoneAndRegion) -> Result<EndpointSnapshot> {
    if service.is_empty() {
        return Err(StewardError::malformed(service, "microservice name is empty"));
    }
    if let Some(key) = groups
        .keys()
        .find(|key| !matches!(key.as_str(), SAME_ZONE | SAME_REGION | ALL))
    {
        return Err(StewardError::malformed(
            service,
            format!("unknown group key {}", key),
        ));
    }

    let zone_input = groups.remove(SAME_ZONE).flatten().unwrap_or_default();
    let region_input = groups.remove(SAME_REGION).flatten().unwrap_or_default();
    let all_input = groups.remove(ALL).flatten();

    let mut builder = SnapshotBuilder::new(service);
    let same_zone = builder.group(zone_input)?;
    let same_region = builder.group(region_input)?;
    let all = match all_input {
        Some(instances) => builder.group(instances)?,
        None => union(&same_zone, &same_region),
    };

    Ok(EndpointSnapshot {
        service_name: service.to_string(),
        same_zone,
        same_region,
        all,
    })
}

/// Splits a flat instance list into locality groups relative to `local`.
///
/// `sameZone` holds instances in the caller's region and zone, `sameRegion`
/// those in the caller's region but another zone, and `all` every instance.
pub fn classify(local: &Locality, instances: Vec<Instance>) -> ZoneAndRegion {
    let mut same_zone = Vec::new();
    let mut same_region = Vec::new();
    for instance in &instances {
        if local.same_zone(instance) {
            same_zone.push(instance.clone());
        } else if local.same_region(instance) {
            same_region.push(instance.clone());
        }
    }
    let mut groups = ZoneAndRegion::new();
    groups.insert(SAME_ZONE.to_string(), Some(same_zone));
    groups.insert(SAME_REGION.to_string(), Some(same_region));
    groups.insert(ALL.to_string(), Some(instances));
    groups
}

/// Last-known endpoints of every microservice.
pub struct EndpointDirectory {
    snapshots: ArcSwap<HashMap<String, Arc<EndpointSnapshot>>>,
    empty: Arc<EndpointSnapshot>,
    bus: Arc<EventBus>,
}

impl EndpointDirectory {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            snapshots: ArcSwap::from_pointee(HashMap::new()),
            empty: Arc::new(EndpointSnapshot::default()),
            bus,
        }
    }

    /// Returns the current snapshot of `service`.
    ///
    /// Unknown services yield an empty snapshot. Never blocks.
    pub fn get(&self, service: &str) -> Arc<EndpointSnapshot> {
        self.snapshots
            .load()
            .get(service)
            .cloned()
            .unwrap_or_else(|| self.empty.clone())
    }

    /// Replaces the snapshot of `service` with the given groups.
    ///
    /// A malformed payload leaves every snapshot untouched, including the
    /// previous one for `service`.
    pub fn refresh(&self, service: &str, groups: ZoneAndRegion) -> Result<()> {
        let snapshot = match normalize(service, groups) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Rejected refresh for microservice {}: {}", service, e);
                return Err(e);
            }
        };
        self.install(snapshot);
        Ok(())
    }

    /// Replaces the snapshot of `service` from an unclassified instance list.
    pub fn refresh_instances(
        &self,
        service: &str,
        local: &Locality,
        instances: Vec<Instance>,
    ) -> Result<()> {
        self.refresh(service, classify(local, instances))
    }

    /// Forgets `service`. Returns whether it was known.
    pub fn remove(&self, service: &str) -> bool {
        if !self.snapshots.load().contains_key(service) {
            return false;
        }
        self.snapshots.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.remove(service);
            next
        });
        info!("Removed microservice {} from directory", service);
        self.bus.post(&DirectoryChanged::new(service));
        true
    }

    /// Names of every known microservice, sorted.
    pub fn services(&self) -> Vec<String> {
        let mut services: Vec<String> = self.snapshots.load().keys().cloned().collect();
        services.sort();
        services
    }

    fn install(&self, snapshot: EndpointSnapshot) {
        let service = snapshot.service_name.clone();
        let snapshot = Arc::new(snapshot);
        info!(
            "Refreshed microservice {}: {} same-zone, {} same-region, {} total",
            service,
            snapshot.same_zone.len(),
            snapshot.same_region.len(),
            snapshot.all.len()
        );
        self.snapshots.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(service.clone(), snapshot.clone());
            next
        });
        let delivered = self.bus.post(&DirectoryChanged::new(service.as_str()));
        debug!("DirectoryChanged for {} delivered to {} subscribers", service, delivered);
    }
}
