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

use crate::directory::EndpointDirectory;
use crate::isolation::{Eligibility, IsolationTracker};
use crate::rules::{RuleRegistry, SelectionContext, SelectionRule};
use std::collections::HashMap;
use std::sync::Arc;
use steward_common::{ConfigError, Instance, LoadBalanceConfig, RequestMarker, Result, StewardError};
use tracing::{debug, warn};

/// Locality-aware instance selection.
///
/// Candidates are drawn from the first non-empty tier of `sameZone`,
/// `sameRegion` and `all`, after dropping instances that are not `Up` or are
/// excluded by isolation. A caller that wins an instance's probe lease gets
/// that instance back directly. With empty instance protection enabled, an
/// `all` tier whose `Up` instances are all isolated is used as is.
pub struct LoadBalancer {
    directory: Arc<EndpointDirectory>,
    tracker: Arc<IsolationTracker>,
    default_rule: Arc<dyn SelectionRule>,
    overrides: HashMap<String, Arc<dyn SelectionRule>>,
}

impl LoadBalancer {
    /// Resolves the configured rules against `registry`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::UnknownRule`] when a configured rule name is not
    /// registered.
    pub fn new(
        directory: Arc<EndpointDirectory>,
        tracker: Arc<IsolationTracker>,
        registry: &RuleRegistry,
        config: &LoadBalanceConfig,
    ) -> std::result::Result<Self, ConfigError> {
        let default_rule = registry.get(&config.rule)?;
        let mut overrides = HashMap::new();
        for (service, rule) in &config.overrides {
            overrides.insert(service.clone(), registry.get(rule)?);
        }
        Ok(Self {
            directory,
            tracker,
            default_rule,
            overrides,
        })
    }

    pub fn rule_for(&self, service: &str) -> &dyn SelectionRule {
        self.overrides
            .get(service)
            .unwrap_or(&self.default_rule)
            .as_ref()
    }

    /// Picks the instance for one call to `service`.
    ///
    /// # Errors
    ///
    /// [`StewardError::NoAvailableInstance`] when every tier is empty after
    /// filtering. The call is not retried here.
    pub fn choose(&self, service: &str, marker: Option<&RequestMarker>) -> Result<Arc<Instance>> {
        let snapshot = self.directory.get(service);
        let rule = self.rule_for(service);
        let ctx = SelectionContext {
            service,
            marker,
            latency: self.tracker.as_ref(),
        };

        let tiers = [snapshot.same_zone(), snapshot.same_region(), snapshot.all()];
        let last = tiers.len() - 1;
        for (index, tier) in tiers.into_iter().enumerate() {
            let mut candidates = Vec::with_capacity(tier.len());
            let mut excluded = Vec::new();
            for instance in tier.iter().filter(|instance| instance.is_up()) {
                match self.tracker.eligibility(instance) {
                    Eligibility::Eligible => candidates.push(instance.clone()),
                    Eligibility::ProbeGranted => return Ok(instance.clone()),
                    Eligibility::Excluded => excluded.push(instance.clone()),
                }
            }
            if candidates.is_empty()
                && index == last
                && !excluded.is_empty()
                && self.tracker.settings_for(service).empty_instance_protection
            {
                warn!(
                    "Every instance of {} is isolated, letting the rule pick one of them",
                    service
                );
                candidates = excluded;
            }
            if candidates.is_empty() {
                continue;
            }
            if let Some(chosen) = rule
                .select(&ctx, &candidates)
                .and_then(|index| candidates.get(index))
            {
                return Ok(chosen.clone());
            }
        }

        debug!("No available instance for microservice {}", service);
        Err(StewardError::NoAvailableInstance(service.to_string()))
    }
}
