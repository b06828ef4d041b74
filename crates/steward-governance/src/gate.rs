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

use crate::policy::{GovernancePolicy, PolicySet};
use crate::registry::CapabilityRegistry;
use std::sync::Arc;
use std::time::Duration;
use steward_common::{Clock, ConfigError, PolicyKind, RateLimitResult, RateLimiter, RequestMarker, StewardConfig};
use tracing::debug;

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// The call may proceed. `policy` names the rate-limit policy that
    /// admitted it, if any applied.
    Granted { policy: Option<String> },
    /// The call was throttled by `policy`; this is not a call failure.
    Throttled { policy: String, retry_after: Duration },
}

impl Admission {
    pub fn is_granted(&self) -> bool {
        matches!(self, Admission::Granted { .. })
    }
}

/// Admission control over a loaded [`PolicySet`].
pub struct Governance {
    policies: PolicySet,
    limiter: Arc<RateLimiter>,
}

impl Governance {
    /// Registers the bucket of every rate-limit policy with `limiter`.
    pub fn new(policies: PolicySet, limiter: Arc<RateLimiter>) -> Self {
        for policy in policies.iter() {
            if let Some(bucket) = policy.bucket() {
                limiter.register(&policy.name, bucket);
            }
        }
        Self { policies, limiter }
    }

    /// Loads the policies of `config` and builds a limiter reading `clock`.
    pub fn from_config(
        config: &StewardConfig,
        registry: &CapabilityRegistry,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        let default_rate = config.rate_limit.default_rate;
        let policies = PolicySet::load(&config.policies, registry, default_rate)?;
        let limiter = Arc::new(RateLimiter::with_clock(
            default_rate,
            config.rate_limit.profile_ttl(),
            clock,
        ));
        Ok(Self::new(policies, limiter))
    }

    /// Decides whether a call described by `marker` may proceed.
    ///
    /// The first matching rate-limit policy is consulted. When it limits per
    /// profile and a profile can be extracted, the profile bucket is used;
    /// otherwise the policy bucket is.
    pub fn admit(&self, marker: &RequestMarker) -> Admission {
        let Some(policy) = self.policies.select(marker, PolicyKind::RateLimit) else {
            return Admission::Granted { policy: None };
        };

        let result = match policy.profile_of(marker) {
            Some(profile) => self.limiter.try_acquire_for(&policy.name, &profile),
            None => self.limiter.try_acquire(&policy.name),
        };

        match result {
            RateLimitResult::Allowed => Admission::Granted {
                policy: Some(policy.name.clone()),
            },
            RateLimitResult::RateLimited { retry_after } => {
                debug!(
                    "Throttled {} {} by policy {}, retry after {:?}",
                    marker.method, marker.path, policy.name, retry_after
                );
                Admission::Throttled {
                    policy: policy.name.clone(),
                    retry_after,
                }
            }
        }
    }

    /// The policy of `kind` that applies to `marker`, if any.
    pub fn matching(&self, marker: &RequestMarker, kind: PolicyKind) -> Option<&GovernancePolicy> {
        self.policies.select(marker, kind)
    }

    pub fn policies(&self) -> &PolicySet {
        &self.policies
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }
}
