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

//! Loaded governance policies.
//!
//! A [`PolicySet`] is built once from configuration. Loading resolves every
//! handler reference and rejects policies that could never be selected, so
//! selection at call time cannot fail.

use crate::matcher::RequestMatcher;
use crate::registry::{CapabilityRegistry, ProfileExtract};
use std::collections::HashSet;
use std::sync::Arc;
use steward_common::{ConfigError, PolicyConfig, PolicyKind, RateLimitConfig, RequestMarker};
use tracing::info;

/// Kind-specific parameters of a loaded policy.
#[derive(Clone)]
pub enum PolicyParameters {
    RateLimit {
        bucket: RateLimitConfig,
        /// When present, buckets are kept per extracted profile.
        profile: Option<Arc<dyn ProfileExtract>>,
    },
    CustomMatch,
}

impl std::fmt::Debug for PolicyParameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyParameters::RateLimit { bucket, profile } => f
                .debug_struct("RateLimit")
                .field("bucket", bucket)
                .field("per_profile", &profile.is_some())
                .finish(),
            PolicyParameters::CustomMatch => f.write_str("CustomMatch"),
        }
    }
}

#[derive(Debug)]
pub struct GovernancePolicy {
    pub name: String,
    pub kind: PolicyKind,
    pub parameters: PolicyParameters,
    pub matcher: RequestMatcher,
}

impl GovernancePolicy {
    fn load(
        raw: &PolicyConfig,
        registry: &CapabilityRegistry,
        default_rate: f64,
    ) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidParameter {
            policy: raw.name.clone(),
            reason: reason.to_string(),
        };

        let parameters = match raw.kind {
            PolicyKind::RateLimit => {
                let bucket = raw.bucket_config(default_rate);
                if !bucket.rate.is_finite() || bucket.rate <= 0.0 {
                    return Err(invalid("rate must be a positive number"));
                }
                if bucket.capacity == 0 {
                    return Err(invalid("capacity must be at least 1"));
                }
                let profile = raw
                    .profile_extractor
                    .as_deref()
                    .map(|handler| registry.profile_extract(&raw.name, handler))
                    .transpose()?;
                PolicyParameters::RateLimit { bucket, profile }
            }
            PolicyKind::CustomMatch => {
                if raw.profile_extractor.is_some() {
                    return Err(invalid("profile_extractor only applies to rate-limit policies"));
                }
                PolicyParameters::CustomMatch
            }
        };

        Ok(Self {
            name: raw.name.clone(),
            kind: raw.kind,
            parameters,
            matcher: RequestMatcher::compile(&raw.name, &raw.matcher, registry)?,
        })
    }

    /// Bucket parameters, for rate-limit policies.
    pub fn bucket(&self) -> Option<RateLimitConfig> {
        match &self.parameters {
            PolicyParameters::RateLimit { bucket, .. } => Some(*bucket),
            PolicyParameters::CustomMatch => None,
        }
    }

    /// Profile key of `marker` under this policy, if it limits per profile.
    pub fn profile_of(&self, marker: &RequestMarker) -> Option<String> {
        match &self.parameters {
            PolicyParameters::RateLimit {
                profile: Some(extractor),
                ..
            } => extractor.extract_profile(marker),
            _ => None,
        }
    }
}

/// Ordered collection of loaded policies.
#[derive(Debug, Default)]
pub struct PolicySet {
    policies: Vec<GovernancePolicy>,
}

impl PolicySet {
    /// Loads `raw` in order.
    ///
    /// # Arguments
    ///
    /// * `raw` - Policy configurations, in precedence order
    /// * `registry` - Custom handlers referenced by the policies
    /// * `default_rate` - Rate used by rate-limit policies without one
    ///
    /// # Errors
    ///
    /// Any [`ConfigError`]: empty or duplicate names, invalid parameters,
    /// unresolved handlers, unsupported operators, or two policies of the
    /// same kind that overlap.
    pub fn load(
        raw: &[PolicyConfig],
        registry: &CapabilityRegistry,
        default_rate: f64,
    ) -> Result<Self, ConfigError> {
        let mut names = HashSet::new();
        let mut policies: Vec<GovernancePolicy> = Vec::with_capacity(raw.len());

        for config in raw {
            if config.name.is_empty() {
                return Err(ConfigError::EmptyPolicyName);
            }
            if !names.insert(config.name.as_str()) {
                return Err(ConfigError::DuplicatePolicy(config.name.clone()));
            }
            let policy = GovernancePolicy::load(config, registry, default_rate)?;
            if let Some(earlier) = policies
                .iter()
                .filter(|earlier| earlier.kind == policy.kind)
                .find(|earlier| {
                    earlier.matcher.is_catch_all()
                        || earlier.matcher.canonical() == policy.matcher.canonical()
                })
            {
                return Err(ConfigError::OverlappingPolicies {
                    kind: policy.kind.to_string(),
                    first: earlier.name.clone(),
                    second: policy.name.clone(),
                });
            }
            policies.push(policy);
        }

        info!("Loaded {} governance policies", policies.len());
        Ok(Self { policies })
    }

    /// The first policy of `kind` whose matcher accepts `marker`.
    pub fn select(&self, marker: &RequestMarker, kind: PolicyKind) -> Option<&GovernancePolicy> {
        self.policies
            .iter()
            .filter(|policy| policy.kind == kind)
            .find(|policy| policy.matcher.matches(marker))
    }

    pub fn get(&self, name: &str) -> Option<&GovernancePolicy> {
        self.policies.iter().find(|policy| policy.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &GovernancePolicy> {
        self.policies.iter()
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}
