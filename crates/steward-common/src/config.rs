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

//! Steward configuration.
//!
//! Configuration is loaded once from JSON at startup. Every field has a
//! default, so an empty object `{}` is a valid configuration. Structural
//! validation happens here; policy-level validation (operators, handlers,
//! overlap) happens when the policy set is built from [`PolicyConfig`]s.

use crate::error::{ConfigError, Result};
use crate::rate_limit::{RateLimitConfig, DEFAULT_RATE};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;

/// Thresholds driving instance isolation.
///
/// A threshold of `0` disables the corresponding criterion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IsolationSettings {
    pub enabled: bool,
    pub continuous_failure_threshold: u64,
    pub error_threshold_percentage: u64,
    pub enable_request_threshold: u64,
    pub single_test_time_ms: u64,
    /// How long an unreported probe lease is honored. Defaults to
    /// `single_test_time_ms`.
    pub probe_timeout_ms: Option<u64>,
    /// Minimum time an instance stays isolated before it may recover,
    /// counted from the moment it was isolated.
    pub min_isolation_time_ms: u64,
    /// When every instance of the `all` group is excluded by isolation, let
    /// the rule pick among them anyway instead of failing the call.
    pub empty_instance_protection: bool,
    pub window_ms: u64,
    pub window_buckets: u32,
}

impl Default for IsolationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            continuous_failure_threshold: 5,
            error_threshold_percentage: 0,
            enable_request_threshold: 5,
            single_test_time_ms: 60_000,
            probe_timeout_ms: None,
            min_isolation_time_ms: 0,
            empty_instance_protection: false,
            window_ms: 10_000,
            window_buckets: 10,
        }
    }
}

impl IsolationSettings {
    pub fn probe_timeout_ms(&self) -> u64 {
        self.probe_timeout_ms.unwrap_or(self.single_test_time_ms)
    }

    /// Checks the settings for `scope` (a service name or `"default"`).
    pub fn validate(&self, scope: &str) -> std::result::Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidIsolation {
            scope: scope.to_string(),
            reason: reason.to_string(),
        };
        if self.error_threshold_percentage > 100 {
            return Err(invalid("error_threshold_percentage must be at most 100"));
        }
        if self.window_buckets == 0 {
            return Err(invalid("window_buckets must be at least 1"));
        }
        if self.window_ms < u64::from(self.window_buckets) {
            return Err(invalid("window_ms must be at least one millisecond per bucket"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadBalanceConfig {
    /// Selection rule used when a service has no override.
    pub rule: String,
    /// Per-service rule names.
    pub overrides: HashMap<String, String>,
    /// Header hashed by the session-sticky rule.
    pub session_header: String,
}

impl Default for LoadBalanceConfig {
    fn default() -> Self {
        Self {
            rule: "round-robin".to_string(),
            overrides: HashMap::new(),
            session_header: "x-session-id".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub default_rate: f64,
    pub profile_ttl_ms: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            default_rate: DEFAULT_RATE,
            profile_ttl_ms: 300_000,
        }
    }
}

impl RateLimitSettings {
    pub fn profile_ttl(&self) -> Duration {
        Duration::from_millis(self.profile_ttl_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyKind {
    /// Admission is gated by a token bucket.
    RateLimit,
    /// Match-only policy, consulted by callers through the matcher.
    CustomMatch,
}

impl PolicyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyKind::RateLimit => "rate-limit",
            PolicyKind::CustomMatch => "custom-match",
        }
    }
}

impl std::fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operator name → operand, e.g. `{"prefix": "/orders"}`.
pub type OperatorMap = BTreeMap<String, String>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomMatcherConfig {
    pub handler: String,
    #[serde(default)]
    pub parameters: String,
}

/// Raw request matcher.
///
/// Absent fields do not constrain the request; a matcher with no fields at
/// all matches every request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    pub methods: Vec<String>,
    pub api_path: Option<OperatorMap>,
    pub headers: BTreeMap<String, OperatorMap>,
    pub service_name: Option<String>,
    pub custom_matcher: Option<CustomMatcherConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    pub name: String,
    pub kind: PolicyKind,
    #[serde(default)]
    pub rate: Option<f64>,
    #[serde(default)]
    pub capacity: Option<u64>,
    /// Name of a registered profile extractor; buckets are kept per profile.
    #[serde(default)]
    pub profile_extractor: Option<String>,
    #[serde(default)]
    pub matcher: MatcherConfig,
}

impl PolicyConfig {
    pub fn rate_limit(name: impl Into<String>, rate: f64) -> Self {
        Self {
            name: name.into(),
            kind: PolicyKind::RateLimit,
            rate: Some(rate),
            capacity: None,
            profile_extractor: None,
            matcher: MatcherConfig::default(),
        }
    }

    pub fn custom_match(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: PolicyKind::CustomMatch,
            rate: None,
            capacity: None,
            profile_extractor: None,
            matcher: MatcherConfig::default(),
        }
    }

    pub fn with_matcher(mut self, matcher: MatcherConfig) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn with_capacity(mut self, capacity: u64) -> Self {
        self.capacity = Some(capacity);
        self
    }

    pub fn with_profile_extractor(mut self, handler: impl Into<String>) -> Self {
        self.profile_extractor = Some(handler.into());
        self
    }

    /// Bucket parameters; capacity defaults to one second of traffic.
    pub fn bucket_config(&self, default_rate: f64) -> RateLimitConfig {
        let rate = self.rate.unwrap_or(default_rate);
        match self.capacity {
            Some(capacity) => RateLimitConfig::new(rate, capacity),
            None => RateLimitConfig::per_second(rate),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StewardConfig {
    pub isolation: IsolationSettings,
    /// Per-service isolation settings, replacing `isolation` entirely.
    pub isolation_overrides: HashMap<String, IsolationSettings>,
    pub load_balance: LoadBalanceConfig,
    pub rate_limit: RateLimitSettings,
    pub policies: Vec<PolicyConfig>,
}

impl StewardConfig {
    /// Parses and validates a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: StewardConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        self.isolation.validate("default")?;
        let mut overrides: Vec<_> = self.isolation_overrides.iter().collect();
        overrides.sort_by(|a, b| a.0.cmp(b.0));
        for (service, settings) in overrides {
            settings.validate(service)?;
        }
        if self.rate_limit.default_rate <= 0.0 {
            return Err(ConfigError::InvalidParameter {
                policy: "default".to_string(),
                reason: "default_rate must be positive".to_string(),
            });
        }
        Ok(())
    }
}
