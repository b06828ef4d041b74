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

//! Selection rules.
//!
//! A rule picks one instance out of an already filtered, non-empty candidate
//! list. Rules are stateless with respect to the candidate list: they see a
//! fresh slice on every call and only keep their own counters.
//!
//! Built-in rules:
//!
//! - `round-robin` - per-service rotating counter
//! - `random` - uniform choice
//! - `weighted-response` - power of two choices over average latency
//! - `session-sticky` - hash of a session header, round-robin without one

use dashmap::DashMap;
use rand::Rng;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use steward_common::{ConfigError, Instance, RequestMarker};

pub const ROUND_ROBIN: &str = "round-robin";
pub const RANDOM: &str = "random";
pub const WEIGHTED_RESPONSE: &str = "weighted-response";
pub const SESSION_STICKY: &str = "session-sticky";

/// Source of observed per-instance latency.
pub trait LatencyStats: Send + Sync {
    fn average_latency(&self, instance: &Instance) -> Option<Duration>;
}

/// Latency source that knows nothing.
pub struct NoLatency;

impl LatencyStats for NoLatency {
    fn average_latency(&self, _instance: &Instance) -> Option<Duration> {
        None
    }
}

/// Inputs available to a rule besides the candidates.
pub struct SelectionContext<'a> {
    pub service: &'a str,
    pub marker: Option<&'a RequestMarker>,
    pub latency: &'a dyn LatencyStats,
}

/// Picks one candidate.
///
/// `candidates` is never empty. Returning `None` or an out-of-range index
/// declines the selection for this locality tier.
pub trait SelectionRule: Send + Sync {
    fn name(&self) -> &str;

    fn select(&self, ctx: &SelectionContext<'_>, candidates: &[Arc<Instance>]) -> Option<usize>;
}

#[derive(Default)]
pub struct RoundRobinRule {
    counters: DashMap<String, AtomicUsize>,
}

impl RoundRobinRule {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&self, service: &str, len: usize) -> usize {
        if let Some(counter) = self.counters.get(service) {
            return counter.fetch_add(1, Ordering::Relaxed) % len;
        }
        self.counters
            .entry(service.to_string())
            .or_default()
            .fetch_add(1, Ordering::Relaxed)
            % len
    }
}

impl SelectionRule for RoundRobinRule {
    fn name(&self) -> &str {
        ROUND_ROBIN
    }

    fn select(&self, ctx: &SelectionContext<'_>, candidates: &[Arc<Instance>]) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }
        Some(self.next(ctx.service, candidates.len()))
    }
}

pub struct RandomRule;

impl SelectionRule for RandomRule {
    fn name(&self) -> &str {
        RANDOM
    }

    fn select(&self, _ctx: &SelectionContext<'_>, candidates: &[Arc<Instance>]) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }
        Some(rand::thread_rng().gen_range(0..candidates.len()))
    }
}

/// Prefers faster instances without scanning the whole list.
///
/// Two distinct candidates are drawn at random and the one with the lower
/// average latency wins. Instances without samples count as fastest so that
/// new instances get traffic.
pub struct WeightedResponseRule;

impl SelectionRule for WeightedResponseRule {
    fn name(&self) -> &str {
        WEIGHTED_RESPONSE
    }

    fn select(&self, ctx: &SelectionContext<'_>, candidates: &[Arc<Instance>]) -> Option<usize> {
        match candidates.len() {
            0 => None,
            1 => Some(0),
            len => {
                let mut rng = rand::thread_rng();
                let first = rng.gen_range(0..len);
                let mut second = rng.gen_range(0..len - 1);
                if second >= first {
                    second += 1;
                }
                let latency = |index: usize| {
                    ctx.latency
                        .average_latency(&candidates[index])
                        .unwrap_or(Duration::ZERO)
                };
                if latency(second) < latency(first) {
                    Some(second)
                } else {
                    Some(first)
                }
            }
        }
    }
}

/// Keeps a session on one instance while the candidate list is stable.
pub struct SessionStickyRule {
    header: String,
    fallback: RoundRobinRule,
}

impl SessionStickyRule {
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            fallback: RoundRobinRule::new(),
        }
    }
}

impl SelectionRule for SessionStickyRule {
    fn name(&self) -> &str {
        SESSION_STICKY
    }

    fn select(&self, ctx: &SelectionContext<'_>, candidates: &[Arc<Instance>]) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }
        let session = ctx.marker.and_then(|marker| marker.header(&self.header));
        match session {
            Some(session) => {
                let mut hasher = DefaultHasher::new();
                session.hash(&mut hasher);
                Some((hasher.finish() % candidates.len() as u64) as usize)
            }
            None => self.fallback.select(ctx, candidates),
        }
    }
}

/// Named selection rules.
pub struct RuleRegistry {
    rules: HashMap<String, Arc<dyn SelectionRule>>,
}

impl RuleRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            rules: HashMap::new(),
        }
    }

    /// A registry holding the built-in rules.
    pub fn with_defaults(session_header: &str) -> Self {
        let mut rules: HashMap<String, Arc<dyn SelectionRule>> = HashMap::new();
        rules.insert(ROUND_ROBIN.to_string(), Arc::new(RoundRobinRule::new()));
        rules.insert(RANDOM.to_string(), Arc::new(RandomRule));
        rules.insert(WEIGHTED_RESPONSE.to_string(), Arc::new(WeightedResponseRule));
        rules.insert(
            SESSION_STICKY.to_string(),
            Arc::new(SessionStickyRule::new(session_header)),
        );
        Self { rules }
    }

    pub fn register(&mut self, rule: Arc<dyn SelectionRule>) -> Result<(), ConfigError> {
        let name = rule.name().to_string();
        if self.rules.contains_key(&name) {
            return Err(ConfigError::DuplicateRule(name));
        }
        self.rules.insert(name, rule);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn SelectionRule>, ConfigError> {
        self.rules
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownRule(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.rules.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::with_defaults("x-session-id")
    }
}
