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

//! Named custom handlers.
//!
//! Policies refer to custom predicates and profile extractors by name. A
//! handler is registered as a [`Capability`], which carries exactly one of
//! the two contracts, and every reference is resolved while the policy set
//! is loaded. A policy that names an unknown handler, or a handler of the
//! wrong capability, fails to load.
//!
//! Besides registered handlers, the extractor name `header:<name>` always
//! resolves to an extractor returning the value of that request header.

use std::collections::HashMap;
use std::sync::Arc;
use steward_common::{ConfigError, RequestMarker};
use tracing::debug;

/// Prefix of the built-in header extractor names.
pub const HEADER_EXTRACTOR_PREFIX: &str = "header:";

/// A pluggable request predicate.
pub trait CustomMatch: Send + Sync {
    fn match_request(&self, marker: &RequestMarker, parameters: &str) -> bool;
}

/// Pulls a grouping key (tenant, user, ...) out of a request.
pub trait ProfileExtract: Send + Sync {
    fn extract_profile(&self, marker: &RequestMarker) -> Option<String>;
}

/// A registered handler and the single contract it fulfills.
#[derive(Clone)]
pub enum Capability {
    Match(Arc<dyn CustomMatch>),
    Extract(Arc<dyn ProfileExtract>),
}

impl Capability {
    pub fn contract(&self) -> &'static str {
        match self {
            Capability::Match(_) => "CustomMatch",
            Capability::Extract(_) => "ProfileExtract",
        }
    }
}

impl std::fmt::Debug for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Capability({})", self.contract())
    }
}

/// Extracts the value of one request header.
#[derive(Debug, Clone)]
pub struct HeaderProfile {
    header: String,
}

impl HeaderProfile {
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
        }
    }
}

impl ProfileExtract for HeaderProfile {
    fn extract_profile(&self, marker: &RequestMarker) -> Option<String> {
        marker
            .header(&self.header)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }
}

#[derive(Default)]
pub struct CapabilityRegistry {
    handlers: HashMap<String, Capability>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `capability` under `name`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::EmptyHandlerName`] or [`ConfigError::DuplicateHandler`].
    pub fn register(
        &mut self,
        name: impl Into<String>,
        capability: Capability,
    ) -> Result<(), ConfigError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ConfigError::EmptyHandlerName);
        }
        if self.handlers.contains_key(&name) || name.starts_with(HEADER_EXTRACTOR_PREFIX) {
            return Err(ConfigError::DuplicateHandler(name));
        }
        debug!("Registered {} handler {}", capability.contract(), name);
        self.handlers.insert(name, capability);
        Ok(())
    }

    pub fn register_match(
        &mut self,
        name: impl Into<String>,
        handler: impl CustomMatch + 'static,
    ) -> Result<(), ConfigError> {
        self.register(name, Capability::Match(Arc::new(handler)))
    }

    pub fn register_extract(
        &mut self,
        name: impl Into<String>,
        handler: impl ProfileExtract + 'static,
    ) -> Result<(), ConfigError> {
        self.register(name, Capability::Extract(Arc::new(handler)))
    }

    /// Resolves the custom predicate `name` referenced by `policy`.
    pub fn custom_match(&self, policy: &str, name: &str) -> Result<Arc<dyn CustomMatch>, ConfigError> {
        match self.lookup(policy, name)? {
            Capability::Match(handler) => Ok(handler),
            Capability::Extract(_) => Err(ConfigError::CapabilityMismatch {
                policy: policy.to_string(),
                handler: name.to_string(),
                expected: "CustomMatch",
            }),
        }
    }

    /// Resolves the profile extractor `name` referenced by `policy`.
    pub fn profile_extract(
        &self,
        policy: &str,
        name: &str,
    ) -> Result<Arc<dyn ProfileExtract>, ConfigError> {
        if let Some(header) = name.strip_prefix(HEADER_EXTRACTOR_PREFIX) {
            if header.is_empty() {
                return Err(ConfigError::UnknownHandler {
                    policy: policy.to_string(),
                    handler: name.to_string(),
                });
            }
            return Ok(Arc::new(HeaderProfile::new(header)));
        }
        match self.lookup(policy, name)? {
            Capability::Extract(handler) => Ok(handler),
            Capability::Match(_) => Err(ConfigError::CapabilityMismatch {
                policy: policy.to_string(),
                handler: name.to_string(),
                expected: "ProfileExtract",
            }),
        }
    }

    fn lookup(&self, policy: &str, name: &str) -> Result<Capability, ConfigError> {
        self.handlers
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownHandler {
                policy: policy.to_string(),
                handler: name.to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Adapts a closure into a [`CustomMatch`].
pub struct MatchFn<F>(pub F);

impl<F> CustomMatch for MatchFn<F>
where
    F: Fn(&RequestMarker, &str) -> bool + Send + Sync,
{
    fn match_request(&self, marker: &RequestMarker, parameters: &str) -> bool {
        (self.0)(marker, parameters)
    }
}

/// Adapts a closure into a [`ProfileExtract`].
pub struct ExtractFn<F>(pub F);

impl<F> ProfileExtract for ExtractFn<F>
where
    F: Fn(&RequestMarker) -> Option<String> + Send + Sync,
{
    fn extract_profile(&self, marker: &RequestMarker) -> Option<String> {
        (self.0)(marker)
    }
}
