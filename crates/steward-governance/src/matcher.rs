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

use crate::operator::OperatorSet;
use crate::registry::{CapabilityRegistry, CustomMatch};
use std::collections::BTreeMap;
use std::sync::Arc;
use steward_common::{ConfigError, MatcherConfig, OperatorMap, RequestMarker};

/// A compiled request predicate.
///
/// Checks run in order: method, API path, headers, service name, custom
/// predicate. Every configured check must pass; unconfigured checks pass.
pub struct RequestMatcher {
    methods: Vec<String>,
    api_path: Option<OperatorSet>,
    headers: Vec<(String, OperatorSet)>,
    service_name: Option<String>,
    custom: Option<(Arc<dyn CustomMatch>, String)>,
    raw: MatcherConfig,
    canonical: MatcherConfig,
}

impl RequestMatcher {
    /// Compiles `raw` for `policy`, resolving its custom handler.
    pub fn compile(
        policy: &str,
        raw: &MatcherConfig,
        registry: &CapabilityRegistry,
    ) -> Result<Self, ConfigError> {
        let api_path = raw
            .api_path
            .as_ref()
            .map(|ops| OperatorSet::compile(policy, ops))
            .transpose()?;

        let mut headers = Vec::with_capacity(raw.headers.len());
        for (name, ops) in &raw.headers {
            headers.push((name.to_ascii_lowercase(), OperatorSet::compile(policy, ops)?));
        }

        // a named handler is always resolved; it only constrains requests
        // when it is given parameters
        let custom = match &raw.custom_matcher {
            Some(custom) if !custom.handler.is_empty() => {
                let handler = registry.custom_match(policy, &custom.handler)?;
                (!custom.parameters.is_empty()).then(|| (handler, custom.parameters.clone()))
            }
            _ => None,
        };

        Ok(Self {
            methods: raw.methods.clone(),
            api_path,
            headers,
            service_name: raw.service_name.clone(),
            canonical: canonicalize(raw, custom.is_some()),
            custom,
            raw: raw.clone(),
        })
    }

    pub fn matches(&self, marker: &RequestMarker) -> bool {
        if !self.methods.is_empty()
            && !self
                .methods
                .iter()
                .any(|method| method.eq_ignore_ascii_case(&marker.method))
        {
            return false;
        }
        if let Some(api_path) = &self.api_path {
            if !api_path.matches(&marker.path) {
                return false;
            }
        }
        for (name, ops) in &self.headers {
            match marker.header(name) {
                Some(value) if ops.matches(value) => {}
                _ => return false,
            }
        }
        if let Some(service_name) = &self.service_name {
            if marker.service_name.as_deref() != Some(service_name.as_str()) {
                return false;
            }
        }
        match &self.custom {
            Some((handler, parameters)) => handler.match_request(marker, parameters),
            None => true,
        }
    }

    /// Whether this matcher accepts every request.
    pub fn is_catch_all(&self) -> bool {
        self.methods.is_empty()
            && self.api_path.is_none()
            && self.headers.is_empty()
            && self.service_name.is_none()
            && self.custom.is_none()
    }

    pub fn raw(&self) -> &MatcherConfig {
        &self.raw
    }

    /// `raw` with the differences that do not affect matching removed:
    /// method case and order, header name case, and an inert custom
    /// matcher. Two matchers with equal canonical forms accept the same
    /// requests.
    pub fn canonical(&self) -> &MatcherConfig {
        &self.canonical
    }
}

fn canonicalize(raw: &MatcherConfig, custom_applies: bool) -> MatcherConfig {
    let mut methods: Vec<String> = raw
        .methods
        .iter()
        .map(|method| method.to_ascii_uppercase())
        .collect();
    methods.sort();
    methods.dedup();

    let mut headers: BTreeMap<String, OperatorMap> = BTreeMap::new();
    for (name, ops) in &raw.headers {
        headers
            .entry(name.to_ascii_lowercase())
            .or_default()
            .extend(ops.iter().map(|(op, operand)| (op.clone(), operand.clone())));
    }

    MatcherConfig {
        methods,
        api_path: raw.api_path.clone(),
        headers,
        service_name: raw.service_name.clone(),
        custom_matcher: raw.custom_matcher.clone().filter(|_| custom_applies),
    }
}

impl std::fmt::Debug for RequestMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestMatcher").field("raw", &self.raw).finish()
    }
}
