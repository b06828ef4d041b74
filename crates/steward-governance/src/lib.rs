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

//! Steward Governance
//!
//! Request-level governance: which policy applies to a call, and whether
//! the call is admitted.
//!
//! Policies are loaded once from configuration into a [`PolicySet`]. Every
//! handler a policy references is resolved against a [`CapabilityRegistry`]
//! at load time, so a misconfigured policy set never reaches call time.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use steward_common::{ManualClock, PolicyConfig, RequestMarker, StewardConfig};
//! use steward_governance::{CapabilityRegistry, Governance};
//!
//! let config = StewardConfig {
//!     policies: vec![PolicyConfig::rate_limit("global", 1.0)],
//!     ..Default::default()
//! };
//! let governance =
//!     Governance::from_config(&config, &CapabilityRegistry::new(), Arc::new(ManualClock::new()))
//!         .unwrap();
//!
//! let marker = RequestMarker::new("GET", "/orders");
//! assert!(governance.admit(&marker).is_granted());
//! assert!(!governance.admit(&marker).is_granted());
//! ```
//!
//! # Components
//!
//! - [`operator`] - String and numeric match operators
//! - [`matcher`] - Compiled request matchers
//! - [`registry`] - Named custom predicates and profile extractors
//! - [`policy`] - Policy loading and first-match selection
//! - [`gate`] - Rate-limit admission

pub mod gate;
pub mod matcher;
pub mod operator;
pub mod policy;
pub mod registry;

pub use gate::{Admission, Governance};
pub use matcher::RequestMatcher;
pub use operator::{Comparison, MatchOperator, OperatorSet};
pub use policy::{GovernancePolicy, PolicyParameters, PolicySet};
pub use registry::{
    Capability, CapabilityRegistry, CustomMatch, ExtractFn, HeaderProfile, MatchFn, ProfileExtract,
    HEADER_EXTRACTOR_PREFIX,
};
