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

//! Steward Discovery
//!
//! Client-side service discovery and resilience:
//!
//! - [`directory`] - last-known endpoints per microservice, split by locality
//! - [`isolation`] - per-instance outcome tracking and isolation decisions
//! - [`window`] - fixed-bucket rolling window backing the isolation counters
//! - [`rules`] - pluggable selection rules
//! - [`load_balancer`] - locality-tiered candidate selection
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use steward_common::{EventBus, Instance, Locality, SystemClock, StewardConfig};
//! use steward_discovery::{EndpointDirectory, IsolationTracker, LoadBalancer, RuleRegistry};
//!
//! let config = StewardConfig::default();
//! let bus = Arc::new(EventBus::new());
//! let directory = Arc::new(EndpointDirectory::new(bus.clone()));
//! let tracker = Arc::new(IsolationTracker::new(&config, bus, Arc::new(SystemClock::new())));
//! let balancer = LoadBalancer::new(
//!     directory.clone(),
//!     tracker,
//!     &RuleRegistry::default(),
//!     &config.load_balance,
//! )
//! .unwrap();
//!
//! let local = Locality::new("cn-north", "az1");
//! directory
//!     .refresh_instances(
//!         "orders",
//!         &local,
//!         vec![Instance::new("orders", "i-1", "rest://10.0.0.1:8080")
//!             .with_region("cn-north")
//!             .with_zone("az1")],
//!     )
//!     .unwrap();
//!
//! let chosen = balancer.choose("orders", None).unwrap();
//! assert_eq!(chosen.instance_id, "i-1");
//! ```

pub mod directory;
pub mod isolation;
pub mod load_balancer;
pub mod rules;
pub mod window;

pub use directory::{EndpointDirectory, EndpointSnapshot, ZoneAndRegion, ALL, SAME_REGION, SAME_ZONE};
pub use isolation::{Eligibility, IsolationState, IsolationTracker, Outcome, RecordStatus};
pub use load_balancer::LoadBalancer;
pub use rules::{
    LatencyStats, NoLatency, RandomRule, RoundRobinRule, RuleRegistry, SelectionContext,
    SelectionRule, SessionStickyRule, WeightedResponseRule,
};
pub use window::{RollingWindow, WindowTotals};
