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

//! Steward Common Types
//!
//! This crate holds the vocabulary shared by every steward component:
//!
//! - **Model**: [`Instance`], [`Locality`] and the per-call [`RequestMarker`]
//! - **Errors**: [`StewardError`] and load-time [`ConfigError`]
//! - **Events**: the in-process [`EventBus`] with its
//!   [`DirectoryChanged`] and [`AlarmEvent`] topics
//! - **Rate limiting**: lock-free token buckets keyed by policy and profile
//! - **Configuration**: the JSON-loaded [`StewardConfig`]
//! - **Time**: the [`Clock`] abstraction all lazy timers are evaluated against
//!
//! # Components
//!
//! - [`clock`] - Monotonic clocks
//! - [`config`] - Configuration schema and loading
//! - [`error`] - Error types
//! - [`events`] - Event bus and event kinds
//! - [`instance`] - Remote instance model
//! - [`marker`] - Request marker
//! - [`rate_limit`] - Token bucket rate limiter

pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod instance;
pub mod marker;
pub mod rate_limit;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    CustomMatcherConfig, IsolationSettings, LoadBalanceConfig, MatcherConfig, OperatorMap,
    PolicyConfig, PolicyKind, RateLimitSettings, StewardConfig,
};
pub use error::{ConfigError, Result, StewardError};
pub use events::{
    AlarmEvent, AlarmType, DirectoryChanged, Event, EventBus, FnSubscriber, Subscriber, Topic,
    ISOLATION_ALARM_ID,
};
pub use instance::{Instance, InstanceStatus, Locality};
pub use marker::RequestMarker;
pub use rate_limit::{RateLimitConfig, RateLimitResult, RateLimiter, TokenBucket};
