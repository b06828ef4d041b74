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

//! Steward Metrics
//!
//! Counters and latency histograms for a steward context, exported as a
//! serializable [`MetricsSnapshot`].
//!
//! The [`MetricsRegistry`] is fed from two directions: callers record call
//! outcomes and throttling directly, and [`MetricsRegistry::attach`]
//! subscribes it to the event bus so directory refreshes and isolation
//! alarms are counted without the emitting components knowing about it.
//!
//! # Components
//!
//! - [`registry`] - The thread-safe registry and its latency histograms
//! - [`snapshot`] - Serializable snapshot types
//! - [`collector`] - Event bus subscriptions

pub mod collector;
pub mod registry;
pub mod snapshot;

pub use registry::MetricsRegistry;
pub use snapshot::{LatencySummary, MetricsSnapshot, ServiceMetrics};
