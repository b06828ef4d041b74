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

//! Steward
//!
//! The client-side core of a microservice chassis: where to send a call,
//! whether the target is healthy enough to receive it, and whether the call
//! is admitted at all.
//!
//! A [`Steward`] context wires the components together:
//!
//! - the endpoint directory holding last-known instances per microservice
//! - the isolation tracker excluding failing instances and probing them back
//! - the load balancer choosing by locality tier and selection rule
//! - governance policies and their token buckets
//! - metrics fed by calls and by the event bus
//!
//! # Example
//!
//! ```
//! use std::convert::Infallible;
//! use steward::Steward;
//! use steward_common::{Instance, Locality, RequestMarker, StewardConfig};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let steward = Steward::new(StewardConfig::default()).unwrap();
//! steward
//!     .refresh_instances(
//!         "orders",
//!         &Locality::new("cn-north", "az1"),
//!         vec![Instance::new("orders", "i-1", "rest://10.0.0.1:8080")
//!             .with_region("cn-north")
//!             .with_zone("az1")],
//!     )
//!     .unwrap();
//!
//! let marker = RequestMarker::new("GET", "/orders/1");
//! let endpoint = steward
//!     .invoke("orders", &marker, |instance| async move {
//!         Ok::<_, Infallible>(instance.endpoint.clone())
//!     })
//!     .await
//!     .unwrap();
//! assert_eq!(endpoint, "rest://10.0.0.1:8080");
//! # });
//! ```

pub mod context;
pub mod error;

pub use context::{Steward, StewardBuilder};
pub use error::InvocationError;

pub use steward_common as common;
pub use steward_discovery as discovery;
pub use steward_governance as governance;
pub use steward_metrics as metrics;
