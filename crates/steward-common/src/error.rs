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

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StewardError {
    #[error("No available instance for microservice {0}")]
    NoAvailableInstance(String),

    #[error("Malformed snapshot for microservice {service}: {reason}")]
    MalformedSnapshot { service: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StewardError {
    pub fn malformed(service: impl Into<String>, reason: impl Into<String>) -> Self {
        StewardError::MalformedSnapshot {
            service: service.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised while loading configuration, policies or plugins.
///
/// These are fatal at startup: nothing in the call path produces them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("handler name must not be empty")]
    EmptyHandlerName,

    #[error("handler {0} is already registered")]
    DuplicateHandler(String),

    #[error("policy {policy}: handler {handler} is not registered")]
    UnknownHandler { policy: String, handler: String },

    #[error("policy {policy}: {handler} didn't implement {expected}")]
    CapabilityMismatch {
        policy: String,
        handler: String,
        expected: &'static str,
    },

    #[error("policy name must not be empty")]
    EmptyPolicyName,

    #[error("policy {0} is defined more than once")]
    DuplicatePolicy(String),

    #[error("policy {policy}: unsupported operator {operator}")]
    UnsupportedOperator { policy: String, operator: String },

    #[error("policy {policy}: invalid parameter: {reason}")]
    InvalidParameter { policy: String, reason: String },

    #[error("{kind} policies {first} and {second} overlap")]
    OverlappingPolicies {
        kind: String,
        first: String,
        second: String,
    },

    #[error("selection rule {0} is already registered")]
    DuplicateRule(String),

    #[error("unknown selection rule: {0}")]
    UnknownRule(String),

    #[error("invalid isolation settings for {scope}: {reason}")]
    InvalidIsolation { scope: String, reason: String },
}

pub type Result<T> = std::result::Result<T, StewardError>;
