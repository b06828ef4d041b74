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

use std::time::Duration;
use steward_common::StewardError;
use thiserror::Error;

/// Why a governed call did not produce a value.
///
/// `E` is the error type of the call itself.
#[derive(Debug, Error)]
pub enum InvocationError<E> {
    /// Rejected by a rate-limit policy before any instance was chosen.
    #[error("Throttled by policy {policy}, retry after {retry_after:?}")]
    Throttled { policy: String, retry_after: Duration },

    /// No instance could be chosen.
    #[error(transparent)]
    Steward(#[from] StewardError),

    /// The call reached `instance` and failed.
    #[error("Call to instance {instance} failed: {error}")]
    Call { instance: String, error: E },
}

impl<E> InvocationError<E> {
    pub fn is_throttled(&self) -> bool {
        matches!(self, InvocationError::Throttled { .. })
    }

    /// The call's own error, if the call was made.
    pub fn into_call_error(self) -> Option<E> {
        match self {
            InvocationError::Call { error, .. } => Some(error),
            _ => None,
        }
    }
}
