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

//! # Steward CLI
//!
//! Operator tooling for steward configurations and endpoint snapshots.
//!
//! ## Key Commands
//!
//! - `steward validate`: Load a configuration and its policy set, reporting
//!   configuration errors
//! - `steward simulate`: Drive concurrent calls through a context built from
//!   a configuration and a snapshot file, then print the metrics
//! - `steward inspect`: Print the normalized form of a snapshot file
//!
//! A snapshot file is the registry payload of one microservice:
//!
//! ```json
//! {
//!   "sameZone": [{ "instance_id": "i-1", "endpoint": "rest://10.0.0.1:8080" }],
//!   "sameRegion": null
//! }
//! ```

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use steward::discovery::directory::normalize;
use steward::discovery::ZoneAndRegion;
use steward::metrics::MetricsSnapshot;
use steward::{InvocationError, Steward};
use steward_common::{Instance, RequestMarker, StewardConfig};
use tokio::task::JoinSet;
use tracing::{debug, info};

/// Reads and validates a JSON configuration file.
pub fn load_config(path: impl AsRef<Path>) -> Result<StewardConfig> {
    let path = path.as_ref();
    StewardConfig::from_file(path)
        .with_context(|| format!("Failed to load configuration {}", path.display()))
}

/// Reads a snapshot file into locality groups.
pub fn load_snapshot(path: impl AsRef<Path>) -> Result<ZoneAndRegion> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("Invalid snapshot {}", path.display()))
}

/// Summary of a successfully validated configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub rule: String,
    pub rule_overrides: usize,
    pub isolation_overrides: usize,
    pub policies: Vec<String>,
}

/// Loads `config_path` and builds a context from it, which resolves every
/// policy, handler and rule reference.
pub fn validate(config_path: impl AsRef<Path>) -> Result<ValidationReport> {
    let config = load_config(config_path)?;
    let steward = Steward::new(config.clone()).context("Invalid configuration")?;
    let policies = steward
        .governance()
        .policies()
        .iter()
        .map(|policy| format!("{} ({})", policy.name, policy.kind))
        .collect();
    Ok(ValidationReport {
        rule: config.load_balance.rule.clone(),
        rule_overrides: config.load_balance.overrides.len(),
        isolation_overrides: config.isolation_overrides.len(),
        policies,
    })
}

/// Renders the normalized snapshot of `service` as JSON.
pub fn inspect(snapshot_path: impl AsRef<Path>, service: &str) -> Result<serde_json::Value> {
    let groups = load_snapshot(snapshot_path)?;
    let snapshot = normalize(service, groups)?;
    let render = |instances: &[Arc<Instance>]| -> Vec<Instance> {
        instances.iter().map(|i| Instance::clone(i)).collect()
    };
    Ok(serde_json::json!({
        "service": snapshot.service_name(),
        "sameZone": render(snapshot.same_zone()),
        "sameRegion": render(snapshot.same_region()),
        "all": render(snapshot.all()),
    }))
}

/// Parameters of a simulation run.
#[derive(Debug, Clone)]
pub struct SimulateOptions {
    pub service: String,
    pub calls: usize,
    pub concurrency: usize,
    /// Instance ids whose calls fail
    pub failing: HashSet<String>,
    pub method: String,
    pub path: String,
}

/// Outcome of a simulation run.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub metrics: MetricsSnapshot,
    /// Isolation state per instance id at the end of the run
    pub isolation: BTreeMap<String, String>,
}

/// Refreshes `service` from the snapshot and runs `options.calls` governed
/// calls spread over `options.concurrency` tasks.
pub async fn simulate(
    config: StewardConfig,
    groups: ZoneAndRegion,
    options: SimulateOptions,
) -> Result<SimulationReport> {
    let steward = Arc::new(Steward::new(config).context("Invalid configuration")?);
    steward
        .refresh(&options.service, groups)
        .context("Invalid snapshot")?;
    info!(
        "Simulating {} calls to {} over {} tasks",
        options.calls, options.service, options.concurrency
    );

    let failing = Arc::new(options.failing);
    let workers = options.concurrency.max(1);
    let mut join_set = JoinSet::new();
    for worker in 0..workers {
        let steward = steward.clone();
        let failing = failing.clone();
        let service = options.service.clone();
        let marker = RequestMarker::new(options.method.clone(), options.path.clone());
        // spread the remainder over the first workers
        let share = options.calls / workers + usize::from(worker < options.calls % workers);
        join_set.spawn(async move {
            for _ in 0..share {
                let failing = failing.clone();
                let result = steward
                    .invoke(&service, &marker, |instance| async move {
                        if failing.contains(&instance.instance_id) {
                            Err("simulated failure")
                        } else {
                            Ok(())
                        }
                    })
                    .await;
                if let Err(InvocationError::Steward(e)) = result {
                    debug!("{}", e);
                }
                tokio::task::yield_now().await;
            }
        });
    }
    while let Some(result) = join_set.join_next().await {
        result.context("Simulation task panicked")?;
    }

    let snapshot = steward.endpoints(&options.service);
    let isolation = snapshot
        .all()
        .iter()
        .map(|instance| {
            (
                instance.instance_id.clone(),
                format!("{:?}", steward.tracker().state(instance)),
            )
        })
        .collect();

    Ok(SimulationReport {
        metrics: steward.metrics_snapshot(),
        isolation,
    })
}
