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

use crate::error::InvocationError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use steward_common::{
    Clock, ConfigError, EventBus, Instance, Locality, RequestMarker, Result, StewardConfig,
    SystemClock,
};
use steward_discovery::{
    EndpointDirectory, EndpointSnapshot, IsolationTracker, LoadBalancer, Outcome, RuleRegistry,
    SelectionRule, ZoneAndRegion,
};
use steward_governance::{Admission, CapabilityRegistry, Governance};
use steward_metrics::{MetricsRegistry, MetricsSnapshot};
use tracing::info;

/// Builds a [`Steward`] context.
///
/// # Example
///
/// ```
/// use steward::StewardBuilder;
/// use steward_common::StewardConfig;
/// use steward_governance::CapabilityRegistry;
///
/// let steward = StewardBuilder::new(StewardConfig::default())
///     .with_capabilities(CapabilityRegistry::new())
///     .build()
///     .unwrap();
/// assert!(steward.directory().services().is_empty());
/// ```
pub struct StewardBuilder {
    config: StewardConfig,
    capabilities: CapabilityRegistry,
    rules: Vec<Arc<dyn SelectionRule>>,
    clock: Option<Arc<dyn Clock>>,
}

impl StewardBuilder {
    pub fn new(config: StewardConfig) -> Self {
        Self {
            config,
            capabilities: CapabilityRegistry::new(),
            rules: Vec::new(),
            clock: None,
        }
    }

    /// Custom predicates and profile extractors referenced by the policies.
    pub fn with_capabilities(mut self, capabilities: CapabilityRegistry) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Adds a selection rule next to the built-in ones.
    pub fn with_rule(mut self, rule: Arc<dyn SelectionRule>) -> Self {
        self.rules.push(rule);
        self
    }

    /// Time source for isolation timers and token refill.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Validates the configuration and wires every component.
    ///
    /// # Errors
    ///
    /// Any [`ConfigError`]; nothing is constructed when configuration is
    /// invalid.
    pub fn build(self) -> std::result::Result<Steward, ConfigError> {
        let config = self.config;
        config.validate()?;

        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock::new()));

        let mut rules = RuleRegistry::with_defaults(&config.load_balance.session_header);
        for rule in self.rules {
            rules.register(rule)?;
        }

        let governance = Governance::from_config(&config, &self.capabilities, clock.clone())?;

        let bus = Arc::new(EventBus::new());
        let directory = Arc::new(EndpointDirectory::new(bus.clone()));
        let tracker = Arc::new(IsolationTracker::new(&config, bus.clone(), clock.clone()));
        let balancer = LoadBalancer::new(
            directory.clone(),
            tracker.clone(),
            &rules,
            &config.load_balance,
        )?;

        tracker.attach(&directory, &bus);
        let metrics = Arc::new(MetricsRegistry::new());
        metrics.attach(&bus);

        info!(
            "Steward ready: rule {}, {} policies, rules {:?}",
            config.load_balance.rule,
            governance.policies().len(),
            rules.names()
        );

        Ok(Steward {
            config,
            clock,
            bus,
            directory,
            tracker,
            balancer,
            governance,
            metrics,
        })
    }
}

/// Per-process context owning every steward component.
///
/// Components are shared through the context rather than globals; tests
/// build as many independent contexts as they need.
pub struct Steward {
    config: StewardConfig,
    clock: Arc<dyn Clock>,
    bus: Arc<EventBus>,
    directory: Arc<EndpointDirectory>,
    tracker: Arc<IsolationTracker>,
    balancer: LoadBalancer,
    governance: Governance,
    metrics: Arc<MetricsRegistry>,
}

impl Steward {
    pub fn builder(config: StewardConfig) -> StewardBuilder {
        StewardBuilder::new(config)
    }

    /// A context with no custom capabilities or rules.
    pub fn new(config: StewardConfig) -> std::result::Result<Self, ConfigError> {
        StewardBuilder::new(config).build()
    }

    /// Replaces the endpoints of `service`.
    pub fn refresh(&self, service: &str, groups: ZoneAndRegion) -> Result<()> {
        self.directory.refresh(service, groups)
    }

    /// Replaces the endpoints of `service`, grouping `instances` by locality.
    pub fn refresh_instances(
        &self,
        service: &str,
        local: &Locality,
        instances: Vec<Instance>,
    ) -> Result<()> {
        self.directory.refresh_instances(service, local, instances)
    }

    pub fn endpoints(&self, service: &str) -> Arc<EndpointSnapshot> {
        self.directory.get(service)
    }

    /// Picks an instance of `service`.
    ///
    /// # Errors
    ///
    /// [`steward_common::StewardError::NoAvailableInstance`]; the attempt is
    /// counted in the metrics.
    pub fn choose(&self, service: &str, marker: Option<&RequestMarker>) -> Result<Arc<Instance>> {
        self.balancer.choose(service, marker).inspect_err(|_| {
            self.metrics.record_unavailable(service);
        })
    }

    /// Reports how a call to `instance` went.
    pub fn report_outcome(&self, instance: &Instance, outcome: Outcome, latency: Duration) {
        self.tracker.report_outcome(instance, outcome, latency);
        self.metrics.record_call(
            &instance.service_name,
            outcome == Outcome::Success,
            latency,
        );
    }

    /// Runs admission control for `marker`. Throttling is counted per
    /// policy and never reported as a call failure.
    pub fn admit(&self, marker: &RequestMarker) -> Admission {
        let admission = self.governance.admit(marker);
        if let Admission::Throttled { policy, .. } = &admission {
            self.metrics.record_throttled(policy);
        }
        admission
    }

    /// Performs one governed call to `service`.
    ///
    /// The call is admitted, an instance is chosen, `call` runs against it,
    /// and its outcome and latency are reported. A throttled call never
    /// reaches an instance and is not reported as a failure.
    ///
    /// # Arguments
    ///
    /// * `service` - Microservice to call
    /// * `marker` - Request attributes; its service name defaults to `service`
    /// * `call` - Performs the call against the chosen instance
    pub async fn invoke<T, E, F, Fut>(
        &self,
        service: &str,
        marker: &RequestMarker,
        call: F,
    ) -> std::result::Result<T, InvocationError<E>>
    where
        F: FnOnce(Arc<Instance>) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let admission = if marker.service_name.is_some() {
            self.admit(marker)
        } else {
            self.admit(&marker.clone().with_service_name(service))
        };
        if let Admission::Throttled {
            policy,
            retry_after,
        } = admission
        {
            return Err(InvocationError::Throttled {
                policy,
                retry_after,
            });
        }

        let instance = self.choose(service, Some(marker))?;
        let started = self.clock.now_nanos();
        let result = call(instance.clone()).await;
        let latency = Duration::from_nanos(self.clock.now_nanos().saturating_sub(started));

        match result {
            Ok(value) => {
                self.report_outcome(&instance, Outcome::Success, latency);
                Ok(value)
            }
            Err(error) => {
                self.report_outcome(&instance, Outcome::Failure, latency);
                Err(InvocationError::Call {
                    instance: instance.instance_id.clone(),
                    error,
                })
            }
        }
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn config(&self) -> &StewardConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn directory(&self) -> &Arc<EndpointDirectory> {
        &self.directory
    }

    pub fn tracker(&self) -> &Arc<IsolationTracker> {
        &self.tracker
    }

    pub fn balancer(&self) -> &LoadBalancer {
        &self.balancer
    }

    pub fn governance(&self) -> &Governance {
        &self.governance
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }
}
