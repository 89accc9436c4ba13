//! Wiring of the core components from a [`Config`].

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::alerts::{AlertEvaluator, AlertNotifier, builtin_rules};
use crate::clock::SharedClock;
use crate::config::{Config, ConfigError};
use crate::governance::{RateLimiter, RequestGovernor};
use crate::telemetry::{Instrumentation, MetricRegistry, ResourceMonitor};

/// Every core component, sharing one registry and clock.
#[derive(Debug, Clone)]
pub struct CoreServices {
    pub registry: Arc<MetricRegistry>,
    pub clock: SharedClock,
    pub limiter: Arc<RateLimiter>,
    pub governor: RequestGovernor,
    pub evaluator: Arc<AlertEvaluator>,
    pub resources: Arc<ResourceMonitor>,
}

impl CoreServices {
    /// Build the registry, limiter, governor, evaluator and resource monitor.
    pub fn build(
        config: &Config,
        clock: SharedClock,
        notifier: Arc<dyn AlertNotifier>,
    ) -> Result<Self, ConfigError> {
        let registry = Arc::new(MetricRegistry::new(config.metrics.registry_limits()));
        let limiter = Arc::new(RateLimiter::new(
            config.rate_limit.limiter_config(),
            clock.clone(),
            registry.clone(),
        )?);
        let instrumentation = Instrumentation::new(registry.clone(), clock.clone());
        let governor = RequestGovernor::new(limiter.clone(), instrumentation)?;
        let evaluator = Arc::new(AlertEvaluator::new(
            builtin_rules(&config.alerts),
            registry.clone(),
            clock.clone(),
            notifier,
        )?);
        let resources = Arc::new(ResourceMonitor::new(registry.clone(), clock.clone())?);
        Ok(Self {
            registry,
            clock,
            limiter,
            governor,
            evaluator,
            resources,
        })
    }

    /// Start the limiter sweep, alert evaluation and resource gauges. All stop when
    /// `shutdown` is cancelled; join the returned handles afterwards.
    pub fn spawn_background(
        &self,
        config: &Config,
        shutdown: &CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        vec![
            self.limiter
                .spawn_sweeper(config.rate_limit.sweep_interval, shutdown.clone()),
            self.evaluator
                .spawn(config.alerting.evaluation_interval, shutdown.clone()),
            self.resources
                .spawn(config.metrics.resource_interval, shutdown.clone()),
        ]
    }
}
