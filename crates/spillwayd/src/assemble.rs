//! Wiring: turn a `SpillwayConfig` into running components.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use spillway_autoscale::{Autoscaler, CpuThresholdScaling, ScaleLimits, StandbyRegistry};
use spillway_core::SpillwayConfig;
use spillway_core::config::EstimatorKind;
use spillway_dispatch::{
    DisabledOverflow, Dispatcher, HttpForwarder, HttpOverflowInvoker, OverflowInvoker,
};
use spillway_estimator::{CostEstimator, FixedEstimator, OnlineEstimator};
use spillway_ledger::JobLedger;
use spillway_metrics::{HttpCpuSource, HttpStatsSource, InstanceMonitor, MetricsBoard};

/// Every long-lived component of the daemon.
pub struct Components {
    pub ledger: Arc<JobLedger>,
    pub board: Arc<MetricsBoard>,
    pub dispatcher: Arc<Dispatcher>,
    pub registry: Arc<StandbyRegistry>,
    pub monitor: InstanceMonitor,
    pub autoscaler: Autoscaler,
}

pub fn build_estimator(config: &SpillwayConfig) -> Arc<dyn CostEstimator> {
    let est = &config.estimator;
    match est.kind {
        EstimatorKind::Online => Arc::new(OnlineEstimator::new(est.default_cost_ms, est.window)),
        EstimatorKind::Fixed => Arc::new(FixedEstimator::new(est.default_cost_ms)),
    }
}

pub fn build_overflow(config: &SpillwayConfig) -> anyhow::Result<Arc<dyn OverflowInvoker>> {
    match &config.overflow.endpoint {
        Some(endpoint) => {
            let timeout = config.overflow_timeout()?;
            info!(%endpoint, "serverless overflow enabled");
            Ok(Arc::new(HttpOverflowInvoker::new(endpoint.clone(), timeout)))
        }
        None => {
            info!("no overflow endpoint configured; overflow disabled");
            Ok(Arc::new(DisabledOverflow))
        }
    }
}

/// Build and connect every component. Nothing is started.
///
/// The dispatcher is registered as the registry's listener, so workers
/// created later (initial activation, autoscaling) enter the ledger.
pub fn assemble(config: &SpillwayConfig) -> anyhow::Result<Components> {
    let ledger = Arc::new(JobLedger::new());
    let board = Arc::new(MetricsBoard::new());
    let estimator = build_estimator(config);
    let policy = spillway_policy::from_config(&config.policy);
    info!(
        policy = policy.name(),
        estimator = ?config.estimator.kind,
        "routing configured"
    );

    let forward_timeout = config
        .forward_timeout()
        .context("invalid dispatch.forward_timeout")?;
    let dispatcher = Arc::new(
        Dispatcher::new(
            ledger.clone(),
            estimator.clone(),
            policy,
            Arc::new(HttpForwarder::new(forward_timeout)),
            build_overflow(config)?,
            board.clone(),
        )
        .with_max_attempts(config.dispatch.max_attempts),
    );

    let registry = Arc::new(StandbyRegistry::from_config(&config.fleet));
    registry.add_listener(dispatcher.clone());

    let query_interval = config.query_interval()?;
    let monitor = InstanceMonitor::new(
        ledger.clone(),
        board.clone(),
        Arc::new(HttpCpuSource::new(
            config.monitor.cpu_path.clone(),
            query_interval,
        )),
        estimator,
        config.cpu_window()?,
        query_interval,
    )
    .with_stats(Arc::new(HttpStatsSource::new(
        config.monitor.stats_path.clone(),
        query_interval,
    )));

    let autoscaler = Autoscaler::new(
        ledger.clone(),
        board.clone(),
        registry.clone(),
        Arc::new(
            CpuThresholdScaling::new(config.autoscale.lower_cpu, config.autoscale.upper_cpu)
                .with_busy_in_flight(config.autoscale.busy_in_flight),
        ),
        ScaleLimits::from_config(config)?,
    );

    Ok(Components {
        ledger,
        board,
        dispatcher,
        registry,
        monitor,
        autoscaler,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use spillway_core::WorkerRegistry;

    #[test]
    fn fixed_estimator_from_config() {
        let config = SpillwayConfig::from_toml(
            r#"
            [estimator]
            kind = "fixed"
            default_cost_ms = 250
            "#,
        )
        .unwrap();
        let est = build_estimator(&config);
        let f = spillway_core::RequestFeatures::from_path_and_query("/x");
        assert_eq!(est.estimate(&f), 250.0);
    }

    #[tokio::test]
    async fn assembled_registry_feeds_ledger() {
        let config = SpillwayConfig::from_toml(
            r#"
            [dispatch]
            max_attempts = 5

            [policy]
            kind = "overflow_only"

            [fleet]
            initial = 1
            workers = [{ address = "127.0.0.1", port = 9001 }, { address = "127.0.0.1" }]
            "#,
        )
        .unwrap();

        let c = assemble(&config).unwrap();
        assert_eq!(c.dispatcher.max_attempts(), 5);
        assert_eq!(c.dispatcher.policy_name(), "overflow_only");

        c.registry.activate(config.fleet.initial).await.unwrap();
        let workers = c.registry.workers();
        assert_eq!(workers.len(), 1);
        assert!(c.ledger.contains(&workers[0].id));
        assert_eq!(c.registry.available(), 1);
    }
}
