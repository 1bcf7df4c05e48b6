//! Autoscaler driving a standby registry wired to a real dispatcher.

use std::sync::Arc;
use std::time::Duration;

use spillway_autoscale::{
    Autoscaler, CpuThresholdScaling, ScaleDecision, ScaleLimits, StandbyRegistry,
};
use spillway_core::WorkerRegistry;
use spillway_core::config::WorkerSlot;
use spillway_dispatch::{DisabledOverflow, Dispatcher, HttpForwarder};
use spillway_estimator::FixedEstimator;
use spillway_ledger::JobLedger;
use spillway_metrics::MetricsBoard;
use spillway_policy::OverflowOnly;

struct Fleet {
    ledger: Arc<JobLedger>,
    board: Arc<MetricsBoard>,
    registry: Arc<StandbyRegistry>,
    scaler: Autoscaler,
}

fn fleet(slots: u16, min: u32, max: u32) -> Fleet {
    let ledger = Arc::new(JobLedger::new());
    let board = Arc::new(MetricsBoard::new());
    let dispatcher = Arc::new(
        Dispatcher::new(
            ledger.clone(),
            Arc::new(FixedEstimator::new(100.0)),
            Arc::new(OverflowOnly),
            Arc::new(HttpForwarder::new(Duration::from_secs(1))),
            Arc::new(DisabledOverflow),
            board.clone(),
        )
        .with_drain_poll(Duration::from_millis(10)),
    );

    let registry = Arc::new(StandbyRegistry::new(
        (0..slots)
            .map(|i| WorkerSlot {
                address: "127.0.0.1".to_string(),
                port: 9100 + i,
            })
            .collect(),
    ));
    registry.add_listener(dispatcher);

    let scaler = Autoscaler::new(
        ledger.clone(),
        board.clone(),
        registry.clone(),
        Arc::new(CpuThresholdScaling::new(25.0, 75.0)),
        ScaleLimits {
            min_workers: min,
            max_workers: max,
            scale_out_cooldown: Duration::ZERO,
            scale_in_cooldown: Duration::ZERO,
        },
    );

    Fleet {
        ledger,
        board,
        registry,
        scaler,
    }
}

#[tokio::test]
async fn fills_minimum_then_follows_cpu() {
    let mut f = fleet(4, 1, 3);

    // Empty fleet: the floor applies before any CPU is known.
    assert_eq!(f.scaler.tick().await, ScaleDecision::ScaleOut);
    assert_eq!(f.ledger.workers().len(), 1);

    // Hot fleet grows.
    for w in f.registry.workers() {
        f.board.set_cpu(&w.id, 90.0);
    }
    assert_eq!(f.scaler.tick().await, ScaleDecision::ScaleOut);
    assert_eq!(f.ledger.workers().len(), 2);

    // Idle fleet shrinks back, never below the floor.
    for w in f.registry.workers() {
        f.board.set_cpu(&w.id, 5.0);
    }
    assert!(matches!(f.scaler.tick().await, ScaleDecision::ScaleIn(_)));
    assert_eq!(f.ledger.workers().len(), 1);
    assert_eq!(f.scaler.tick().await, ScaleDecision::NoChange);
    assert_eq!(f.registry.available(), 3);

    let counters = f.scaler.stats().snapshot();
    assert_eq!(counters.scale_outs, 2);
    assert_eq!(counters.scale_ins, 1);
}

#[tokio::test]
async fn scale_in_waits_for_in_flight_work() {
    let mut f = fleet(2, 0, 2);
    f.registry.activate(1).await.unwrap();
    let worker = f.registry.workers().remove(0);
    f.board.set_cpu(&worker.id, 1.0);

    let job = f.ledger.admit(&worker.id, 50.0).unwrap();
    let ledger = f.ledger.clone();
    let worker_id = worker.id.clone();
    let releaser = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        ledger.release(&worker_id, job.id).unwrap();
    });

    let started = std::time::Instant::now();
    assert_eq!(
        f.scaler.tick().await,
        ScaleDecision::ScaleIn(worker.id.clone())
    );
    assert!(started.elapsed() >= Duration::from_millis(90));
    assert!(!f.ledger.contains(&worker.id));
    releaser.await.unwrap();
}

#[tokio::test]
async fn exhausted_pool_counts_as_failure() {
    let mut f = fleet(0, 1, 3);
    assert_eq!(f.scaler.tick().await, ScaleDecision::ScaleOut);
    assert_eq!(f.scaler.stats().snapshot().failures, 1);
    assert!(f.ledger.workers().is_empty());
}
