//! Prometheus text exposition format.
//!
//! Per-worker gauges come from the ledger snapshot and the metrics board;
//! process-wide counters (dispatch totals, scaling actions) are passed in
//! by the caller.

use std::collections::HashMap;

use spillway_core::{InstanceMetrics, WorkerId};
use spillway_ledger::LedgerSnapshot;

/// A named monotonically increasing counter.
#[derive(Debug, Clone)]
pub struct CounterSample {
    pub name: &'static str,
    pub help: &'static str,
    pub value: u64,
}

/// Render worker gauges and counters into Prometheus text format.
///
/// Workers are emitted in id order, so output is stable between scrapes.
pub fn render_prometheus(
    ledger: &LedgerSnapshot,
    metrics: &HashMap<WorkerId, InstanceMetrics>,
    counters: &[CounterSample],
) -> String {
    let mut out = String::new();

    out.push_str("# HELP spillway_workers Registered workers.\n");
    out.push_str("# TYPE spillway_workers gauge\n");
    out.push_str(&format!("spillway_workers {}\n", ledger.loads.len()));

    out.push_str("# HELP spillway_worker_in_flight Jobs in flight on a worker.\n");
    out.push_str("# TYPE spillway_worker_in_flight gauge\n");
    for (id, load) in &ledger.loads {
        out.push_str(&format!(
            "spillway_worker_in_flight{{worker=\"{}\"}} {}\n",
            id, load.in_flight
        ));
    }

    out.push_str(
        "# HELP spillway_worker_pending_cost_ms Estimated cost of in-flight jobs in milliseconds.\n",
    );
    out.push_str("# TYPE spillway_worker_pending_cost_ms gauge\n");
    for (id, load) in &ledger.loads {
        out.push_str(&format!(
            "spillway_worker_pending_cost_ms{{worker=\"{}\"}} {:.2}\n",
            id, load.pending_cost_ms
        ));
    }

    out.push_str("# HELP spillway_worker_cpu_percent Last reported CPU utilization.\n");
    out.push_str("# TYPE spillway_worker_cpu_percent gauge\n");
    for id in ledger.loads.keys() {
        let cpu = metrics.get(id).map(|m| m.cpu_percent).unwrap_or(0.0);
        out.push_str(&format!(
            "spillway_worker_cpu_percent{{worker=\"{}\"}} {:.2}\n",
            id, cpu
        ));
    }

    out.push_str("# HELP spillway_worker_draining Whether a worker is draining (1) or not (0).\n");
    out.push_str("# TYPE spillway_worker_draining gauge\n");
    for (id, load) in &ledger.loads {
        out.push_str(&format!(
            "spillway_worker_draining{{worker=\"{}\"}} {}\n",
            id,
            u8::from(load.draining)
        ));
    }

    for c in counters {
        out.push_str(&format!("# HELP {} {}\n", c.name, c.help));
        out.push_str(&format!("# TYPE {} counter\n", c.name));
        out.push_str(&format!("{} {}\n", c.name, c.value));
    }

    out
}
