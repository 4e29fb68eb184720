//! Read-only view over a run's counters for `/metrics` polling.
//!
//! Reading never takes the controller's lifecycle lock and never blocks on a
//! stop in progress: the counters are atomics and the elapsed time comes from
//! the run's own clock.

use super::state::RunState;
use core::time::Duration;
use logfan_core::{BYTES_PER_GB, MetricsSnapshot};

/// Snapshot of `state`, or an all-zero snapshot if no run has started yet.
pub fn snapshot(state: Option<&RunState>) -> MetricsSnapshot {
    let Some(state) = state else {
        return MetricsSnapshot {
            uptime: format_uptime(Duration::ZERO),
            bytes_written_gb: 0.0,
            throughput_gbps: 0.0,
        };
    };

    let elapsed = state.elapsed();
    let gb = state.bytes_committed() as f64 / BYTES_PER_GB;
    let secs = elapsed.as_secs_f64();
    let throughput = if secs > 0.0 { gb / secs } else { 0.0 };

    MetricsSnapshot {
        uptime: format_uptime(elapsed),
        bytes_written_gb: gb,
        throughput_gbps: throughput,
    }
}

/// Formats `elapsed` at millisecond resolution, e.g. `1.5s` or `2m3.25s`.
pub fn format_uptime(elapsed: Duration) -> String {
    let millis = elapsed.as_millis();
    if millis == 0 {
        return "0s".to_string();
    }
    let minutes = millis / 60_000;
    let rest = Duration::from_millis((millis % 60_000) as u64);
    if minutes == 0 {
        format!("{rest:?}")
    } else if rest.is_zero() {
        format!("{minutes}m0s")
    } else {
        format!("{minutes}m{rest:?}")
    }
}
