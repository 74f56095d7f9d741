//! Turns per-batch timings into latency percentiles and throughput.

use std::time::Duration;

use hdrhistogram::Histogram;

use crate::Error;

/// Slowest operation latency the per-operation histogram can tell apart.
const MAX_TRACKED_LATENCY: Duration = Duration::from_secs(60);

/// Empty histogram every per-operation histogram is cloned from.
static LATENCY_HISTOGRAM_TEMPLATE: once_cell::sync::Lazy<Histogram<u64>> =
    once_cell::sync::Lazy::new(|| {
        Histogram::new_with_bounds(1, MAX_TRACKED_LATENCY.as_nanos() as u64, 3)
            .expect("constant histogram bounds are valid")
    });

pub(crate) fn new_latency_histogram() -> Histogram<u64> {
    LATENCY_HISTOGRAM_TEMPLATE.clone()
}

/// Record `latency` in nanoseconds, clamping values beyond the tracked range.
pub(crate) fn record_latency(histo: &mut Histogram<u64>, latency: Duration) {
    histo.saturating_record(u64::try_from(latency.as_nanos()).unwrap_or(u64::MAX));
}

/// Summary of one phase's batch timings. Latencies are in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stats {
    pub avg_ms: f64,
    pub median_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub stddev_ms: f64,
    /// `total_ops` divided by the *sum of batch timings*, not by the phase's
    /// wall-clock duration. Batches of different workers overlap in time, so
    /// this is not what a stopwatch around the phase would give.
    pub throughput_ops_per_sec: f64,
    pub batches: usize,
}

/// Aggregate batch timings (seconds) of a phase that issued `total_ops` operations.
///
/// Percentiles use nearest rank on the ascending samples: `sorted[floor(n * p)]`,
/// clamped to the last sample.
pub fn aggregate(timings: &[f64], total_ops: u64) -> Result<Stats, Error> {
    if timings.is_empty() {
        return Err(Error::InsufficientData);
    }
    let mut sorted = timings.to_vec();
    sorted.sort_by(f64::total_cmp);

    let n = sorted.len();
    // summing in sorted order keeps the result independent of input order
    let sum: f64 = sorted.iter().sum();
    let avg = sum / n as f64;
    let stddev = if n > 1 {
        let var = sorted.iter().map(|t| (t - avg).powi(2)).sum::<f64>() / (n - 1) as f64;
        var.sqrt()
    } else {
        0.0
    };

    Ok(Stats {
        avg_ms: avg * 1000.0,
        median_ms: sorted[n / 2] * 1000.0,
        p95_ms: nearest_rank(&sorted, 0.95) * 1000.0,
        p99_ms: nearest_rank(&sorted, 0.99) * 1000.0,
        stddev_ms: stddev * 1000.0,
        throughput_ops_per_sec: total_ops as f64 / sum,
        batches: n,
    })
}

fn nearest_rank(sorted: &[f64], p: f64) -> f64 {
    let idx = ((sorted.len() as f64 * p).floor() as usize).min(sorted.len() - 1);
    sorted[idx]
}
