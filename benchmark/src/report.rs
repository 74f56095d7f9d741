use std::{collections::HashMap, fmt, time::Duration};

use blobbench::{BenchmarkConfig, PhaseOutcome};
use itertools::Itertools;
use serde_with::serde_as;

use crate::Args;

const LATENCY_PERCENTILES: [f64; 4] = [50.0, 90.0, 99.0, 99.9];

const DISTRIBUTION_BINS: usize = 50;

fn latency_percentiles_serialize<S>(
    values: &[f64; LATENCY_PERCENTILES.len()],
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serde::Serialize::serialize(
        &LATENCY_PERCENTILES
            .iter()
            .map(|p| format!("p{p}"))
            .zip(values.iter().cloned())
            .collect::<HashMap<_, _>>(),
        serializer,
    )
}

/// Everything reported about one phase.
#[serde_as]
#[derive(serde::Serialize)]
pub(crate) struct PhaseSummary {
    phase: String,
    workers: u64,
    total_ops: u64,
    batches: usize,
    avg_ms: f64,
    median_ms: f64,
    p95_ms: f64,
    p99_ms: f64,
    stddev_ms: f64,
    /// Operations per second of summed batch time.
    throughput_ops_per_sec: f64,
    /// Operations per second of phase wall-clock time.
    wall_throughput_ops_per_sec: f64,
    #[serde_as(as = "serde_with::DurationMicroSeconds")]
    wall_time_us: Duration,
    /// Per-operation latency, not per batch.
    #[serde(serialize_with = "latency_percentiles_serialize")]
    op_latency_percentiles_us: [f64; LATENCY_PERCENTILES.len()],
    /// Batch latencies shaped for box plots and histograms.
    batch_latency_distribution: LatencyDistribution,
}

/// Five-number summary plus a fixed-bin histogram of batch latencies (ms).
#[derive(serde::Serialize, Debug, PartialEq)]
pub(crate) struct LatencyDistribution {
    min_ms: f64,
    q1_ms: f64,
    median_ms: f64,
    q3_ms: f64,
    max_ms: f64,
    /// Lower edge of the first bin; the bins span `[min_ms, max_ms]`.
    bin_start_ms: f64,
    bin_width_ms: f64,
    bin_counts: Vec<u64>,
}

impl LatencyDistribution {
    /// `timings` are in seconds and must not be empty.
    fn new(timings: &[f64]) -> Self {
        let mut sorted: Vec<f64> = timings.iter().map(|t| t * 1000.0).collect();
        sorted.sort_by(f64::total_cmp);
        let rank = |p: f64| sorted[((sorted.len() as f64 * p).floor() as usize).min(sorted.len() - 1)];
        let (min, max) = (sorted[0], sorted[sorted.len() - 1]);

        let bin_width = (max - min) / DISTRIBUTION_BINS as f64;
        let mut bin_counts = vec![0; DISTRIBUTION_BINS];
        for t in &sorted {
            let bin = if bin_width > 0.0 {
                (((t - min) / bin_width) as usize).min(DISTRIBUTION_BINS - 1)
            } else {
                0
            };
            bin_counts[bin] += 1;
        }
        LatencyDistribution {
            min_ms: min,
            q1_ms: rank(0.25),
            median_ms: rank(0.5),
            q3_ms: rank(0.75),
            max_ms: max,
            bin_start_ms: min,
            bin_width_ms: bin_width,
            bin_counts,
        }
    }
}

impl PhaseSummary {
    pub(crate) fn new(outcome: &PhaseOutcome) -> Result<Self, blobbench::Error> {
        let stats = outcome.stats()?;
        let histo = &outcome.op_latencies;
        Ok(PhaseSummary {
            phase: outcome.phase.to_string(),
            workers: outcome.workers,
            total_ops: outcome.total_ops,
            batches: stats.batches,
            avg_ms: stats.avg_ms,
            median_ms: stats.median_ms,
            p95_ms: stats.p95_ms,
            p99_ms: stats.p99_ms,
            stddev_ms: stats.stddev_ms,
            throughput_ops_per_sec: stats.throughput_ops_per_sec,
            wall_throughput_ops_per_sec: outcome.wall_throughput_ops_per_sec(),
            wall_time_us: outcome.wall_time,
            op_latency_percentiles_us: LATENCY_PERCENTILES
                .map(|p| histo.value_at_percentile(p) as f64 / 1000.0),
            batch_latency_distribution: LatencyDistribution::new(&outcome.batch_timings),
        })
    }
}

impl fmt::Display for PhaseSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} batches={} LAT(ms): avg={:.3} median={:.3} p95={:.3} p99={:.3} stddev={:.3} TP(ops/s): batch-time={:.2} wall={:.2} OP LAT(us): {}",
            self.phase,
            self.batches,
            self.avg_ms,
            self.median_ms,
            self.p95_ms,
            self.p99_ms,
            self.stddev_ms,
            self.throughput_ops_per_sec,
            self.wall_throughput_ops_per_sec,
            self.op_latency_percentiles_us
                .iter()
                .zip(LATENCY_PERCENTILES.iter())
                .map(|(v, p)| format!("p{p}={v:.0}"))
                .join(" "),
        )
    }
}

/// Human-readable report of a completed run.
pub(crate) fn render(config: &BenchmarkConfig, phases: &[PhaseSummary]) -> String {
    let sizes = if config.min_record_size() == config.max_record_size() {
        format!("{} bytes", config.min_record_size())
    } else {
        format!(
            "{}..={} bytes",
            config.min_record_size(),
            config.max_record_size()
        )
    };
    let header = format!(
        "records={} size={} workers={} batch_size={}",
        config.total_records(),
        sizes,
        config.worker_count(),
        config.batch_size(),
    );
    std::iter::once(header)
        .chain(phases.iter().map(|p| p.to_string()))
        .join("\n")
}

#[derive(serde::Serialize)]
pub(crate) struct BenchmarkOutput {
    pub(crate) args: Args,
    pub(crate) phases: Vec<PhaseSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use blobbench::{OpKind, Phase};

    fn outcome(batch_timings: Vec<f64>) -> PhaseOutcome {
        let mut op_latencies = hdrhistogram::Histogram::new_with_bounds(1, 60_000_000_000, 3).unwrap();
        for us in [100u64, 200, 300, 400] {
            op_latencies.record(us * 1000).unwrap();
        }
        PhaseOutcome {
            phase: Phase {
                backend: "fs",
                op: OpKind::Write,
            },
            workers: 2,
            total_ops: 5,
            batch_timings,
            op_latencies,
            wall_time: Duration::from_millis(750),
        }
    }

    #[test]
    fn summary_carries_the_reported_fields() {
        let summary = PhaseSummary::new(&outcome(vec![0.1, 0.2, 0.3, 0.4, 0.5])).unwrap();
        assert_eq!(summary.phase, "fs-write");
        assert_eq!(summary.batches, 5);
        assert!((summary.avg_ms - 300.0).abs() < 1e-9);
        assert!((summary.median_ms - 300.0).abs() < 1e-9);
        assert!((summary.p95_ms - 500.0).abs() < 1e-9);
        assert!((summary.p99_ms - 500.0).abs() < 1e-9);
        assert!((summary.throughput_ops_per_sec - 5.0 / 1.5).abs() < 1e-9);
        assert!((summary.wall_throughput_ops_per_sec - 5.0 / 0.75).abs() < 1e-9);
        // median op latency is 200us, within histogram precision
        assert!((summary.op_latency_percentiles_us[0] - 200.0).abs() < 1.0);

        let line = summary.to_string();
        assert!(line.starts_with("fs-write batches=5"), "{line}");
        assert!(line.contains("avg=300.000 median=300.000 p95=500.000 p99=500.000"), "{line}");
        assert!(line.contains("batch-time=3.33"), "{line}");
    }

    #[test]
    fn empty_phase_cannot_be_summarized() {
        assert!(matches!(
            PhaseSummary::new(&outcome(Vec::new())),
            Err(blobbench::Error::InsufficientData)
        ));
    }

    #[test]
    fn json_output() {
        let summary = PhaseSummary::new(&outcome(vec![0.01, 0.02])).unwrap();
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["phase"], "fs-write");
        assert_eq!(json["wall_time_us"], 750_000);
        assert!(json["op_latency_percentiles_us"]["p99.9"].is_number());
        assert!(json["throughput_ops_per_sec"].as_f64().unwrap() > 0.0);
        let dist = &json["batch_latency_distribution"];
        assert_eq!(dist["bin_counts"].as_array().unwrap().len(), DISTRIBUTION_BINS);
        assert!((dist["max_ms"].as_f64().unwrap() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn distribution_bins_cover_every_batch() {
        let timings: Vec<f64> = (1..=100).map(|ms| ms as f64 / 1000.0).collect();
        let dist = LatencyDistribution::new(&timings);
        assert_eq!(dist.bin_counts.len(), DISTRIBUTION_BINS);
        assert_eq!(dist.bin_counts.iter().sum::<u64>(), 100);
        assert!((dist.min_ms - 1.0).abs() < 1e-9);
        assert!((dist.max_ms - 100.0).abs() < 1e-9);
        assert!((dist.q1_ms - 26.0).abs() < 1e-9);
        assert!((dist.median_ms - 51.0).abs() < 1e-9);
        assert!((dist.q3_ms - 76.0).abs() < 1e-9);
        // the slowest batch lands in the last bin, not past it
        assert!(dist.bin_counts[DISTRIBUTION_BINS - 1] >= 1);
    }

    #[test]
    fn identical_timings_share_one_bin() {
        let dist = LatencyDistribution::new(&[0.004, 0.004, 0.004]);
        assert_eq!(dist.bin_width_ms, 0.0);
        assert_eq!(dist.bin_counts[0], 3);
        assert_eq!(dist.q1_ms, dist.q3_ms);
    }

    #[test]
    fn render_lists_every_phase() {
        let config = BenchmarkConfig::builder()
            .record_size_range(10, 20)
            .build()
            .unwrap();
        let phases = vec![
            PhaseSummary::new(&outcome(vec![0.1])).unwrap(),
            PhaseSummary::new(&outcome(vec![0.2])).unwrap(),
        ];
        let text = render(&config, &phases);
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("size=10..=20 bytes"), "{}", lines[0]);
        assert!(lines[1].starts_with("fs-write"));
    }
}
