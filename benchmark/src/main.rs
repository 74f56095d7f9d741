use std::{num::NonZeroU64, path::PathBuf, process::ExitCode, time::Duration};

use anyhow::Context;
use blobbench::{config, BenchmarkConfig, Orchestrator};
use clap::Parser;
use report::{BenchmarkOutput, PhaseSummary};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod report;

/// Write and read blob-sized records through plain files and an embedded
/// key-value store, then compare latency and throughput.
#[derive(serde::Serialize, clap::Parser, Clone)]
struct Args {
    /// Records written (and then read) per backend.
    #[clap(long, default_value = "1000")]
    records: NonZeroU64,
    /// Size of every record in bytes, unless --min-size/--max-size say otherwise.
    #[clap(long, default_value_t = config::DEFAULT_RECORD_SIZE)]
    record_size: usize,
    /// Smallest record in bytes; lengths are uniform in [min-size, max-size].
    #[clap(long)]
    min_size: Option<usize>,
    /// Largest record in bytes.
    #[clap(long)]
    max_size: Option<usize>,
    #[clap(long, default_value = "4")]
    workers: NonZeroU64,
    /// Operations each worker issues concurrently.
    #[clap(long, default_value = "20")]
    batch_size: NonZeroU64,
    #[clap(long, default_value = config::DEFAULT_BASE_PATH)]
    base_path: PathBuf,
    #[clap(long, value_enum, default_value = "no-validate")]
    validate: ValidateMode,
    /// Seed for record lengths and content.
    #[clap(long, default_value_t = 0)]
    seed: u64,
    /// Give up on a phase that takes longer than this, e.g. `30s` or `5m`.
    #[clap(long, value_parser = humantime::parse_duration)]
    phase_timeout: Option<Duration>,
    /// Leave the written records on disk after the run.
    #[clap(long)]
    keep_data: bool,
    #[clap(long, default_value = "benchmark.output.json")]
    output: PathBuf,
}

#[derive(Clone, Copy, clap::ValueEnum, serde::Serialize)]
enum ValidateMode {
    NoValidate,
    Validate,
}

impl Args {
    fn config(&self) -> Result<BenchmarkConfig, blobbench::Error> {
        BenchmarkConfig::builder()
            .total_records(self.records.get())
            .record_size_range(
                self.min_size.unwrap_or(self.record_size),
                self.max_size.unwrap_or(self.record_size),
            )
            .worker_count(self.workers.get())
            .batch_size(self.batch_size.get())
            .base_path(&self.base_path)
            .verify_reads(match self.validate {
                ValidateMode::NoValidate => false,
                ValidateMode::Validate => true,
            })
            .seed(self.seed)
            .phase_timeout(self.phase_timeout)
            .build()
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_file(true)
        .with_line_number(true)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("benchmark aborted: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> anyhow::Result<()> {
    let config = args.config().context("invalid configuration")?;
    info!(
        records = config.total_records(),
        min_record_size = config.min_record_size(),
        max_record_size = config.max_record_size(),
        workers = config.worker_count(),
        batch_size = config.batch_size(),
        base_path = ?config.base_path(),
        "starting benchmark"
    );

    let cancel = CancellationToken::new();
    ctrlc::set_handler({
        let cancel = cancel.clone();
        move || {
            if cancel.is_cancelled() {
                error!("ctrl-c while already stopping, aborting");
                std::process::abort();
            }
            info!("ctrl-c, stopping after the current batches");
            cancel.cancel();
        }
    })
    .context("install ctrl-c handler")?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("build tokio runtime")?;
    let orchestrator = Orchestrator::with_cancellation(config, cancel);
    let results = rt.block_on(orchestrator.run());
    if args.keep_data {
        info!(base_path = ?args.base_path, "keeping benchmark data");
    } else {
        for e in orchestrator.remove_data() {
            warn!("{e}");
        }
    }
    let results = results?;

    let phases = results
        .iter()
        .map(PhaseSummary::new)
        .collect::<Result<Vec<_>, _>>()?;
    println!("{}", report::render(orchestrator.config(), &phases));

    let output = BenchmarkOutput {
        args: args.clone(),
        phases,
    };
    info!("writing results to {:?}", args.output);
    let json = serde_json::to_string_pretty(&output).context("serialize results")?;
    std::fs::write(&args.output, json)
        .with_context(|| format!("write results to {:?}", args.output))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_library_defaults() {
        let args = Args::try_parse_from(["benchmark"]).unwrap();
        let config = args.config().unwrap();
        let defaults = BenchmarkConfig::builder().build().unwrap();
        assert_eq!(config.total_records(), defaults.total_records());
        assert_eq!(config.min_record_size(), defaults.min_record_size());
        assert_eq!(config.max_record_size(), defaults.max_record_size());
        assert_eq!(config.worker_count(), defaults.worker_count());
        assert_eq!(config.batch_size(), defaults.batch_size());
        assert_eq!(config.base_path(), defaults.base_path());
        assert!(!config.verify_reads());
        assert_eq!(args.output, PathBuf::from("benchmark.output.json"));
    }

    #[test]
    fn size_range_and_flags() {
        let args = Args::try_parse_from([
            "benchmark",
            "--records",
            "50",
            "--min-size",
            "100",
            "--max-size",
            "4096",
            "--validate",
            "validate",
            "--phase-timeout",
            "1m 30s",
        ])
        .unwrap();
        let config = args.config().unwrap();
        assert_eq!(config.total_records(), 50);
        assert_eq!(config.min_record_size(), 100);
        assert_eq!(config.max_record_size(), 4096);
        assert!(config.verify_reads());
        assert_eq!(config.phase_timeout(), Some(Duration::from_secs(90)));
    }

    #[test]
    fn min_size_above_default_max_is_rejected() {
        let args = Args::try_parse_from(["benchmark", "--min-size", "2048"]).unwrap();
        assert!(matches!(
            args.config(),
            Err(blobbench::Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn end_to_end_run_writes_results_and_removes_data() {
        use std::ffi::OsStr;

        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("data");
        let output = dir.path().join("out.json");
        let args = Args::try_parse_from([
            OsStr::new("benchmark"),
            OsStr::new("--records"),
            OsStr::new("40"),
            OsStr::new("--workers"),
            OsStr::new("3"),
            OsStr::new("--batch-size"),
            OsStr::new("8"),
            OsStr::new("--validate"),
            OsStr::new("validate"),
            OsStr::new("--base-path"),
            base.as_os_str(),
            OsStr::new("--output"),
            output.as_os_str(),
        ])
        .unwrap();
        run(&args).unwrap();

        let json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&output).unwrap()).unwrap();
        let phases: Vec<_> = json["phases"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["phase"].as_str().unwrap().to_owned())
            .collect();
        assert_eq!(phases, ["redb-write", "redb-read", "fs-write", "fs-read"]);
        assert_eq!(json["args"]["records"], 40);
        // ranges of 14, 14 and 12 records in batches of 8: two batches each
        let bins = json["phases"][0]["batch_latency_distribution"]["bin_counts"]
            .as_array()
            .unwrap();
        assert_eq!(bins.iter().map(|c| c.as_u64().unwrap()).sum::<u64>(), 6);
        assert!(!base.join("kv").exists());
        assert!(!base.join("fs").exists());
    }

    #[test]
    fn zero_workers_rejected_at_parse_time() {
        assert!(Args::try_parse_from(["benchmark", "--workers", "0"]).is_err());
    }
}
