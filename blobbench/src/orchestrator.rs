//! Drives phases: partition the records, fan out workers, merge what they return.

use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

use futures::{stream::FuturesUnordered, StreamExt};
use hdrhistogram::Histogram;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    backend::{Backend, BackendKind},
    partition::partition,
    stats::{aggregate, new_latency_histogram, Stats},
    worker::{self, WorkerOutput},
    BenchmarkConfig, CleanupError, Error,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Write,
    Read,
}

impl OpKind {
    /// Writes populate the records that reads then fetch.
    pub const ALL: [OpKind; 2] = [OpKind::Write, OpKind::Read];

    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::Write => "write",
            OpKind::Read => "read",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One operation kind run against one backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Phase {
    pub backend: &'static str,
    pub op: OpKind,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.backend, self.op)
    }
}

/// Everything a completed phase produced.
pub struct PhaseOutcome {
    pub phase: Phase,
    pub workers: u64,
    /// Operations the phase issued, i.e. the number of records.
    pub total_ops: u64,
    /// Batch timings in seconds, worker 0's first.
    pub batch_timings: Vec<f64>,
    pub op_latencies: Histogram<u64>,
    /// From the first worker spawned to the last worker finished.
    pub wall_time: Duration,
}

impl PhaseOutcome {
    pub fn stats(&self) -> Result<Stats, Error> {
        aggregate(&self.batch_timings, self.total_ops)
    }

    /// Operations per second of phase wall time. Unlike
    /// [`Stats::throughput_ops_per_sec`], overlapping batches are not summed.
    pub fn wall_throughput_ops_per_sec(&self) -> f64 {
        self.total_ops as f64 / self.wall_time.as_secs_f64()
    }
}

/// Outcomes of all phases of a run, in execution order.
#[derive(Default)]
pub struct ResultSet {
    phases: Vec<PhaseOutcome>,
}

impl ResultSet {
    pub fn get(&self, backend: &str, op: OpKind) -> Option<&PhaseOutcome> {
        self.phases
            .iter()
            .find(|o| o.phase.backend == backend && o.phase.op == op)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PhaseOutcome> {
        self.phases.iter()
    }

    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    fn push(&mut self, outcome: PhaseOutcome) {
        self.phases.push(outcome);
    }
}

pub struct Orchestrator {
    config: Arc<BenchmarkConfig>,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(config: BenchmarkConfig) -> Self {
        Self::with_cancellation(config, CancellationToken::new())
    }

    /// Cancelling `cancel` makes every running worker stop after its current
    /// batch and fails the phase with [`Error::Interrupted`].
    pub fn with_cancellation(config: BenchmarkConfig, cancel: CancellationToken) -> Self {
        Self {
            config: Arc::new(config),
            cancel,
        }
    }

    pub fn config(&self) -> &BenchmarkConfig {
        &self.config
    }

    /// Run the full comparison: kv-write, kv-read, fs-write, fs-read.
    ///
    /// Each phase completes before the next one starts. The first failing
    /// phase aborts the run and no results are returned.
    pub async fn run(&self) -> Result<ResultSet, Error> {
        for e in self.prepare_data_dirs() {
            warn!("{e}");
        }
        let mut results = ResultSet::default();
        for kind in BackendKind::ALL {
            let backend = kind.backend(self.config.base_path());
            for op in OpKind::ALL {
                let outcome = self.run_phase(op, Arc::clone(&backend)).await?;
                info!(
                    phase = %outcome.phase,
                    batches = outcome.batch_timings.len(),
                    wall_time = ?outcome.wall_time,
                    "phase complete"
                );
                results.push(outcome);
            }
        }
        Ok(results)
    }

    /// Run one phase across all workers and merge their timings.
    ///
    /// Every worker is awaited before an error is returned, so no store handle
    /// outlives the phase. The first failure cancels the siblings, which then
    /// stop after their current batch. Hitting the phase timeout does the same
    /// and fails the phase with [`Error::PhaseTimedOut`].
    pub async fn run_phase(
        &self,
        op: OpKind,
        backend: Arc<dyn Backend>,
    ) -> Result<PhaseOutcome, Error> {
        let phase = Phase {
            backend: backend.name(),
            op,
        };
        let cancel = self.cancel.child_token();
        // stops detached workers if the caller drops this future
        let _cancel_on_exit = cancel.clone().drop_guard();

        let assignments = partition(self.config.total_records(), self.config.worker_count())?;
        let workers = assignments.len() as u64;
        let total_ops: u64 = assignments.iter().map(|a| a.count).sum();
        info!(%phase, workers, total_ops, "phase starting");

        let start = Instant::now();
        let deadline = self
            .config
            .phase_timeout()
            .map(|timeout| (tokio::time::Instant::now() + timeout, timeout));
        let mut pending: FuturesUnordered<_> = assignments
            .into_iter()
            .map(|assignment| {
                let worker = assignment.worker_id;
                let handle = tokio::spawn(worker::run(
                    assignment,
                    phase,
                    Arc::clone(&backend),
                    Arc::clone(&self.config),
                    cancel.clone(),
                ));
                async move { (worker, handle.await) }
            })
            .collect();

        let mut outputs: Vec<WorkerOutput> = Vec::with_capacity(workers as usize);
        let mut failure: Option<Error> = None;
        let mut timed_out = None;
        loop {
            let next = match deadline {
                Some((at, timeout)) if timed_out.is_none() => {
                    match tokio::time::timeout_at(at, pending.next()).await {
                        Ok(next) => next,
                        Err(_) => {
                            warn!(%phase, ?timeout, "phase timed out, waiting for workers to stop");
                            cancel.cancel();
                            timed_out = Some(timeout);
                            continue;
                        }
                    }
                }
                _ => pending.next().await,
            };
            let Some((worker, joined)) = next else {
                break;
            };
            let result = joined.unwrap_or(Err(Error::WorkerPanicked { phase, worker }));
            match result {
                Ok(output) => outputs.push(output),
                Err(e) => {
                    cancel.cancel();
                    failure = Some(match failure.take() {
                        None => e,
                        // keep the root cause, not a sibling's interruption
                        Some(first) if first.is_interruption() && !e.is_interruption() => {
                            debug!("{first}");
                            e
                        }
                        Some(first) => {
                            debug!("{e}");
                            first
                        }
                    });
                }
            }
        }
        let wall_time = start.elapsed();
        match (failure, timed_out) {
            (Some(e), _) if !e.is_interruption() => return Err(e),
            (_, Some(timeout)) => return Err(Error::PhaseTimedOut { phase, timeout }),
            (Some(e), None) => return Err(e),
            (None, None) => {}
        }

        outputs.sort_by_key(|o| o.worker_id);
        let mut batch_timings = Vec::new();
        let mut op_latencies = new_latency_histogram();
        for output in outputs {
            batch_timings.extend(output.batch_timings);
            op_latencies += &output.op_latencies;
        }
        Ok(PhaseOutcome {
            phase,
            workers,
            total_ops,
            batch_timings,
            op_latencies,
            wall_time,
        })
    }

    /// Remove data left over from an earlier run and create the backend
    /// directories.
    pub fn prepare_data_dirs(&self) -> Vec<CleanupError> {
        let mut errors = self.remove_data();
        for kind in BackendKind::ALL {
            let path = kind.data_dir(self.config.base_path());
            if let Err(source) = std::fs::create_dir_all(&path) {
                errors.push(CleanupError::CreateDir { path, source });
            }
        }
        errors
    }

    /// Remove everything the backends stored under the base path.
    ///
    /// Only the backend directories are touched, never other content of the
    /// base path.
    pub fn remove_data(&self) -> Vec<CleanupError> {
        let mut errors = Vec::new();
        for kind in BackendKind::ALL {
            let path = kind.data_dir(self.config.base_path());
            match std::fs::remove_dir_all(&path) {
                Ok(()) => debug!(?path, "removed"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => errors.push(CleanupError::RemoveDir { path, source }),
            }
        }
        errors
    }
}
