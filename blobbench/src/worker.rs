//! A worker runs one phase over its assigned index range, one batch at a time.

use std::{ops::Range, sync::Arc, time::Instant};

use rand::{Rng, RngCore, SeedableRng};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    backend::{record_key, Backend, Store},
    orchestrator::{OpKind, Phase},
    partition::WorkAssignment,
    stats::{new_latency_histogram, record_latency},
    BenchmarkConfig, CleanupError, Error,
};

/// What a worker hands back to the orchestrator when it is done.
pub struct WorkerOutput {
    pub worker_id: u64,
    /// Elapsed seconds of each batch, in execution order.
    pub batch_timings: Vec<f64>,
    /// Latency of every individual operation.
    pub op_latencies: hdrhistogram::Histogram<u64>,
}

/// Run `phase` for the records in `assignment`.
///
/// The store handle is opened before the first batch and closed when this
/// function returns, errors and cancellation included.
#[tracing::instrument(skip_all, level = "debug", fields(phase = %phase, worker = assignment.worker_id))]
pub async fn run(
    assignment: WorkAssignment,
    phase: Phase,
    backend: Arc<dyn Backend>,
    config: Arc<BenchmarkConfig>,
    cancel: CancellationToken,
) -> Result<WorkerOutput, Error> {
    let worker = assignment.worker_id;
    let store = tokio::task::spawn_blocking(move || backend.open(worker))
        .await
        .map_err(|_| Error::WorkerPanicked { phase, worker })?
        .map_err(|source| Error::Open {
            phase,
            worker,
            source,
        })?;
    // only fires if this task is dropped mid-phase; otherwise the store is
    // closed on the blocking pool below
    let guard = scopeguard::guard(Arc::clone(&store), move |store| {
        close_store(&*store, phase, worker)
    });

    let result = run_batches(&store, assignment, phase, &config, &cancel).await;

    drop(scopeguard::ScopeGuard::into_inner(guard));
    if tokio::task::spawn_blocking(move || close_store(&*store, phase, worker))
        .await
        .is_err()
    {
        warn!(%phase, worker, "closing the store panicked");
    }
    result
}

async fn run_batches(
    store: &Arc<dyn Store>,
    assignment: WorkAssignment,
    phase: Phase,
    config: &BenchmarkConfig,
    cancel: &CancellationToken,
) -> Result<WorkerOutput, Error> {
    let worker = assignment.worker_id;
    let mut output = WorkerOutput {
        worker_id: worker,
        batch_timings: Vec::new(),
        op_latencies: new_latency_histogram(),
    };
    debug!(range = ?assignment.range(), "starting");
    for batch in batches(assignment.range(), config.batch_size()) {
        if cancel.is_cancelled() {
            return Err(Error::Interrupted { phase, worker });
        }
        run_batch(store, phase, worker, batch, config, &mut output).await?;
    }
    debug!(batches = output.batch_timings.len(), "done");
    Ok(output)
}

fn close_store(store: &dyn Store, phase: Phase, worker: u64) {
    if let Err(source) = store.close() {
        let e = CleanupError::Close {
            backend: phase.backend,
            worker,
            source,
        };
        warn!("{e}");
    }
}

/// Consecutive sub-ranges of at most `batch_size` indices.
fn batches(range: Range<u64>, batch_size: u64) -> impl Iterator<Item = Range<u64>> {
    let end = range.end;
    range
        .step_by(batch_size as usize)
        .map(move |start| start..start.saturating_add(batch_size).min(end))
}

enum Operation {
    Write(Vec<u8>),
    Read,
}

struct OpOutcome {
    index: u64,
    key: String,
    result: Result<Option<Vec<u8>>, crate::BackendError>,
}

/// Issue every operation of `batch` concurrently and record how long the
/// whole batch took.
///
/// The timing is recorded even if operations fail; the first failure (by
/// index) is returned only after every operation of the batch has finished.
async fn run_batch(
    store: &Arc<dyn Store>,
    phase: Phase,
    worker: u64,
    batch: Range<u64>,
    config: &BenchmarkConfig,
    output: &mut WorkerOutput,
) -> Result<(), Error> {
    // generate payloads up front so it doesn't count towards the batch time
    let ops: Vec<(u64, String, Operation)> = batch
        .map(|index| {
            let op = match phase.op {
                OpKind::Write => Operation::Write(record_value(config, index)),
                OpKind::Read => Operation::Read,
            };
            (index, record_key(index), op)
        })
        .collect();

    let start = Instant::now();
    let tasks = ops.into_iter().map(|(index, key, op)| {
        let store = Arc::clone(store);
        tokio::task::spawn_blocking(move || {
            let op_start = Instant::now();
            let result = match op {
                Operation::Write(value) => store.write(&key, &value).map(|()| None),
                Operation::Read => store.read(&key).map(Some),
            };
            (
                op_start.elapsed(),
                OpOutcome { index, key, result },
            )
        })
    });
    let joined = futures::future::join_all(tasks).await;
    output.batch_timings.push(start.elapsed().as_secs_f64());

    let mut first_error = None;
    for joined in joined {
        let error = match joined {
            Err(_) => Some(Error::WorkerPanicked { phase, worker }),
            Ok((latency, outcome)) => {
                record_latency(&mut output.op_latencies, latency);
                check_outcome(outcome, phase, worker, config).err()
            }
        };
        if first_error.is_none() {
            first_error = error;
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn check_outcome(
    outcome: OpOutcome,
    phase: Phase,
    worker: u64,
    config: &BenchmarkConfig,
) -> Result<(), Error> {
    let OpOutcome { index, key, result } = outcome;
    match result {
        Err(source) => Err(Error::Io {
            phase,
            worker,
            key,
            source,
        }),
        Ok(Some(value)) if config.verify_reads() => {
            if value == record_value(config, index) {
                Ok(())
            } else {
                Err(Error::ContentMismatch { phase, worker, key })
            }
        }
        Ok(_) => Ok(()),
    }
}

/// Content of record `index`.
///
/// Deterministic in `(seed, index)`, so a read phase can regenerate what the
/// write phase stored. The length is uniform in the configured size range.
pub fn record_value(config: &BenchmarkConfig, index: u64) -> Vec<u8> {
    let seed = config.seed() ^ index.wrapping_mul(0x9e37_79b9_7f4a_7c15);
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let len = rng.gen_range(config.min_record_size()..=config.max_record_size());
    let mut value = vec![0; len];
    rng.fill_bytes(&mut value);
    value
}
