use std::{path::PathBuf, time::Duration};

use crate::orchestrator::Phase;

/// A fatal run error. Any of these aborts the enclosing phase and the whole run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("{phase}: worker {worker} failed to open its store: {source}")]
    Open {
        phase: Phase,
        worker: u64,
        #[source]
        source: BackendError,
    },
    #[error("{phase}: worker {worker} failed on {key:?}: {source}")]
    Io {
        phase: Phase,
        worker: u64,
        key: String,
        #[source]
        source: BackendError,
    },
    #[error("{phase}: worker {worker} read unexpected content for {key:?}")]
    ContentMismatch {
        phase: Phase,
        worker: u64,
        key: String,
    },
    #[error("{phase}: worker {worker} panicked")]
    WorkerPanicked { phase: Phase, worker: u64 },
    #[error("{phase}: worker {worker} interrupted")]
    Interrupted { phase: Phase, worker: u64 },
    #[error("{phase}: did not complete within {timeout:?}")]
    PhaseTimedOut { phase: Phase, timeout: Duration },
    #[error("no batch timings to aggregate")]
    InsufficientData,
}

impl Error {
    /// Errors that are a consequence of another failure (or of the user
    /// stopping the run) rather than a root cause.
    pub fn is_interruption(&self) -> bool {
        matches!(self, Error::Interrupted { .. })
    }
}

/// Failure of a single backend operation.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("key not found")]
    NotFound,
    #[error("store is closed")]
    Closed,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Kv(#[from] redb::Error),
}

/// A setup or teardown failure. These are logged and the run continues.
#[derive(Debug, thiserror::Error)]
pub enum CleanupError {
    #[error("{backend}: failed to close store of worker {worker}: {source}")]
    Close {
        backend: &'static str,
        worker: u64,
        #[source]
        source: BackendError,
    },
    #[error("failed to remove {path:?}: {source}")]
    RemoveDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to create {path:?}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
