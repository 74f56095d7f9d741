//! Storage engines under test.
//!
//! A [`Backend`] is a factory that hands each worker its own [`Store`] handle.
//! Workers only ever talk to the handle; the handle is closed exactly once by
//! the worker that opened it.

use std::{path::Path, sync::Arc};

use crate::BackendError;

pub mod fs;
pub mod kv;

pub use fs::FsBackend;
pub use kv::KvBackend;

pub trait Backend: Send + Sync + 'static {
    /// Short name used in logs, errors and reports.
    fn name(&self) -> &'static str;

    /// Open the store handle for `worker`.
    ///
    /// Called on a blocking thread.
    fn open(&self, worker: u64) -> Result<Arc<dyn Store>, BackendError>;
}

/// One worker's view of a storage engine.
///
/// Operations of a batch run concurrently on the blocking pool, hence `Sync`.
pub trait Store: Send + Sync + 'static {
    fn write(&self, key: &str, value: &[u8]) -> Result<(), BackendError>;
    fn read(&self, key: &str) -> Result<Vec<u8>, BackendError>;
    /// Release the handle. Calling it again is a no-op.
    fn close(&self) -> Result<(), BackendError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Kv,
    Fs,
}

impl BackendKind {
    /// Order in which a full run exercises the backends.
    pub const ALL: [BackendKind; 2] = [BackendKind::Kv, BackendKind::Fs];

    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::Kv => kv::NAME,
            BackendKind::Fs => fs::NAME,
        }
    }

    /// Directory under the run's base path that holds this backend's data.
    pub fn data_dir(&self, base_path: &Path) -> std::path::PathBuf {
        match self {
            BackendKind::Kv => base_path.join("kv"),
            BackendKind::Fs => base_path.join("fs"),
        }
    }

    pub fn backend(&self, base_path: &Path) -> Arc<dyn Backend> {
        let dir = self.data_dir(base_path);
        match self {
            BackendKind::Kv => Arc::new(KvBackend::new(dir)),
            BackendKind::Fs => Arc::new(FsBackend::new(dir)),
        }
    }
}

/// Key of the record with global index `index`.
///
/// Write and read phases derive keys the same way, so a read phase addresses
/// exactly the records the preceding write phase produced.
pub fn record_key(index: u64) -> String {
    format!("key_{index}")
}
