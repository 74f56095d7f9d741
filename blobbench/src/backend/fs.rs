use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use crate::{
    backend::{Backend, Store},
    BackendError,
};

pub(crate) const NAME: &str = "fs";

/// One file per record, all workers sharing a single directory.
pub struct FsBackend {
    dir: PathBuf,
}

impl FsBackend {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

impl Backend for FsBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn open(&self, _worker: u64) -> Result<Arc<dyn Store>, BackendError> {
        std::fs::create_dir_all(&self.dir)?;
        Ok(Arc::new(FsStore {
            dir: self.dir.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

/// Holds no OS resources; `closed` only guards against use after close.
struct FsStore {
    dir: PathBuf,
    closed: AtomicBool,
}

impl FsStore {
    fn path(&self, key: &str) -> Result<PathBuf, BackendError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BackendError::Closed);
        }
        Ok(self.dir.join(key))
    }
}

impl Store for FsStore {
    fn write(&self, key: &str, value: &[u8]) -> Result<(), BackendError> {
        std::fs::write(self.path(key)?, value)?;
        Ok(())
    }

    fn read(&self, key: &str) -> Result<Vec<u8>, BackendError> {
        match std::fs::read(self.path(key)?) {
            Ok(value) => Ok(value),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(BackendError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    fn close(&self) -> Result<(), BackendError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
