use std::{path::PathBuf, sync::Arc};

use parking_lot::RwLock;
use redb::{Database, Durability, ReadableTable, TableDefinition};
use tracing::debug;

use crate::{
    backend::{Backend, Store},
    BackendError,
};

pub(crate) const NAME: &str = "redb";

const RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("records");
const DB_FILE: &str = "records.redb";

/// Embedded ordered key-value store, one database per worker.
///
/// Each worker gets its own directory so workers never contend on the store's
/// single writer.
pub struct KvBackend {
    dir: PathBuf,
}

impl KvBackend {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn worker_dir(&self, worker: u64) -> PathBuf {
        self.dir.join(format!("worker_{worker}"))
    }
}

impl Backend for KvBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn open(&self, worker: u64) -> Result<Arc<dyn Store>, BackendError> {
        let dir = self.worker_dir(worker);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(DB_FILE);
        debug!(?path, "opening store");
        let db = create_with_table(&path)?;
        Ok(Arc::new(KvStore {
            db: RwLock::new(Some(db)),
        }))
    }
}

fn create_with_table(path: &std::path::Path) -> Result<Database, redb::Error> {
    let db = Database::create(path)?;
    // the table must exist before the first read transaction opens it
    let txn = db.begin_write()?;
    txn.open_table(RECORDS)?;
    txn.commit()?;
    Ok(db)
}

struct KvStore {
    /// `None` once closed.
    db: RwLock<Option<Database>>,
}

impl KvStore {
    fn put(db: &Database, key: &str, value: &[u8]) -> Result<(), redb::Error> {
        let mut txn = db.begin_write()?;
        // no fsync per record, same as the filesystem backend
        txn.set_durability(Durability::None);
        {
            let mut table = txn.open_table(RECORDS)?;
            table.insert(key, value)?;
        }
        txn.commit()?;
        Ok(())
    }

    fn get(db: &Database, key: &str) -> Result<Option<Vec<u8>>, redb::Error> {
        let txn = db.begin_read()?;
        let table = txn.open_table(RECORDS)?;
        let value = table.get(key)?.map(|guard| guard.value().to_vec());
        Ok(value)
    }

    /// A durable commit persists every preceding non-durable one.
    fn flush(db: &Database) -> Result<(), redb::Error> {
        let txn = db.begin_write()?;
        txn.commit()?;
        Ok(())
    }
}

impl Store for KvStore {
    fn write(&self, key: &str, value: &[u8]) -> Result<(), BackendError> {
        let guard = self.db.read();
        let db = guard.as_ref().ok_or(BackendError::Closed)?;
        Ok(Self::put(db, key, value)?)
    }

    fn read(&self, key: &str) -> Result<Vec<u8>, BackendError> {
        let guard = self.db.read();
        let db = guard.as_ref().ok_or(BackendError::Closed)?;
        Self::get(db, key)?.ok_or(BackendError::NotFound)
    }

    fn close(&self) -> Result<(), BackendError> {
        let Some(db) = self.db.write().take() else {
            return Ok(());
        };
        Self::flush(&db)?;
        drop(db);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workers_get_separate_databases() {
        let dir = tempfile::tempdir().unwrap();
        let backend = KvBackend::new(dir.path().to_owned());
        let a = backend.open(0).unwrap();
        let b = backend.open(1).unwrap();
        a.write("key_0", b"from worker 0").unwrap();
        assert!(matches!(b.read("key_0"), Err(BackendError::NotFound)));
        a.close().unwrap();
        b.close().unwrap();
        assert!(dir.path().join("worker_0").join(DB_FILE).exists());
        assert!(dir.path().join("worker_1").join(DB_FILE).exists());
    }

    #[test]
    fn non_durable_writes_survive_close_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let backend = KvBackend::new(dir.path().to_owned());
        let store = backend.open(0).unwrap();
        for i in 0..50u64 {
            store.write(&format!("key_{i}"), &i.to_le_bytes()).unwrap();
        }
        store.close().unwrap();

        let store = backend.open(0).unwrap();
        for i in 0..50u64 {
            assert_eq!(store.read(&format!("key_{i}")).unwrap(), i.to_le_bytes());
        }
        store.close().unwrap();
    }

    #[test]
    fn use_after_close_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = KvBackend::new(dir.path().to_owned()).open(0).unwrap();
        store.close().unwrap();
        assert!(matches!(store.write("key_0", b"x"), Err(BackendError::Closed)));
        assert!(matches!(store.read("key_0"), Err(BackendError::Closed)));
    }

    #[test]
    fn concurrent_writers_on_one_handle() {
        let dir = tempfile::tempdir().unwrap();
        let store = KvBackend::new(dir.path().to_owned()).open(0).unwrap();
        std::thread::scope(|scope| {
            for t in 0..4u64 {
                let store = Arc::clone(&store);
                scope.spawn(move || {
                    for i in 0..25 {
                        store.write(&format!("key_{}", t * 100 + i), b"v").unwrap();
                    }
                });
            }
        });
        assert_eq!(store.read("key_324").unwrap(), b"v");
        store.close().unwrap();
    }
}
