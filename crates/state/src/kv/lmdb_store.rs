use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use lmdb::{Cursor, Database, DatabaseFlags, Environment, Transaction, WriteFlags};
use tracing::debug;

use super::{KvBatch, KvError, KvOp, KvStore};

const DEFAULT_MAP_SIZE: usize = 1 << 30; // 1 GiB

/// Durable LMDB-backed store.
///
/// A single unnamed database holds every key; LMDB's B-tree keeps keys in
/// byte order, which is what gives the staker prefixes their
/// `(priority class, next time, tx id)` scan order for free. Batches are
/// applied inside one read-write transaction, so they are atomic and a crash
/// mid-commit leaves the previous version intact.
pub struct LmdbKv {
    env: Environment,
    db: Database,
    path: PathBuf,
    closed: AtomicBool,
}

impl LmdbKv {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, KvError> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;
        let env = Environment::new()
            .set_max_dbs(1)
            .set_map_size(DEFAULT_MAP_SIZE)
            .open(path)?;
        let db = env.create_db(None, DatabaseFlags::empty())?;
        debug!(path = %path.display(), "opened lmdb environment");
        Ok(Self {
            env,
            db,
            path: path.to_path_buf(),
            closed: AtomicBool::new(false),
        })
    }

    fn check_open(&self) -> Result<(), KvError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(KvError::Closed);
        }
        Ok(())
    }
}

impl fmt::Debug for LmdbKv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LmdbKv")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl KvStore for LmdbKv {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        self.check_open()?;
        let txn = self.env.begin_ro_txn()?;
        match txn.get(self.db, &key) {
            Ok(value) => Ok(Some(value.to_vec())),
            Err(lmdb::Error::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KvError> {
        self.check_open()?;
        let mut txn = self.env.begin_rw_txn()?;
        txn.put(self.db, &key, &value, WriteFlags::empty())?;
        txn.commit()?;
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), KvError> {
        self.check_open()?;
        let mut txn = self.env.begin_rw_txn()?;
        match txn.del(self.db, &key, None) {
            Ok(()) | Err(lmdb::Error::NotFound) => {}
            Err(e) => return Err(e.into()),
        }
        txn.commit()?;
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvError> {
        self.check_open()?;
        let txn = self.env.begin_ro_txn()?;
        let mut cursor = txn.open_ro_cursor(self.db)?;
        let mut out = Vec::new();
        for (key, value) in cursor.iter_from(prefix) {
            if !key.starts_with(prefix) {
                break;
            }
            out.push((key.to_vec(), value.to_vec()));
        }
        Ok(out)
    }

    fn write(&self, batch: KvBatch) -> Result<(), KvError> {
        self.check_open()?;
        let mut txn = self.env.begin_rw_txn()?;
        for op in batch.ops() {
            match op {
                KvOp::Put { key, value } => {
                    txn.put(self.db, key, value, WriteFlags::empty())?;
                }
                KvOp::Delete { key } => match txn.del(self.db, key, None) {
                    Ok(()) | Err(lmdb::Error::NotFound) => {}
                    Err(e) => return Err(e.into()),
                },
            }
        }
        txn.commit()?;
        Ok(())
    }

    fn close(&self) -> Result<(), KvError> {
        self.closed.store(true, Ordering::Release);
        self.env.sync(true)?;
        Ok(())
    }
}
