//! Key-value backends consumed by the base state.
//!
//! The store only asks for point reads/writes, ordered prefix scans and
//! atomic batch application. [`MemoryKv`] backs tests and ephemeral nodes,
//! [`LmdbKv`] is the durable backend, and [`VersionedKv`] layers a pending
//! write batch over either so the base state can commit or abort a whole
//! block worth of writes at once.

use std::fmt::Debug;

use thiserror::Error;

mod lmdb_store;
mod memory;
mod versioned;

pub use lmdb_store::LmdbKv;
pub use memory::MemoryKv;
pub use versioned::VersionedKv;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("lmdb error: {0}")]
    Lmdb(#[from] lmdb::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database closed")]
    Closed,
}

/// One buffered mutation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KvOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// An ordered batch of mutations applied atomically by [`KvStore::write`].
#[derive(Clone, Debug, Default)]
pub struct KvBatch {
    ops: Vec<KvOp>,
}

impl KvBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push(KvOp::Put { key, value });
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.ops.push(KvOp::Delete { key });
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn ops(&self) -> &[KvOp] {
        &self.ops
    }
}

/// Minimal ordered key-value store.
///
/// Implementations must scan prefixes in ascending byte order and apply
/// batches atomically: after a crash either every op of a batch is visible
/// or none is. Deleting an absent key is a no-op.
pub trait KvStore: Debug + Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError>;

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KvError>;

    fn delete(&self, key: &[u8]) -> Result<(), KvError>;

    /// All pairs whose key starts with `prefix`, ascending by key.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvError>;

    /// Apply the batch atomically.
    fn write(&self, batch: KvBatch) -> Result<(), KvError>;

    /// Release resources. Further calls fail with [`KvError::Closed`].
    fn close(&self) -> Result<(), KvError>;
}
