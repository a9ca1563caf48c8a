use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use super::{KvBatch, KvError, KvStore};

/// Pending-batch overlay over a shared [`KvStore`].
///
/// Mutations accumulate in an in-memory batch; reads see the batch merged
/// over the inner store. `commit` hands the whole batch to the inner store
/// as one atomic write and clears it, `abort` just drops it. The inner
/// store is shared (`Arc`) so a rebuild can reopen a fresh view over the
/// same backend.
#[derive(Debug)]
pub struct VersionedKv {
    inner: Arc<dyn KvStore>,
    pending: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl VersionedKv {
    pub fn new(inner: Arc<dyn KvStore>) -> Self {
        Self {
            inner,
            pending: BTreeMap::new(),
        }
    }

    pub fn inner(&self) -> Arc<dyn KvStore> {
        Arc::clone(&self.inner)
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        if let Some(entry) = self.pending.get(key) {
            return Ok(entry.clone());
        }
        self.inner.get(key)
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.pending.insert(key, Some(value));
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.pending.insert(key, None);
    }

    /// Prefix scan with the pending batch merged over the inner store.
    pub fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvError> {
        let committed = self.inner.scan_prefix(prefix)?;
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = committed.into_iter().collect();
        for (key, entry) in self
            .pending
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
        {
            match entry {
                Some(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        Ok(merged.into_iter().collect())
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Atomically flush the pending batch and open a fresh one.
    pub fn commit(&mut self) -> Result<(), KvError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let mut batch = KvBatch::new();
        for (key, entry) in std::mem::take(&mut self.pending) {
            match entry {
                Some(value) => batch.put(key, value),
                None => batch.delete(key),
            }
        }
        debug!(ops = batch.len(), "committing versioned batch");
        // A failed write leaves the inner store on its previous version;
        // the batch is already consumed, so the caller must rebuild before
        // retrying.
        self.inner.write(batch)
    }

    /// Drop every buffered mutation.
    pub fn abort(&mut self) {
        self.pending.clear();
    }

    pub fn close(&self) -> Result<(), KvError> {
        self.inner.close()
    }
}

#[cfg(test)]
mod tests {
    use super::super::MemoryKv;
    use super::*;

    fn versioned() -> VersionedKv {
        VersionedKv::new(Arc::new(MemoryKv::new()))
    }

    #[test]
    fn reads_see_pending_over_inner() {
        let mut kv = versioned();
        kv.inner().put(b"a", b"old").unwrap();
        kv.put(b"a".to_vec(), b"new".to_vec());
        assert_eq!(kv.get(b"a").unwrap(), Some(b"new".to_vec()));
        kv.delete(b"a".to_vec());
        assert_eq!(kv.get(b"a").unwrap(), None);
        // inner untouched until commit
        assert_eq!(kv.inner().get(b"a").unwrap(), Some(b"old".to_vec()));
    }

    #[test]
    fn commit_flushes_and_clears() {
        let mut kv = versioned();
        kv.put(b"a".to_vec(), b"1".to_vec());
        kv.delete(b"b".to_vec());
        kv.commit().unwrap();
        assert!(!kv.has_pending());
        assert_eq!(kv.inner().get(b"a").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn abort_drops_the_batch() {
        let mut kv = versioned();
        kv.put(b"a".to_vec(), b"1".to_vec());
        kv.abort();
        assert!(!kv.has_pending());
        assert_eq!(kv.get(b"a").unwrap(), None);
    }

    #[test]
    fn scan_merges_pending() {
        let mut kv = versioned();
        kv.inner().put(b"s/1", b"a").unwrap();
        kv.inner().put(b"s/2", b"b").unwrap();
        kv.delete(b"s/1".to_vec());
        kv.put(b"s/3".to_vec(), b"c".to_vec());
        let scanned = kv.scan_prefix(b"s/").unwrap();
        assert_eq!(
            scanned,
            vec![
                (b"s/2".to_vec(), b"b".to_vec()),
                (b"s/3".to_vec(), b"c".to_vec()),
            ]
        );
    }
}
