use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use super::{KvBatch, KvError, KvOp, KvStore};

/// In-memory ordered store used by tests and ephemeral nodes.
#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    closed: AtomicBool,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_open(&self) -> Result<(), KvError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(KvError::Closed);
        }
        Ok(())
    }
}

impl KvStore for MemoryKv {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        self.check_open()?;
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KvError> {
        self.check_open()?;
        self.entries.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), KvError> {
        self.check_open()?;
        self.entries.write().remove(key);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvError> {
        self.check_open()?;
        let entries = self.entries.read();
        Ok(entries
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    fn write(&self, batch: KvBatch) -> Result<(), KvError> {
        self.check_open()?;
        let mut entries = self.entries.write();
        for op in batch.ops() {
            match op {
                KvOp::Put { key, value } => {
                    entries.insert(key.clone(), value.clone());
                }
                KvOp::Delete { key } => {
                    entries.remove(key);
                }
            }
        }
        Ok(())
    }

    fn close(&self) -> Result<(), KvError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_delete() {
        let kv = MemoryKv::new();
        kv.put(b"a", b"1").unwrap();
        assert_eq!(kv.get(b"a").unwrap(), Some(b"1".to_vec()));
        kv.delete(b"a").unwrap();
        assert_eq!(kv.get(b"a").unwrap(), None);
        // deleting again is a no-op
        kv.delete(b"a").unwrap();
    }

    #[test]
    fn scan_prefix_is_ordered_and_bounded() {
        let kv = MemoryKv::new();
        kv.put(b"s/2", b"b").unwrap();
        kv.put(b"s/1", b"a").unwrap();
        kv.put(b"t/1", b"x").unwrap();
        let scanned = kv.scan_prefix(b"s/").unwrap();
        assert_eq!(
            scanned,
            vec![
                (b"s/1".to_vec(), b"a".to_vec()),
                (b"s/2".to_vec(), b"b".to_vec()),
            ]
        );
    }

    #[test]
    fn batch_applies_in_order() {
        let kv = MemoryKv::new();
        let mut batch = KvBatch::new();
        batch.put(b"k".to_vec(), b"1".to_vec());
        batch.delete(b"k".to_vec());
        batch.put(b"k".to_vec(), b"2".to_vec());
        kv.write(batch).unwrap();
        assert_eq!(kv.get(b"k").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn closed_store_rejects_operations() {
        let kv = MemoryKv::new();
        kv.close().unwrap();
        assert!(matches!(kv.get(b"a"), Err(KvError::Closed)));
        assert!(matches!(kv.put(b"a", b"1"), Err(KvError::Closed)));
    }
}
