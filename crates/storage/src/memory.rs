//! In-memory storage backend implementation.
//!
//! [`MemoryBackend`] keeps all data in a [`BTreeMap`] behind a
//! [`parking_lot::RwLock`]. It is the backend used by tests and by
//! single-process deployments that do not need persistence.
//!
//! # Example
//!
//! ```
//! use tessera_storage::{MemoryBackend, StorageBackend};
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = MemoryBackend::new();
//!
//!     backend.set(b"greeting".to_vec(), b"hello".to_vec()).await.unwrap();
//!     let value = backend.get(b"greeting").await.unwrap();
//!
//!     assert_eq!(value.unwrap().as_ref(), b"hello");
//! }
//! ```
//!
//! # Limitations
//!
//! - Data is not persisted; all data is lost when the process exits
//! - Transactions are not isolated from each other until commit; only their conditional
//!   operations protect against concurrent writers

use std::{
    collections::BTreeMap,
    ops::{Bound, RangeBounds},
    sync::Arc,
};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;

use crate::{
    backend::StorageBackend,
    error::{StorageError, StorageResult},
    transaction::Transaction,
    types::KeyValue,
};

/// In-memory storage backend using [`BTreeMap`].
///
/// # Cloning
///
/// `MemoryBackend` is cheaply cloneable via [`Arc`]. All clones share the
/// same underlying data store.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    data: Arc<RwLock<BTreeMap<Vec<u8>, Bytes>>>,
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend").field("len", &self.data.read().len()).finish()
    }
}

impl MemoryBackend {
    /// Creates a new, empty in-memory storage backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of keys currently stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns `true` if no keys are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    #[tracing::instrument(level = "debug", skip_all)]
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        let data = self.data.read();
        Ok(data.get(key).cloned())
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn set(&self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()> {
        let mut data = self.data.write();
        data.insert(key, Bytes::from(value));
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn compare_and_set(
        &self,
        key: &[u8],
        expected: Option<&[u8]>,
        new_value: Vec<u8>,
    ) -> StorageResult<()> {
        let mut data = self.data.write();

        if !matches_expected(expected, data.get(key)) {
            return Err(StorageError::Conflict);
        }

        data.insert(key.to_vec(), Bytes::from(new_value));
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn delete(&self, key: &[u8]) -> StorageResult<()> {
        let mut data = self.data.write();
        data.remove(key);
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn get_range<R>(&self, range: R) -> StorageResult<Vec<KeyValue>>
    where
        R: RangeBounds<Vec<u8>> + Send,
    {
        let data = self.data.read();

        let start = match range.start_bound() {
            Bound::Included(b) => Bound::Included(b.as_slice()),
            Bound::Excluded(b) => Bound::Excluded(b.as_slice()),
            Bound::Unbounded => Bound::Unbounded,
        };

        let end = match range.end_bound() {
            Bound::Included(b) => Bound::Included(b.as_slice()),
            Bound::Excluded(b) => Bound::Excluded(b.as_slice()),
            Bound::Unbounded => Bound::Unbounded,
        };

        let results: Vec<KeyValue> = data
            .range::<[u8], _>((start, end))
            .map(|(k, v)| KeyValue::new(Bytes::copy_from_slice(k), v.clone()))
            .collect();

        Ok(results)
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn transaction(&self) -> StorageResult<Box<dyn Transaction>> {
        Ok(Box::new(MemoryTransaction::new(self.clone())))
    }
}

fn matches_expected(expected: Option<&[u8]>, current: Option<&Bytes>) -> bool {
    match (expected, current) {
        (None, None) => true,
        (Some(exp), Some(cur)) => exp == &cur[..],
        _ => false,
    }
}

/// A conditional operation to be verified at commit time.
///
/// `new_value == None` is a conditional delete.
#[derive(Debug, Clone)]
struct ConditionalOp {
    key: Vec<u8>,
    expected: Option<Vec<u8>>,
    new_value: Option<Vec<u8>>,
}

/// In-memory transaction implementation.
///
/// Buffers writes and deletes until commit, providing read-your-writes
/// semantics within the transaction.
struct MemoryTransaction {
    backend: MemoryBackend,
    pending_writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    pending_conditions: Vec<ConditionalOp>,
}

impl MemoryTransaction {
    fn new(backend: MemoryBackend) -> Self {
        Self { backend, pending_writes: BTreeMap::new(), pending_conditions: Vec::new() }
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        if let Some(value) = self.pending_writes.get(key) {
            return Ok(value.as_ref().map(|v| Bytes::copy_from_slice(v)));
        }

        self.backend.get(key).await
    }

    fn set(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.pending_writes.insert(key, Some(value));
    }

    fn delete(&mut self, key: Vec<u8>) {
        self.pending_writes.insert(key, None);
    }

    fn compare_and_set(
        &mut self,
        key: Vec<u8>,
        expected: Option<Vec<u8>>,
        new_value: Vec<u8>,
    ) -> StorageResult<()> {
        self.pending_conditions.push(ConditionalOp { key, expected, new_value: Some(new_value) });
        Ok(())
    }

    fn compare_and_delete(&mut self, key: Vec<u8>, expected: Vec<u8>) -> StorageResult<()> {
        self.pending_conditions.push(ConditionalOp {
            key,
            expected: Some(expected),
            new_value: None,
        });
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn commit(self: Box<Self>) -> StorageResult<()> {
        let mut data = self.backend.data.write();

        // Every precondition is checked before anything is written.
        for op in &self.pending_conditions {
            if !matches_expected(op.expected.as_deref(), data.get(&op.key)) {
                tracing::debug!("transaction precondition failed");
                return Err(StorageError::Conflict);
            }
        }

        for op in self.pending_conditions {
            match op.new_value {
                Some(v) => {
                    data.insert(op.key, Bytes::from(v));
                },
                None => {
                    data.remove(&op.key);
                },
            }
        }

        for (key, value) in self.pending_writes {
            match value {
                Some(v) => {
                    data.insert(key, Bytes::from(v));
                },
                None => {
                    data.remove(&key);
                },
            }
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_basic_operations() {
        let backend = MemoryBackend::new();

        backend.set(b"key1".to_vec(), b"value1".to_vec()).await.unwrap();
        let value = backend.get(b"key1").await.unwrap();
        assert_eq!(value, Some(Bytes::from("value1")));

        backend.delete(b"key1").await.unwrap();
        let value = backend.get(b"key1").await.unwrap();
        assert_eq!(value, None);
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_range_operations() {
        let backend = MemoryBackend::new();

        backend.set(b"a".to_vec(), b"1".to_vec()).await.unwrap();
        backend.set(b"b".to_vec(), b"2".to_vec()).await.unwrap();
        backend.set(b"c".to_vec(), b"3".to_vec()).await.unwrap();

        let range = backend.get_range(b"a".to_vec()..b"c".to_vec()).await.unwrap();
        assert_eq!(range.len(), 2);
        assert_eq!(range[0].key, Bytes::from("a"));
        assert_eq!(range[1].key, Bytes::from("b"));
    }

    #[tokio::test]
    async fn test_compare_and_set_insert_if_absent() {
        let backend = MemoryBackend::new();

        backend.compare_and_set(b"lock", None, b"one".to_vec()).await.unwrap();
        let second = backend.compare_and_set(b"lock", None, b"two".to_vec()).await;

        assert!(matches!(second, Err(StorageError::Conflict)));
        assert_eq!(backend.get(b"lock").await.unwrap(), Some(Bytes::from("one")));
    }

    #[tokio::test]
    async fn test_transaction_read_your_writes() {
        let backend = MemoryBackend::new();
        backend.set(b"k".to_vec(), b"old".to_vec()).await.unwrap();

        let mut txn = backend.transaction().await.unwrap();
        txn.set(b"k".to_vec(), b"new".to_vec());
        assert_eq!(txn.get(b"k").await.unwrap(), Some(Bytes::from("new")));
        txn.delete(b"k".to_vec());
        assert_eq!(txn.get(b"k").await.unwrap(), None);

        // Nothing visible outside until commit.
        assert_eq!(backend.get(b"k").await.unwrap(), Some(Bytes::from("old")));
        txn.commit().await.unwrap();
        assert_eq!(backend.get(b"k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_compare_and_delete_applies_when_value_matches() {
        let backend = MemoryBackend::new();
        backend.set(b"idx".to_vec(), b"rec-1".to_vec()).await.unwrap();

        let mut txn = backend.transaction().await.unwrap();
        txn.compare_and_delete(b"idx".to_vec(), b"rec-1".to_vec()).unwrap();
        txn.commit().await.unwrap();

        assert_eq!(backend.get(b"idx").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_failed_condition_applies_nothing() {
        let backend = MemoryBackend::new();
        backend.set(b"idx".to_vec(), b"rec-2".to_vec()).await.unwrap();

        let mut txn = backend.transaction().await.unwrap();
        txn.set(b"other".to_vec(), b"x".to_vec());
        txn.compare_and_set(b"fresh".to_vec(), None, b"y".to_vec()).unwrap();
        txn.compare_and_delete(b"idx".to_vec(), b"rec-1".to_vec()).unwrap();

        let result = txn.commit().await;
        assert!(matches!(result, Err(StorageError::Conflict)));

        assert_eq!(backend.get(b"other").await.unwrap(), None);
        assert_eq!(backend.get(b"fresh").await.unwrap(), None);
        assert_eq!(backend.get(b"idx").await.unwrap(), Some(Bytes::from("rec-2")));
    }

    #[tokio::test]
    async fn test_compare_and_delete_missing_key_conflicts() {
        let backend = MemoryBackend::new();

        let mut txn = backend.transaction().await.unwrap();
        txn.compare_and_delete(b"gone".to_vec(), b"v".to_vec()).unwrap();

        assert!(matches!(txn.commit().await, Err(StorageError::Conflict)));
    }

    #[tokio::test]
    async fn test_clones_share_data() {
        let backend = MemoryBackend::new();
        let clone = backend.clone();

        backend.set(b"shared".to_vec(), b"1".to_vec()).await.unwrap();
        assert_eq!(clone.get(b"shared").await.unwrap(), Some(Bytes::from("1")));
        assert_eq!(clone.len(), 1);
    }
}
