//! Transaction trait for atomic storage operations.
//!
//! # Transaction Semantics
//!
//! - **Atomicity**: All operations in a transaction either succeed together or fail together
//! - **Read-your-writes**: Reads within a transaction see pending writes
//! - **Buffering**: Writes are buffered until commit
//! - **Preconditions**: Conditional writes are checked at commit time, under the backend's write
//!   lock
//!
//! # Example
//!
//! ```
//! use tessera_storage::{MemoryBackend, StorageBackend};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let backend = MemoryBackend::new();
//! backend.set(b"index/abc".to_vec(), b"record-1".to_vec()).await.unwrap();
//!
//! // Consume the index entry only if it still points at record-1.
//! let mut txn = backend.transaction().await.unwrap();
//! txn.compare_and_delete(b"index/abc".to_vec(), b"record-1".to_vec()).unwrap();
//! txn.set(b"index/def".to_vec(), b"record-2".to_vec());
//! txn.commit().await.unwrap();
//!
//! assert!(backend.get(b"index/abc").await.unwrap().is_none());
//! # });
//! ```

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StorageResult;

/// Transaction handle for atomic multi-operation commits.
///
/// A transaction buffers operations until [`commit`](Transaction::commit)
/// is called, at which point all operations are applied atomically.
///
/// # Concurrency
///
/// Transactions implement optimistic concurrency control through their
/// conditional operations. If any precondition registered with
/// [`compare_and_set`](Transaction::compare_and_set) or
/// [`compare_and_delete`](Transaction::compare_and_delete) no longer holds at
/// commit time, the commit fails with
/// [`StorageError::Conflict`](crate::StorageError::Conflict) and nothing is applied.
#[async_trait]
pub trait Transaction: Send {
    /// Gets a value within the transaction.
    ///
    /// Pending writes from this transaction are visible; otherwise the value
    /// is read from the underlying storage.
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>>;

    /// Buffers an unconditional set operation.
    fn set(&mut self, key: Vec<u8>, value: Vec<u8>);

    /// Buffers an unconditional delete operation.
    fn delete(&mut self, key: Vec<u8>);

    /// Buffers a compare-and-set operation within the transaction.
    ///
    /// # Arguments
    ///
    /// * `key` - The key to update
    /// * `expected` - The expected current value. Use `None` to require the key doesn't exist.
    /// * `new_value` - The new value to set if the comparison succeeds
    ///
    /// # Note
    ///
    /// The condition is checked at commit time, not when this method is called.
    /// If the condition fails at commit time, the entire transaction fails.
    fn compare_and_set(
        &mut self,
        key: Vec<u8>,
        expected: Option<Vec<u8>>,
        new_value: Vec<u8>,
    ) -> StorageResult<()>;

    /// Buffers a conditional delete within the transaction.
    ///
    /// The key is removed only if it still holds exactly `expected` at commit
    /// time. A missing key or a different value fails the whole commit with
    /// [`StorageError::Conflict`](crate::StorageError::Conflict).
    fn compare_and_delete(&mut self, key: Vec<u8>, expected: Vec<u8>) -> StorageResult<()>;

    /// Commits all buffered operations atomically.
    ///
    /// Conditional operations are verified first; if all hold, conditional
    /// writes are applied followed by the plain sets and deletes.
    ///
    /// # Errors
    ///
    /// - [`StorageError::Conflict`](crate::StorageError::Conflict) if a precondition failed
    /// - Other [`StorageError`](crate::StorageError) variants on backend failures
    async fn commit(self: Box<Self>) -> StorageResult<()>;
}
