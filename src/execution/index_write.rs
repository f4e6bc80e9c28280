use std::sync::Arc;
use thiserror::Error;

use crate::common::types::{IndexKey, Rid};
use crate::index::hash::{ExtendibleHashTable, HashTableError, KeyHasher};
use crate::transaction::concurrency::lock_manager::LockManager;
use crate::transaction::concurrency::transaction::{
    AbortReason, IsolationLevel, Transaction, TransactionError,
};

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),

    #[error("Hash table error: {0}")]
    HashTable(#[from] HashTableError),
}

/// Write path shared by the insert-style executors: lock the row, maintain
/// the index, release early when the isolation level allows it.
pub struct IndexWriter<H: KeyHasher> {
    table: Arc<ExtendibleHashTable<H>>,
    lock_manager: Arc<LockManager>,
}

impl<H: KeyHasher> IndexWriter<H> {
    pub fn new(table: Arc<ExtendibleHashTable<H>>, lock_manager: Arc<LockManager>) -> Self {
        Self {
            table,
            lock_manager,
        }
    }

    /// Insert an index entry under an exclusive row lock.
    ///
    /// A transaction already holding the row shared upgrades instead of
    /// re-locking. Below RepeatableRead the lock is released as soon as the
    /// index write is done; a failed lock call surfaces as a deadlock
    /// abort.
    pub fn insert(&self, txn: &Transaction, key: IndexKey, rid: Rid) -> Result<(), ExecutionError> {
        let locked = if txn.is_shared_locked(rid) {
            self.lock_manager.lock_upgrade(txn, rid)?
        } else {
            self.lock_manager.lock_exclusive(txn, rid)?
        };
        if !locked {
            return Err(TransactionError::Aborted {
                txn_id: txn.id(),
                reason: AbortReason::Deadlock,
            }
            .into());
        }

        self.table.insert(key, rid)?;

        if txn.isolation_level() != IsolationLevel::RepeatableRead
            && !self.lock_manager.unlock(txn, rid)
        {
            return Err(TransactionError::Aborted {
                txn_id: txn.id(),
                reason: AbortReason::Deadlock,
            }
            .into());
        }

        Ok(())
    }
}
