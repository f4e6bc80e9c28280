use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use parking_lot::Mutex;

use crate::common::types::TxnId;
use crate::transaction::concurrency::lock_manager::LockManager;
use crate::transaction::concurrency::transaction::{IsolationLevel, Transaction, TransactionState};

/// Transaction manager - creates and tracks active transactions.
///
/// The registry is also how the lock manager resolves a transaction id to
/// the transaction it wounds, so the lock manager holds an `Arc` to it.
pub struct TransactionManager {
    /// Next transaction ID to assign; ids are ages, smaller is older
    next_txn_id: AtomicU32,

    /// Active transactions map (txn_id -> Transaction)
    active_transactions: Mutex<HashMap<TxnId, Arc<Transaction>>>,
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionManager {
    pub fn new() -> Self {
        Self {
            next_txn_id: AtomicU32::new(1),
            active_transactions: Mutex::new(HashMap::new()),
        }
    }

    /// Begin a new transaction
    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(txn_id, isolation_level));
        self.active_transactions.lock().insert(txn_id, txn.clone());
        txn
    }

    /// Get an active transaction by ID
    pub fn get_transaction(&self, txn_id: TxnId) -> Option<Arc<Transaction>> {
        self.active_transactions.lock().get(&txn_id).cloned()
    }

    /// Commit a transaction, releasing every lock it still holds
    pub fn commit(&self, txn: &Arc<Transaction>, lock_manager: &LockManager) {
        txn.set_state(TransactionState::Committed);
        Self::release_all_locks(txn, lock_manager);
        self.active_transactions.lock().remove(&txn.id());
    }

    /// Abort a transaction, releasing every lock it still holds.
    ///
    /// Also the cleanup path for wounded transactions: their queue entries
    /// stay in place until this runs, and releasing them wakes any waiter
    /// blocked behind the corpse.
    pub fn abort(&self, txn: &Arc<Transaction>, lock_manager: &LockManager) {
        txn.set_state(TransactionState::Aborted);
        Self::release_all_locks(txn, lock_manager);
        self.active_transactions.lock().remove(&txn.id());
    }

    /// Get all active transaction IDs
    pub fn active_transaction_ids(&self) -> Vec<TxnId> {
        self.active_transactions.lock().keys().copied().collect()
    }

    fn release_all_locks(txn: &Arc<Transaction>, lock_manager: &LockManager) {
        for rid in txn.locked_rids() {
            lock_manager.unlock(txn, rid);
        }
    }
}
