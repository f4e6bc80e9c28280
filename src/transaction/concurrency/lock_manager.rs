use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use log::debug;
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::common::types::{Rid, TxnId};
use crate::transaction::concurrency::transaction::{
    AbortReason, IsolationLevel, Transaction, TransactionError, TransactionState,
};
use crate::transaction::concurrency::transaction_manager::TransactionManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// One transaction's standing request for a lock on a rid
#[derive(Debug, Clone)]
pub struct LockRequest {
    pub txn_id: TxnId,
    pub mode: LockMode,
    pub granted: bool,
}

impl LockRequest {
    fn new(txn_id: TxnId, mode: LockMode) -> Self {
        Self {
            txn_id,
            mode,
            granted: false,
        }
    }
}

/// Request queue for a single rid. The condvar is shared out so waiters
/// can sleep on it after releasing their borrow of the queue.
struct LockRequestQueue {
    requests: VecDeque<LockRequest>,
    upgrading: Option<TxnId>,
    cv: Arc<Condvar>,
}

impl Default for LockRequestQueue {
    fn default() -> Self {
        Self {
            requests: VecDeque::new(),
            upgrading: None,
            cv: Arc::new(Condvar::new()),
        }
    }
}

type LockTable = HashMap<Rid, LockRequestQueue>;

/// Outcome of a grant check: whether the caller must keep waiting, and
/// which younger transactions it wounded along the way
struct GrantCheck {
    must_wait: bool,
    wounded: Vec<TxnId>,
}

/// Row-level two-phase-locking coordinator with wound-wait deadlock
/// prevention.
///
/// Smaller transaction ids are older. An older transaction never waits for
/// a younger *waiter*: the younger conflicting request ahead of it is
/// wounded (its transaction is marked aborted and every queue it sits in
/// is broadcast, so it wakes wherever it sleeps). A younger *holder* is
/// wounded too, but keeps blocking the older request until its entry
/// leaves the queue — grants follow lock release order.
pub struct LockManager {
    txn_manager: Arc<TransactionManager>,
    state: Mutex<LockTable>,
}

impl LockManager {
    pub fn new(txn_manager: Arc<TransactionManager>) -> Self {
        Self {
            txn_manager,
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Take a shared lock on `rid`.
    ///
    /// Returns `Ok(false)` if the transaction is (or becomes) aborted, or
    /// requests shared locks under ReadUncommitted, which disallows them.
    pub fn lock_shared(&self, txn: &Transaction, rid: Rid) -> Result<bool, TransactionError> {
        if txn.state() == TransactionState::Aborted {
            return Ok(false);
        }

        // Read-uncommitted readers take no shared locks at all
        if txn.isolation_level() == IsolationLevel::ReadUncommitted {
            txn.set_state(TransactionState::Aborted);
            return Ok(false);
        }

        if txn.state() != TransactionState::Growing {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionError::Aborted {
                txn_id: txn.id(),
                reason: AbortReason::LockOnShrinking,
            });
        }

        if txn.is_shared_locked(rid) {
            return Ok(true);
        }

        let mut table = self.state.lock();
        table
            .entry(rid)
            .or_default()
            .requests
            .push_back(LockRequest::new(txn.id(), LockMode::Shared));
        txn.shared_lock_set().lock().insert(rid);

        self.wait_for_grant(txn, rid, table)
    }

    /// Take an exclusive lock on `rid`
    pub fn lock_exclusive(&self, txn: &Transaction, rid: Rid) -> Result<bool, TransactionError> {
        if txn.state() == TransactionState::Aborted {
            return Ok(false);
        }

        if txn.state() != TransactionState::Growing {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionError::Aborted {
                txn_id: txn.id(),
                reason: AbortReason::LockOnShrinking,
            });
        }

        if txn.is_exclusive_locked(rid) {
            return Ok(true);
        }

        let mut table = self.state.lock();
        table
            .entry(rid)
            .or_default()
            .requests
            .push_back(LockRequest::new(txn.id(), LockMode::Exclusive));
        txn.exclusive_lock_set().lock().insert(rid);

        self.wait_for_grant(txn, rid, table)
    }

    /// Promote an already-held shared lock to exclusive.
    ///
    /// At most one transaction may be upgrading per rid; a second upgrader
    /// aborts with `UpgradeConflict`. The upgrade waits until no other
    /// granted request remains on the queue, wounding younger ones.
    pub fn lock_upgrade(&self, txn: &Transaction, rid: Rid) -> Result<bool, TransactionError> {
        if txn.state() == TransactionState::Aborted {
            return Ok(false);
        }

        if txn.state() != TransactionState::Growing {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionError::Aborted {
                txn_id: txn.id(),
                reason: AbortReason::UpgradeConflict,
            });
        }

        if txn.is_exclusive_locked(rid) {
            return Ok(true);
        }

        let mut table = self.state.lock();
        {
            let queue = table.entry(rid).or_default();
            if queue.upgrading.is_some() {
                drop(table);
                txn.set_state(TransactionState::Aborted);
                return Err(TransactionError::Aborted {
                    txn_id: txn.id(),
                    reason: AbortReason::UpgradeConflict,
                });
            }
            queue.upgrading = Some(txn.id());
        }

        loop {
            let check = self.check_upgrade(txn, &table[&rid]);
            self.wound_all(&table, &check.wounded);
            if !check.must_wait {
                break;
            }
            let cv = table[&rid].cv.clone();
            cv.wait(&mut table);
            if txn.state() == TransactionState::Aborted {
                debug!("txn {} wounded while upgrading {}", txn.id(), rid);
                return Ok(false);
            }
        }

        let queue = table.get_mut(&rid).expect("upgrading queue exists");
        queue.upgrading = None;
        // Promote the existing entry in place
        for request in queue.requests.iter_mut() {
            if request.txn_id == txn.id() {
                request.granted = true;
                request.mode = LockMode::Exclusive;
                break;
            }
        }
        drop(table);

        txn.shared_lock_set().lock().remove(&rid);
        txn.exclusive_lock_set().lock().insert(rid);
        Ok(true)
    }

    /// Release whichever lock `txn` holds on `rid`.
    ///
    /// Returns false when no lock is held. Under RepeatableRead the first
    /// unlock ends the growing phase; the weaker levels release locks
    /// eagerly and keep growing.
    pub fn unlock(&self, txn: &Transaction, rid: Rid) -> bool {
        if !txn.is_shared_locked(rid) && !txn.is_exclusive_locked(rid) {
            return false;
        }

        let mut table = self.state.lock();
        let found = match table.get_mut(&rid) {
            Some(queue) => {
                if queue.upgrading == Some(txn.id()) {
                    queue.upgrading = None;
                }
                match queue.requests.iter().position(|r| r.txn_id == txn.id()) {
                    Some(pos) => {
                        queue.requests.remove(pos);
                        queue.cv.notify_all();
                        true
                    }
                    None => false,
                }
            }
            None => false,
        };
        drop(table);

        if !found {
            return false;
        }

        if txn.state() == TransactionState::Growing
            && txn.isolation_level() == IsolationLevel::RepeatableRead
        {
            txn.set_state(TransactionState::Shrinking);
        }

        txn.shared_lock_set().lock().remove(&rid);
        txn.exclusive_lock_set().lock().remove(&rid);
        true
    }

    /// Block until the grant predicate clears, then mark the caller's
    /// request granted. Wakes on every broadcast of this rid's queue and
    /// bails out if the caller was wounded in the meantime.
    fn wait_for_grant(
        &self,
        txn: &Transaction,
        rid: Rid,
        mut table: MutexGuard<'_, LockTable>,
    ) -> Result<bool, TransactionError> {
        loop {
            let check = self.check_grant(txn, &table[&rid]);
            self.wound_all(&table, &check.wounded);
            if !check.must_wait {
                break;
            }
            let cv = table[&rid].cv.clone();
            cv.wait(&mut table);
            if txn.state() == TransactionState::Aborted {
                debug!("txn {} wounded while waiting on {}", txn.id(), rid);
                return Ok(false);
            }
        }

        let queue = table.get_mut(&rid).expect("waiter's queue exists");
        for request in queue.requests.iter_mut() {
            if request.txn_id == txn.id() {
                request.granted = true;
            }
        }
        debug!("txn {} granted lock on {}", txn.id(), rid);
        Ok(true)
    }

    /// Wound-wait grant predicate for a fresh lock request.
    ///
    /// Grant immediately when the request heads the queue, or when it is
    /// shared and a shared batch heads the queue. Otherwise every younger
    /// conflicting request ahead is marked for wounding, and the caller
    /// waits for older conflicting requests and for any conflicting entry
    /// that is still granted.
    fn check_grant(&self, txn: &Transaction, queue: &LockRequestQueue) -> GrantCheck {
        let txn_id = txn.id();
        let pos = queue
            .requests
            .iter()
            .position(|r| r.txn_id == txn_id)
            .expect("waiting transaction has a queue entry");
        let self_mode = queue.requests[pos].mode;

        let head = &queue.requests[0];
        if head.txn_id == txn_id
            || (self_mode == LockMode::Shared && head.mode == LockMode::Shared)
        {
            return GrantCheck {
                must_wait: false,
                wounded: Vec::new(),
            };
        }

        let mut check = GrantCheck {
            must_wait: false,
            wounded: Vec::new(),
        };
        for request in queue.requests.iter().take(pos) {
            let conflicts =
                self_mode == LockMode::Exclusive || request.mode == LockMode::Exclusive;
            if !conflicts {
                continue;
            }
            if request.txn_id > txn_id {
                check.wounded.push(request.txn_id);
                if request.granted {
                    check.must_wait = true;
                }
            } else {
                check.must_wait = true;
            }
        }
        check
    }

    /// Grant predicate for an upgrade: every request other than the
    /// upgrader's own conflicts with the exclusive promotion, so wait
    /// while any of them is granted (or older), wounding the younger ones.
    fn check_upgrade(&self, txn: &Transaction, queue: &LockRequestQueue) -> GrantCheck {
        let txn_id = txn.id();
        let mut check = GrantCheck {
            must_wait: false,
            wounded: Vec::new(),
        };

        for request in queue.requests.iter() {
            if request.txn_id == txn_id {
                continue;
            }
            if request.txn_id > txn_id {
                check.wounded.push(request.txn_id);
                if request.granted {
                    check.must_wait = true;
                }
            } else {
                check.must_wait = true;
            }
        }
        check
    }

    /// Abort every transaction on the wound list and wake it wherever it
    /// sleeps: a victim may be blocked on a different rid's condvar, so
    /// every queue holding one of its requests is broadcast.
    fn wound_all(&self, table: &LockTable, victims: &[TxnId]) {
        let mut flipped = Vec::new();
        for &victim_id in victims {
            if let Some(victim) = self.txn_manager.get_transaction(victim_id) {
                if victim.state() != TransactionState::Aborted {
                    debug!("wound-wait aborts txn {}", victim_id);
                    victim.set_state(TransactionState::Aborted);
                    flipped.push(victim_id);
                }
            }
        }
        if flipped.is_empty() {
            return;
        }

        for queue in table.values() {
            if queue
                .requests
                .iter()
                .any(|r| flipped.contains(&r.txn_id))
            {
                queue.cv.notify_all();
            }
        }
    }
}
