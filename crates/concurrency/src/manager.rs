//! Transaction manager for coordinating commit operations
//!
//! Provides atomic commit by orchestrating:
//! 1. Validation (first-committer-wins on the write-set, foreign intents)
//! 2. Version allocation
//! 3. Storage application (visibility)
//!
//! It also owns the bookkeeping shared by all transactions of one store:
//! the transaction id counter, the set of active snapshots (which bounds
//! version pruning) and the write-intent table.
//!
//! ## Commit Sequence
//!
//! ```text
//! 1. acquire commit lock
//! 2. begin_validation() - Change state to Validating
//! 3. validate_write_set() + validate_intents()
//! 4. IF conflicts: mark_aborted() and return error
//! 5. commit_version = store.current_version() + 1
//! 6. store.apply(writes, commit_version)
//! 7. mark_committed(), release commit lock
//! 8. Return Ok(commit_version)
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;

use apogy_core::{Context, Result};
use apogy_storage::VersionedStore;

use crate::transaction::{CommitError, TransactionContext};
use crate::validation::{validate_intents, validate_write_set};

/// Upper bound on a single intent wait, so cancellation is noticed
const INTENT_POLL: Duration = Duration::from_millis(10);

// ============================================================================
// IntentTable
// ============================================================================

/// Write intents: key → owning transaction
///
/// Intents are acquired in key order, so two transactions asking for
/// overlapping key sets cannot deadlock.
#[derive(Debug, Default)]
pub struct IntentTable {
    owners: Mutex<FxHashMap<Vec<u8>, u64>>,
    released: Condvar,
}

impl IntentTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire intents on `keys` for `txn_id`, waiting for other owners
    ///
    /// Returns the sorted, deduplicated list of keys now held.
    ///
    /// # Errors
    ///
    /// `Cancelled`/`DeadlineExceeded` if the context ends while waiting;
    /// intents acquired so far are released.
    pub fn acquire(&self, ctx: &Context, txn_id: u64, keys: &[Vec<u8>]) -> Result<Vec<Vec<u8>>> {
        let mut sorted: Vec<Vec<u8>> = keys.to_vec();
        sorted.sort();
        sorted.dedup();

        let mut owners = self.owners.lock();
        for (idx, key) in sorted.iter().enumerate() {
            loop {
                match owners.get(key) {
                    Some(owner) if *owner != txn_id => {
                        if let Err(e) = ctx.check() {
                            for held in &sorted[..idx] {
                                owners.remove(held);
                            }
                            self.released.notify_all();
                            return Err(e);
                        }
                        let wait = ctx.remaining().map_or(INTENT_POLL, |r| r.min(INTENT_POLL));
                        self.released.wait_for(&mut owners, wait);
                    }
                    _ => break,
                }
            }
            owners.insert(key.clone(), txn_id);
        }
        Ok(sorted)
    }

    /// Release intents of `txn_id` on `keys`
    pub fn release(&self, txn_id: u64, keys: &[Vec<u8>]) {
        if keys.is_empty() {
            return;
        }
        let mut owners = self.owners.lock();
        for key in keys {
            if owners.get(key) == Some(&txn_id) {
                owners.remove(key);
            }
        }
        self.released.notify_all();
    }

    /// Transaction currently holding an intent on `key`
    pub fn owner(&self, key: &[u8]) -> Option<u64> {
        self.owners.lock().get(key).copied()
    }

    /// Number of held intents
    pub fn len(&self) -> usize {
        self.owners.lock().len()
    }

    /// True if no intent is held
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// TransactionManager
// ============================================================================

/// Manages transaction lifecycle and atomic commits
///
/// All keys written by one transaction get the same commit version; the
/// global version increases by exactly one per committed transaction that
/// wrote something.
#[derive(Debug)]
pub struct TransactionManager {
    /// Next transaction ID
    next_txn_id: AtomicU64,
    /// Serializes validate + apply
    commit_lock: Mutex<()>,
    /// Active snapshot versions with their reference counts
    active: Mutex<BTreeMap<u64, usize>>,
    /// Write intents
    intents: IntentTable,
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionManager {
    /// Create a new transaction manager
    pub fn new() -> Self {
        TransactionManager {
            next_txn_id: AtomicU64::new(1),
            commit_lock: Mutex::new(()),
            active: Mutex::new(BTreeMap::new()),
            intents: IntentTable::new(),
        }
    }

    /// Allocate next transaction ID
    pub fn next_txn_id(&self) -> u64 {
        self.next_txn_id.fetch_add(1, Ordering::SeqCst)
    }

    /// The intent table
    pub fn intents(&self) -> &IntentTable {
        &self.intents
    }

    /// Register a snapshot at the store's current version
    ///
    /// The version is read while holding the active-set lock, so pruning
    /// can never remove a version a just-registered snapshot needs.
    pub fn register_snapshot(&self, store: &VersionedStore) -> u64 {
        let mut active = self.active.lock();
        let version = store.current_version();
        *active.entry(version).or_insert(0) += 1;
        version
    }

    /// Release a snapshot registered with [`register_snapshot`](Self::register_snapshot)
    pub fn release_snapshot(&self, version: u64) {
        let mut active = self.active.lock();
        if let Some(count) = active.get_mut(&version) {
            *count -= 1;
            if *count == 0 {
                active.remove(&version);
            }
        }
    }

    /// Oldest version any active snapshot reads at, or `current` if none
    pub fn min_active_version(&self, current: u64) -> u64 {
        let active = self.active.lock();
        active.keys().next().copied().unwrap_or(current).min(current)
    }

    /// Number of active snapshots
    pub fn active_count(&self) -> usize {
        self.active.lock().values().sum()
    }

    /// Begin a transaction reading at the current version
    pub fn begin(&self, store: &VersionedStore) -> TransactionContext {
        let txn_id = self.next_txn_id();
        TransactionContext::new(txn_id, self.register_snapshot(store))
    }

    /// Begin a transaction holding intents on `keys`
    ///
    /// Intents are acquired before the snapshot is taken, so the
    /// transaction reads the latest committed state of its keys.
    ///
    /// # Errors
    ///
    /// Fails if the context ends while waiting for an intent.
    pub fn begin_exclusive(
        &self,
        ctx: &Context,
        store: &VersionedStore,
        keys: &[Vec<u8>],
    ) -> Result<TransactionContext> {
        ctx.check()?;
        let txn_id = self.next_txn_id();
        let held = self.intents.acquire(ctx, txn_id, keys)?;
        Ok(TransactionContext::new(txn_id, self.register_snapshot(store)).with_intents(held))
    }

    /// Commit a transaction atomically
    ///
    /// # Returns
    /// - Ok(commit_version) on success; a read-only transaction commits at
    ///   its start version without allocating a new one
    /// - Err(CommitError) if the transaction is not active or conflicts
    pub fn commit(
        &self,
        txn: &mut TransactionContext,
        store: &VersionedStore,
    ) -> std::result::Result<u64, CommitError> {
        let _guard = self.commit_lock.lock();

        txn.begin_validation()?;

        let mut result = validate_write_set(txn, store);
        result.merge(validate_intents(txn, &self.intents));
        if !result.is_valid() {
            tracing::debug!(
                txn_id = txn.txn_id,
                conflicts = result.conflict_count(),
                keys = %txn.describe_writes(),
                "transaction aborted on conflict"
            );
            txn.mark_aborted("write conflict");
            return Err(CommitError::ValidationFailed(result));
        }

        if txn.write_count() == 0 {
            txn.mark_committed();
            return Ok(txn.start_version);
        }

        let commit_version = store.current_version() + 1;
        store.apply(txn.take_writes(), commit_version);
        txn.mark_committed();
        Ok(commit_version)
    }

    /// Release everything a finished (or abandoned) transaction holds
    pub fn finish(&self, txn: &mut TransactionContext) {
        if txn.is_active() {
            txn.mark_aborted("rolled back");
        }
        let intents = txn.take_intents();
        self.intents.release(txn.txn_id, &intents);
        self.release_snapshot(txn.start_version);
    }

    /// Drop versions of `keys` no active snapshot can observe
    pub fn prune(&self, store: &VersionedStore, keys: &[Vec<u8>]) {
        let min_active = self.min_active_version(store.current_version());
        store.prune(keys, min_active);
    }
}
