//! Transaction context for OCC
//!
//! This module implements the core transaction data structure for optimistic
//! concurrency control. TransactionContext tracks the snapshot version and
//! the buffered write set of a transaction, enabling write-write conflict
//! validation at commit time.
//!
//! Semantics:
//! - Reads observe the snapshot at `start_version` plus the transaction's own
//!   buffered writes (read-your-writes)
//! - Writes are buffered until commit; nothing is visible to other
//!   transactions before then
//! - Conflicts are detected on the WRITE-SET: a key committed by another
//!   transaction after `start_version` aborts the commit (first-committer-wins)

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use apogy_core::{escape_key, Error, Result};

use crate::validation::ValidationResult;

/// Error type for commit failures
#[derive(Debug, Clone)]
pub enum CommitError {
    /// Transaction aborted due to validation conflicts
    ValidationFailed(ValidationResult),

    /// Transaction was not in correct state for commit
    InvalidState(String),
}

impl std::fmt::Display for CommitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommitError::ValidationFailed(result) => {
                write!(f, "Commit failed: {} conflict(s)", result.conflict_count())
            }
            CommitError::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
        }
    }
}

impl std::error::Error for CommitError {}

// Conversion to the shared error type: a validation failure is the
// retryable write conflict on the first conflicting key.
impl From<CommitError> for Error {
    fn from(e: CommitError) -> Self {
        match e {
            CommitError::ValidationFailed(result) => match result.conflicts.first() {
                Some(conflict) => Error::WriteConflict {
                    key: conflict.key().to_vec(),
                },
                None => Error::internal("validation failed without conflicts"),
            },
            CommitError::InvalidState(msg) => Error::internal(msg),
        }
    }
}

/// Status of a transaction in its lifecycle
///
/// State transitions:
/// - `Active` → `Validating` (begin commit)
/// - `Validating` → `Committed` (validation passed)
/// - `Validating` → `Aborted` (conflict detected)
/// - `Active` → `Aborted` (rollback, drop, cancelled context)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Transaction is executing, can read/write
    Active,
    /// Transaction is being validated for conflicts
    Validating,
    /// Transaction committed successfully
    Committed,
    /// Transaction was aborted
    Aborted {
        /// Human-readable reason for abort
        reason: String,
    },
}

/// Per-transaction state: snapshot version, write set, intents
#[derive(Debug)]
pub struct TransactionContext {
    /// Unique transaction id (also the owner id of held intents)
    pub txn_id: u64,
    /// Snapshot version reads are served at
    pub start_version: u64,
    /// Current lifecycle state
    pub status: TransactionStatus,
    /// Buffered writes; `None` is a delete
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    /// Keys this transaction holds write intents on
    intents: Vec<Vec<u8>>,
    started: Instant,
}

impl TransactionContext {
    /// Create an active transaction reading at `start_version`
    pub fn new(txn_id: u64, start_version: u64) -> Self {
        Self {
            txn_id,
            start_version,
            status: TransactionStatus::Active,
            writes: BTreeMap::new(),
            intents: Vec::new(),
            started: Instant::now(),
        }
    }

    /// Record the intents acquired for this transaction
    pub fn with_intents(mut self, intents: Vec<Vec<u8>>) -> Self {
        self.intents = intents;
        self
    }

    /// True while reads and writes are allowed
    pub fn is_active(&self) -> bool {
        self.status == TransactionStatus::Active
    }

    /// # Errors
    ///
    /// Returns `Error::Internal` naming the current state if not active.
    pub fn ensure_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(Error::internal(format!(
                "transaction {} is not active: {:?}",
                self.txn_id, self.status
            )))
        }
    }

    /// Buffer a put
    ///
    /// # Errors
    ///
    /// Fails if the transaction is not active.
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        self.ensure_active()?;
        self.writes.insert(key, Some(value));
        Ok(())
    }

    /// Buffer a delete
    ///
    /// # Errors
    ///
    /// Fails if the transaction is not active.
    pub fn delete(&mut self, key: Vec<u8>) -> Result<()> {
        self.ensure_active()?;
        self.writes.insert(key, None);
        Ok(())
    }

    /// Buffered state of `key`: `Some(None)` is a buffered delete
    pub fn buffered(&self, key: &[u8]) -> Option<Option<&[u8]>> {
        self.writes.get(key).map(|v| v.as_deref())
    }

    /// The buffered write set in key order
    pub fn write_set(&self) -> &BTreeMap<Vec<u8>, Option<Vec<u8>>> {
        &self.writes
    }

    /// Move the write set out (used when applying a commit)
    pub fn take_writes(&mut self) -> BTreeMap<Vec<u8>, Option<Vec<u8>>> {
        std::mem::take(&mut self.writes)
    }

    /// Number of buffered writes
    pub fn write_count(&self) -> usize {
        self.writes.len()
    }

    /// Keys this transaction holds intents on
    pub fn intents(&self) -> &[Vec<u8>] {
        &self.intents
    }

    /// Move the intent list out (used when releasing)
    pub fn take_intents(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.intents)
    }

    /// Time since the transaction started
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Transition `Active` → `Validating`
    ///
    /// # Errors
    ///
    /// `CommitError::InvalidState` from any other state.
    pub fn begin_validation(&mut self) -> std::result::Result<(), CommitError> {
        if !self.is_active() {
            return Err(CommitError::InvalidState(format!(
                "cannot commit transaction {} in state {:?}",
                self.txn_id, self.status
            )));
        }
        self.status = TransactionStatus::Validating;
        Ok(())
    }

    /// Transition to `Committed`
    pub fn mark_committed(&mut self) {
        self.status = TransactionStatus::Committed;
    }

    /// Transition to `Aborted` and drop the write set
    pub fn mark_aborted(&mut self, reason: impl Into<String>) {
        self.writes.clear();
        self.status = TransactionStatus::Aborted {
            reason: reason.into(),
        };
    }

    /// Short description of the write set for logs
    pub fn describe_writes(&self) -> String {
        self.writes
            .keys()
            .map(|k| escape_key(k))
            .collect::<Vec<_>>()
            .join(",")
    }
}
