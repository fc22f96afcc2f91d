//! Transaction validation for OCC
//!
//! Conflict rules:
//! - First-committer-wins based on the WRITE-SET: if any key the transaction
//!   writes was committed by another transaction after its snapshot, the
//!   commit aborts
//! - A key held as a write intent by another transaction aborts the commit
//! - Reads are not validated: write skew is allowed

use apogy_storage::VersionedStore;

use crate::manager::IntentTable;
use crate::transaction::TransactionContext;

/// Types of conflicts that can occur during transaction validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictType {
    /// Write-write conflict: key committed after the transaction's snapshot
    WriteWrite {
        /// The key that has a conflict
        key: Vec<u8>,
        /// Snapshot version of the validating transaction
        start_version: u64,
        /// Version at which the key was last committed
        committed_version: u64,
    },

    /// Intent conflict: another transaction holds a write intent on the key
    IntentHeld {
        /// The key that has a conflict
        key: Vec<u8>,
        /// Transaction holding the intent
        owner: u64,
    },
}

impl ConflictType {
    /// The conflicting key
    pub fn key(&self) -> &[u8] {
        match self {
            ConflictType::WriteWrite { key, .. } | ConflictType::IntentHeld { key, .. } => key,
        }
    }
}

/// Result of transaction validation
///
/// Accumulates all conflicts found during validation.
/// A transaction commits only if is_valid() returns true.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// All conflicts detected during validation
    pub conflicts: Vec<ConflictType>,
}

impl ValidationResult {
    /// Create a successful validation result (no conflicts)
    pub fn ok() -> Self {
        Self::default()
    }

    /// Create a validation result with a single conflict
    pub fn conflict(conflict: ConflictType) -> Self {
        ValidationResult {
            conflicts: vec![conflict],
        }
    }

    /// Check if validation passed (no conflicts)
    pub fn is_valid(&self) -> bool {
        self.conflicts.is_empty()
    }

    /// Merge another validation result into this one
    pub fn merge(&mut self, other: ValidationResult) {
        self.conflicts.extend(other.conflicts);
    }

    /// Get the number of conflicts
    pub fn conflict_count(&self) -> usize {
        self.conflicts.len()
    }
}

/// Validate the write-set against committed versions
///
/// Must be called under the commit lock so no commit can slip in between
/// validation and apply.
pub fn validate_write_set(txn: &TransactionContext, store: &VersionedStore) -> ValidationResult {
    let mut result = ValidationResult::ok();
    for key in txn.write_set().keys() {
        if let Some(committed) = store.latest_version(key) {
            if committed > txn.start_version {
                result.conflicts.push(ConflictType::WriteWrite {
                    key: key.clone(),
                    start_version: txn.start_version,
                    committed_version: committed,
                });
            }
        }
    }
    result
}

/// Validate that no written key is held as an intent by another transaction
pub fn validate_intents(txn: &TransactionContext, intents: &IntentTable) -> ValidationResult {
    let mut result = ValidationResult::ok();
    for key in txn.write_set().keys() {
        if let Some(owner) = intents.owner(key) {
            if owner != txn.txn_id {
                result.conflicts.push(ConflictType::IntentHeld {
                    key: key.clone(),
                    owner,
                });
            }
        }
    }
    result
}
