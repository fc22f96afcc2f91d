//! Concurrency layer for Apogy
//!
//! This crate implements optimistic concurrency control (OCC) with:
//! - TransactionContext: snapshot version and buffered write set
//! - Snapshot isolation over `apogy_storage::VersionedStore`
//! - Write-write conflict detection at commit time (first-committer-wins)
//! - Write intents for exclusive writers
//! - MvccKv: the snapshot-isolated implementation of the KV contract

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod manager;
pub mod mvcc;
pub mod transaction;
pub mod validation;

pub use manager::{IntentTable, TransactionManager};
pub use mvcc::{MvccKv, MvccRead, MvccWrite};
pub use transaction::{CommitError, TransactionContext, TransactionStatus};
pub use validation::{validate_intents, validate_write_set, ConflictType, ValidationResult};
