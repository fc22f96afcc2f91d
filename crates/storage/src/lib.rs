//! Storage layer for Apogy
//!
//! This crate implements the storage backends beneath the KV contract:
//! - VersionedStore: multi-version BTreeMap store with snapshot reads and
//!   pruning, used by the MVCC backend in `apogy-concurrency`
//! - EmbeddedKv: single-map KV backend serializing writers on a global gate
//!
//! # Consistency
//!
//! `VersionedStore` gives readers a stable view at a version. `EmbeddedKv`
//! reads the live map and is not snapshot-isolated; its writers never
//! conflict because only one write transaction is open at a time.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod embedded;
pub mod versioned;

pub use embedded::{EmbeddedKv, EmbeddedRead, EmbeddedWrite};
pub use versioned::VersionedStore;
