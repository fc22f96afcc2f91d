//! Document Store Integration Tests
//!
//! End-to-end behavior of the public `apogy` API on both KV backends.

#[path = "../common/mod.rs"]
mod common;

mod aql;
mod concurrency;
mod crud;
mod index_consistency;
