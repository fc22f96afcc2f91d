//! Document engine for Apogy
//!
//! This crate turns a transactional KV backend into a schema-governed
//! document store:
//! - DocumentStore: put / get / delete / search / query with optimistic
//!   concurrency and conflict retries
//! - Models: schemas, declared indexes and reactor bindings (`Model` documents)
//! - Index engine: one entry per indexable leaf, unique claims
//! - Search evaluator: index range scans, conjunctions, cursors
//! - Reactors: pre-commit validation and post-commit reconciliation
//! - Reconcile scheduler and lock/notify bus
//! - Configuration (`apogy.toml`) and logging setup
//!
//! The engine never knows which backend it runs on; it is written against
//! `apogy_core::KvStore`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod background;
pub mod bus;
pub mod codec;
pub mod config;
pub mod index;
pub mod logging;
pub mod meta;
pub mod model;
pub mod mutation;
pub mod reactor;
pub mod retry;
pub mod schema;
pub mod search;
pub mod store;

pub use background::{BackpressureError, ReconcileScheduler, SchedulerStats, TaskPriority};
pub use bus::{Bus, LocalBus, LockHandle};
pub use config::{Backend, Encoding, EngineConfig, ReconcileConfig, SearchConfig};
pub use model::{IndexKind, Model, ModelCache};
pub use reactor::{Immutable, Reactor, ReactorRegistry, ReactorRuntime};
pub use retry::RetryConfig;
pub use schema::Schema;
pub use store::{DocumentStore, DocumentStoreBuilder};
