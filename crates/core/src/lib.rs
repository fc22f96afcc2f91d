//! Core types and traits for Apogy
//!
//! This crate defines the foundational types used throughout the system:
//! - Value: tagged value tree of document bodies
//! - Document: stored document shape (identity, version, history, body)
//! - SearchRequest / SearchResponse / Filter: search wire types
//! - Error: error taxonomy shared by every layer
//! - Context: deadline and cancellation scope for a request
//! - keys: byte layout of document, index and unique-claim keys
//! - limits: metadata and index size limits
//! - Traits: transactional KV contract (KvRead, KvWrite, KvStore)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod context;
pub mod document;
pub mod error;
pub mod keys;
pub mod limits;
pub mod search_types;
pub mod traits;
pub mod value;

pub use context::Context;
pub use document::{Document, History, MODEL_MODEL, REACTOR_MODEL};
pub use error::{escape_key, Error, ErrorKind, Result};
pub use search_types::{Filter, SearchRequest, SearchResponse};
pub use traits::{
    range_bounds, writes_in_range, BufferedWrite, ChunkedScan, KvIter, KvPair, KvRead, KvStore,
    KvWrite, Overlay, DEFAULT_SCAN_CHUNK,
};
pub use value::{Value, Visitor};
