//! Apogy - schema-governed document store core
//!
//! Apogy stores JSON-like documents grouped by model. Models declare a
//! schema, indexes and reactors; every write is validated, versioned and
//! indexed in one transaction, and documents are found through index scans
//! or the AQL query language.
//!
//! # Quick Start
//!
//! ```ignore
//! use apogy::{Context, Document, DocumentStore, EngineConfig, Value};
//!
//! let store = DocumentStore::open(EngineConfig::default())?;
//! let ctx = Context::background();
//!
//! store.put(&ctx, Document::new("Model", "com.example.Book", Value::Null))?;
//! let book = store.put(&ctx, Document::new("com.example.Book", "b1", serde_json::json!({"title": "Dune"})))?;
//! assert_eq!(book.version, Some(1));
//!
//! let found = store.query(&ctx, "com.example.Book(title=?)", &["Dune".into()])?;
//! ```
//!
//! # Architecture
//!
//! | Crate | Role |
//! |-------|------|
//! | `apogy-core` | values, documents, errors, key layout, KV traits |
//! | `apogy-storage` | embedded KV backend (single ordered map, global write gate) |
//! | `apogy-concurrency` | MVCC KV backend (snapshot isolation, write intents) |
//! | `apogy-aql` | AQL lexer, parser and request compiler |
//! | `apogy-engine` | document store, models, indexes, search, reactors |

pub use apogy_aql as aql;
pub use apogy_concurrency::MvccKv;
pub use apogy_core::{
    Context, Document, Error, ErrorKind, Filter, History, KvRead, KvStore, KvWrite, Result,
    SearchRequest, SearchResponse, Value,
};
pub use apogy_engine::*;
pub use apogy_storage::EmbeddedKv;
