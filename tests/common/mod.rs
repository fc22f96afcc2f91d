//! Shared test utilities for the integration test suites.
//!
//! Import via `#[path = "../common/mod.rs"] mod common;` from a suite's main.rs.

#![allow(dead_code)]
#![allow(unused_imports)]

use std::sync::{Arc, Once};

pub use apogy::{
    Backend, Context, Document, DocumentStore, EmbeddedKv, EngineConfig, Error, ErrorKind, Filter,
    KvStore, MvccKv, RetryConfig, SearchRequest, Value,
};
pub use serde_json::json;

static INIT_LOGGING: Once = Once::new();

/// Install a test subscriber once per process; honors `RUST_LOG`-free defaults
pub fn init_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::WARN)
            .try_init();
    });
}

// ============================================================================
// Stores
// ============================================================================

/// Configuration for tests: inline reconciliation, generous retries
pub fn test_config() -> EngineConfig {
    EngineConfig::default()
        .with_reconcile_workers(0)
        .with_retry(RetryConfig::new().with_max_retries(1000).with_max_delay_ms(5))
}

/// A store on the given backend
pub fn store_with(backend: Backend) -> Arc<DocumentStore> {
    init_logging();
    Arc::new(DocumentStore::open(test_config().with_backend(backend)).unwrap())
}

/// One store per backend, labelled for assertion messages
pub fn all_backends() -> Vec<(&'static str, Arc<DocumentStore>)> {
    vec![
        ("mvcc", store_with(Backend::Mvcc)),
        ("embedded", store_with(Backend::Embedded)),
    ]
}

// ============================================================================
// Documents
// ============================================================================

/// Document from a JSON body
pub fn doc(model: &str, id: &str, val: serde_json::Value) -> Document {
    Document::new(model, id, Value::from(val))
}

/// Register `com.ex.Book` with a title/isbn/tags schema and a unique isbn
pub fn register_books(store: &DocumentStore) {
    let ctx = Context::background();
    store
        .put(
            &ctx,
            doc(
                "Model",
                "com.ex.Book",
                json!({
                    "schema": {
                        "title": "string",
                        "isbn": "string?",
                        "tags": ["string"],
                        "counter": "int?"
                    },
                    "index": {"isbn": "unique"}
                }),
            ),
        )
        .unwrap();
}

/// Ids matching a single filter on `com.ex.Book`, sorted
pub fn book_ids(store: &DocumentStore, filter: Filter) -> Vec<String> {
    let ctx = Context::background();
    let mut ids = store
        .search(&ctx, &SearchRequest::new("com.ex.Book", vec![filter]))
        .unwrap()
        .ids;
    ids.sort();
    ids
}
