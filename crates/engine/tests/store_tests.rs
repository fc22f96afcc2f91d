//! Document store integration tests
//!
//! Exercises the store end to end with its collaborators: record encodings,
//! configuration files, paginated search, reactors with a bus.

use apogy_core::{Context, Document, Error, Filter, SearchRequest, Value};
use apogy_engine::bus::RECONCILE_TOPIC;
use apogy_engine::{
    Backend, Bus, DocumentStore, Encoding, EngineConfig, LocalBus, Reactor, ReactorRegistry,
    ReactorRuntime,
};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn config() -> EngineConfig {
    EngineConfig::default().with_reconcile_workers(0)
}

fn doc(model: &str, id: &str, val: serde_json::Value) -> Document {
    Document::new(model, id, Value::from(val))
}

fn register_books(store: &DocumentStore, ctx: &Context) {
    store
        .put(
            ctx,
            doc(
                "Model",
                "com.ex.Book",
                json!({"schema": {"title": "string", "year": "int?", "tags": ["string"]}}),
            ),
        )
        .unwrap();
}

// ============================================================================
// Encodings and configuration
// ============================================================================

mod encoding {
    use super::*;

    #[test]
    fn test_msgpack_store_reads_back() {
        for backend in [Backend::Mvcc, Backend::Embedded] {
            let store = DocumentStore::open(
                config()
                    .with_backend(backend)
                    .with_encoding(Encoding::Msgpack),
            )
            .unwrap();
            let ctx = Context::background();
            register_books(&store, &ctx);
            let put = store
                .put(&ctx, doc("com.ex.Book", "b1", json!({"title": "Dune", "tags": ["sf"]})))
                .unwrap();
            assert_eq!(store.get(&ctx, "com.ex.Book", "b1").unwrap(), put);
        }
    }

    #[test]
    fn test_open_from_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(apogy_engine::config::CONFIG_FILE_NAME);
        config()
            .with_backend(Backend::Embedded)
            .write_to_file(&path)
            .unwrap();

        let loaded = EngineConfig::from_file(&path).unwrap();
        assert_eq!(loaded.backend, Backend::Embedded);
        let store = DocumentStore::open(loaded).unwrap();
        assert_eq!(store.kv().name(), "embedded");
        store.ping(&Context::background()).unwrap();
    }
}

// ============================================================================
// Search through the store
// ============================================================================

mod search {
    use super::*;

    fn seeded() -> DocumentStore {
        let store = DocumentStore::open(config()).unwrap();
        let ctx = Context::background();
        register_books(&store, &ctx);
        for (id, title, year, tags) in [
            ("b1", "Dune", 1965, vec!["sf", "classic"]),
            ("b2", "Dune Messiah", 1969, vec!["sf"]),
            ("b3", "Emma", 1815, vec!["classic"]),
            ("b4", "Neuromancer", 1984, vec!["sf", "cyber"]),
        ] {
            store
                .put(&ctx, doc("com.ex.Book", id, json!({"title": title, "year": year, "tags": tags})))
                .unwrap();
        }
        store
    }

    #[test]
    fn test_paging_collects_every_match_once() {
        let store = seeded();
        let ctx = Context::background();
        let mut request = SearchRequest::new("com.ex.Book", vec![Filter::equal("tags", "sf")]);
        request.limit = Some(1);

        let mut seen = Vec::new();
        loop {
            let page = store.search(&ctx, &request).unwrap();
            seen.extend(page.ids.clone());
            match page.cursor {
                Some(cursor) => request.cursor = Some(cursor),
                None => break,
            }
        }
        seen.sort();
        assert_eq!(seen, vec!["b1", "b2", "b4"]);
    }

    #[test]
    fn test_full_results_are_documents() {
        let store = seeded();
        let ctx = Context::background();
        let mut request = SearchRequest::new(
            "com.ex.Book",
            vec![Filter::prefix("title", "Dune"), Filter::less("year", 1967i64)],
        );
        request.full = true;
        let page = store.search(&ctx, &request).unwrap();
        assert!(page.ids.is_empty());
        assert_eq!(page.documents.len(), 1);
        assert_eq!(page.documents[0].val.get("title"), Some(&Value::from("Dune")));
    }

    #[test]
    fn test_updates_move_index_entries() {
        let store = seeded();
        let ctx = Context::background();
        store
            .put(&ctx, doc("com.ex.Book", "b3", json!({"title": "Persuasion", "tags": []})))
            .unwrap();
        let old = store
            .search(&ctx, &SearchRequest::new("com.ex.Book", vec![Filter::equal("title", "Emma")]))
            .unwrap();
        assert!(old.is_empty());
        let new = store
            .query(&ctx, "com.ex.Book(title=\"Persuasion\")", &[])
            .unwrap();
        assert_eq!(new.documents.len(), 1);
    }

    #[test]
    fn test_query_errors_are_validation() {
        let store = seeded();
        let ctx = Context::background();
        let err = store.query(&ctx, "com.ex.Book(year=?)", &[]).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.to_string().contains("1 parameter placeholders but only 0"));
    }
}

// ============================================================================
// Reactors and bus
// ============================================================================

mod reactors {
    use super::*;

    /// Records reconciled document paths; rejects bodies with `reject: true`
    #[derive(Default)]
    struct Journal {
        entries: Mutex<Vec<String>>,
    }

    impl Reactor for Journal {
        fn validate(&self, _: &Context, _: Option<&Document>, new: Option<Document>) -> apogy_core::Result<Option<Document>> {
            if let Some(doc) = &new {
                if doc.val.get("reject") == Some(&Value::Bool(true)) {
                    return Err(Error::validation("rejected by journal"));
                }
            }
            Ok(new)
        }

        fn reconcile(&self, _: &Context, old: Option<&Document>, new: Option<&Document>) -> apogy_core::Result<()> {
            let what = match (old, new) {
                (None, Some(d)) => format!("create {}", d.path()),
                (Some(_), Some(d)) => format!("update {}", d.path()),
                (Some(d), None) => format!("delete {}", d.path()),
                (None, None) => return Ok(()),
            };
            self.entries.lock().push(what);
            Ok(())
        }
    }

    struct JournalRuntime {
        journal: Arc<Journal>,
    }

    impl ReactorRuntime for JournalRuntime {
        fn kind(&self) -> &str {
            "journal"
        }

        fn start(&self, _: &Document) -> apogy_core::Result<Arc<dyn Reactor>> {
            Ok(self.journal.clone())
        }
    }

    #[test]
    fn test_reconcile_runs_under_bus_and_notifies() {
        let journal = Arc::new(Journal::default());
        let registry = Arc::new(ReactorRegistry::new());
        registry.register_runtime(Arc::new(JournalRuntime {
            journal: Arc::clone(&journal),
        }));
        let bus = Arc::new(LocalBus::new());
        let notifications = bus.recv(RECONCILE_TOPIC);

        let store = DocumentStore::builder()
            .config(EngineConfig::default().with_reconcile_workers(2))
            .reactors(registry)
            .bus(bus.clone())
            .build()
            .unwrap();
        let ctx = Context::background();

        store
            .put(&ctx, doc("Reactor", "com.ex.Journal", json!({"runtime": "journal"})))
            .unwrap();
        store
            .put(&ctx, doc("Model", "com.ex.Note", json!({"reactors": ["com.ex.Journal"]})))
            .unwrap();

        store.put(&ctx, doc("com.ex.Note", "n1", json!({"text": "a"}))).unwrap();
        store.drain();
        store.put(&ctx, doc("com.ex.Note", "n1", json!({"text": "b"}))).unwrap();
        store.drain();
        let err = store
            .put(&ctx, doc("com.ex.Note", "n1", json!({"reject": true})))
            .unwrap_err();
        assert!(err.to_string().contains("reactor com.ex.Journal rejected change"));
        store.delete(&ctx, "com.ex.Note", "n1").unwrap();
        store.drain();

        assert_eq!(
            *journal.entries.lock(),
            vec![
                "create com.ex.Note/n1".to_string(),
                "update com.ex.Note/n1".to_string(),
                "delete com.ex.Note/n1".to_string(),
            ]
        );
        let notes: Vec<Vec<u8>> = (0..3)
            .map(|_| notifications.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert!(notes.iter().all(|n| n == b"com.ex.Note/n1"));
        assert_eq!(bus.held_locks(), 0);
        store.shutdown();
    }

    #[test]
    fn test_model_cannot_reference_missing_reactor_after_removal() {
        let registry = Arc::new(ReactorRegistry::new());
        registry.register_runtime(Arc::new(JournalRuntime {
            journal: Arc::new(Journal::default()),
        }));
        let store = DocumentStore::builder()
            .config(config())
            .reactors(registry)
            .build()
            .unwrap();
        let ctx = Context::background();

        store
            .put(&ctx, doc("Reactor", "com.ex.Journal", json!({"runtime": "journal"})))
            .unwrap();
        store.delete(&ctx, "Reactor", "com.ex.Journal").unwrap();
        let status = store.get(&ctx, "Reactor", "com.ex.Journal");
        assert!(matches!(status.unwrap_err(), Error::NotFound(_)));

        let err = store
            .put(&ctx, doc("Model", "com.ex.Note", json!({"reactors": ["com.ex.Journal"]})))
            .unwrap_err();
        assert!(err.to_string().contains("reactor does not exist"));
    }
}
