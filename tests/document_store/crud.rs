//! CRUD lifecycle: versions, history, no-op writes, errors

use crate::common::*;

// ============================================================================
// Versioning
// ============================================================================

#[test]
fn test_book_lifecycle() {
    for (name, store) in all_backends() {
        register_books(&store);
        let ctx = Context::background();

        let first = store
            .put(&ctx, doc("com.ex.Book", "b1", json!({"title": "Dune", "tags": []})))
            .unwrap();
        assert_eq!(first.version, Some(1), "backend {}", name);

        let second = store
            .put(&ctx, doc("com.ex.Book", "b1", json!({"title": "Dune Messiah", "tags": []})))
            .unwrap();
        assert_eq!(second.version, Some(2), "backend {}", name);

        let got = store.get(&ctx, "com.ex.Book", "b1").unwrap();
        assert_eq!(got.val.get("title"), Some(&Value::from("Dune Messiah")));
        assert_eq!(got.version, Some(2));
        let (h1, h2) = (first.history.unwrap(), got.history.unwrap());
        assert_eq!(h1.created, h2.created);
        assert!(h2.updated >= h1.updated);
    }
}

#[test]
fn test_unchanged_write_is_noop() {
    for (name, store) in all_backends() {
        register_books(&store);
        let ctx = Context::background();
        let body = json!({"title": "Emma", "tags": ["classic"]});
        store.put(&ctx, doc("com.ex.Book", "b1", body.clone())).unwrap();
        let again = store.put(&ctx, doc("com.ex.Book", "b1", body)).unwrap();
        assert_eq!(again.version, Some(1), "backend {}", name);
    }
}

// ============================================================================
// Errors
// ============================================================================

#[test]
fn test_error_kinds() {
    let store = store_with(Backend::Mvcc);
    register_books(&store);
    let ctx = Context::background();

    let err = store.get(&ctx, "com.ex.Book", "missing").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = store
        .put(&ctx, doc("com.ex.Book", "", json!({"title": "x", "tags": []})))
        .unwrap_err();
    assert_eq!(err.to_string(), "validation error: /id must not be empty");

    let err = store
        .put(&ctx, doc("com.ex.Book", "b1", json!({"title": "x", "tags": [], "extra": 1})))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    store
        .put(&ctx, doc("com.ex.Book", "b1", json!({"title": "x", "tags": []})))
        .unwrap();
    let err = store
        .put(&ctx, doc("com.ex.Book", "b1", json!({"title": "y", "tags": []})).with_version(7))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(err.to_string(), "version is out of date");
}

#[test]
fn test_unique_index_conflict() {
    for (name, store) in all_backends() {
        register_books(&store);
        let ctx = Context::background();
        store
            .put(&ctx, doc("com.ex.Book", "b1", json!({"title": "a", "isbn": "978", "tags": []})))
            .unwrap();
        let err = store
            .put(&ctx, doc("com.ex.Book", "b2", json!({"title": "b", "isbn": "978", "tags": []})))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict, "backend {}", name);
    }
}
