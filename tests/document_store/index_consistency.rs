//! Index entries follow every write and delete

use crate::common::*;

#[test]
fn test_delete_removes_from_every_filter() {
    for (name, store) in all_backends() {
        register_books(&store);
        let ctx = Context::background();
        store
            .put(
                &ctx,
                doc("com.ex.Book", "b1", json!({"title": "Dune", "isbn": "1", "tags": ["sf", "classic"]})),
            )
            .unwrap();
        store
            .put(&ctx, doc("com.ex.Book", "b2", json!({"title": "Emma", "tags": ["classic"]})))
            .unwrap();

        assert_eq!(book_ids(&store, Filter::equal("tags", "classic")), vec!["b1", "b2"]);
        store.delete(&ctx, "com.ex.Book", "b1").unwrap();

        for filter in [
            Filter::equal("title", "Dune"),
            Filter::equal("isbn", "1"),
            Filter::equal("tags", "sf"),
            Filter::present("title"),
            Filter::prefix("title", "D"),
        ] {
            assert!(
                !book_ids(&store, filter.clone()).contains(&"b1".to_string()),
                "backend {}: {:?}",
                name,
                filter
            );
        }
        assert_eq!(book_ids(&store, Filter::equal("tags", "classic")), vec!["b2"]);
    }
}

#[test]
fn test_update_replaces_entries() {
    let store = store_with(Backend::Mvcc);
    register_books(&store);
    let ctx = Context::background();
    store
        .put(&ctx, doc("com.ex.Book", "b1", json!({"title": "Old", "isbn": "9", "tags": []})))
        .unwrap();
    store
        .put(&ctx, doc("com.ex.Book", "b1", json!({"title": "New", "tags": []})))
        .unwrap();

    assert!(book_ids(&store, Filter::equal("title", "Old")).is_empty());
    assert_eq!(book_ids(&store, Filter::equal("title", "New")), vec!["b1"]);
    assert!(book_ids(&store, Filter::equal("isbn", "9")).is_empty());

    // The released unique value is free again.
    store
        .put(&ctx, doc("com.ex.Book", "b2", json!({"title": "x", "isbn": "9", "tags": []})))
        .unwrap();
}

// ============================================================================
// Fields holding strings in some documents and numbers in others
// ============================================================================

fn mixed_ids(store: &DocumentStore, filter: Filter) -> Vec<String> {
    let ctx = Context::background();
    let mut ids = store
        .search(&ctx, &SearchRequest::new("com.ex.Mixed", vec![filter]))
        .unwrap()
        .ids;
    ids.sort();
    ids
}

#[test]
fn test_mixed_kind_field_search_and_unique() {
    // Encodes as FF 00 00 00 00 00 F0 3F: starts with the separator byte.
    let sep_leading = f64::from_bits(0x3FF0_0000_0000_00FF);
    let same_bytes = f64::from_le_bytes(*b"abcdefgh");

    for (name, store) in all_backends() {
        let ctx = Context::background();
        store
            .put(&ctx, doc("Model", "com.ex.Mixed", json!({"index": {"n": "unique"}})))
            .unwrap();
        for (id, n) in [
            ("zero", json!(0)),
            ("two", json!(2.0)),
            ("text", json!("abcdefgh")),
            ("sep", json!(sep_leading)),
        ] {
            store.put(&ctx, doc("com.ex.Mixed", id, json!({ "n": n }))).unwrap();
        }

        assert!(mixed_ids(&store, Filter::less("n", "a")).is_empty(), "backend {}", name);
        assert_eq!(mixed_ids(&store, Filter::greater("n", 0i64)), vec!["sep", "two"]);
        assert_eq!(mixed_ids(&store, Filter::greater("n", "a")), vec!["text"]);
        assert!(mixed_ids(&store, Filter::equal("n", same_bytes)).is_empty());
        assert!(mixed_ids(&store, Filter::equal("n", "")).is_empty());

        // Same bytes, other kind: not a unique violation.
        store
            .put(&ctx, doc("com.ex.Mixed", "number", json!({ "n": same_bytes })))
            .unwrap();
        store.put(&ctx, doc("com.ex.Mixed", "empty", json!({"n": ""}))).unwrap();

        let err = store
            .put(&ctx, doc("com.ex.Mixed", "dup", json!({"n": "abcdefgh"})))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict, "backend {}", name);
        let err = store
            .put(&ctx, doc("com.ex.Mixed", "dup", json!({ "n": sep_leading })))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict, "backend {}", name);
    }
}
