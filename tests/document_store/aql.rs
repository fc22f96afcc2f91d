//! AQL through the store, and the parser's public contract

use crate::common::*;
use apogy::aql::{parse, Query};

#[test]
fn test_parameter_binding() {
    assert!(parse("Book(name=?)", &[]).is_err());

    let query = parse("Book(name=?)", &[Value::from("x")]).unwrap();
    let request = query.to_search_request();
    assert_eq!(request.model, "Book");
    assert_eq!(request.filters[0].key, "name");
    assert_eq!(request.filters[0].equal, Some(Value::from("x")));
}

#[test]
fn test_display_round_trip() {
    for text in [
        "com.ex.Book",
        "com.ex.Book(title=\"Dune\" year>1960)",
        "com.ex.Book(title^\"Du\"$\"Dune\", tags) { com.ex.Author(name) }",
    ] {
        let query: Query = text.parse().unwrap();
        let again: Query = query.to_string().parse().unwrap();
        assert_eq!(query, again, "{}", text);
    }
}

#[test]
fn test_query_against_store() {
    for (name, store) in all_backends() {
        register_books(&store);
        let ctx = Context::background();
        store
            .put(&ctx, doc("com.ex.Book", "b1", json!({"title": "Dune", "tags": ["sf"]})))
            .unwrap();
        store
            .put(&ctx, doc("com.ex.Book", "b2", json!({"title": "Emma", "tags": ["classic"]})))
            .unwrap();

        let found = store
            .query(&ctx, "com.ex.Book(tags=? & title^\"D\")", &[Value::from("sf")])
            .unwrap();
        let ids: Vec<&str> = found.documents.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["b1"], "backend {}", name);

        let err = store.query(&ctx, "com.ex.Book(tags=?)", &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
