//! Concurrent writers: implicit retries and explicit version races

use crate::common::*;
use std::sync::{Arc, Barrier};
use std::thread;

#[test]
fn test_concurrent_counter_increments() {
    const N: usize = 16;

    for (name, store) in all_backends() {
        register_books(&store);
        let ctx = Context::background();
        store
            .put(&ctx, doc("com.ex.Book", "b1", json!({"title": "t", "tags": []})))
            .unwrap();

        let barrier = Arc::new(Barrier::new(N));
        let handles: Vec<_> = (0..N)
            .map(|_| {
                let store = Arc::clone(&store);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let ctx = Context::background();
                    let mut patch = doc("com.ex.Book", "b1", json!(null));
                    patch.mutations = Some(
                        [("counter".to_string(), Value::from(json!({"add": 1})))]
                            .into_iter()
                            .collect(),
                    );
                    barrier.wait();
                    store.put(&ctx, patch)
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap().unwrap();
        }
        let stored = store.get(&ctx, "com.ex.Book", "b1").unwrap();
        assert_eq!(stored.val.get("counter"), Some(&Value::Int(N as i64)), "backend {}", name);
        assert_eq!(stored.val.get("title"), Some(&Value::from("t")));
    }
}

#[test]
fn test_explicit_writers_exactly_one_succeeds() {
    const K: usize = 8;

    for (name, store) in all_backends() {
        register_books(&store);
        let ctx = Context::background();
        let base = store
            .put(&ctx, doc("com.ex.Book", "b1", json!({"title": "v0", "tags": []})))
            .unwrap();

        let barrier = Arc::new(Barrier::new(K));
        let handles: Vec<_> = (0..K)
            .map(|i| {
                let store = Arc::clone(&store);
                let barrier = Arc::clone(&barrier);
                let version = base.current_version();
                thread::spawn(move || {
                    let ctx = Context::background();
                    let update = doc("com.ex.Book", "b1", json!({"title": format!("w{}", i), "tags": []}))
                        .with_version(version);
                    barrier.wait();
                    store.put(&ctx, update)
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let ok = results.iter().filter(|r| r.is_ok()).count();
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(e) if e.kind() == ErrorKind::Conflict))
            .count();
        assert_eq!(ok, 1, "backend {}", name);
        assert_eq!(conflicts, K - 1, "backend {}", name);
    }
}
