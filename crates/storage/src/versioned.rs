//! VersionedStore: multi-version ordered byte store
//!
//! This module keeps every committed version of every key:
//! - `BTreeMap<Vec<u8>, VersionChain>` for ordered key storage
//! - `parking_lot::RwLock` for thread-safe access
//! - `AtomicU64` for the latest committed version
//!
//! # Design Notes
//!
//! - **Version chains**: each key holds its versions in ascending order; a
//!   `None` entry is a tombstone left by a delete
//! - **Snapshot reads**: a read at version `v` sees the newest entry `<= v`
//! - **Pruning**: versions no active snapshot can observe are dropped by
//!   [`VersionedStore::prune`], called by the transaction layer after commit
//! - **Version publication after insert**: `apply` bumps the global version
//!   only after all entries are in, so a snapshot taken at the new version
//!   never sees a partial batch

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use smallvec::SmallVec;

use apogy_core::{range_bounds, BufferedWrite, KvPair};

/// Versions of one key, ascending; `None` marks a delete
type VersionChain = SmallVec<[(u64, Option<Vec<u8>>); 2]>;

/// Newest entry of `chain` visible at `version`
fn visible_at(chain: &VersionChain, version: u64) -> Option<&(u64, Option<Vec<u8>>)> {
    chain.iter().rev().find(|(v, _)| *v <= version)
}

/// Multi-version storage backend using BTreeMap with RwLock
#[derive(Debug, Default)]
pub struct VersionedStore {
    /// Ordered map from key to its version chain
    data: RwLock<BTreeMap<Vec<u8>, VersionChain>>,
    /// Latest committed version (0 = nothing committed)
    version: AtomicU64,
}

impl VersionedStore {
    /// Create a new empty store at version 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest committed version
    pub fn current_version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// Read `key` as of `version`
    pub fn get_at(&self, key: &[u8], version: u64) -> Option<Vec<u8>> {
        let data = self.data.read();
        data.get(key)
            .and_then(|chain| visible_at(chain, version))
            .and_then(|(_, value)| value.clone())
    }

    /// Version of the newest entry for `key`, tombstones included
    ///
    /// Used by commit validation: a key whose latest version is newer than a
    /// transaction's snapshot was written concurrently.
    pub fn latest_version(&self, key: &[u8]) -> Option<u64> {
        let data = self.data.read();
        data.get(key).and_then(|chain| chain.last()).map(|(v, _)| *v)
    }

    /// Up to `limit` live pairs of `[start, end)` as of `version`
    ///
    /// An empty `end` is unbounded.
    pub fn scan_at(&self, start: &[u8], end: &[u8], version: u64, limit: usize) -> Vec<KvPair> {
        let Some(bounds) = range_bounds(start, end) else {
            return Vec::new();
        };
        let data = self.data.read();
        data.range(bounds)
            .filter_map(|(key, chain)| match visible_at(chain, version) {
                Some((_, Some(value))) => Some((key.clone(), value.clone())),
                _ => None,
            })
            .take(limit)
            .collect()
    }

    /// Apply a batch of puts and deletes atomically at `version`
    ///
    /// All entries are inserted under a single write lock acquisition, then
    /// the global version is raised to `version`.
    pub fn apply<I>(&self, writes: I, version: u64)
    where
        I: IntoIterator<Item = BufferedWrite>,
    {
        let mut data = self.data.write();
        for (key, value) in writes {
            let chain = data.entry(key).or_default();
            match chain.last_mut() {
                Some(last) if last.0 == version => last.1 = value,
                _ => chain.push((version, value)),
            }
        }
        self.version.fetch_max(version, Ordering::SeqCst);
    }

    /// Drop versions of `keys` that no snapshot at or after `min_active` can see
    ///
    /// The newest entry `<= min_active` is kept; a key left with only a
    /// tombstone is removed entirely.
    pub fn prune<'k, I>(&self, keys: I, min_active: u64)
    where
        I: IntoIterator<Item = &'k Vec<u8>>,
    {
        let mut data = self.data.write();
        for key in keys {
            let remove = match data.get_mut(key) {
                Some(chain) => {
                    let visible = chain.iter().rposition(|(v, _)| *v <= min_active);
                    if let Some(idx) = visible {
                        if idx > 0 {
                            chain.drain(..idx);
                        }
                    }
                    chain.len() == 1 && chain[0].1.is_none() && chain[0].0 <= min_active
                }
                None => false,
            };
            if remove {
                data.remove(key);
            }
        }
    }

    /// Number of keys holding at least one version
    pub fn key_count(&self) -> usize {
        self.data.read().len()
    }

    /// Total number of stored versions across all keys
    pub fn version_count(&self) -> usize {
        self.data.read().values().map(|chain| chain.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn put(key: &str, value: &str) -> BufferedWrite {
        (key.as_bytes().to_vec(), Some(value.as_bytes().to_vec()))
    }

    fn del(key: &str) -> BufferedWrite {
        (key.as_bytes().to_vec(), None)
    }

    // ========================================
    // Store Creation
    // ========================================

    #[test]
    fn test_store_creation() {
        let store = VersionedStore::new();
        assert_eq!(store.current_version(), 0);
        assert!(store.get_at(b"missing", u64::MAX).is_none());
        assert_eq!(store.key_count(), 0);
    }

    // ========================================
    // Snapshot Reads
    // ========================================

    #[test]
    fn test_get_at_sees_only_older_versions() {
        let store = VersionedStore::new();
        store.apply(vec![put("k", "v1")], 1);
        store.apply(vec![put("k", "v2")], 2);

        assert_eq!(store.get_at(b"k", 0), None);
        assert_eq!(store.get_at(b"k", 1), Some(b"v1".to_vec()));
        assert_eq!(store.get_at(b"k", 2), Some(b"v2".to_vec()));
        assert_eq!(store.current_version(), 2);
    }

    #[test]
    fn test_delete_leaves_tombstone() {
        let store = VersionedStore::new();
        store.apply(vec![put("k", "v1")], 1);
        store.apply(vec![del("k")], 2);

        assert_eq!(store.get_at(b"k", 1), Some(b"v1".to_vec()));
        assert_eq!(store.get_at(b"k", 2), None);
        assert_eq!(store.latest_version(b"k"), Some(2));
    }

    #[test]
    fn test_scan_at_respects_range_version_and_limit() {
        let store = VersionedStore::new();
        store.apply(vec![put("a", "1"), put("b", "2"), put("c", "3")], 1);
        store.apply(vec![del("b"), put("d", "4")], 2);

        let at1 = store.scan_at(b"a", b"d", 1, 10);
        assert_eq!(at1.len(), 3);

        let at2: Vec<Vec<u8>> = store
            .scan_at(b"", b"", 2, 10)
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(at2, vec![b"a".to_vec(), b"c".to_vec(), b"d".to_vec()]);

        assert_eq!(store.scan_at(b"", b"", 2, 2).len(), 2);
        assert!(store.scan_at(b"z", b"a", 2, 10).is_empty());
    }

    // ========================================
    // Pruning
    // ========================================

    #[test]
    fn test_prune_keeps_version_visible_to_oldest_snapshot() {
        let store = VersionedStore::new();
        store.apply(vec![put("k", "v1")], 1);
        store.apply(vec![put("k", "v2")], 2);
        store.apply(vec![put("k", "v3")], 3);

        let key = b"k".to_vec();
        store.prune([&key], 2);
        assert_eq!(store.version_count(), 2);
        assert_eq!(store.get_at(b"k", 2), Some(b"v2".to_vec()));
        assert_eq!(store.get_at(b"k", 3), Some(b"v3".to_vec()));
    }

    #[test]
    fn test_prune_removes_dead_tombstones() {
        let store = VersionedStore::new();
        store.apply(vec![put("k", "v1")], 1);
        store.apply(vec![del("k")], 2);

        let key = b"k".to_vec();
        store.prune([&key], 5);
        assert_eq!(store.key_count(), 0);
    }

    // ========================================
    // Concurrency
    // ========================================

    #[test]
    fn test_concurrent_apply_and_read() {
        let store = Arc::new(VersionedStore::new());
        let writers: Vec<_> = (0..4u64)
            .map(|t| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..50u64 {
                        let key = format!("t{}-{}", t, i);
                        store.apply(vec![put(&key, "x")], t * 100 + i + 1);
                    }
                })
            })
            .collect();
        for w in writers {
            w.join().unwrap();
        }

        assert_eq!(store.key_count(), 200);
        assert_eq!(store.current_version(), 350);
    }
}
