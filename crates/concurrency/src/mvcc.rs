//! MvccKv: snapshot-isolated KV backend
//!
//! Wires [`VersionedStore`] and [`TransactionManager`] into the KV contract.
//! Read handles pin a snapshot version for their lifetime; write handles
//! wrap a [`TransactionContext`]. Dropping a write handle without commit
//! rolls it back and releases its intents.

use std::sync::Arc;

use apogy_core::{
    writes_in_range, ChunkedScan, Context, Error, KvIter, KvRead, KvStore, KvWrite, Overlay,
    Result, DEFAULT_SCAN_CHUNK,
};
use apogy_storage::VersionedStore;

use crate::manager::TransactionManager;
use crate::transaction::TransactionContext;

/// MVCC KV backend
#[derive(Debug, Clone, Default)]
pub struct MvccKv {
    store: Arc<VersionedStore>,
    manager: Arc<TransactionManager>,
}

impl MvccKv {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// The underlying versioned store
    pub fn store(&self) -> &VersionedStore {
        &self.store
    }

    /// The transaction manager
    pub fn manager(&self) -> &TransactionManager {
        &self.manager
    }

    fn open_write(&self, txn: TransactionContext) -> Box<dyn KvWrite> {
        Box::new(MvccWrite {
            store: Arc::clone(&self.store),
            manager: Arc::clone(&self.manager),
            txn,
            finished: false,
        })
    }
}

impl KvStore for MvccKv {
    fn name(&self) -> &'static str {
        "mvcc"
    }

    fn read(&self) -> Box<dyn KvRead> {
        let version = self.manager.register_snapshot(&self.store);
        Box::new(MvccRead {
            store: Arc::clone(&self.store),
            manager: Arc::clone(&self.manager),
            version,
            closed: false,
        })
    }

    fn write(&self, ctx: &Context) -> Result<Box<dyn KvWrite>> {
        ctx.check()?;
        let txn = self.manager.begin(&self.store);
        Ok(self.open_write(txn))
    }

    fn exclusive_write(&self, ctx: &Context, keys: &[Vec<u8>]) -> Result<Box<dyn KvWrite>> {
        let txn = self.manager.begin_exclusive(ctx, &self.store, keys)?;
        Ok(self.open_write(txn))
    }

    fn ping(&self, ctx: &Context) -> Result<()> {
        ctx.check()
    }
}

fn snapshot_scan<'a>(
    store: &'a VersionedStore,
    ctx: &'a Context,
    version: u64,
    start: &[u8],
    end: &[u8],
) -> KvIter<'a> {
    Box::new(ChunkedScan::new(
        ctx,
        start,
        end,
        DEFAULT_SCAN_CHUNK,
        move |s, e, n| Ok(store.scan_at(s, e, version, n)),
    ))
}

// ============================================================================
// MvccRead
// ============================================================================

/// Read handle pinned to one snapshot version
#[derive(Debug)]
pub struct MvccRead {
    store: Arc<VersionedStore>,
    manager: Arc<TransactionManager>,
    version: u64,
    closed: bool,
}

impl MvccRead {
    /// Snapshot version this handle reads at
    pub fn version(&self) -> u64 {
        self.version
    }
}

impl KvRead for MvccRead {
    fn get(&self, ctx: &Context, key: &[u8]) -> Result<Option<Vec<u8>>> {
        ctx.check()?;
        if self.closed {
            return Err(Error::internal("kv handle is closed"));
        }
        Ok(self.store.get_at(key, self.version))
    }

    fn iter<'a>(&'a self, ctx: &'a Context, start: &[u8], end: &[u8]) -> KvIter<'a> {
        if self.closed {
            return Box::new(std::iter::once(Err(Error::internal("kv handle is closed"))));
        }
        snapshot_scan(&self.store, ctx, self.version, start, end)
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.manager.release_snapshot(self.version);
        }
    }
}

impl Drop for MvccRead {
    fn drop(&mut self) {
        self.close();
    }
}

// ============================================================================
// MvccWrite
// ============================================================================

/// Write transaction over a snapshot
#[derive(Debug)]
pub struct MvccWrite {
    store: Arc<VersionedStore>,
    manager: Arc<TransactionManager>,
    txn: TransactionContext,
    finished: bool,
}

impl MvccWrite {
    fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            self.manager.finish(&mut self.txn);
        }
    }
}

impl KvRead for MvccWrite {
    fn get(&self, ctx: &Context, key: &[u8]) -> Result<Option<Vec<u8>>> {
        ctx.check()?;
        self.txn.ensure_active()?;
        if let Some(buffered) = self.txn.buffered(key) {
            return Ok(buffered.map(<[u8]>::to_vec));
        }
        Ok(self.store.get_at(key, self.txn.start_version))
    }

    fn iter<'a>(&'a self, ctx: &'a Context, start: &[u8], end: &[u8]) -> KvIter<'a> {
        if let Err(e) = self.txn.ensure_active() {
            return Box::new(std::iter::once(Err(e)));
        }
        let base = snapshot_scan(&self.store, ctx, self.txn.start_version, start, end);
        Box::new(Overlay::new(
            base,
            writes_in_range(self.txn.write_set(), start, end),
        ))
    }

    fn close(&mut self) {
        self.rollback();
    }
}

impl KvWrite for MvccWrite {
    fn put(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        self.txn.put(key, value)
    }

    fn del(&mut self, key: Vec<u8>) -> Result<()> {
        self.txn.delete(key)
    }

    fn commit(&mut self, ctx: &Context) -> Result<()> {
        if let Err(e) = ctx.check() {
            self.finish();
            return Err(e);
        }
        let written: Vec<Vec<u8>> = self.txn.write_set().keys().cloned().collect();
        let outcome = self.manager.commit(&mut self.txn, &self.store);
        self.finish();
        outcome?;
        self.manager.prune(&self.store, &written);
        Ok(())
    }

    fn rollback(&mut self) {
        self.finish();
    }
}

impl Drop for MvccWrite {
    fn drop(&mut self) {
        self.finish();
    }
}
