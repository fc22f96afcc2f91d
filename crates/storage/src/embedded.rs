//! EmbeddedKv: single-map KV backend with a global write gate
//!
//! The embedded backend keeps one ordered map of live values. Write
//! transactions serialize on a coarse gate: `write()` blocks until no other
//! write transaction is open, and the gate is held until commit, rollback or
//! drop. Writers therefore never conflict, and commit never reports
//! `WriteConflict`.
//!
//! Reads are not snapshot-isolated: a read handle observes commits made
//! while it is open, between iteration chunks included.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::debug;

use apogy_core::{
    range_bounds, writes_in_range, ChunkedScan, Context, Error, KvIter, KvPair, KvRead, KvStore,
    KvWrite, Overlay, Result, DEFAULT_SCAN_CHUNK,
};

/// Upper bound on a single gate wait, so cancellation is noticed
const GATE_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Default)]
struct Shared {
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    /// True while a write transaction is open
    gate: Mutex<bool>,
    gate_released: Condvar,
}

impl Shared {
    fn scan(&self, start: &[u8], end: &[u8], limit: usize) -> Vec<KvPair> {
        let Some(bounds) = range_bounds(start, end) else {
            return Vec::new();
        };
        let data = self.data.read();
        data.range(bounds)
            .take(limit)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn acquire_gate(&self, ctx: &Context) -> Result<()> {
        let mut held = self.gate.lock();
        while *held {
            ctx.check()?;
            let wait = ctx.remaining().map_or(GATE_POLL, |r| r.min(GATE_POLL));
            self.gate_released.wait_for(&mut held, wait);
        }
        ctx.check()?;
        *held = true;
        Ok(())
    }

    fn release_gate(&self) {
        let mut held = self.gate.lock();
        *held = false;
        self.gate_released.notify_one();
    }
}

/// Embedded KV backend
#[derive(Debug, Clone, Default)]
pub struct EmbeddedKv {
    shared: Arc<Shared>,
}

impl EmbeddedKv {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        self.shared.data.read().len()
    }

    /// True if no key is stored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KvStore for EmbeddedKv {
    fn name(&self) -> &'static str {
        "embedded"
    }

    fn read(&self) -> Box<dyn KvRead> {
        Box::new(EmbeddedRead {
            shared: Arc::clone(&self.shared),
            closed: false,
        })
    }

    fn write(&self, ctx: &Context) -> Result<Box<dyn KvWrite>> {
        ctx.check()?;
        self.shared.acquire_gate(ctx)?;
        Ok(Box::new(EmbeddedWrite {
            shared: Arc::clone(&self.shared),
            writes: BTreeMap::new(),
            open: true,
        }))
    }

    fn exclusive_write(&self, ctx: &Context, _keys: &[Vec<u8>]) -> Result<Box<dyn KvWrite>> {
        // The gate already excludes every other writer.
        self.write(ctx)
    }

    fn ping(&self, ctx: &Context) -> Result<()> {
        ctx.check()
    }
}

/// Read handle over the live map
#[derive(Debug)]
pub struct EmbeddedRead {
    shared: Arc<Shared>,
    closed: bool,
}

fn closed_error() -> Error {
    Error::internal("kv handle is closed")
}

impl KvRead for EmbeddedRead {
    fn get(&self, ctx: &Context, key: &[u8]) -> Result<Option<Vec<u8>>> {
        ctx.check()?;
        if self.closed {
            return Err(closed_error());
        }
        Ok(self.shared.data.read().get(key).cloned())
    }

    fn iter<'a>(&'a self, ctx: &'a Context, start: &[u8], end: &[u8]) -> KvIter<'a> {
        if self.closed {
            return Box::new(std::iter::once(Err(closed_error())));
        }
        let shared = &self.shared;
        Box::new(ChunkedScan::new(ctx, start, end, DEFAULT_SCAN_CHUNK, move |s, e, n| {
            Ok(shared.scan(s, e, n))
        }))
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// Write transaction holding the global gate
#[derive(Debug)]
pub struct EmbeddedWrite {
    shared: Arc<Shared>,
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    open: bool,
}

impl EmbeddedWrite {
    fn ensure_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(Error::internal("transaction is no longer active"))
        }
    }

    fn finish(&mut self) {
        if self.open {
            self.open = false;
            self.writes.clear();
            self.shared.release_gate();
        }
    }
}

impl KvRead for EmbeddedWrite {
    fn get(&self, ctx: &Context, key: &[u8]) -> Result<Option<Vec<u8>>> {
        ctx.check()?;
        self.ensure_open()?;
        if let Some(buffered) = self.writes.get(key) {
            return Ok(buffered.clone());
        }
        Ok(self.shared.data.read().get(key).cloned())
    }

    fn iter<'a>(&'a self, ctx: &'a Context, start: &[u8], end: &[u8]) -> KvIter<'a> {
        if let Err(e) = self.ensure_open() {
            return Box::new(std::iter::once(Err(e)));
        }
        let shared = &self.shared;
        let base: KvIter<'a> = Box::new(ChunkedScan::new(
            ctx,
            start,
            end,
            DEFAULT_SCAN_CHUNK,
            move |s, e, n| Ok(shared.scan(s, e, n)),
        ));
        Box::new(Overlay::new(base, writes_in_range(&self.writes, start, end)))
    }

    fn close(&mut self) {
        self.rollback();
    }
}

impl KvWrite for EmbeddedWrite {
    fn put(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        self.ensure_open()?;
        self.writes.insert(key, Some(value));
        Ok(())
    }

    fn del(&mut self, key: Vec<u8>) -> Result<()> {
        self.ensure_open()?;
        self.writes.insert(key, None);
        Ok(())
    }

    fn commit(&mut self, ctx: &Context) -> Result<()> {
        self.ensure_open()?;
        if let Err(e) = ctx.check() {
            self.finish();
            return Err(e);
        }
        {
            let mut data = self.shared.data.write();
            for (key, value) in std::mem::take(&mut self.writes) {
                match value {
                    Some(value) => {
                        data.insert(key, value);
                    }
                    None => {
                        data.remove(&key);
                    }
                }
            }
        }
        self.finish();
        Ok(())
    }

    fn rollback(&mut self) {
        if self.open {
            debug!(writes = self.writes.len(), "embedded transaction rolled back");
        }
        self.finish();
    }
}

impl Drop for EmbeddedWrite {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    fn seed(store: &EmbeddedKv, pairs: &[(&str, &str)]) {
        let ctx = Context::background();
        let mut tx = store.write(&ctx).unwrap();
        for (k, v) in pairs {
            tx.put(k.as_bytes().to_vec(), v.as_bytes().to_vec()).unwrap();
        }
        tx.commit(&ctx).unwrap();
    }

    #[test]
    fn test_commit_makes_writes_visible() {
        let store = EmbeddedKv::new();
        seed(&store, &[("a", "1"), ("b", "2")]);

        let ctx = Context::background();
        let read = store.read();
        assert_eq!(read.get(&ctx, b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_read_your_writes_and_rollback() {
        let store = EmbeddedKv::new();
        seed(&store, &[("a", "1")]);

        let ctx = Context::background();
        let mut tx = store.write(&ctx).unwrap();
        tx.put(b"b".to_vec(), b"2".to_vec()).unwrap();
        tx.del(b"a".to_vec()).unwrap();
        assert_eq!(tx.get(&ctx, b"b").unwrap(), Some(b"2".to_vec()));
        assert_eq!(tx.get(&ctx, b"a").unwrap(), None);

        let keys: Vec<Vec<u8>> = tx.iter(&ctx, b"", b"").map(|r| r.unwrap().0).collect();
        assert_eq!(keys, vec![b"b".to_vec()]);

        tx.rollback();
        assert!(tx.put(b"c".to_vec(), b"3".to_vec()).is_err());
        assert_eq!(store.read().get(&ctx, b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.read().get(&ctx, b"b").unwrap(), None);
    }

    #[test]
    fn test_drop_releases_gate() {
        let store = EmbeddedKv::new();
        let ctx = Context::background();
        {
            let mut tx = store.write(&ctx).unwrap();
            tx.put(b"a".to_vec(), b"1".to_vec()).unwrap();
        }
        let timed = Context::with_timeout(Duration::from_millis(200));
        let tx = store.write(&timed);
        assert!(tx.is_ok());
        assert!(store.is_empty());
    }

    #[test]
    fn test_gate_wait_honors_deadline() {
        let store = EmbeddedKv::new();
        let ctx = Context::background();
        let _held = store.write(&ctx).unwrap();

        let timed = Context::with_timeout(Duration::from_millis(30));
        let err = store.write(&timed).err().unwrap();
        assert_eq!(err, Error::DeadlineExceeded);
    }

    #[test]
    fn test_gate_wait_honors_cancel() {
        let store = EmbeddedKv::new();
        let ctx = Context::background();
        let _held = store.write(&ctx).unwrap();

        let waiter_ctx = Context::background();
        let canceller = waiter_ctx.clone();
        let store2 = store.clone();
        let handle = thread::spawn(move || store2.write(&waiter_ctx).err());
        thread::sleep(Duration::from_millis(20));
        canceller.cancel();
        assert_eq!(handle.join().unwrap(), Some(Error::Cancelled));
    }

    #[test]
    fn test_writers_serialize_on_gate() {
        let store = EmbeddedKv::new();
        seed(&store, &[("n", "0")]);
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let ctx = Context::background();
                    barrier.wait();
                    let mut tx = store.write(&ctx).unwrap();
                    let cur = tx.get(&ctx, b"n").unwrap().unwrap();
                    let n: u64 = String::from_utf8(cur).unwrap().parse().unwrap();
                    tx.put(b"n".to_vec(), (n + 1).to_string().into_bytes()).unwrap();
                    tx.commit(&ctx).unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let ctx = Context::background();
        assert_eq!(store.read().get(&ctx, b"n").unwrap(), Some(b"8".to_vec()));
    }

    #[test]
    fn test_closed_read_handle_fails() {
        let store = EmbeddedKv::new();
        let ctx = Context::background();
        let mut read = store.read();
        read.close();
        assert!(read.get(&ctx, b"a").is_err());
        assert!(read.iter(&ctx, b"", b"").next().unwrap().is_err());
    }
}
