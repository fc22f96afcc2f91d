//! Transactional key-value abstraction
//!
//! This module defines the KV traits the CRUD engine is written against, so
//! backends can be swapped without touching upper layers:
//!
//! - [`KvRead`]: point reads and lazy ordered range iteration
//! - [`KvWrite`]: a read handle plus buffered puts/deletes and commit/rollback
//! - [`KvStore`]: opens read and write handles
//!
//! Keys and values are opaque byte strings. Ranges are half-open
//! `[start, end)`; an empty `end` means unbounded. Iterators yield owned
//! copies, so nothing they return is invalidated by further iteration.
//!
//! Two helpers shared by the backends live here as well: [`ChunkedScan`]
//! turns a bounded fetch function into a lazy iterator, and [`Overlay`]
//! merges a transaction's buffered writes over a base scan.

use std::cmp::Ordering;
use std::collections::{BTreeMap, VecDeque};
use std::iter::Peekable;
use std::ops::Bound;

use crate::context::Context;
use crate::error::Result;
use crate::keys::key_successor;

/// An owned key/value pair
pub type KvPair = (Vec<u8>, Vec<u8>);

/// Lazy ordered sequence of pairs; errors are yielded in-band
pub type KvIter<'a> = Box<dyn Iterator<Item = Result<KvPair>> + 'a>;

/// A buffered write: `None` is a delete
pub type BufferedWrite = (Vec<u8>, Option<Vec<u8>>);

/// Read handle over a consistent (backend-defined) view
pub trait KvRead: Send {
    /// Read one key
    ///
    /// # Errors
    ///
    /// Returns an error if the context is done or the handle is closed.
    fn get(&self, ctx: &Context, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Read several keys, answers in request order
    ///
    /// # Errors
    ///
    /// Returns the first error any lookup produces.
    fn batch_get(&self, ctx: &Context, keys: &[Vec<u8>]) -> Result<Vec<Option<Vec<u8>>>> {
        keys.iter().map(|k| self.get(ctx, k)).collect()
    }

    /// Iterate `[start, end)` in key order
    fn iter<'a>(&'a self, ctx: &'a Context, start: &[u8], end: &[u8]) -> KvIter<'a>;

    /// Release the handle's resources; further calls fail
    fn close(&mut self);
}

/// Write transaction: reads observe the transaction's own writes
pub trait KvWrite: KvRead {
    /// Buffer a put
    ///
    /// # Errors
    ///
    /// Fails if the transaction is no longer active.
    fn put(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<()>;

    /// Buffer a delete
    ///
    /// # Errors
    ///
    /// Fails if the transaction is no longer active.
    fn del(&mut self, key: Vec<u8>) -> Result<()>;

    /// Atomically apply all buffered writes
    ///
    /// # Errors
    ///
    /// `Error::WriteConflict` if the backend detected a concurrent commit to
    /// a written key; `Error::Cancelled`/`DeadlineExceeded` if the context
    /// is done. On error nothing is applied.
    fn commit(&mut self, ctx: &Context) -> Result<()>;

    /// Discard all buffered writes and release held resources
    fn rollback(&mut self);
}

/// A KV backend
pub trait KvStore: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Open a read handle
    fn read(&self) -> Box<dyn KvRead>;

    /// Open a write transaction
    ///
    /// # Errors
    ///
    /// Fails if the context ends while waiting for the backend.
    fn write(&self, ctx: &Context) -> Result<Box<dyn KvWrite>>;

    /// Open a write transaction holding write intents on `keys`
    ///
    /// Other exclusive writers on the same keys wait until this transaction
    /// ends; other writers touching them fail at commit.
    ///
    /// # Errors
    ///
    /// Fails if the context ends while waiting for an intent.
    fn exclusive_write(&self, ctx: &Context, keys: &[Vec<u8>]) -> Result<Box<dyn KvWrite>>;

    /// Check that the backend is usable
    ///
    /// # Errors
    ///
    /// Fails if the context is done or the backend is unavailable.
    fn ping(&self, ctx: &Context) -> Result<()>;
}

/// Map bounds for `[start, end)`, `None` if the range is empty
///
/// An empty `end` is unbounded.
pub fn range_bounds(start: &[u8], end: &[u8]) -> Option<(Bound<Vec<u8>>, Bound<Vec<u8>>)> {
    if end.is_empty() {
        return Some((Bound::Included(start.to_vec()), Bound::Unbounded));
    }
    if start >= end {
        return None;
    }
    Some((Bound::Included(start.to_vec()), Bound::Excluded(end.to_vec())))
}

/// Buffered writes of a transaction that fall in `[start, end)`, in key order
pub fn writes_in_range(
    writes: &BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    start: &[u8],
    end: &[u8],
) -> Vec<BufferedWrite> {
    match range_bounds(start, end) {
        Some(bounds) => writes
            .range(bounds)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        None => Vec::new(),
    }
}

// ============================================================================
// ChunkedScan
// ============================================================================

/// Default number of pairs fetched per chunk
pub const DEFAULT_SCAN_CHUNK: usize = 256;

/// Lazy range iterator over a bounded fetch function
///
/// `fetch(start, end, limit)` must return at most `limit` pairs of
/// `[start, end)` in key order. After each chunk the scan re-seeks strictly
/// after the last returned key, so the backend never holds a lock between
/// chunks.
pub struct ChunkedScan<'a, F> {
    ctx: &'a Context,
    next_start: Vec<u8>,
    end: Vec<u8>,
    buffer: VecDeque<KvPair>,
    fetch: F,
    chunk: usize,
    exhausted: bool,
}

impl<'a, F> ChunkedScan<'a, F>
where
    F: FnMut(&[u8], &[u8], usize) -> Result<Vec<KvPair>>,
{
    /// Create a scan of `[start, end)`
    pub fn new(ctx: &'a Context, start: &[u8], end: &[u8], chunk: usize, fetch: F) -> Self {
        Self {
            ctx,
            next_start: start.to_vec(),
            end: end.to_vec(),
            buffer: VecDeque::new(),
            fetch,
            chunk: chunk.max(1),
            exhausted: false,
        }
    }

    fn refill(&mut self) -> Result<()> {
        self.ctx.check()?;
        let batch = (self.fetch)(&self.next_start, &self.end, self.chunk)?;
        if batch.len() < self.chunk {
            self.exhausted = true;
        }
        if let Some((last, _)) = batch.last() {
            self.next_start = key_successor(last);
        }
        self.buffer.extend(batch);
        Ok(())
    }
}

impl<'a, F> Iterator for ChunkedScan<'a, F>
where
    F: FnMut(&[u8], &[u8], usize) -> Result<Vec<KvPair>>,
{
    type Item = Result<KvPair>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.refill() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}

// ============================================================================
// Overlay
// ============================================================================

/// Merge of a base scan with buffered writes over the same range
///
/// Buffered puts replace or add pairs, buffered deletes hide them.
pub struct Overlay<'a> {
    base: Peekable<KvIter<'a>>,
    writes: Peekable<std::vec::IntoIter<BufferedWrite>>,
}

enum Step {
    Done,
    Base,
    Write { shadowing: bool },
}

impl<'a> Overlay<'a> {
    /// `writes` must be sorted by key and limited to the scanned range
    pub fn new(base: KvIter<'a>, writes: Vec<BufferedWrite>) -> Self {
        Self {
            base: base.peekable(),
            writes: writes.into_iter().peekable(),
        }
    }
}

impl<'a> Iterator for Overlay<'a> {
    type Item = Result<KvPair>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let step = match (self.base.peek(), self.writes.peek()) {
                (None, None) => Step::Done,
                (Some(Err(_)), _) => Step::Base,
                (Some(Ok(_)), None) => Step::Base,
                (None, Some(_)) => Step::Write { shadowing: false },
                (Some(Ok((bk, _))), Some((wk, _))) => match bk.cmp(wk) {
                    Ordering::Less => Step::Base,
                    Ordering::Equal => Step::Write { shadowing: true },
                    Ordering::Greater => Step::Write { shadowing: false },
                },
            };

            match step {
                Step::Done => return None,
                Step::Base => return self.base.next(),
                Step::Write { shadowing } => {
                    if shadowing {
                        self.base.next();
                    }
                    if let Some((key, Some(value))) = self.writes.next() {
                        return Some(Ok((key, value)));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<Vec<u8>, Vec<u8>> {
        pairs
            .iter()
            .map(|(k, v)| (k.as_bytes().to_vec(), v.as_bytes().to_vec()))
            .collect()
    }

    fn fetch_from(
        data: &BTreeMap<Vec<u8>, Vec<u8>>,
    ) -> impl FnMut(&[u8], &[u8], usize) -> Result<Vec<KvPair>> + '_ {
        move |start, end, limit| {
            Ok(data
                .range(start.to_vec()..)
                .take_while(|(k, _)| end.is_empty() || k.as_slice() < end)
                .take(limit)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect())
        }
    }

    #[test]
    fn test_chunked_scan_crosses_chunk_boundaries() {
        let data = map(&[("a", "1"), ("b", "2"), ("c", "3"), ("d", "4"), ("e", "5")]);
        let ctx = Context::background();
        let scan = ChunkedScan::new(&ctx, b"b", b"e", 2, fetch_from(&data));
        let keys: Vec<Vec<u8>> = scan.map(|r| r.unwrap().0).collect();
        assert_eq!(keys, vec![b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]);
    }

    #[test]
    fn test_chunked_scan_unbounded_end() {
        let data = map(&[("a", "1"), ("b", "2")]);
        let ctx = Context::background();
        let count = ChunkedScan::new(&ctx, b"", b"", 1, fetch_from(&data)).count();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_chunked_scan_stops_on_cancel() {
        let data = map(&[("a", "1")]);
        let ctx = Context::background();
        ctx.cancel();
        let mut scan = ChunkedScan::new(&ctx, b"", b"", 4, fetch_from(&data));
        assert!(matches!(scan.next(), Some(Err(Error::Cancelled))));
        assert!(scan.next().is_none());
    }

    #[test]
    fn test_range_bounds_rejects_inverted_range() {
        assert!(range_bounds(b"b", b"a").is_none());
        assert!(range_bounds(b"a", b"a").is_none());
        assert!(range_bounds(b"a", b"").is_some());
    }

    #[test]
    fn test_writes_in_range_is_half_open() {
        let mut writes = BTreeMap::new();
        writes.insert(b"a".to_vec(), Some(b"1".to_vec()));
        writes.insert(b"b".to_vec(), None);
        writes.insert(b"c".to_vec(), Some(b"3".to_vec()));
        let got = writes_in_range(&writes, b"b", b"c");
        assert_eq!(got, vec![(b"b".to_vec(), None)]);
    }

    #[test]
    fn test_overlay_applies_puts_and_deletes() {
        let data = map(&[("a", "1"), ("b", "2"), ("d", "4")]);
        let ctx = Context::background();
        let base: KvIter<'_> = Box::new(ChunkedScan::new(&ctx, b"", b"", 8, fetch_from(&data)));
        let writes = vec![
            (b"b".to_vec(), None),
            (b"c".to_vec(), Some(b"3".to_vec())),
            (b"d".to_vec(), Some(b"44".to_vec())),
            (b"e".to_vec(), None),
        ];

        let merged: Vec<KvPair> = Overlay::new(base, writes).map(|r| r.unwrap()).collect();
        assert_eq!(
            merged,
            vec![
                (b"a".to_vec(), b"1".to_vec()),
                (b"c".to_vec(), b"3".to_vec()),
                (b"d".to_vec(), b"44".to_vec()),
            ]
        );
    }
}
