//! Lock/notify bus
//!
//! The bus coordinates reconciliation between engine instances: a lease lock
//! per document keeps two instances from reconciling the same document at
//! once, and topics carry small notifications.
//!
//! [`LocalBus`] implements the bus within one process. Leases are tracked by
//! keep-alive timestamps: a lock whose holder has not called
//! [`LockHandle::keep_alive`] within its lease is considered expired and may
//! be taken by the next caller.

use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use apogy_core::{Context, Error, Result};
use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;
use tracing::debug;
use uuid::Uuid;

/// Topic on which committed reconciliations are announced
pub const RECONCILE_TOPIC: &str = "reconcile";

/// Bus lock key of a document's reconciliation
pub fn reconcile_lock_key(model: &str, id: &str) -> String {
    format!("reconcile/{}/{}", model, id)
}

/// A held lease lock
pub trait LockHandle: Send {
    /// Extend the lease
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if the lease already expired and the lock was lost.
    fn keep_alive(&self) -> Result<()>;

    /// Release the lock; further calls are no-ops
    fn unlock(&mut self);
}

/// Distributed lock and notification service
pub trait Bus: Send + Sync {
    /// Acquire a lease lock, waiting while another holder keeps it alive
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` or `DeadlineExceeded` if the context ends first.
    fn lock(&self, ctx: &Context, key: &str, lease: Duration) -> Result<Box<dyn LockHandle>>;

    /// Publish a message to every current subscriber of a topic
    fn send(&self, topic: &str, payload: Vec<u8>) -> Result<()>;

    /// Subscribe to a topic
    fn recv(&self, topic: &str) -> Receiver<Vec<u8>>;
}

// ============================================================================
// LocalBus
// ============================================================================

#[derive(Debug)]
struct Lease {
    token: Uuid,
    lease: Duration,
    last_keep_alive: Instant,
}

impl Lease {
    fn expired(&self, now: Instant) -> bool {
        now.duration_since(self.last_keep_alive) > self.lease
    }
}

#[derive(Debug, Default)]
struct BusState {
    locks: FxHashMap<String, Lease>,
    subscribers: FxHashMap<String, Vec<Sender<Vec<u8>>>>,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<BusState>,
    released: Condvar,
}

/// In-process bus
#[derive(Debug, Clone, Default)]
pub struct LocalBus {
    shared: Arc<Shared>,
}

impl LocalBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of locks currently held (expired leases included until taken over)
    pub fn held_locks(&self) -> usize {
        self.shared.state.lock().locks.len()
    }
}

impl Bus for LocalBus {
    fn lock(&self, ctx: &Context, key: &str, lease: Duration) -> Result<Box<dyn LockHandle>> {
        const POLL: Duration = Duration::from_millis(10);

        let mut state = self.shared.state.lock();
        loop {
            ctx.check()?;
            let now = Instant::now();
            let free = match state.locks.get(key) {
                None => true,
                Some(held) if held.expired(now) => {
                    debug!(key, "taking over expired bus lock");
                    true
                }
                Some(_) => false,
            };
            if free {
                let token = Uuid::new_v4();
                state.locks.insert(
                    key.to_string(),
                    Lease {
                        token,
                        lease,
                        last_keep_alive: now,
                    },
                );
                return Ok(Box::new(LocalLock {
                    shared: Arc::clone(&self.shared),
                    key: key.to_string(),
                    token,
                    held: true,
                }));
            }
            self.shared.released.wait_for(&mut state, POLL);
        }
    }

    fn send(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        let mut state = self.shared.state.lock();
        if let Some(subs) = state.subscribers.get_mut(topic) {
            subs.retain(|tx| tx.send(payload.clone()).is_ok());
        }
        Ok(())
    }

    fn recv(&self, topic: &str) -> Receiver<Vec<u8>> {
        let (tx, rx) = channel();
        self.shared
            .state
            .lock()
            .subscribers
            .entry(topic.to_string())
            .or_default()
            .push(tx);
        rx
    }
}

/// Lock handle of a [`LocalBus`]; dropping it unlocks
#[derive(Debug)]
pub struct LocalLock {
    shared: Arc<Shared>,
    key: String,
    token: Uuid,
    held: bool,
}

impl LockHandle for LocalLock {
    fn keep_alive(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        match state.locks.get_mut(&self.key) {
            Some(lease) if lease.token == self.token && self.held => {
                lease.last_keep_alive = Instant::now();
                Ok(())
            }
            _ => Err(Error::conflict(format!("bus lock {} was lost", self.key))),
        }
    }

    fn unlock(&mut self) {
        if !self.held {
            return;
        }
        self.held = false;
        let mut state = self.shared.state.lock();
        if state.locks.get(&self.key).map(|l| l.token) == Some(self.token) {
            state.locks.remove(&self.key);
        }
        self.shared.released.notify_all();
    }
}

impl Drop for LocalLock {
    fn drop(&mut self) {
        self.unlock();
    }
}
