//! Request context: deadline and cancellation
//!
//! Every KV operation takes a `&Context`. A context is cheap to clone and
//! shares its cancellation flag with all clones; `child` contexts are
//! cancelled with their parent and may carry a tighter deadline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

#[derive(Debug)]
struct Inner {
    cancelled: AtomicBool,
    deadline: Option<Instant>,
    parent: Option<Context>,
}

/// Cancellation scope for one request
#[derive(Debug, Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl Context {
    /// A context that is never cancelled and has no deadline
    pub fn background() -> Self {
        Self::build(None, None)
    }

    /// A context that expires after `timeout`
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::build(Instant::now().checked_add(timeout), None)
    }

    /// A context that expires at `deadline`
    pub fn with_deadline(deadline: Instant) -> Self {
        Self::build(Some(deadline), None)
    }

    /// A child context, cancelled together with `self`
    pub fn child(&self) -> Self {
        Self::build(None, Some(self.clone()))
    }

    /// A child context with an additional timeout
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        Self::build(Instant::now().checked_add(timeout), Some(self.clone()))
    }

    fn build(deadline: Option<Instant>, parent: Option<Context>) -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                deadline,
                parent,
            }),
        }
    }

    /// Cancel this context and all of its children
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
    }

    /// Effective deadline: the earliest of this context's and its ancestors'
    pub fn deadline(&self) -> Option<Instant> {
        let own = self.inner.deadline;
        let inherited = self.inner.parent.as_ref().and_then(Context::deadline);
        match (own, inherited) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Time left until the deadline, `None` if unbounded
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline()
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
            || self.inner.parent.as_ref().is_some_and(Context::is_cancelled)
    }

    /// True once cancelled or past the deadline
    pub fn is_done(&self) -> bool {
        self.check().is_err()
    }

    /// Return the error a cancelled or expired context aborts with
    ///
    /// # Errors
    ///
    /// `Error::Cancelled` after `cancel()`, `Error::DeadlineExceeded` once
    /// the deadline has passed.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        match self.deadline() {
            Some(deadline) if Instant::now() >= deadline => Err(Error::DeadlineExceeded),
            _ => Ok(()),
        }
    }
}
