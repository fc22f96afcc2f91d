//! Reconcile queue
//!
//! Committed writes of documents whose model lists reactors schedule a
//! reconcile task here. Tasks run on a fixed pool of worker threads, higher
//! priority first and FIFO within a priority. Writes to `Model` and `Reactor`
//! documents are queued at [`TaskPriority::High`] so that configuration
//! changes settle before the data changes queued behind them.
//!
//! With zero workers, or when the queue is full, tasks run inline on the
//! submitting thread.

use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::JoinHandle;
use thiserror::Error;
use tracing::{error, warn};

use apogy_core::{MODEL_MODEL, REACTOR_MODEL};

use crate::config::ReconcileConfig;

/// Priority of a reconcile task
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TaskPriority {
    /// Ordinary document writes
    Normal = 0,
    /// Writes of `Model` and `Reactor` documents
    High = 1,
}

impl TaskPriority {
    /// Priority of a reconcile task for a document of `model`
    pub fn for_model(model: &str) -> Self {
        if model == MODEL_MODEL || model == REACTOR_MODEL {
            TaskPriority::High
        } else {
            TaskPriority::Normal
        }
    }
}

/// Task rejected by [`ReconcileScheduler::submit`]
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BackpressureError {
    /// Queue at `max_queue_depth`
    #[error("reconcile queue is full")]
    QueueFull,
    /// Scheduler already shut down
    #[error("reconcile scheduler is shut down")]
    ShutDown,
}

/// Scheduler metrics snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Tasks waiting in the queue
    pub queue_depth: usize,
    /// Tasks being executed by workers
    pub active_tasks: usize,
    /// Tasks finished since creation, panicked ones included
    pub tasks_completed: u64,
    /// Worker threads
    pub worker_count: usize,
}

type Work = Box<dyn FnOnce() + Send>;

struct TaskEnvelope {
    priority: TaskPriority,
    sequence: u64,
    work: Work,
}

impl Eq for TaskEnvelope {}

impl PartialEq for TaskEnvelope {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

// Higher priority first, then lower sequence first
impl Ord for TaskEnvelope {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then(other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for TaskEnvelope {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct SchedulerInner {
    queue: Mutex<BinaryHeap<TaskEnvelope>>,
    work_ready: Condvar,
    drain_cond: Condvar,
    shutdown: AtomicBool,
    sequence: AtomicU64,
    queue_depth: AtomicUsize,
    active_tasks: AtomicUsize,
    max_queue_depth: usize,
    tasks_completed: AtomicU64,
}

/// Priority queue of reconcile tasks served by worker threads
pub struct ReconcileScheduler {
    inner: Arc<SchedulerInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    num_threads: usize,
}

impl std::fmt::Debug for ReconcileScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconcileScheduler")
            .field("stats", &self.stats())
            .finish()
    }
}

impl ReconcileScheduler {
    /// Create a scheduler with `num_threads` workers named `apogy-reconcile-N`
    ///
    /// Workers that fail to spawn are logged and skipped; with no worker
    /// running, every task runs inline.
    pub fn new(num_threads: usize, max_queue_depth: usize) -> Self {
        let inner = Arc::new(SchedulerInner {
            queue: Mutex::new(BinaryHeap::new()),
            work_ready: Condvar::new(),
            drain_cond: Condvar::new(),
            shutdown: AtomicBool::new(false),
            sequence: AtomicU64::new(0),
            queue_depth: AtomicUsize::new(0),
            active_tasks: AtomicUsize::new(0),
            max_queue_depth,
            tasks_completed: AtomicU64::new(0),
        });

        let mut workers = Vec::with_capacity(num_threads);
        for i in 0..num_threads {
            let inner_clone = Arc::clone(&inner);
            match std::thread::Builder::new()
                .name(format!("apogy-reconcile-{}", i))
                .spawn(move || worker_loop(&inner_clone))
            {
                Ok(handle) => workers.push(handle),
                Err(e) => error!(worker = i, error = %e, "failed to spawn reconcile worker"),
            }
        }
        let num_threads = workers.len();

        Self {
            inner,
            workers: Mutex::new(workers),
            num_threads,
        }
    }

    /// Create a scheduler sized by the reconcile configuration
    pub fn from_config(config: &ReconcileConfig) -> Self {
        Self::new(config.workers, config.max_queue_depth)
    }

    /// Queue a task
    ///
    /// # Errors
    ///
    /// Returns [`BackpressureError`] if the queue is at capacity or the
    /// scheduler has been shut down. The task is dropped unrun.
    pub fn submit(
        &self,
        priority: TaskPriority,
        work: impl FnOnce() + Send + 'static,
    ) -> Result<(), BackpressureError> {
        self.push(priority, Box::new(work)).map_err(|(e, _)| e)
    }

    /// Queue a task, running it inline when it cannot be queued
    ///
    /// Returns `true` if the task was queued, `false` if it already ran.
    pub fn schedule(&self, priority: TaskPriority, work: impl FnOnce() + Send + 'static) -> bool {
        if self.num_threads == 0 {
            self.run_inline(Box::new(work));
            return false;
        }
        match self.push(priority, Box::new(work)) {
            Ok(()) => true,
            Err((e, work)) => {
                warn!(error = %e, "running reconcile task inline");
                self.run_inline(work);
                false
            }
        }
    }

    fn push(&self, priority: TaskPriority, work: Work) -> Result<(), (BackpressureError, Work)> {
        if self.inner.shutdown.load(AtomicOrdering::Acquire) {
            return Err((BackpressureError::ShutDown, work));
        }
        if self.inner.queue_depth.load(AtomicOrdering::Acquire) >= self.inner.max_queue_depth {
            return Err((BackpressureError::QueueFull, work));
        }

        let sequence = self.inner.sequence.fetch_add(1, AtomicOrdering::Relaxed);
        {
            let mut queue = self.inner.queue.lock();
            queue.push(TaskEnvelope {
                priority,
                sequence,
                work,
            });
            self.inner.queue_depth.fetch_add(1, AtomicOrdering::Release);
        }
        self.inner.work_ready.notify_one();
        Ok(())
    }

    fn run_inline(&self, work: Work) {
        run_task(work);
        self.inner
            .tasks_completed
            .fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Block until all queued and in-flight tasks have completed
    ///
    /// Workers keep running afterwards.
    pub fn drain(&self) {
        let mut queue = self.inner.queue.lock();
        while self.inner.queue_depth.load(AtomicOrdering::Acquire) > 0
            || self.inner.active_tasks.load(AtomicOrdering::Acquire) > 0
        {
            self.inner.drain_cond.wait(&mut queue);
        }
    }

    /// Signal workers to exit once the queue is empty and join them
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, AtomicOrdering::Release);

        // Notify under the queue lock so a worker between its shutdown check
        // and its wait cannot miss the wakeup.
        {
            let _queue = self.inner.queue.lock();
            self.inner.work_ready.notify_all();
        }

        let mut workers = self.workers.lock();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
    }

    /// Snapshot of scheduler metrics
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            queue_depth: self.inner.queue_depth.load(AtomicOrdering::Relaxed),
            active_tasks: self.inner.active_tasks.load(AtomicOrdering::Relaxed),
            tasks_completed: self.inner.tasks_completed.load(AtomicOrdering::Relaxed),
            worker_count: self.num_threads,
        }
    }
}

/// Decrements `active_tasks` and wakes drain waiters, even if the task panicked
struct ActiveTaskGuard<'a> {
    inner: &'a SchedulerInner,
}

impl<'a> Drop for ActiveTaskGuard<'a> {
    fn drop(&mut self) {
        let prev_active = self.inner.active_tasks.fetch_sub(1, AtomicOrdering::Release);
        self.inner
            .tasks_completed
            .fetch_add(1, AtomicOrdering::Relaxed);

        if prev_active == 1 && self.inner.queue_depth.load(AtomicOrdering::Acquire) == 0 {
            let _queue = self.inner.queue.lock();
            self.inner.drain_cond.notify_all();
        }
    }
}

fn run_task(work: Work) {
    if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(work)) {
        error!(
            "reconcile task panicked: {:?}",
            e.downcast_ref::<&str>().copied().unwrap_or("(non-string panic)")
        );
    }
}

fn worker_loop(inner: &SchedulerInner) {
    loop {
        let task = {
            let mut queue = inner.queue.lock();
            loop {
                if let Some(task) = queue.pop() {
                    inner.queue_depth.fetch_sub(1, AtomicOrdering::Release);
                    inner.active_tasks.fetch_add(1, AtomicOrdering::Release);
                    break task;
                }
                if inner.shutdown.load(AtomicOrdering::Acquire) {
                    return;
                }
                inner.work_ready.wait(&mut queue);
            }
        };

        let _guard = ActiveTaskGuard { inner };
        run_task(task.work);
    }
}
