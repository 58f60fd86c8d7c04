//! Priority-scheduled worker pool with deadlines, cancellation, and
//! graceful shutdown.
//!
//! A fixed set of OS workers draws from a max-heap of tasks. Selection is
//! strict priority at pop time (FIFO within a priority for determinism);
//! a running task is never interrupted. Each task carries an absolute
//! deadline and a cancellation flag, both honoured at the popping moment:
//! an expired or cancelled task is popped, counted, and resolved without
//! executing.
//!
//! Every submission returns a [`TaskHandle`], a one-shot blocking future
//! through which exactly one terminal outcome is delivered: the
//! callable's return value, [`TaskError::Failed`] with the caught panic
//! message, [`TaskError::TimedOut`], or [`TaskError::Cancelled`]. A panic
//! inside a task is caught at the worker; the worker stays healthy.
//!
//! Shutdown sets the stop flag, wakes all workers, and joins them once
//! the backlog drains; [`PriorityPool`]'s `Drop` does the same, so the
//! destructor does not return while any task is still running.

use std::any::Any;
use std::collections::BinaryHeap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Polling period for [`PriorityPool::wait_all`].
const WAIT_ALL_POLL: Duration = Duration::from_millis(10);

/// Error returned by [`PriorityPool::submit`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    /// Shutdown has begun; the pool accepts no new tasks.
    #[error("submit on a stopped pool")]
    Stopped,
}

/// Terminal failure states delivered through a [`TaskHandle`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// The task panicked; the payload message is attached.
    #[error("task panicked: {0}")]
    Failed(String),
    /// The task's deadline passed before a worker popped it.
    #[error("task deadline passed before execution")]
    TimedOut,
    /// The task was cancelled before a worker popped it.
    #[error("task cancelled before execution")]
    Cancelled,
}

/// Snapshot of pool statistics.
///
/// Counters are monotonically non-decreasing over the pool's lifetime;
/// `active` and `pending` are instantaneous values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Tasks currently executing on a worker.
    pub active: usize,
    /// Tasks that returned normally.
    pub completed: u64,
    /// Tasks that panicked.
    pub failed: u64,
    /// Tasks whose deadline passed before execution.
    pub timed_out: u64,
    /// Tasks cancelled before execution.
    pub cancelled: u64,
    /// Tasks waiting in the queue.
    pub pending: usize,
}

/// One-shot result slot shared between a submitter and the executing
/// worker. Resolved exactly once; waiters block on the condvar.
struct TaskSlot<T> {
    result: Mutex<Option<Result<T, TaskError>>>,
    done: AtomicBool,
    resolved: Condvar,
}

impl<T> TaskSlot<T> {
    fn new() -> Self {
        Self {
            result: Mutex::new(None),
            done: AtomicBool::new(false),
            resolved: Condvar::new(),
        }
    }

    fn resolve(&self, result: Result<T, TaskError>) {
        let mut slot = self.result.lock().expect("task slot poisoned");
        debug_assert!(slot.is_none(), "task resolved twice");
        *slot = Some(result);
        self.done.store(true, Ordering::Release);
        drop(slot);
        self.resolved.notify_all();
    }

    fn wait(&self) {
        if self.done.load(Ordering::Acquire) {
            return;
        }
        let guard = self.result.lock().expect("task slot poisoned");
        let _guard = self
            .resolved
            .wait_while(guard, |slot| slot.is_none())
            .expect("task slot poisoned");
    }

    fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.done.load(Ordering::Acquire) {
            return true;
        }
        let guard = self.result.lock().expect("task slot poisoned");
        let (guard, result) = self
            .resolved
            .wait_timeout_while(guard, timeout, |slot| slot.is_none())
            .expect("task slot poisoned");
        drop(guard);
        !result.timed_out()
    }
}

/// The consumer end of a task's result channel.
///
/// Write-once, read-once: [`TaskHandle::join`] consumes the handle and
/// yields the terminal outcome. Dropping the handle without joining is
/// allowed; the result is discarded.
pub struct TaskHandle<T> {
    slot: Arc<TaskSlot<T>>,
    cancel: Arc<AtomicBool>,
}

impl<T> TaskHandle<T> {
    /// Requests cancellation.
    ///
    /// Effective only if observed before a worker pops the task; a
    /// running task is never interrupted.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    /// Returns `true` if cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    /// Returns `true` once the task has reached a terminal outcome.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.slot.done.load(Ordering::Acquire)
    }

    /// Blocks until the task reaches a terminal outcome.
    pub fn wait(&self) {
        self.slot.wait();
    }

    /// Blocks until the task resolves or `timeout` elapses.
    ///
    /// Returns `true` if the task resolved in time.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.slot.wait_timeout(timeout)
    }

    /// Blocks until the task resolves and returns its outcome.
    pub fn join(self) -> Result<T, TaskError> {
        self.slot.wait();
        self.slot
            .result
            .lock()
            .expect("task slot poisoned")
            .take()
            .expect("task resolved exactly once")
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("finished", &self.is_finished())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// What the worker decided to do with the task it popped.
enum Disposition {
    Run,
    TimedOut,
    Cancelled,
}

/// How an executed task ended, for counter accounting.
enum RunStatus {
    Completed,
    Failed,
}

/// Type-erased submitted task. The typed result slot hides behind the
/// trait so the queue can hold heterogeneous return types.
trait ErasedTask: Send {
    fn run(self: Box<Self>) -> RunStatus;
    fn resolve_timed_out(self: Box<Self>);
    fn resolve_cancelled(self: Box<Self>);
}

struct TypedTask<T, F> {
    f: F,
    slot: Arc<TaskSlot<T>>,
}

impl<T, F> ErasedTask for TypedTask<T, F>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    fn run(self: Box<Self>) -> RunStatus {
        let Self { f, slot } = *self;
        match catch_unwind(AssertUnwindSafe(f)) {
            Ok(value) => {
                slot.resolve(Ok(value));
                RunStatus::Completed
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::warn!(%message, "pool task panicked");
                slot.resolve(Err(TaskError::Failed(message)));
                RunStatus::Failed
            }
        }
    }

    fn resolve_timed_out(self: Box<Self>) {
        self.slot.resolve(Err(TaskError::TimedOut));
    }

    fn resolve_cancelled(self: Box<Self>) {
        self.slot.resolve(Err(TaskError::Cancelled));
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "opaque panic payload".to_owned())
}

/// A queued task: callable, priority, absolute deadline, cancellation
/// flag, and a submission sequence number for FIFO tie-breaking.
struct QueuedTask {
    priority: i32,
    seq: u64,
    deadline: Instant,
    cancel: Arc<AtomicBool>,
    payload: Box<dyn ErasedTask>,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Max-heap: higher priority first, then earlier submission.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct PoolInner {
    queue: Mutex<BinaryHeap<QueuedTask>>,
    task_ready: Condvar,
    stop: AtomicBool,
    next_seq: AtomicU64,
    active: AtomicUsize,
    completed: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    cancelled: AtomicU64,
}

/// Fixed-size priority worker pool.
///
/// # Example
///
/// ```
/// use interlock::pool::PriorityPool;
/// use std::time::Duration;
///
/// let pool = PriorityPool::new(2);
/// let handle = pool
///     .submit(5, Duration::from_secs(1), || 2 + 2)
///     .unwrap();
/// assert_eq!(handle.join().unwrap(), 4);
/// ```
pub struct PriorityPool {
    inner: Arc<PoolInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
}

impl PriorityPool {
    /// Spawns a pool with `worker_count` workers.
    ///
    /// # Panics
    ///
    /// Panics if `worker_count` is zero.
    #[must_use]
    pub fn new(worker_count: usize) -> Self {
        assert!(worker_count >= 1, "worker_count must be at least 1");

        let inner = Arc::new(PoolInner {
            queue: Mutex::new(BinaryHeap::new()),
            task_ready: Condvar::new(),
            stop: AtomicBool::new(false),
            next_seq: AtomicU64::new(0),
            active: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            timed_out: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
        });

        let workers = (0..worker_count)
            .map(|i| {
                let inner = Arc::clone(&inner);
                thread::Builder::new()
                    .name(format!("interlock-worker-{i}"))
                    .spawn(move || worker_loop(&inner))
                    .expect("failed to spawn pool worker")
            })
            .collect();

        Self {
            inner,
            workers: Mutex::new(workers),
            worker_count,
        }
    }

    /// Returns the number of workers the pool was created with.
    #[must_use]
    pub const fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Enqueues `f` with the given priority and a deadline of
    /// now + `timeout`.
    ///
    /// Higher priorities are popped first; within a priority, earlier
    /// submissions win. Fails with [`SubmitError::Stopped`] once shutdown
    /// has begun. Submission never blocks.
    pub fn submit<T, F>(
        &self,
        priority: i32,
        timeout: Duration,
        f: F,
    ) -> Result<TaskHandle<T>, SubmitError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let now = Instant::now();
        let deadline = now
            .checked_add(timeout)
            .unwrap_or_else(|| now + Duration::from_secs(60 * 60 * 24 * 365));

        let slot = Arc::new(TaskSlot::new());
        let cancel = Arc::new(AtomicBool::new(false));
        let task = QueuedTask {
            priority,
            seq: self.inner.next_seq.fetch_add(1, Ordering::Relaxed),
            deadline,
            cancel: Arc::clone(&cancel),
            payload: Box::new(TypedTask {
                f,
                slot: Arc::clone(&slot),
            }),
        };

        {
            let mut queue = self.inner.queue.lock().expect("pool queue poisoned");
            if self.inner.stop.load(Ordering::Acquire) {
                return Err(SubmitError::Stopped);
            }
            queue.push(task);
        }
        self.inner.task_ready.notify_one();

        Ok(TaskHandle { slot, cancel })
    }

    /// Returns the queue length.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.queue.lock().expect("pool queue poisoned").len()
    }

    /// Returns a statistics snapshot.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            active: self.inner.active.load(Ordering::Acquire),
            completed: self.inner.completed.load(Ordering::Relaxed),
            failed: self.inner.failed.load(Ordering::Relaxed),
            timed_out: self.inner.timed_out.load(Ordering::Relaxed),
            cancelled: self.inner.cancelled.load(Ordering::Relaxed),
            pending: self.pending(),
        }
    }

    /// Polls coarsely until the pool is idle (`pending == 0` and
    /// `active == 0`) or `timeout` elapses.
    ///
    /// Returns `true` if the pool went idle in time.
    #[must_use]
    pub fn wait_all(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.pending() > 0 || self.inner.active.load(Ordering::Acquire) > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(WAIT_ALL_POLL);
        }
        true
    }

    /// Stops the pool: no further submissions are accepted, workers
    /// drain the remaining backlog and terminate, and this call joins
    /// them. Idempotent.
    pub fn shutdown(&self) {
        {
            let _queue = self.inner.queue.lock().expect("pool queue poisoned");
            self.inner.stop.store(true, Ordering::Release);
        }
        self.inner.task_ready.notify_all();

        let mut workers = self.workers.lock().expect("pool workers poisoned");
        for worker in workers.drain(..) {
            let _ = worker.join();
        }
        tracing::debug!("pool shut down");
    }
}

impl Drop for PriorityPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for PriorityPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PriorityPool")
            .field("worker_count", &self.worker_count)
            .field("pending", &self.pending())
            .field("stopped", &self.inner.stop.load(Ordering::Acquire))
            .finish()
    }
}

fn worker_loop(inner: &Arc<PoolInner>) {
    tracing::trace!("pool worker started");
    loop {
        let guard = inner.queue.lock().expect("pool queue poisoned");
        let mut queue = inner
            .task_ready
            .wait_while(guard, |queue| {
                !inner.stop.load(Ordering::Acquire) && queue.is_empty()
            })
            .expect("pool queue poisoned");

        if queue.is_empty() {
            // Stop requested and backlog drained.
            break;
        }

        let now = Instant::now();
        let disposition = {
            let top = queue.peek().expect("non-empty after wait");
            if top.deadline <= now {
                Disposition::TimedOut
            } else if top.cancel.load(Ordering::Acquire) {
                Disposition::Cancelled
            } else {
                Disposition::Run
            }
        };
        let task = queue.pop().expect("non-empty after wait");

        match disposition {
            Disposition::TimedOut => {
                drop(queue);
                inner.timed_out.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(seq = task.seq, "task deadline passed before start");
                task.payload.resolve_timed_out();
            }
            Disposition::Cancelled => {
                drop(queue);
                inner.cancelled.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(seq = task.seq, "task cancelled before start");
                task.payload.resolve_cancelled();
            }
            Disposition::Run => {
                // Claim the task while still holding the queue lock so a
                // concurrent wait_all cannot observe it as neither
                // pending nor active.
                inner.active.fetch_add(1, Ordering::SeqCst);
                drop(queue);
                match task.payload.run() {
                    RunStatus::Completed => {
                        inner.completed.fetch_add(1, Ordering::Relaxed);
                    }
                    RunStatus::Failed => {
                        inner.failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
                inner.active.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }
    tracing::trace!("pool worker exiting");
}
