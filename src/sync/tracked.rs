//! Instrumented mutex that feeds acquire/wait/release events into a
//! [`WaitGraph`].
//!
//! The protocol per acquisition:
//!
//! 1. register a wait edge,
//! 2. block on the underlying mutex,
//! 3. atomically clear the wait edge and record the hold
//!    ([`WaitGraph::record_acquired`]).
//!
//! The returned guard removes the hold edge when dropped, before the
//! mutex itself is released. Because release rides on the guard's
//! destructor, it runs on every exit path from the enclosing scope,
//! panics included.

use super::graph::{LockId, WaitGraph};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard};

/// A mutex wrapper whose acquisitions and releases are visible to a
/// shared [`WaitGraph`] for deadlock detection.
///
/// # Example
///
/// ```
/// use interlock::sync::{TrackedMutex, WaitGraph};
/// use std::sync::Arc;
///
/// let graph = Arc::new(WaitGraph::new());
/// let lock = TrackedMutex::new(Arc::clone(&graph), 0_u32);
///
/// let mut guard = lock.lock();
/// *guard += 1;
/// drop(guard); // hold edge removed, mutex released
/// assert!(!graph.has_deadlock());
/// ```
pub struct TrackedMutex<T> {
    id: LockId,
    graph: Arc<WaitGraph>,
    inner: Mutex<T>,
}

impl<T> TrackedMutex<T> {
    /// Creates a tracked mutex protecting `value`, reporting to `graph`.
    #[must_use]
    pub fn new(graph: Arc<WaitGraph>, value: T) -> Self {
        Self {
            id: LockId::next(),
            graph,
            inner: Mutex::new(value),
        }
    }

    /// Returns this lock's identity within its graph.
    #[must_use]
    pub const fn id(&self) -> LockId {
        self.id
    }

    /// Returns the wait-for graph this lock reports to.
    #[must_use]
    pub const fn graph(&self) -> &Arc<WaitGraph> {
        &self.graph
    }

    /// Acquires the lock, blocking while it is contended.
    ///
    /// The wait edge is registered before blocking, so a concurrent
    /// [`WaitGraph::has_deadlock`] sweep observes this thread as waiting
    /// for the full duration of the block.
    pub fn lock(&self) -> TrackedGuard<'_, T> {
        self.graph.register_wait(self.id);
        let inner = self.inner.lock().expect("tracked mutex poisoned");
        self.graph.record_acquired(self.id);
        TrackedGuard { lock: self, inner }
    }

    /// Attempts to acquire the lock without blocking.
    ///
    /// The transient wait edge is cleared on failure.
    pub fn try_lock(&self) -> Option<TrackedGuard<'_, T>> {
        self.graph.register_wait(self.id);
        match self.inner.try_lock() {
            Ok(inner) => {
                self.graph.record_acquired(self.id);
                Some(TrackedGuard { lock: self, inner })
            }
            Err(_) => {
                self.graph.stop_wait(self.id);
                None
            }
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for TrackedMutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedMutex")
            .field("id", &self.id)
            .field("inner", &self.inner)
            .finish()
    }
}

/// RAII guard for a [`TrackedMutex`].
///
/// Drop order matters: the hold edge is removed first, then the
/// underlying mutex guard (a field) is released, so the graph never
/// shows a hold on an already-released mutex.
pub struct TrackedGuard<'a, T> {
    lock: &'a TrackedMutex<T>,
    inner: MutexGuard<'a, T>,
}

impl<T> Deref for TrackedGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T> DerefMut for TrackedGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

impl<T> Drop for TrackedGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.graph.release_hold(self.lock.id);
    }
}

impl<T: fmt::Debug> fmt::Debug for TrackedGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedGuard")
            .field("id", &self.lock.id)
            .field("value", &*self.inner)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;

    #[test]
    fn lock_records_hold_and_drop_clears_it() {
        let graph = Arc::new(WaitGraph::new());
        let lock = TrackedMutex::new(Arc::clone(&graph), ());

        let guard = lock.lock();
        assert_eq!(graph.holding_threads(), 1);
        assert_eq!(graph.waiting_threads(), 0);
        drop(guard);
        assert_eq!(graph.holding_threads(), 0);
    }

    #[test]
    fn try_lock_failure_leaves_no_edges() {
        let graph = Arc::new(WaitGraph::new());
        let lock = Arc::new(TrackedMutex::new(Arc::clone(&graph), ()));

        let guard = lock.lock();
        let lock2 = Arc::clone(&lock);
        let graph2 = Arc::clone(&graph);
        thread::spawn(move || {
            assert!(lock2.try_lock().is_none());
            assert_eq!(graph2.waiting_threads(), 0);
        })
        .join()
        .unwrap();
        drop(guard);
    }

    #[test]
    fn guard_gives_access_to_value() {
        let graph = Arc::new(WaitGraph::new());
        let lock = TrackedMutex::new(graph, vec![1, 2]);
        lock.lock().push(3);
        assert_eq!(*lock.lock(), vec![1, 2, 3]);
    }

    #[test]
    fn contended_lock_shows_as_waiting() {
        let graph = Arc::new(WaitGraph::new());
        let lock = Arc::new(TrackedMutex::new(Arc::clone(&graph), ()));

        let guard = lock.lock();
        let (started_tx, started_rx) = mpsc::channel::<()>();
        let waiter = {
            let lock = Arc::clone(&lock);
            thread::spawn(move || {
                started_tx.send(()).unwrap();
                let _guard = lock.lock();
            })
        };

        started_rx.recv().unwrap();
        // Poll until the waiter has blocked and its wait edge is visible.
        let mut waiting = false;
        for _ in 0..100 {
            if graph.waiting_threads() == 1 {
                waiting = true;
                break;
            }
            thread::sleep(std::time::Duration::from_millis(5));
        }
        assert!(waiting, "blocked acquirer never registered a wait edge");

        drop(guard);
        waiter.join().unwrap();
        assert_eq!(graph.holding_threads(), 0);
        assert_eq!(graph.waiting_threads(), 0);
    }

    #[test]
    fn distinct_locks_get_distinct_ids() {
        let graph = Arc::new(WaitGraph::new());
        let a = TrackedMutex::new(Arc::clone(&graph), ());
        let b = TrackedMutex::new(graph, ());
        assert_ne!(a.id(), b.id());
    }
}
