//! Wait-for graph for runtime deadlock detection.
//!
//! The graph records two relations, both keyed by thread:
//!
//! - **hold edges**: thread T currently owns lock L
//! - **wait edges**: thread T is blocked trying to acquire lock L
//!
//! A deadlock is a cycle `T0 → L0 → T1 → L1 → … → T0` where each `Ti`
//! waits for `Li` and `Ti+1` holds `Li`. [`WaitGraph::has_deadlock`]
//! searches for such a cycle with a depth-first traversal over thread
//! nodes. The graph mutex is held for the whole traversal, so detection
//! observes a consistent snapshot: a cycle found may self-resolve before
//! the caller acts on it, and a cycle forming mid-sweep may not yet be
//! visible.
//!
//! Callers that feed the graph (see [`TrackedMutex`]) must register the
//! wait edge *before* blocking and convert it into a hold edge atomically
//! *after* acquiring, via [`WaitGraph::record_acquired`]. Otherwise a
//! detection sweep can miss a live deadlock.
//!
//! [`TrackedMutex`]: super::TrackedMutex

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};

static NEXT_LOCK_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a lock participating in a [`WaitGraph`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LockId(u64);

impl LockId {
    /// Allocates a fresh identity. Never reused within a process.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_LOCK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw numeric identity.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LockId({})", self.0)
    }
}

#[derive(Default)]
struct GraphState {
    /// thread → locks it currently holds. A lock appears in at most one set.
    holds: HashMap<ThreadId, HashSet<LockId>>,
    /// thread → locks it is currently blocked on.
    waits: HashMap<ThreadId, HashSet<LockId>>,
}

/// Thread-safe bookkeeping of hold and wait edges with on-demand cycle
/// detection.
///
/// All operations record edges for the *calling* thread; a thread never
/// mutates another thread's entries. Empty per-thread sets are pruned, so
/// the presence of a thread key implies a non-empty set.
#[derive(Default)]
pub struct WaitGraph {
    state: Mutex<GraphState>,
}

impl WaitGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that the calling thread now holds `lock`.
    pub fn register_hold(&self, lock: LockId) {
        self.state
            .lock()
            .holds
            .entry(thread::current().id())
            .or_default()
            .insert(lock);
    }

    /// Records that the calling thread released `lock`.
    pub fn release_hold(&self, lock: LockId) {
        let mut state = self.state.lock();
        Self::remove_edge(&mut state.holds, lock);
    }

    /// Records that the calling thread is about to block on `lock`.
    pub fn register_wait(&self, lock: LockId) {
        self.state
            .lock()
            .waits
            .entry(thread::current().id())
            .or_default()
            .insert(lock);
    }

    /// Records that the calling thread is no longer waiting for `lock`,
    /// either because it acquired it or because it gave up.
    pub fn stop_wait(&self, lock: LockId) {
        let mut state = self.state.lock();
        Self::remove_edge(&mut state.waits, lock);
    }

    /// Converts the calling thread's wait edge for `lock` into a hold edge
    /// under a single graph lock, so no detection sweep can observe the
    /// intermediate state.
    pub fn record_acquired(&self, lock: LockId) {
        let mut state = self.state.lock();
        Self::remove_edge(&mut state.waits, lock);
        state
            .holds
            .entry(thread::current().id())
            .or_default()
            .insert(lock);
    }

    /// Returns `true` iff the current hold/wait graph contains a cycle.
    ///
    /// The verdict is a property of the snapshot taken while the graph
    /// mutex is held, not an assertion about the future. Two threads
    /// waiting on the same lock is not a cycle; only a cyclic hold/wait
    /// chain is.
    #[must_use]
    pub fn has_deadlock(&self) -> bool {
        let state = self.state.lock();

        // Invert `holds` once so each wait edge resolves to its holder in
        // O(1) during the traversal.
        let mut owner: HashMap<LockId, ThreadId> = HashMap::new();
        for (thread_id, held) in &state.holds {
            for lock in held {
                owner.insert(*lock, *thread_id);
            }
        }

        let mut visited: HashSet<ThreadId> = HashSet::new();
        let mut stack: HashSet<ThreadId> = HashSet::new();
        for thread_id in state.holds.keys() {
            if !visited.contains(thread_id)
                && Self::has_cycle(&state, &owner, *thread_id, &mut visited, &mut stack)
            {
                tracing::debug!(thread = ?thread_id, "wait-for graph contains a cycle");
                return true;
            }
        }
        false
    }

    /// Number of threads currently holding at least one lock.
    #[must_use]
    pub fn holding_threads(&self) -> usize {
        self.state.lock().holds.len()
    }

    /// Number of threads currently blocked on at least one lock.
    #[must_use]
    pub fn waiting_threads(&self) -> usize {
        self.state.lock().waits.len()
    }

    fn remove_edge(edges: &mut HashMap<ThreadId, HashSet<LockId>>, lock: LockId) {
        let thread_id = thread::current().id();
        if let Some(set) = edges.get_mut(&thread_id) {
            set.remove(&lock);
            if set.is_empty() {
                edges.remove(&thread_id);
            }
        }
    }

    fn has_cycle(
        state: &GraphState,
        owner: &HashMap<LockId, ThreadId>,
        current: ThreadId,
        visited: &mut HashSet<ThreadId>,
        stack: &mut HashSet<ThreadId>,
    ) -> bool {
        visited.insert(current);
        stack.insert(current);

        if let Some(waiting) = state.waits.get(&current) {
            for lock in waiting {
                // A lock nobody holds cannot extend the chain.
                let Some(&holder) = owner.get(lock) else {
                    continue;
                };
                if stack.contains(&holder) {
                    return true;
                }
                if !visited.contains(&holder)
                    && Self::has_cycle(state, owner, holder, visited, stack)
                {
                    return true;
                }
            }
        }

        stack.remove(&current);
        false
    }
}

impl fmt::Debug for WaitGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("WaitGraph")
            .field("holding_threads", &state.holds.len())
            .field("waiting_threads", &state.waits.len())
            .finish()
    }
}
