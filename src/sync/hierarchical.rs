//! Hierarchy-enforcing mutex: deadlock freedom by construction.
//!
//! Every [`HierarchicalMutex`] carries an immutable level. A thread may
//! only acquire locks in strictly descending level order; an acquisition
//! that would ascend (or stay level) is refused with
//! [`HierarchyError::Violation`] *before* the underlying mutex is
//! touched, so a violating acquire never blocks.
//!
//! The invariant "held levels strictly decrease as acquisition proceeds"
//! makes a cycle among hierarchical locks impossible: any cycle would
//! require some edge to ascend in level.
//!
//! The per-thread floor lives in a thread local, initialised to
//! `u64::MAX`; guards restore the value captured at acquire time on drop,
//! so correctly nested (LIFO) use round-trips exactly.

use std::cell::Cell;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

thread_local! {
    /// Level of the most recently acquired hierarchical lock on this
    /// thread. `u64::MAX` means "holding nothing".
    static PREVIOUS_LEVEL: Cell<u64> = const { Cell::new(u64::MAX) };
}

/// Errors raised by hierarchical lock acquisition.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HierarchyError {
    /// The calling thread attempted to acquire a lock at a level at or
    /// above its current floor.
    #[error("lock hierarchy violated: attempted level {attempted} while at level {held}")]
    Violation {
        /// Level of the lock whose acquisition was refused.
        attempted: u64,
        /// The thread's current floor (level of its most recent acquire).
        held: u64,
    },
}

/// A mutex that refuses acquisitions violating a declared total order on
/// levels.
///
/// Two locks with the same level can never be held simultaneously by one
/// thread, and recursive acquisition of the same lock is a violation;
/// both fall out of the strict-descent check.
///
/// # Example
///
/// ```
/// use interlock::sync::HierarchicalMutex;
///
/// let outer = HierarchicalMutex::new(2000, ());
/// let inner = HierarchicalMutex::new(1000, ());
///
/// let a = outer.lock().unwrap();
/// let b = inner.lock().unwrap(); // descending: fine
/// drop(b);
/// drop(a);
///
/// let b = inner.lock().unwrap();
/// assert!(outer.lock().is_err()); // ascending: refused
/// drop(b);
/// ```
pub struct HierarchicalMutex<T> {
    level: u64,
    inner: Mutex<T>,
}

impl<T> HierarchicalMutex<T> {
    /// Creates a mutex at the given hierarchy level protecting `value`.
    #[must_use]
    pub fn new(level: u64, value: T) -> Self {
        Self {
            level,
            inner: Mutex::new(value),
        }
    }

    /// Returns this lock's hierarchy level.
    #[must_use]
    pub const fn level(&self) -> u64 {
        self.level
    }

    /// Acquires the lock, blocking while it is contended.
    ///
    /// Fails with [`HierarchyError::Violation`] when the calling thread's
    /// floor is at or below this lock's level. The check precedes
    /// blocking.
    pub fn lock(&self) -> Result<HierarchicalGuard<'_, T>, HierarchyError> {
        let restore = self.check_level()?;
        let inner = self.inner.lock().expect("hierarchical mutex poisoned");
        PREVIOUS_LEVEL.set(self.level);
        Ok(HierarchicalGuard { restore, inner })
    }

    /// Attempts to acquire the lock without blocking.
    ///
    /// Returns `None` when the hierarchy check fails or the mutex is
    /// contended.
    pub fn try_lock(&self) -> Option<HierarchicalGuard<'_, T>> {
        let restore = self.check_level().ok()?;
        let inner = self.inner.try_lock().ok()?;
        PREVIOUS_LEVEL.set(self.level);
        Some(HierarchicalGuard { restore, inner })
    }

    fn check_level(&self) -> Result<u64, HierarchyError> {
        let held = PREVIOUS_LEVEL.get();
        if held <= self.level {
            tracing::trace!(
                attempted = self.level,
                held,
                "refusing out-of-order hierarchical acquire"
            );
            return Err(HierarchyError::Violation {
                attempted: self.level,
                held,
            });
        }
        Ok(held)
    }
}

impl<T: fmt::Debug> fmt::Debug for HierarchicalMutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HierarchicalMutex")
            .field("level", &self.level)
            .field("inner", &self.inner)
            .finish()
    }
}

/// RAII guard for a [`HierarchicalMutex`].
///
/// Dropping the guard releases the mutex and restores the thread's level
/// floor to the value captured at acquire time (LIFO release).
pub struct HierarchicalGuard<'a, T> {
    restore: u64,
    inner: MutexGuard<'a, T>,
}

impl<T> Deref for HierarchicalGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T> DerefMut for HierarchicalGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

impl<T> Drop for HierarchicalGuard<'_, T> {
    fn drop(&mut self) {
        PREVIOUS_LEVEL.set(self.restore);
    }
}

impl<T: fmt::Debug> fmt::Debug for HierarchicalGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HierarchicalGuard")
            .field("restore", &self.restore)
            .field("value", &*self.inner)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descending_acquisition_succeeds() {
        let high = HierarchicalMutex::new(2000, 0_i32);
        let low = HierarchicalMutex::new(1000, 0_i32);

        let mut a = high.lock().unwrap();
        *a += 1;
        let b = low.lock().unwrap();
        drop(b);
        drop(a);
        assert_eq!(*high.lock().unwrap(), 1);
    }

    #[test]
    fn ascending_acquisition_is_refused() {
        let high = HierarchicalMutex::new(2000, ());
        let low = HierarchicalMutex::new(1000, ());

        let held = low.lock().unwrap();
        let err = high.lock().unwrap_err();
        assert_eq!(
            err,
            HierarchyError::Violation {
                attempted: 2000,
                held: 1000,
            }
        );
        // The first lock stays held and releasable.
        drop(held);
        assert!(high.lock().is_ok());
    }

    #[test]
    fn equal_levels_cannot_nest() {
        let a = HierarchicalMutex::new(500, ());
        let b = HierarchicalMutex::new(500, ());

        let held = a.lock().unwrap();
        assert!(b.lock().is_err());
        drop(held);
        assert!(b.lock().is_ok());
    }

    #[test]
    fn recursive_acquisition_is_refused() {
        let lock = HierarchicalMutex::new(100, ());
        let held = lock.lock().unwrap();
        assert!(lock.lock().is_err());
        drop(held);
    }

    #[test]
    fn guard_drop_restores_outer_floor() {
        let outer = HierarchicalMutex::new(3000, ());
        let inner = HierarchicalMutex::new(1000, ());
        let middle = HierarchicalMutex::new(2000, ());

        let a = outer.lock().unwrap();
        let b = inner.lock().unwrap();
        drop(b);
        // Releasing the inner lock restores the floor to 3000, so a
        // middle-level acquire is legal again.
        let c = middle.lock().unwrap();
        drop(c);
        drop(a);
    }

    #[test]
    fn try_lock_refuses_violation_without_blocking() {
        let high = HierarchicalMutex::new(2000, ());
        let low = HierarchicalMutex::new(1000, ());

        let held = low.lock().unwrap();
        assert!(high.try_lock().is_none());
        drop(held);
        assert!(high.try_lock().is_some());
    }

    #[test]
    fn try_lock_reports_contention() {
        use std::sync::mpsc;

        let lock = std::sync::Arc::new(HierarchicalMutex::new(10, ()));
        let (locked_tx, locked_rx) = mpsc::channel::<()>();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let holder = {
            let lock = std::sync::Arc::clone(&lock);
            std::thread::spawn(move || {
                let guard = lock.lock().unwrap();
                locked_tx.send(()).unwrap();
                let _ = release_rx.recv();
                drop(guard);
            })
        };

        locked_rx.recv().unwrap();
        assert!(lock.try_lock().is_none());
        release_tx.send(()).unwrap();
        holder.join().unwrap();
    }

    #[test]
    fn floor_is_per_thread() {
        let low = std::sync::Arc::new(HierarchicalMutex::new(1000, ()));
        let high = std::sync::Arc::new(HierarchicalMutex::new(2000, ()));

        let _held = low.lock().unwrap();
        // Another thread starts at u64::MAX and may take the high lock.
        let high_clone = std::sync::Arc::clone(&high);
        std::thread::spawn(move || {
            assert!(high_clone.lock().is_ok());
        })
        .join()
        .unwrap();
    }
}
