//! Fixed-capacity FIFO queue with blocking produce and consume.
//!
//! One mutex guards the element buffer; two condition variables signal
//! the not-empty and not-full transitions. `0 <= len <= capacity` holds
//! at every observable point, and items come out in the order their
//! pushes committed, regardless of how many producers and consumers are
//! attached.
//!
//! There is no cancellation: a blocked producer is released only by a
//! consumer and vice versa. Fairness beyond the platform condvar's
//! FIFO-ish wakeup order is not guaranteed.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Condvar, Mutex};

/// A bounded blocking queue.
///
/// # Example
///
/// ```
/// use interlock::queue::BoundedQueue;
/// use std::sync::Arc;
/// use std::thread;
///
/// let queue = Arc::new(BoundedQueue::new(2));
/// let producer = {
///     let queue = Arc::clone(&queue);
///     thread::spawn(move || {
///         for i in 0..5 {
///             queue.produce(i);
///         }
///     })
/// };
/// let consumed: Vec<i32> = (0..5).map(|_| queue.consume()).collect();
/// producer.join().unwrap();
/// assert_eq!(consumed, vec![0, 1, 2, 3, 4]);
/// ```
pub struct BoundedQueue<T> {
    items: Mutex<VecDeque<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    /// Creates a queue holding at most `capacity` items.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be at least 1");
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    /// Appends `item`, blocking while the queue is full.
    ///
    /// Ownership of `item` transfers to the queue. Wakes one blocked
    /// consumer after the push commits.
    pub fn produce(&self, item: T) {
        let guard = self.items.lock().expect("queue mutex poisoned");
        let mut items = self
            .not_full
            .wait_while(guard, |items| items.len() == self.capacity)
            .expect("queue mutex poisoned");
        items.push_back(item);
        drop(items);
        self.not_empty.notify_one();
    }

    /// Removes and returns the head, blocking while the queue is empty.
    ///
    /// Wakes one blocked producer after the pop commits.
    pub fn consume(&self) -> T {
        let guard = self.items.lock().expect("queue mutex poisoned");
        let mut items = self
            .not_empty
            .wait_while(guard, |items| items.is_empty())
            .expect("queue mutex poisoned");
        let item = items.pop_front().expect("non-empty after wait");
        drop(items);
        self.not_full.notify_one();
        item
    }

    /// Returns the number of queued items, a weakly consistent snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.lock().expect("queue mutex poisoned").len()
    }

    /// Returns `true` if the queue holds no items right now.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the fixed capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T> fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
