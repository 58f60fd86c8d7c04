//! Read-through cache behind a reader-writer lock.
//!
//! Lookups take the lock shared; writes and miss-path population take it
//! exclusive. On a miss the shared lock is dropped *before* the injected
//! loader runs: the loader may be arbitrarily slow, and holding any lock
//! across it would starve writers.
//!
//! Race policy: concurrent misses for the same key may each invoke the
//! loader; the last insert wins and only that value is retained. An
//! at-most-one-load-per-key guarantee is explicitly not provided.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

type Loader<K, V> = Box<dyn Fn(&K) -> V + Send + Sync>;

/// Key→value cache with shared reads, exclusive writes, and read-through
/// population from an injected loader.
///
/// Keys are compared by equality only; no ordering is assumed.
///
/// # Example
///
/// ```
/// use interlock::cache::RwCache;
///
/// let cache = RwCache::new(|key: &u32| format!("loaded-{key}"));
/// assert_eq!(cache.read(&1), "loaded-1"); // miss: loader runs
/// cache.write(1, "pinned".to_string());
/// assert_eq!(cache.read(&1), "pinned");   // hit: loader does not run
/// ```
pub struct RwCache<K, V> {
    map: RwLock<HashMap<K, V>>,
    loader: Loader<K, V>,
}

impl<K, V> RwCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Creates a cache that populates misses through `loader`.
    #[must_use]
    pub fn new(loader: impl Fn(&K) -> V + Send + Sync + 'static) -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
            loader: Box::new(loader),
        }
    }

    /// Inserts or overwrites `key` under the exclusive lock.
    pub fn write(&self, key: K, value: V) {
        self.map.write().insert(key, value);
    }

    /// Returns the value for `key`, loading it on a miss.
    ///
    /// The hit path holds only the shared lock. The miss path drops it,
    /// runs the loader outside any lock, then insert-or-overwrites under
    /// the exclusive lock and returns the value it loaded (which a racing
    /// writer may immediately supersede).
    pub fn read(&self, key: &K) -> V {
        {
            let map = self.map.read();
            if let Some(value) = map.get(key) {
                return value.clone();
            }
        }

        let value = (self.loader)(key);
        self.map.write().insert(key.clone(), value.clone());
        value
    }

    /// Returns the number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    /// Returns `true` if the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }

    /// Removes every entry under the exclusive lock.
    pub fn clear(&self) {
        self.map.write().clear();
    }
}

impl<K, V> fmt::Debug for RwCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RwCache")
            .field("len", &self.map.read().len())
            .finish()
    }
}
