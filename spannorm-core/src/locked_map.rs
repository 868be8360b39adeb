use std::cell::RefCell;
use std::collections::HashMap;
use std::hash::Hash;

use parking_lot::ReentrantMutex;

/// A `HashMap` behind one reentrant lock.
///
/// Span registries and run maps are touched both from the thread that
/// started an operation and from framework callback threads. Every call here
/// takes the lock for its whole duration, so callers get the contract of a
/// plain map with all access serialized. The lock is reentrant: a thread that
/// already holds it (e.g. inside [`LockedMap::with`]) may call other methods,
/// but must not do so while the closure holds a borrow of the map.
pub struct LockedMap<K, V> {
    inner: ReentrantMutex<RefCell<HashMap<K, V>>>,
}

impl<K, V> Default for LockedMap<K, V> {
    fn default() -> Self {
        Self {
            inner: ReentrantMutex::new(RefCell::new(HashMap::new())),
        }
    }
}

impl<K, V> std::fmt::Debug for LockedMap<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let guard = self.inner.lock();
        let len = guard.borrow().len();
        f.debug_struct("LockedMap").field("len", &len).finish()
    }
}

impl<K: Eq + Hash, V: Clone> LockedMap<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let guard = self.inner.lock();
        let map = guard.borrow();
        map.get(key).cloned()
    }

    /// Insert, returning the previous value for `key`.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        let guard = self.inner.lock();
        let mut map = guard.borrow_mut();
        map.insert(key, value)
    }

    /// Delete `key`; true when something was removed.
    pub fn remove(&self, key: &K) -> bool {
        self.pop(key).is_some()
    }

    pub fn pop(&self, key: &K) -> Option<V> {
        let guard = self.inner.lock();
        let mut map = guard.borrow_mut();
        map.remove(key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        let guard = self.inner.lock();
        let map = guard.borrow();
        map.contains_key(key)
    }

    pub fn len(&self) -> usize {
        let guard = self.inner.lock();
        let map = guard.borrow();
        map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn values(&self) -> Vec<V> {
        let guard = self.inner.lock();
        let map = guard.borrow();
        map.values().cloned().collect()
    }

    /// Run `f` against the map with the lock held.
    pub fn with<R>(&self, f: impl FnOnce(&mut HashMap<K, V>) -> R) -> R {
        let guard = self.inner.lock();
        let mut map = guard.borrow_mut();
        f(&mut map)
    }
}
