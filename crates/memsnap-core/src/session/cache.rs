//! Shared-object caches: per session, and caller-owned across sessions.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::reader::{BackRef, Shared};

/// Caller-owned mapping from foreign address to shared handle for one host
/// type.
///
/// Clones share the same table. Once registered on a session, handles
/// materialized by successful snapshots are added to it, and later
/// snapshots reuse them instead of reading the foreign object again.
pub struct SharedCache<T> {
    handles: Arc<Mutex<HashMap<u64, Shared<T>>>>,
}

impl<T> SharedCache<T> {
    pub fn new() -> Self {
        Self {
            handles: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn table(&self) -> MutexGuard<'_, HashMap<u64, Shared<T>>> {
        self.handles.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, address: u64) -> Option<Shared<T>> {
        self.table().get(&address).cloned()
    }

    pub fn contains(&self, address: u64) -> bool {
        self.table().contains_key(&address)
    }

    pub fn insert(&self, handle: Shared<T>) {
        self.table().insert(handle.address(), handle);
    }

    /// Forget one address, e.g. after the foreign object was freed.
    pub fn remove(&self, address: u64) -> Option<Shared<T>> {
        self.table().remove(&address)
    }

    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table().is_empty()
    }

    pub fn clear(&self) {
        self.table().clear();
    }

    /// Every cached handle, in address order.
    pub fn handles(&self) -> Vec<Shared<T>> {
        let mut handles: Vec<_> = self.table().values().cloned().collect();
        handles.sort_by_key(|h| h.address());
        handles
    }

    /// Resolve a back reference against the objects cached so far.
    pub fn resolve(&self, back: BackRef<T>) -> Option<Shared<T>> {
        if back.is_null() {
            return None;
        }
        self.get(back.address())
    }
}

impl<T> Clone for SharedCache<T> {
    fn clone(&self) -> Self {
        Self {
            handles: Arc::clone(&self.handles),
        }
    }
}

impl<T> Default for SharedCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for SharedCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedCache")
            .field("len", &self.len())
            .finish()
    }
}

/// A registered [`SharedCache`] with its host type erased.
pub(crate) trait ErasedCache: Send + Sync {
    fn contains(&self, address: u64) -> bool;
    fn as_any(&self) -> &dyn Any;
}

impl<T: Send + Sync + 'static> ErasedCache for SharedCache<T> {
    fn contains(&self, address: u64) -> bool {
        SharedCache::contains(self, address)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(crate) type Caches = HashMap<TypeId, Box<dyn ErasedCache>>;

pub(crate) fn cache_of<T: Send + Sync + 'static>(caches: &Caches) -> Option<&SharedCache<T>> {
    caches
        .get(&TypeId::of::<T>())
        .and_then(|cache| cache.as_any().downcast_ref::<SharedCache<T>>())
}

/// Handles of one host type seen during a session.
pub(crate) struct SharedMap<T> {
    pub(crate) handles: HashMap<u64, Shared<T>>,
    /// Addresses materialized since the last commit (not taken from a cache).
    pub(crate) fresh: Vec<u64>,
}

impl<T> Default for SharedMap<T> {
    fn default() -> Self {
        Self {
            handles: HashMap::new(),
            fresh: Vec::new(),
        }
    }
}

pub(crate) trait ErasedMap {
    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn contains(&self, address: u64) -> bool;

    /// Publish fresh handles to the matching external cache, if any, and
    /// return how many there were.
    fn commit(&mut self, caches: &Caches) -> usize;
}

impl<T: Send + Sync + 'static> ErasedMap for SharedMap<T> {
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn contains(&self, address: u64) -> bool {
        self.handles.contains_key(&address)
    }

    fn commit(&mut self, caches: &Caches) -> usize {
        let fresh = std::mem::take(&mut self.fresh);
        if let Some(cache) = cache_of::<T>(caches) {
            for address in &fresh {
                if let Some(handle) = self.handles.get(address) {
                    cache.insert(handle.clone());
                }
            }
        }
        fresh.len()
    }
}

/// Per-session handles, keyed by host type.
pub(crate) type SharedMaps = HashMap<TypeId, Box<dyn ErasedMap>>;
