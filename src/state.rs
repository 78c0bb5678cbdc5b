//! State cell (C5) — the per-collection authoritative `id -> entity` map.
//!
//! Modeled on the teacher's "replace the whole backing map atomically"
//! posture (its WAL recovery path rebuilds a shard's map wholesale rather
//! than patching it in place): each collection owns an `Arc<RwLock<Arc<Map>>>`
//! and every mutation goes through exactly one `replace` call per commit
//! point. Readers clone the inner `Arc`, which is O(1) and can never observe
//! a partially-applied mutation.

use indexmap::IndexMap;
use parking_lot::RwLock;
use std::sync::Arc;

use crate::value::{Entity, EntityId};

/// Order-preserving so the query pipeline's unsorted source iterates in
/// insertion order (§4.8 step 1), not hash-bucket order.
pub type EntityMap = IndexMap<EntityId, Entity>;

/// Atomic `id -> entity` map for one collection.
pub struct StateCell {
    inner: RwLock<Arc<EntityMap>>,
}

impl StateCell {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Arc::new(IndexMap::new())),
        }
    }

    pub fn from_map(map: EntityMap) -> Self {
        Self {
            inner: RwLock::new(Arc::new(map)),
        }
    }

    /// A frozen snapshot of the current map. Cheap: bumps a refcount.
    pub fn snapshot(&self) -> Arc<EntityMap> {
        self.inner.read().clone()
    }

    pub fn get(&self, id: &str) -> Option<Entity> {
        self.inner.read().get(id).cloned()
    }

    /// Atomic replace-via-function: `f` is given the current map and
    /// returns `(result, new_map)`. The write lock is held for the whole
    /// call, so `f` must not suspend — this is the non-suspending commit
    /// step the mutation pipeline's optimistic-concurrency design relies on.
    pub fn replace<T>(&self, f: impl FnOnce(&EntityMap) -> (T, EntityMap)) -> T {
        let mut guard = self.inner.write();
        let (result, new_map) = f(&guard);
        *guard = Arc::new(new_map);
        result
    }

    /// Atomic delete-returning-existed.
    pub fn delete(&self, id: &str) -> bool {
        self.replace(|map| {
            let mut next = map.clone();
            let existed = next.shift_remove(id).is_some();
            (existed, next)
        })
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}
