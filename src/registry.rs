//! The worker registry: a concurrent map from worker name to worker
//! handle, plus an auxiliary ordered key list for V2's round-robin
//! selection (a skip list has no O(1) indexed access).
//!
//! Backed by `crossbeam-skiplist`, the teacher workspace's own concurrent
//! map crate — used here for exactly the purpose its design notes call
//! for (spec.md §9: "Represent as a concurrent map").

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_skiplist::SkipMap;

use crate::worker::WorkerHandle;

pub struct Registry {
    workers: SkipMap<String, Arc<WorkerHandle>>,
    /// Kept in step with `workers`; only needed for V2's round-robin index.
    ordered_keys: Mutex<Vec<String>>,
    round_robin_cursor: AtomicUsize,
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            workers: SkipMap::new(),
            ordered_keys: Mutex::new(Vec::new()),
            round_robin_cursor: AtomicUsize::new(0),
        }
    }

    pub fn insert(&self, handle: Arc<WorkerHandle>) {
        self.ordered_keys.lock().unwrap().push(handle.name.clone());
        self.workers.insert(handle.name.clone(), handle);
    }

    /// Removes a worker's entry. Called by the worker itself as the last
    /// step before its dispatch loop returns (§4.3).
    pub fn remove(&self, name: &str) {
        self.workers.remove(name);
        self.ordered_keys.lock().unwrap().retain(|k| k != name);
    }

    pub fn get(&self, name: &str) -> Option<Arc<WorkerHandle>> {
        self.workers.get(name).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// A point-in-time snapshot of every live worker handle.
    pub fn snapshot(&self) -> Vec<Arc<WorkerHandle>> {
        self.workers.iter().map(|entry| entry.value().clone()).collect()
    }

    /// The next worker in round-robin order, or `None` if the registry is
    /// empty. The cursor is advisory: concurrent births/deaths may cause
    /// it to skip or repeat an entry, which is acceptable since V2 does
    /// not promise fairness (spec.md §1 Non-goals).
    pub fn next_round_robin(&self) -> Option<Arc<WorkerHandle>> {
        let keys = self.ordered_keys.lock().unwrap();
        if keys.is_empty() {
            return None;
        }
        let idx = self.round_robin_cursor.fetch_add(1, Ordering::Relaxed) % keys.len();
        let name = keys[idx].clone();
        drop(keys);
        self.get(&name)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::WorkerHandle;

    fn handle(name: &str, permanent: bool) -> Arc<WorkerHandle> {
        Arc::new(WorkerHandle::new(name.to_string(), permanent))
    }

    #[test]
    fn insert_get_remove_round_trip() {
        let registry = Registry::new();
        registry.insert(handle("w-1", true));
        assert_eq!(registry.len(), 1);
        assert!(registry.get("w-1").is_some());
        registry.remove("w-1");
        assert_eq!(registry.len(), 0);
        assert!(registry.get("w-1").is_none());
    }

    #[test]
    fn round_robin_cycles_through_all_keys() {
        let registry = Registry::new();
        registry.insert(handle("a", true));
        registry.insert(handle("b", true));
        registry.insert(handle("c", true));

        let mut seen = Vec::new();
        for _ in 0..6 {
            seen.push(registry.next_round_robin().unwrap().name.clone());
        }
        assert_eq!(seen[0..3].iter().collect::<std::collections::HashSet<_>>().len(), 3);
        assert_eq!(seen[0..3], seen[3..6]);
    }

    #[test]
    fn empty_registry_round_robin_is_none() {
        let registry = Registry::new();
        assert!(registry.next_round_robin().is_none());
    }
}
