use crate::rwlock::ResourceLock;
use crate::ResourceName;
use dashmap::{DashMap, Entry};
use std::sync::Arc;

struct Slot {
    lock: Arc<ResourceLock>,
    usage: usize,
}

/// Lazily created resource locks, reference counted by their holders.
///
/// An entry exists exactly as long as its usage counter is positive, so a
/// name never maps to two different locks while anyone still uses it.
pub struct LockTable {
    map: DashMap<ResourceName, Slot>,
}

impl LockTable {
    pub fn new() -> Self {
        Self {
            map: DashMap::new(),
        }
    }

    /// Counts one more user of `name` and returns its lock, creating both on
    /// first use. The lock itself is taken by the caller, outside the map.
    pub fn mark_used(&self, name: &str) -> Arc<ResourceLock> {
        match self.map.entry(name.to_owned()) {
            Entry::Occupied(mut occupied_entry) => {
                let slot = occupied_entry.get_mut();
                slot.usage += 1;
                slot.lock.clone()
            }
            Entry::Vacant(vacant_entry) => {
                let lock = Arc::new(ResourceLock::new());
                vacant_entry.insert(Slot {
                    lock: lock.clone(),
                    usage: 1,
                });
                lock
            }
        }
    }

    /// Returns the lock of a name that is currently in use.
    pub fn get(&self, name: &str) -> Arc<ResourceLock> {
        match self.map.get(name) {
            Some(slot) => slot.lock.clone(),
            None => panic!("impossible: lookup of an unused resource {name}!"),
        }
    }

    /// Drops one user of `name`, removing the entry once nobody is left.
    pub fn release_if_unused(&self, name: &str) {
        match self.map.entry(name.to_owned()) {
            Entry::Occupied(mut occupied_entry) => {
                let slot = occupied_entry.get_mut();
                slot.usage -= 1;
                if slot.usage == 0 {
                    occupied_entry.remove();
                }
            }
            Entry::Vacant(_) => panic!("impossible: release an unused resource {name}!"),
        }
    }

    pub fn usage(&self, name: &str) -> usize {
        self.map.get(name).map_or(0, |slot| slot.usage)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl Default for LockTable {
    fn default() -> Self {
        Self::new()
    }
}
