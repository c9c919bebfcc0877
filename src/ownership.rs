//! Ownership tracking and per-resource locks

use crate::owner::OwnerId;

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::ops::Deref;
use std::sync::Arc;

/// Identity of a pooled resource: the address of its `Arc` allocation.
///
/// Stable for as long as the pool holds a clone of the `Arc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ResourceKey(usize);

impl ResourceKey {
    pub fn of<T>(resource: &Arc<T>) -> Self {
        ResourceKey(Arc::as_ptr(resource) as *const () as usize)
    }
}

struct Holder<T> {
    resource: Arc<T>,
    owner: OwnerId,
}

/// Which caller currently holds each acquired resource.
///
/// A missing entry means the resource is free (queued) or unknown.
pub(crate) struct OwnershipTable<T> {
    owned: DashMap<ResourceKey, Holder<T>>,
}

impl<T> OwnershipTable<T> {
    pub fn new() -> Self {
        Self {
            owned: DashMap::new(),
        }
    }

    /// Record `owner` as the holder. The caller already has exclusive use.
    pub fn lock(&self, resource: &Arc<T>, owner: OwnerId) {
        self.owned.insert(
            ResourceKey::of(resource),
            Holder {
                resource: Arc::clone(resource),
                owner,
            },
        );
    }

    pub fn is_locked(&self, resource: &Arc<T>) -> bool {
        self.owned.contains_key(&ResourceKey::of(resource))
    }

    pub fn owner_of(&self, resource: &Arc<T>) -> Option<OwnerId> {
        self.owned
            .get(&ResourceKey::of(resource))
            .map(|holder| holder.owner)
    }

    /// Clear the entry, returning whether there was one
    pub fn unlock(&self, resource: &Arc<T>) -> bool {
        self.owned.remove(&ResourceKey::of(resource)).is_some()
    }

    pub fn len(&self) -> usize {
        self.owned.len()
    }

    /// Resources currently held by somebody
    pub fn snapshot(&self) -> Vec<Arc<T>> {
        self.owned
            .iter()
            .map(|entry| Arc::clone(&entry.value().resource))
            .collect()
    }

    pub fn clear(&self) {
        self.owned.clear();
    }
}

/// Critical section and release signal for one resource
#[derive(Default)]
pub(crate) struct ResourceLock {
    mutex: Mutex<()>,
    released: Condvar,
}

impl ResourceLock {
    pub fn enter(&self) -> MutexGuard<'_, ()> {
        self.mutex.lock()
    }

    /// Park until the resource's holder lets go of it
    pub fn wait_released(&self, guard: &mut MutexGuard<'_, ()>) {
        self.released.wait(guard);
    }

    /// Wake everybody parked on this resource. Call with the lock held.
    pub fn notify_released(&self) {
        self.released.notify_all();
    }

    /// Wake everybody parked on this resource, taking the lock first
    pub fn notify_locked(&self) {
        let _guard = self.mutex.lock();
        self.released.notify_all();
    }
}

/// Lazily created locks for resources that have an operation in flight.
///
/// An entry lives as long as some [`ResourceLockHandle`] for it does.
pub(crate) struct ResourceLocks {
    locks: DashMap<ResourceKey, Arc<ResourceLock>>,
}

impl ResourceLocks {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    pub fn get<T>(&self, resource: &Arc<T>) -> ResourceLockHandle<'_> {
        let key = ResourceKey::of(resource);
        let lock = Arc::clone(&self.locks.entry(key).or_default());

        ResourceLockHandle {
            locks: self,
            key,
            lock: Some(lock),
        }
    }

    /// Wake every parked waiter so it re-checks the pool state
    pub fn wake_all(&self) {
        let locks: Vec<Arc<ResourceLock>> = self
            .locks
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        for lock in locks {
            lock.notify_locked();
        }

        // Handles dropped while we held clones skipped their own cleanup.
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.locks.len()
    }
}

/// Borrowed per-resource lock; drops the registry entry when the last
/// handle goes away.
pub(crate) struct ResourceLockHandle<'a> {
    locks: &'a ResourceLocks,
    key: ResourceKey,
    lock: Option<Arc<ResourceLock>>,
}

impl ResourceLockHandle<'_> {
    pub fn share(&self) -> Arc<ResourceLock> {
        Arc::clone(&**self)
    }
}

impl Deref for ResourceLockHandle<'_> {
    type Target = Arc<ResourceLock>;

    fn deref(&self) -> &Self::Target {
        self.lock.as_ref().expect("lock is only taken on drop")
    }
}

impl Drop for ResourceLockHandle<'_> {
    fn drop(&mut self) {
        drop(self.lock.take());
        self.locks
            .locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_not_value() {
        let a = Arc::new(7);
        let b = Arc::new(7);

        assert_eq!(ResourceKey::of(&a), ResourceKey::of(&Arc::clone(&a)));
        assert_ne!(ResourceKey::of(&a), ResourceKey::of(&b));
    }

    #[test]
    fn test_lock_and_unlock() {
        let table = OwnershipTable::new();
        let resource = Arc::new("conn");
        let me = OwnerId::current();

        assert!(!table.is_locked(&resource));
        table.lock(&resource, me);

        assert!(table.is_locked(&resource));
        assert_eq!(table.owner_of(&resource), Some(me));
        assert_eq!(table.snapshot().len(), 1);

        assert!(table.unlock(&resource));
        assert!(!table.unlock(&resource));
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_lock_entry_lives_with_handles() {
        let locks = ResourceLocks::new();
        let resource = Arc::new(1u8);

        let first = locks.get(&resource);
        let second = locks.get(&resource);
        assert!(Arc::ptr_eq(&first.share(), &second.share()));
        assert_eq!(locks.len(), 1);

        drop(first);
        assert_eq!(locks.len(), 1);

        drop(second);
        assert_eq!(locks.len(), 0);
    }

    #[test]
    fn test_wake_all_sweeps_unused_locks() {
        let locks = ResourceLocks::new();
        let idle = Arc::new(1u8);
        let busy = Arc::new(2u8);

        let in_use = locks.get(&busy);
        // Leave an entry behind the way a handle dropped mid-wake does.
        locks
            .locks
            .insert(ResourceKey::of(&idle), Arc::new(ResourceLock::default()));
        assert_eq!(locks.len(), 2);

        locks.wake_all();
        assert_eq!(locks.len(), 1);

        drop(in_use);
        assert_eq!(locks.len(), 0);
    }
}
