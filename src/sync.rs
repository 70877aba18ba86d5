//! Reader/writer lock wrapper shared by the trace and metric stores.

use parking_lot::{RwLock, RwLockReadGuard, RwLockUpgradableReadGuard, RwLockWriteGuard};

/// A [`RwLock`] with an idempotent get-or-create helper on top.
///
/// All acquisitions block; guards release on every exit path. The
/// upgradeable read mode is what makes [`Shared::get_or_create`] race-free
/// without serializing plain readers.
#[derive(Debug, Default)]
pub struct Shared<T> {
    lock: RwLock<T>,
}

impl<T> Shared<T> {
    pub fn new(value: T) -> Self {
        Self {
            lock: RwLock::new(value),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.lock.read()
    }

    pub fn upgradable_read(&self) -> RwLockUpgradableReadGuard<'_, T> {
        self.lock.upgradable_read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.lock.write()
    }

    /// Double-checked creation: look up under an upgradeable read, and only
    /// if absent upgrade to a write lock, look up again (a writer may have
    /// raced ahead before we acquired the upgradeable guard) and create.
    ///
    /// Concurrent callers with the same logical key all observe the single
    /// surviving instance; `create` runs at most once per key.
    pub fn get_or_create<V, G, C>(&self, get: G, create: C) -> V
    where
        G: Fn(&T) -> Option<V>,
        C: FnOnce(&mut T) -> V,
    {
        let guard = self.lock.upgradable_read();

        if let Some(value) = get(&guard) {
            return value;
        }

        let mut guard = RwLockUpgradableReadGuard::upgrade(guard);

        if let Some(value) = get(&guard) {
            return value;
        }

        create(&mut guard)
    }
}
