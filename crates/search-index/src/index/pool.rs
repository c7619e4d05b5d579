//! A small object pool for index generators.

use std::ops::{Deref, DerefMut};

use parking_lot::Mutex;

/// A mutex-guarded free list of reusable generators.
///
/// The lock is only held while taking or returning an item, never while the
/// item is in use.
pub struct GeneratorPool<T> {
    free: Mutex<Vec<T>>,
    capacity: usize,
    factory: Box<dyn Fn() -> T + Send + Sync>,
}

impl<T> GeneratorPool<T> {
    /// Creates a pool that retains at most `capacity` idle items.
    pub fn new(capacity: usize, factory: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
            factory: Box::new(factory),
        }
    }

    /// Takes an item from the pool, creating one if none is idle.
    pub fn get(&self) -> PooledGenerator<'_, T> {
        let item = self.free.lock().pop().unwrap_or_else(|| (self.factory)());
        PooledGenerator {
            pool: self,
            item: Some(item),
        }
    }

    /// Number of idle items.
    pub fn idle(&self) -> usize {
        self.free.lock().len()
    }

    fn put(&self, item: T) {
        let mut free = self.free.lock();
        if free.len() < self.capacity {
            free.push(item);
        }
    }
}

impl<T> std::fmt::Debug for GeneratorPool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratorPool")
            .field("idle", &self.idle())
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// An item on loan from a [`GeneratorPool`].
///
/// The item goes back to the pool when the guard is dropped, including
/// during unwinding.
pub struct PooledGenerator<'a, T> {
    pool: &'a GeneratorPool<T>,
    item: Option<T>,
}

impl<T> Deref for PooledGenerator<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // `item` is only taken in `drop`.
        self.item.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl<T> DerefMut for PooledGenerator<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl<T> Drop for PooledGenerator<'_, T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.put(item);
        }
    }
}
