//! LIFO pools for expensive reusable resources.
//!
//! `Recycler` hands out instances built by a fallible factory and takes
//! them back for reuse; `SimpleRecycler` is the variant for factories that
//! cannot fail. `force_close` drains and drops every pooled instance, after
//! which `acquire` fails with `Closed`. The `Borrowed` guard returns the
//! instance to the pool on every exit path.

use std::ops::{Deref, DerefMut};
use std::sync::Mutex;

use crate::error::ScanError;

pub struct Recycler<T> {
    factory: Box<dyn Fn() -> Result<T, ScanError> + Send + Sync>,
    // None means the recycler has been force-closed.
    pool: Mutex<Option<Vec<T>>>,
}

impl<T> Recycler<T> {
    pub fn new(factory: impl Fn() -> Result<T, ScanError> + Send + Sync + 'static) -> Self {
        Self {
            factory: Box::new(factory),
            pool: Mutex::new(Some(Vec::new())),
        }
    }

    pub fn acquire(&self) -> Result<T, ScanError> {
        {
            let mut pool = self.pool.lock().unwrap();
            match pool.as_mut() {
                None => return Err(ScanError::Closed),
                Some(items) => {
                    if let Some(item) = items.pop() {
                        return Ok(item);
                    }
                }
            }
        }
        (self.factory)()
    }

    pub fn acquire_scoped(&self) -> Result<Borrowed<'_, T>, ScanError> {
        Ok(Borrowed {
            pool: &self.pool,
            item: Some(self.acquire()?),
        })
    }

    pub fn release(&self, item: T) {
        let mut pool = self.pool.lock().unwrap();
        if let Some(items) = pool.as_mut() {
            items.push(item);
        }
        // Closed pool: the instance is simply dropped.
    }

    pub fn force_close(&self) {
        let drained = self.pool.lock().unwrap().take();
        drop(drained);
    }
}

/// Pool variant whose factory cannot fail. `acquire` still fails after
/// `force_close`.
pub struct SimpleRecycler<T> {
    inner: Recycler<T>,
}

impl<T> SimpleRecycler<T> {
    pub fn new(factory: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Self {
            inner: Recycler::new(move || Ok(factory())),
        }
    }

    pub fn acquire(&self) -> Result<T, ScanError> {
        self.inner.acquire()
    }

    pub fn acquire_scoped(&self) -> Result<Borrowed<'_, T>, ScanError> {
        self.inner.acquire_scoped()
    }

    pub fn release(&self, item: T) {
        self.inner.release(item)
    }

    pub fn force_close(&self) {
        self.inner.force_close()
    }
}

pub struct Borrowed<'a, T> {
    pool: &'a Mutex<Option<Vec<T>>>,
    item: Option<T>,
}

impl<T> Deref for Borrowed<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.item.as_ref().expect("borrowed item already returned")
    }
}

impl<T> DerefMut for Borrowed<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item.as_mut().expect("borrowed item already returned")
    }
}

impl<T> Drop for Borrowed<'_, T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            let mut pool = self.pool.lock().unwrap();
            if let Some(items) = pool.as_mut() {
                items.push(item);
            }
        }
    }
}
