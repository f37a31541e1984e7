//! A lock-free pool of equally-sized buffers.
//!
//! Grounded on the upstream `bufferpool` crate's design: a [`crossbeam_queue::SegQueue`]
//! holds idle buffers, `acquire` pops one (or allocates fresh if the queue is empty) and
//! `release` (via [`Drop`]) pushes it back. There is no upper bound on how many buffers
//! exist; under sustained load the pool simply grows to the working set size and then
//! stays there.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crossbeam_queue::SegQueue;

/// A pool of buffers, each `capacity` bytes long.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<SegQueue<Vec<u8>>>,
    capacity: usize,
}

impl BufferPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(SegQueue::new()),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Checks out a buffer whose length equals [`BufferPool::capacity`]. Allocates a new
    /// one if the pool is currently empty.
    pub fn acquire(&self) -> PooledBuffer {
        let mut storage = self.inner.pop().unwrap_or_else(|| vec![0u8; self.capacity]);
        storage.resize(self.capacity, 0);

        PooledBuffer {
            storage: Some(storage),
            pool: self.inner.clone(),
        }
    }
}

/// A buffer checked out from a [`BufferPool`]. Returned to the pool automatically on drop;
/// callers must not retain a slice derived from one past its drop point.
pub struct PooledBuffer {
    storage: Option<Vec<u8>>,
    pool: Arc<SegQueue<Vec<u8>>>,
}

impl PooledBuffer {
    fn storage(&self) -> &Vec<u8> {
        self.storage
            .as_ref()
            .expect("storage is only `None` between drop's take and the end of drop")
    }

    fn storage_mut(&mut self) -> &mut Vec<u8> {
        self.storage
            .as_mut()
            .expect("storage is only `None` between drop's take and the end of drop")
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.storage()
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.storage_mut()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(storage) = self.storage.take() {
            self.pool.push(storage);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquired_buffer_has_configured_capacity() {
        let pool = BufferPool::new(1500);
        let buf = pool.acquire();

        assert_eq!(buf.len(), 1500);
    }

    #[test]
    fn released_buffer_is_reused() {
        let pool = BufferPool::new(64);

        let buf = pool.acquire();
        drop(buf);

        assert_eq!(pool.inner.len(), 1);

        let _buf = pool.acquire();
        assert_eq!(pool.inner.len(), 0);
    }

    #[test]
    fn pool_allocates_on_demand_when_empty() {
        let pool = BufferPool::new(32);

        let a = pool.acquire();
        let b = pool.acquire();

        assert_eq!(a.len(), 32);
        assert_eq!(b.len(), 32);
    }
}
