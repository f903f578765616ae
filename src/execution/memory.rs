//! Memory accounting for frame buffers
//!
//! Row-index buffers grow through reservations on a shared pool. A
//! reservation owns a handle to its pool, so it can travel with a reduce task
//! from the dispatcher to a worker and back to the consumer.

use crate::error::{QueryError, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Byte budget shared by all reservations of a context
#[derive(Debug)]
pub struct MemoryPool {
    limit: usize,
    used: AtomicUsize,
}

impl MemoryPool {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            used: AtomicUsize::new(0),
        }
    }

    /// Add `size` bytes to the usage if the limit allows it
    fn try_reserve(&self, size: usize) -> bool {
        let mut current = self.used.load(Ordering::Relaxed);
        loop {
            let next = match current.checked_add(size) {
                Some(n) if n <= self.limit => n,
                _ => return false,
            };
            match self
                .used
                .compare_exchange_weak(current, next, Ordering::SeqCst, Ordering::Relaxed)
            {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    fn release(&self, size: usize) {
        if size > 0 {
            self.used.fetch_sub(size, Ordering::SeqCst);
        }
    }

    /// Empty reservation that can grow later
    pub fn reservation(self: &Arc<Self>) -> MemoryReservation {
        MemoryReservation {
            pool: Arc::clone(self),
            size: 0,
        }
    }

    /// Bytes currently reserved
    pub fn used(&self) -> usize {
        self.used.load(Ordering::Relaxed)
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn available(&self) -> usize {
        self.limit.saturating_sub(self.used())
    }
}

/// Bytes held against a pool; released on drop
#[derive(Debug)]
pub struct MemoryReservation {
    pool: Arc<MemoryPool>,
    size: usize,
}

impl MemoryReservation {
    pub fn size(&self) -> usize {
        self.size
    }

    /// Grow the reservation, failing when the pool limit would be exceeded
    pub fn try_grow(&mut self, additional: usize) -> Result<()> {
        if !self.pool.try_reserve(additional) {
            return Err(QueryError::ResourcesExhausted(format!(
                "cannot reserve {} bytes for row buffers: {} of {} in use",
                additional,
                self.pool.used(),
                self.pool.limit()
            )));
        }
        self.size += additional;
        Ok(())
    }

    /// Release everything held by this reservation
    pub fn free(&mut self) {
        self.pool.release(self.size);
        self.size = 0;
    }
}

impl Drop for MemoryReservation {
    fn drop(&mut self) {
        self.free();
    }
}

/// Shared memory pool
pub type SharedMemoryPool = Arc<MemoryPool>;
