//! Shared reading buffer.
//!
//! The only hand-off point between pollers (many producers) and the forwarder
//! (single consumer). Enqueue and drain are serialised by an internal lock, so
//! a drain observes a consistent snapshot: everything pushed before it, nothing
//! pushed after it, and no reading ever appears in two drains.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::device::Reading;

/// Cloneable handle to an unbounded FIFO of readings.
#[derive(Debug, Clone, Default)]
pub struct ReadingBuffer {
    inner: Arc<Mutex<Vec<Reading>>>,
}

impl ReadingBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a reading. Never blocks beyond the internal lock.
    pub fn push(&self, reading: Reading) {
        self.lock().push(reading);
    }

    /// Atomically remove and return every reading currently present, in
    /// insertion order.
    pub fn drain(&self) -> Vec<Reading> {
        std::mem::take(&mut *self.lock())
    }

    /// Number of buffered readings.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Reading>> {
        // A panic while holding the lock cannot leave a Vec half-written, so
        // the contents are still valid after poisoning.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
