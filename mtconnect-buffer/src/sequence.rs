//! Process-wide sequence number allocation.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{BufferError, Result};

/// Hands out strictly increasing sequence numbers, starting at 1.
///
/// The observation buffer is the only caller and allocates while holding its
/// write lock, so buffer order and sequence order are the same.
#[derive(Debug)]
pub struct SequenceAllocator {
    next: AtomicU64,
}

impl SequenceAllocator {
    /// Create an allocator seeded at 1.
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Create an allocator whose first sequence is `first`.
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    /// Allocate the next sequence number.
    ///
    /// Fails with [`BufferError::SequenceExhausted`] once the 64-bit space is
    /// used up; a failed call consumes nothing.
    pub fn next(&self) -> Result<u64> {
        self.next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_add(1))
            .map_err(|_| BufferError::SequenceExhausted)
    }

    /// The sequence the next call to [`next`](Self::next) will return.
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::SeqCst)
    }

    /// Reseed at 1. Only valid together with an instance id change.
    pub fn reset(&self) {
        self.next.store(1, Ordering::SeqCst);
    }
}

impl Default for SequenceAllocator {
    fn default() -> Self {
        Self::new()
    }
}
