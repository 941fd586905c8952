//! Single-slot, last-write-wins handoff between threads.
//!
//! A [`Slot`] holds at most one pending value. `put` replaces whatever is
//! there and `take` empties it. Both are lock-free, so neither side can ever
//! block or wait on the other.

use crossbeam_queue::ArrayQueue;

pub struct Slot<T> {
    queue: ArrayQueue<T>,
}

impl<T> Slot<T> {
    pub fn new() -> Self {
        Self {
            queue: ArrayQueue::new(1),
        }
    }

    /// Stores `value`, dropping any value nobody took. Returns `true` when an
    /// unread value was superseded.
    pub fn put(&self, value: T) -> bool {
        self.queue.force_push(value).is_some()
    }

    /// Removes and returns the pending value, if any.
    pub fn take(&self) -> Option<T> {
        self.queue.pop()
    }

    pub fn is_pending(&self) -> bool {
        !self.queue.is_empty()
    }
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Slot<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slot")
            .field("pending", &self.is_pending())
            .finish()
    }
}
