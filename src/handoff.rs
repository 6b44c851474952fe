//! Single-slot "latest value" handoff between a producer and a consumer thread.
//!
//! The producer overwrites the slot; the consumer either peeks at the newest
//! value or takes it. Values are moved in and cloned out, so no buffer is
//! ever shared while it is being written.

use std::sync::Arc;

use parking_lot::Mutex;

#[derive(Debug)]
pub struct LatestSlot<T> {
    inner: Arc<Mutex<SlotState<T>>>,
}

#[derive(Debug)]
struct SlotState<T> {
    value: Option<T>,
    published: u64,
}

impl<T> Clone for LatestSlot<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for LatestSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LatestSlot<T> {
    /// Create an empty slot.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(SlotState {
                value: None,
                published: 0,
            })),
        }
    }

    /// Replace the current value. Returns `true` if an unread value was overwritten.
    pub fn publish(&self, value: T) -> bool {
        let mut state = self.inner.lock();
        state.published += 1;
        state.value.replace(value).is_some()
    }

    /// Remove and return the newest value, if any.
    pub fn take(&self) -> Option<T> {
        self.inner.lock().value.take()
    }

    /// Total number of values ever published.
    pub fn published(&self) -> u64 {
        self.inner.lock().published
    }

    /// Drop the current value, if any.
    pub fn clear(&self) {
        self.inner.lock().value = None;
    }
}

impl<T: Clone> LatestSlot<T> {
    /// Copy of the newest value, leaving it in place.
    pub fn latest(&self) -> Option<T> {
        self.inner.lock().value.clone()
    }
}
