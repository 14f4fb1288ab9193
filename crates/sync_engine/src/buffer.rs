//! Buffer contracts.
//!
//! [`MessageBuffer`] is the plain store every intra-process buffer offers;
//! [`TimedBuffer`] extends it for buffers that keep [`TimingMetadata`] next to each
//! payload. Eviction policy is up to the implementation.

use contracts::TimingMetadata;

/// Thread-safe message store
pub trait MessageBuffer<T>: Send + Sync {
    /// Store `item`.
    ///
    /// Returns `false` when the buffer refused the item (backpressure).
    fn enqueue(&self, item: T) -> bool;

    /// Remove the oldest item; `None` when empty
    fn dequeue(&self) -> Option<T>;

    /// Drop every stored item
    fn clear(&self);

    fn has_data(&self) -> bool;
}

/// Message store that keeps timing metadata alongside each payload
pub trait TimedBuffer<T>: MessageBuffer<T> {
    /// Store `item` with its timing.
    ///
    /// Returns `false` when the buffer refused the item (backpressure).
    fn enqueue_with_timing(&self, item: T, timing: TimingMetadata) -> bool;

    /// Remove the oldest item together with its timing; `None` when empty
    fn dequeue_with_timing(&self) -> Option<(T, TimingMetadata)>;
}
