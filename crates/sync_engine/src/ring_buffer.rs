//! Fixed-capacity circular buffer with per-slot timing metadata.
//!
//! Uses index-based separation, like the rest of the engine:
//! - the ring of slots holds only [`TimingMetadata`] plus a slab key
//! - a [`Slab`] owns the payloads
//!
//! Scans over the ring (the windowed search) therefore never touch payload memory, and an
//! evicted slot hands its metadata to its successor by move.
//!
//! Single-element operations lock internally. Compound find-then-remove sequences go
//! through [`RingBuffer::lock`], which returns a [`RingGuard`] holding the lock until it
//! is dropped.

use std::fmt;

use contracts::{
    BufferConfig, ChannelId, ContractError, ContractViolation, IntervalBound, TimeWindow,
    TimingMetadata,
};
use parking_lot::{Mutex, MutexGuard};
use slab::Slab;
use tracing::{instrument, trace};

use crate::buffer::{MessageBuffer, TimedBuffer};

/// Ring slot: metadata plus the key of the payload in the slab
#[derive(Debug)]
struct Slot {
    timing: TimingMetadata,
    key: usize,
}

/// What `push` did, reported after the lock is released
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PushOutcome {
    Stored,
    Evicted,
    Rejected,
}

/// Snapshot of buffer counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RingStats {
    pub len: usize,
    pub capacity: usize,
    /// Entries overwritten because the buffer was full
    pub evicted: u64,
    /// Entries refused in reliable mode
    pub rejected: u64,
    /// Entries retired by `dequeue_at` without being returned
    pub skipped: u64,
}

struct RingState<T> {
    capacity: usize,
    slots: Vec<Option<Slot>>,
    storage: Slab<T>,
    write_index: usize,
    read_index: usize,
    size: usize,
    reliable: bool,
    evicted: u64,
    rejected: u64,
    skipped: u64,
}

impl<T> RingState<T> {
    fn new(capacity: usize, reliable: bool) -> Self {
        Self {
            capacity,
            slots: (0..capacity).map(|_| None).collect(),
            storage: Slab::with_capacity(capacity),
            write_index: capacity - 1,
            read_index: 0,
            size: 0,
            reliable,
            evicted: 0,
            rejected: 0,
            skipped: 0,
        }
    }

    #[inline]
    fn next(&self, index: usize) -> usize {
        (index + 1) % self.capacity
    }

    #[inline]
    fn has_data(&self) -> bool {
        self.size != 0
    }

    #[inline]
    fn is_full(&self) -> bool {
        self.size == self.capacity
    }

    /// Ring indices of occupied slots, oldest first
    fn occupied(&self) -> impl Iterator<Item = usize> {
        let (read, size, capacity) = (self.read_index, self.size, self.capacity);
        (0..size).map(move |offset| (read + offset) % capacity)
    }

    fn timing_at(&self, index: usize) -> Option<&TimingMetadata> {
        self.slots.get(index)?.as_ref().map(|slot| &slot.timing)
    }

    /// Circular distance from `read_index` to `index` when `index` is occupied
    fn offset_of(&self, index: usize) -> Option<usize> {
        if !self.has_data() || index >= self.capacity {
            return None;
        }
        let offset = (index + self.capacity - self.read_index) % self.capacity;
        (offset < self.size).then_some(offset)
    }

    fn push(&mut self, item: T, timing: TimingMetadata) -> PushOutcome {
        if !self.is_full() {
            self.write_index = self.next(self.write_index);
            let key = self.storage.insert(item);
            self.slots[self.write_index] = Some(Slot { timing, key });
            self.size += 1;
            return PushOutcome::Stored;
        }

        if self.reliable {
            self.rejected += 1;
            return PushOutcome::Rejected;
        }

        let evicted = self.slots[self.read_index].take();
        self.read_index = self.next(self.read_index);
        self.write_index = self.next(self.write_index);

        let key = self.storage.insert(item);
        self.slots[self.write_index] = Some(Slot { timing, key });

        if let Some(evicted) = evicted {
            self.storage.remove(evicted.key);
            if let Some(oldest) = self.slots[self.read_index].as_mut() {
                oldest.timing.merge(evicted.timing);
            }
        }
        self.evicted += 1;
        PushOutcome::Evicted
    }

    fn pop(&mut self) -> Option<(T, TimingMetadata)> {
        if !self.has_data() {
            return None;
        }
        let slot = self.slots[self.read_index].take()?;
        self.read_index = self.next(self.read_index);
        self.size -= 1;
        Some((self.storage.remove(slot.key), slot.timing))
    }

    /// Every occupied slot's own window must fit `bound`
    fn check_contract(&self, bound: IntervalBound) -> Result<(), ContractViolation> {
        let IntervalBound::Bounded(limit) = bound else {
            return Ok(());
        };
        for index in self.occupied() {
            let window = self.timing_at(index).map(TimingMetadata::window);
            if let Some(window) = window.filter(|w| w.width() > limit) {
                return Err(ContractViolation {
                    index: Some(index),
                    window,
                    bound: limit,
                });
            }
        }
        Ok(())
    }

    /// Windowed search over the entries at offset `from` and newer
    fn find_message(
        &self,
        pivot: TimeWindow,
        bound: IntervalBound,
        disparity_optimal: bool,
        from: usize,
    ) -> Result<Option<usize>, ContractViolation> {
        if from >= self.size {
            return Ok(None);
        }
        if bound.is_unbounded() && !disparity_optimal {
            return Ok(Some((self.read_index + from) % self.capacity));
        }

        if let IntervalBound::Bounded(limit) = bound {
            if pivot.width() > limit {
                return Err(ContractViolation {
                    index: None,
                    window: pivot,
                    bound: limit,
                });
            }
        }
        self.check_contract(bound)?;

        let mut best: Option<(usize, u64)> = None;
        for index in self.occupied().skip(from) {
            let Some(timing) = self.timing_at(index) else {
                continue;
            };
            let disparity = pivot.union(&timing.window()).width();
            if !bound.admits(disparity) {
                continue;
            }
            // strict comparison: ties keep the older entry
            if best.map_or(true, |(_, min)| disparity < min) {
                best = Some((index, disparity));
                if !disparity_optimal {
                    break;
                }
            }
        }
        Ok(best.map(|(index, _)| index))
    }

    fn dequeue_at(&mut self, index: usize) -> Option<(T, TimingMetadata)> {
        let offset = self.offset_of(index)?;

        // Retire skipped entries oldest first, each handing its history to the next.
        let mut carried: Option<TimingMetadata> = None;
        for _ in 0..offset {
            if let Some(slot) = self.slots[self.read_index].take() {
                self.storage.remove(slot.key);
                let mut timing = slot.timing;
                if let Some(older) = carried.take() {
                    timing.merge(older);
                }
                carried = Some(timing);
            }
            self.read_index = self.next(self.read_index);
        }

        let slot = self.slots[index].take()?;
        let mut timing = slot.timing;
        if let Some(older) = carried {
            timing.merge(older);
        }

        self.size -= offset + 1;
        self.skipped += offset as u64;
        self.read_index = self.next(index);
        Some((self.storage.remove(slot.key), timing))
    }

    fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.storage.clear();
        self.write_index = self.capacity - 1;
        self.read_index = 0;
        self.size = 0;
    }

    fn stats(&self) -> RingStats {
        RingStats {
            len: self.size,
            capacity: self.capacity,
            evicted: self.evicted,
            rejected: self.rejected,
            skipped: self.skipped,
        }
    }
}

/// Capacity-bounded, lock-protected circular buffer of `(payload, TimingMetadata)`.
///
/// When full, a new entry overwrites the oldest one and the evicted metadata is merged
/// into the entry that becomes the new oldest, unless the buffer is in reliable mode, in
/// which case the new entry is refused.
pub struct RingBuffer<T> {
    channel: ChannelId,
    state: Mutex<RingState<T>>,
}

impl<T> fmt::Debug for RingBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.stats();
        f.debug_struct("RingBuffer")
            .field("channel", &self.channel)
            .field("len", &stats.len)
            .field("capacity", &stats.capacity)
            .field("evicted", &stats.evicted)
            .finish()
    }
}

impl<T> RingBuffer<T> {
    /// Create an overwriting buffer for `channel`.
    ///
    /// # Errors
    /// `ConfigValidation` when `capacity` is 0.
    pub fn new(channel: impl Into<ChannelId>, capacity: usize) -> Result<Self, ContractError> {
        Self::with_config(
            channel,
            BufferConfig {
                capacity,
                reliable: false,
            },
        )
    }

    /// Create a buffer from configuration.
    ///
    /// # Errors
    /// `ConfigValidation` when `config.capacity` is 0.
    pub fn with_config(
        channel: impl Into<ChannelId>,
        config: BufferConfig,
    ) -> Result<Self, ContractError> {
        let channel = channel.into();
        if config.capacity == 0 {
            return Err(ContractError::config_validation(
                format!("buffer[{channel}].capacity"),
                "capacity must be a positive, non-zero value",
            ));
        }
        Ok(Self {
            state: Mutex::new(RingState::new(config.capacity, config.reliable)),
            channel,
        })
    }

    pub fn channel(&self) -> &ChannelId {
        &self.channel
    }

    /// Take the buffer lock for a compound find-then-remove sequence
    pub fn lock(&self) -> RingGuard<'_, T> {
        RingGuard {
            channel: &self.channel,
            state: self.state.lock(),
        }
    }

    pub fn set_reliable(&self, reliable: bool) {
        self.state.lock().reliable = reliable;
    }

    pub fn is_reliable(&self) -> bool {
        self.state.lock().reliable
    }

    pub fn is_full(&self) -> bool {
        self.state.lock().is_full()
    }

    pub fn len(&self) -> usize {
        self.state.lock().size
    }

    pub fn is_empty(&self) -> bool {
        !self.state.lock().has_data()
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().capacity
    }

    pub fn stats(&self) -> RingStats {
        self.state.lock().stats()
    }
}

impl<T: Send> MessageBuffer<T> for RingBuffer<T> {
    fn enqueue(&self, item: T) -> bool {
        self.enqueue_with_timing(item, TimingMetadata::new())
    }

    fn dequeue(&self) -> Option<T> {
        self.dequeue_with_timing().map(|(item, _)| item)
    }

    fn clear(&self) {
        self.state.lock().clear();
    }

    fn has_data(&self) -> bool {
        self.state.lock().has_data()
    }
}

impl<T: Send> TimedBuffer<T> for RingBuffer<T> {
    #[instrument(
        level = "trace",
        name = "ring_buffer_enqueue",
        skip_all,
        fields(channel = %self.channel)
    )]
    fn enqueue_with_timing(&self, item: T, timing: TimingMetadata) -> bool {
        let (outcome, depth) = {
            let mut state = self.state.lock();
            let outcome = state.push(item, timing);
            (outcome, state.size)
        };

        match outcome {
            PushOutcome::Stored => {}
            PushOutcome::Evicted => {
                trace!(channel = %self.channel, "buffer full, oldest entry evicted");
                observability::record_buffer_eviction(&self.channel);
            }
            PushOutcome::Rejected => {
                trace!(channel = %self.channel, "reliable buffer full, entry rejected");
                observability::record_buffer_rejected(&self.channel);
            }
        }
        observability::record_buffer_depth(&self.channel, depth);
        outcome != PushOutcome::Rejected
    }

    fn dequeue_with_timing(&self) -> Option<(T, TimingMetadata)> {
        self.state.lock().pop()
    }
}

/// Exclusive access to a [`RingBuffer`]; the lock is released on drop.
///
/// Holds the operations that are only meaningful as one transaction: locate an entry
/// with [`find_message`](Self::find_message), then remove it with
/// [`dequeue_at`](Self::dequeue_at), with no producer eviction in between.
pub struct RingGuard<'a, T> {
    channel: &'a ChannelId,
    state: MutexGuard<'a, RingState<T>>,
}

impl<T> RingGuard<'_, T> {
    pub fn channel(&self) -> &ChannelId {
        self.channel
    }

    /// Find the entry that best correlates with `pivot`.
    ///
    /// Scans occupied slots oldest first. A candidate qualifies when the window spanning
    /// both it and `pivot` fits `bound`. Without `disparity_optimal` the first qualifying
    /// slot is returned; with it, the slot with the narrowest combined window, ties going
    /// to the older slot. With an unbounded, non-optimal search the oldest slot is
    /// returned without scanning.
    ///
    /// # Errors
    /// [`ContractViolation`] when `pivot` or any buffered entry is already wider than
    /// `bound` on its own, wherever that entry sits.
    pub fn find_message(
        &self,
        pivot: TimeWindow,
        bound: IntervalBound,
        disparity_optimal: bool,
    ) -> Result<Option<usize>, ContractViolation> {
        self.state.find_message(pivot, bound, disparity_optimal, 0)
    }

    /// [`find_message`](Self::find_message) restricted to the entries `from` places or
    /// more past the oldest one, as if the older ones had already been retired.
    ///
    /// # Errors
    /// Same as [`find_message`](Self::find_message).
    pub fn find_message_from(
        &self,
        pivot: TimeWindow,
        bound: IntervalBound,
        disparity_optimal: bool,
        from: usize,
    ) -> Result<Option<usize>, ContractViolation> {
        self.state.find_message(pivot, bound, disparity_optimal, from)
    }

    /// Distance of ring `index` from the oldest entry, `None` when not occupied
    pub fn offset_of(&self, index: usize) -> Option<usize> {
        self.state.offset_of(index)
    }

    /// Check that no buffered entry is wider than `bound` on its own.
    ///
    /// # Errors
    /// [`ContractViolation`] naming the first offending slot.
    pub fn check_contract(&self, bound: IntervalBound) -> Result<(), ContractViolation> {
        self.state.check_contract(bound)
    }

    /// Remove and return the entry at ring `index`, retiring every older entry.
    ///
    /// The returned metadata has absorbed the metadata of each retired entry. `None`
    /// when `index` is not occupied.
    pub fn dequeue_at(&mut self, index: usize) -> Option<(T, TimingMetadata)> {
        self.state.dequeue_at(index)
    }

    pub fn dequeue(&mut self) -> Option<(T, TimingMetadata)> {
        self.state.pop()
    }

    pub fn timing_at(&self, index: usize) -> Option<&TimingMetadata> {
        self.state
            .offset_of(index)
            .and_then(|_| self.state.timing_at(index))
    }

    /// Ring indices of occupied slots, oldest first
    pub fn occupied_indices(&self) -> impl Iterator<Item = usize> {
        self.state.occupied()
    }

    pub fn read_index(&self) -> usize {
        self.state.read_index
    }

    pub fn write_index(&self) -> usize {
        self.state.write_index
    }

    pub fn len(&self) -> usize {
        self.state.size
    }

    pub fn is_empty(&self) -> bool {
        !self.state.has_data()
    }

    /// Release the lock explicitly
    pub fn unlock(self) {}
}
