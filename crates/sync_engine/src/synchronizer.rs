//! Multi-channel synchronizer
//!
//! One [`RingBuffer`] per watched channel. A group is formed around the oldest usable entry
//! of the first trigger channel (the pivot): every other channel contributes the entry that
//! best fits the pivot's window, and the window widens with each pick. Trigger channels
//! must contribute; optional channels are left out when nothing fits.
//!
//! Lock order is fixed: bookkeeping state first, then every buffer in channel order. The
//! whole find-then-remove transaction of [`Synchronizer::take`] runs under those locks, so
//! producers cannot evict a picked entry in between.
//!
//! The unread count is the number of disjoint groups successive takes would produce. It is
//! recounted on every arrival and after every take, so it never counts a group twice and
//! drops when an eviction breaks a pending group.

use std::any::TypeId;
use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use contracts::{
    BufferConfig, ChannelId, ContractError, IntervalBound, NoopSignal, ReadinessSignal,
    SerializedMessage, SynchronizerConfig, TimeWindow, TimingMetadata, Waitable,
};
use parking_lot::ReentrantMutex;
use tracing::{debug, instrument, warn};

use crate::buffer::TimedBuffer;
use crate::fused::FusedGroup;
use crate::ring_buffer::{RingBuffer, RingGuard, RingStats};

type SharedHandler<M> = Box<dyn Fn(FusedGroup<Arc<M>>) + Send + Sync>;
type UniqueHandler<M> = Box<dyn Fn(FusedGroup<M>) + Send + Sync>;
type NewMessageHandler = Arc<dyn Fn(usize) + Send + Sync>;

/// Consumer of fused groups, tagged by how payloads are handed over
pub enum SyncCallback<M> {
    /// Payloads wrapped in `Arc`, for consumers that fan out or keep references
    Shared(SharedHandler<M>),
    /// Payloads moved into the callback
    Unique(UniqueHandler<M>),
}

impl<M> SyncCallback<M> {
    pub fn shared(f: impl Fn(FusedGroup<Arc<M>>) + Send + Sync + 'static) -> Self {
        Self::Shared(Box::new(f))
    }

    pub fn unique(f: impl Fn(FusedGroup<M>) + Send + Sync + 'static) -> Self {
        Self::Unique(Box::new(f))
    }

    fn dispatch(&self, group: FusedGroup<M>) {
        match self {
            Self::Shared(f) => f(group.map(Arc::new)),
            Self::Unique(f) => f(group),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Shared(_) => "shared",
            Self::Unique(_) => "unique",
        }
    }
}

impl<M> fmt::Debug for SyncCallback<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SyncCallback::{}", self.kind())
    }
}

#[derive(Default)]
struct SyncState {
    unread_count: usize,
    on_new_message: Option<NewMessageHandler>,
}

/// Ring indices picked for one group, `None` for absent optional channels
struct Selection {
    picks: Vec<Option<usize>>,
    window: TimeWindow,
}

/// Builds a [`Synchronizer`] from its configuration
pub struct SynchronizerBuilder<M> {
    config: SynchronizerConfig,
    default_buffer: BufferConfig,
    signal: Arc<dyn ReadinessSignal>,
    _payload: PhantomData<fn() -> M>,
}

impl<M: Send + 'static> SynchronizerBuilder<M> {
    pub fn new(config: SynchronizerConfig) -> Self {
        Self {
            config,
            default_buffer: BufferConfig::default(),
            signal: Arc::new(NoopSignal),
            _payload: PhantomData,
        }
    }

    /// Buffer settings for channels without their own override
    pub fn default_buffer(mut self, buffer: BufferConfig) -> Self {
        self.default_buffer = buffer;
        self
    }

    /// Signal triggered whenever a group becomes available
    pub fn signal(mut self, signal: Arc<dyn ReadinessSignal>) -> Self {
        self.signal = signal;
        self
    }

    /// # Errors
    /// - `UnsupportedOperation` when `M` is [`SerializedMessage`]
    /// - `ConfigValidation` for an empty or duplicated channel list, no trigger channel, a
    ///   zero deviation bound or a zero buffer capacity
    pub fn build(self, callback: SyncCallback<M>) -> Result<Synchronizer<M>, ContractError> {
        let config = self.config;

        if TypeId::of::<M>() == TypeId::of::<SerializedMessage>() {
            return Err(ContractError::unsupported(format!(
                "synchronizer '{}' cannot correlate serialized messages",
                config.name
            )));
        }

        let field = |name: &str| format!("synchronizers[{}].{name}", config.name);
        if config.channels.is_empty() {
            return Err(ContractError::config_validation(
                field("channels"),
                "at least one channel is required",
            ));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = config.channels.iter().find(|c| !seen.insert(&c.id)) {
            return Err(ContractError::config_validation(
                field("channels"),
                format!("duplicate channel '{}'", dup.id),
            ));
        }
        if !config.channels.iter().any(|c| c.trigger) {
            return Err(ContractError::config_validation(
                field("channels"),
                "at least one trigger channel is required",
            ));
        }
        if config.allowed_time_deviation_ms == Some(0) {
            return Err(ContractError::config_validation(
                field("allowed_time_deviation_ms"),
                "deviation must be positive; omit it for an unbounded search",
            ));
        }

        let buffers = config
            .channels
            .iter()
            .map(|c| {
                RingBuffer::with_config(c.id.clone(), config.buffer_for(c, self.default_buffer))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let triggers: Vec<bool> = config.channels.iter().map(|c| c.trigger).collect();
        let pivot = triggers.iter().position(|t| *t).unwrap_or_default();

        debug!(
            synchronizer = %config.name,
            channels = config.channels.len(),
            pivot = %config.channels[pivot].id,
            bound = ?config.interval_bound(),
            callback = callback.kind(),
            "synchronizer built"
        );

        Ok(Synchronizer {
            channels: config.channels.iter().map(|c| c.id.clone()).collect(),
            bound: config.interval_bound(),
            disparity_optimal: config.disparity_optimal,
            name: config.name,
            triggers,
            pivot,
            buffers,
            callback,
            signal: self.signal,
            state: ReentrantMutex::new(RefCell::new(SyncState::default())),
            group_counter: AtomicU64::new(0),
        })
    }
}

/// Correlates messages from several channels into [`FusedGroup`]s.
pub struct Synchronizer<M> {
    name: String,
    channels: Arc<[ChannelId]>,
    triggers: Vec<bool>,
    pivot: usize,
    buffers: Vec<RingBuffer<M>>,
    bound: IntervalBound,
    disparity_optimal: bool,
    callback: SyncCallback<M>,
    signal: Arc<dyn ReadinessSignal>,
    state: ReentrantMutex<RefCell<SyncState>>,
    group_counter: AtomicU64,
}

impl<M> fmt::Debug for Synchronizer<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Synchronizer")
            .field("name", &self.name)
            .field("channels", &self.channels)
            .field("bound", &self.bound)
            .field("callback", &self.callback)
            .finish()
    }
}

impl<M: Send + 'static> Synchronizer<M> {
    pub fn builder(config: SynchronizerConfig) -> SynchronizerBuilder<M> {
        SynchronizerBuilder::new(config)
    }

    /// Store `message` on `channel` and look for a new group.
    ///
    /// Returns `false` when a reliable buffer refused the message.
    ///
    /// # Errors
    /// `UnknownChannel`, or a `ContractViolation` found while searching.
    #[instrument(
        level = "trace",
        name = "synchronizer_publish",
        skip(self, message, timing),
        fields(synchronizer = %self.name)
    )]
    pub fn publish(
        &self,
        channel: &str,
        message: M,
        timing: TimingMetadata,
    ) -> Result<bool, ContractError> {
        let buffer = self
            .buffer(channel)
            .ok_or_else(|| ContractError::unknown_channel(&self.name, channel))?;

        if !buffer.enqueue_with_timing(message, timing) {
            return Ok(false);
        }
        self.notify()?;
        Ok(true)
    }

    /// Arrival notification for messages enqueued directly into a buffer.
    ///
    /// Recounts the groups that can be formed from the buffered entries and returns
    /// whether any exists. When the arrival added a group, the readiness signal fires and
    /// the on-new-message callback runs with the new count; when an eviction broke a
    /// pending group, the count drops.
    ///
    /// # Errors
    /// `ContractViolation` when a buffered entry is wider than the deviation bound.
    pub fn notify(&self) -> Result<bool, ContractError> {
        let state = self.state.lock();

        let available = {
            let guards = self.lock_buffers();
            self.count_groups(&guards)
                .inspect_err(|err| self.report_violation(err))?
        };

        let (previous, handler) = {
            let mut s = state.borrow_mut();
            let previous = std::mem::replace(&mut s.unread_count, available);
            (previous, s.on_new_message.clone())
        };
        if available != previous {
            observability::record_unread_groups(&self.name, available);
        }
        if available > previous {
            self.signal.trigger();
            if let Some(handler) = handler {
                handler(available);
            }
        }
        Ok(available > 0)
    }

    /// Remove the next group from the buffers.
    ///
    /// `Ok(None)` when no group can be formed. Entries older than a picked one are retired
    /// and their timing survives in [`FusedGroup::timing`].
    ///
    /// # Errors
    /// `ContractViolation` when a buffered entry is wider than the deviation bound.
    #[instrument(
        level = "debug",
        name = "synchronizer_take",
        skip(self),
        fields(synchronizer = %self.name)
    )]
    pub fn take(&self) -> Result<Option<FusedGroup<M>>, ContractError> {
        let state = self.state.lock();
        let mut guards = self.lock_buffers();

        let selection = match self.search(&guards, &vec![0; guards.len()]) {
            Ok(selection) => selection,
            Err(err) => {
                self.report_violation(&err);
                return Err(err);
            }
        };
        let Some(selection) = selection else {
            state.borrow_mut().unread_count = 0;
            observability::record_unread_groups(&self.name, 0);
            return Ok(None);
        };

        let mut messages = Vec::with_capacity(guards.len());
        let mut timings = Vec::with_capacity(guards.len());
        for (guard, pick) in guards.iter_mut().zip(&selection.picks) {
            let taken = pick.and_then(|index| {
                let before = guard.len();
                let taken = guard.dequeue_at(index)?;
                observability::record_entries_skipped(
                    &self.name,
                    guard.channel(),
                    before - guard.len() - 1,
                );
                Some(taken)
            });
            match taken {
                Some((message, timing)) => {
                    messages.push(Some(message));
                    timings.push(timing);
                }
                None => messages.push(None),
            }
        }

        // a violation here keeps the synchronizer ready so the next take surfaces it
        let remaining = self.count_groups(&guards).ok();
        drop(guards);

        let unread = {
            let mut s = state.borrow_mut();
            let unread = match remaining {
                Some(groups) => groups,
                None => s.unread_count.saturating_sub(1).max(1),
            };
            s.unread_count = unread;
            unread
        };
        drop(state);
        observability::record_unread_groups(&self.name, unread);

        let group = FusedGroup {
            group_id: self.group_counter.fetch_add(1, Ordering::Relaxed),
            channels: Arc::clone(&self.channels),
            timing: merge_newest_first(timings),
            messages,
            window: selection.window,
        };
        observability::record_group_fused(&self.name, group.disparity(), group.members());
        debug!(
            synchronizer = %self.name,
            group_id = group.group_id,
            earliest = group.window.earliest,
            latest = group.window.latest,
            members = group.members(),
            unread,
            "group fused"
        );
        Ok(Some(group))
    }

    /// Register the callback run with the unread count whenever a group becomes
    /// available. Runs immediately when groups are already pending.
    pub fn set_on_new_message_callback(&self, callback: impl Fn(usize) + Send + Sync + 'static) {
        let state = self.state.lock();
        let handler: NewMessageHandler = Arc::new(callback);
        let pending = {
            let mut s = state.borrow_mut();
            s.on_new_message = Some(Arc::clone(&handler));
            s.unread_count
        };
        if pending > 0 {
            handler(pending);
        }
    }

    pub fn clear_on_new_message_callback(&self) {
        self.state.lock().borrow_mut().on_new_message = None;
    }

    /// Fire the configured callback for `group`
    pub fn dispatch(&self, group: FusedGroup<M>) {
        self.callback.dispatch(group);
    }

    fn lock_buffers(&self) -> Vec<RingGuard<'_, M>> {
        self.buffers.iter().map(RingBuffer::lock).collect()
    }

    /// Number of disjoint groups successive takes would produce from the current entries
    fn count_groups(&self, guards: &[RingGuard<'_, M>]) -> Result<usize, ContractError> {
        let mut consumed = vec![0; guards.len()];
        let mut groups = 0;
        while let Some(selection) = self.search(guards, &consumed)? {
            for (i, pick) in selection.picks.iter().enumerate() {
                if let Some(offset) = pick.and_then(|index| guards[i].offset_of(index)) {
                    consumed[i] = offset + 1;
                }
            }
            groups += 1;
        }
        Ok(groups)
    }

    /// Find the next group, treating the first `consumed[i]` entries of channel `i` as
    /// already retired
    fn search(
        &self,
        guards: &[RingGuard<'_, M>],
        consumed: &[usize],
    ) -> Result<Option<Selection>, ContractError> {
        let pivot_guard = &guards[self.pivot];
        pivot_guard
            .check_contract(self.bound)
            .map_err(|v| ContractError::contract_violation(pivot_guard.channel().as_str(), v))?;

        let candidates = pivot_guard.occupied_indices().skip(consumed[self.pivot]);
        'candidates: for candidate in candidates {
            let Some(timing) = pivot_guard.timing_at(candidate) else {
                continue;
            };
            let mut window = timing.window();
            let mut picks = vec![None; guards.len()];
            picks[self.pivot] = Some(candidate);

            for (i, guard) in guards.iter().enumerate() {
                if i == self.pivot {
                    continue;
                }
                let found = guard
                    .find_message_from(window, self.bound, self.disparity_optimal, consumed[i])
                    .map_err(|v| ContractError::contract_violation(guard.channel().as_str(), v))?;
                match found {
                    Some(index) => {
                        if let Some(picked) = guard.timing_at(index) {
                            window = window.union(&picked.window());
                        }
                        picks[i] = Some(index);
                    }
                    None if self.triggers[i] => continue 'candidates,
                    None => {}
                }
            }
            return Ok(Some(Selection { picks, window }));
        }
        Ok(None)
    }

    fn report_violation(&self, err: &ContractError) {
        if let ContractError::ContractViolation { channel, violation } = err {
            warn!(
                synchronizer = %self.name,
                channel = %channel,
                earliest = violation.window.earliest,
                latest = violation.window.latest,
                bound = violation.bound,
                "timing contract violated"
            );
            observability::record_contract_violation(&self.name, channel);
        }
    }
}

impl<M> Synchronizer<M> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn channel_ids(&self) -> &[ChannelId] {
        &self.channels
    }

    pub fn trigger_channels(&self) -> impl Iterator<Item = &ChannelId> {
        self.channels
            .iter()
            .zip(&self.triggers)
            .filter_map(|(c, t)| t.then_some(c))
    }

    pub fn allowed_time_deviation(&self) -> IntervalBound {
        self.bound
    }

    pub fn unread_count(&self) -> usize {
        self.state.lock().borrow().unread_count
    }

    /// Buffer of `channel`, for producers that enqueue directly
    pub fn buffer(&self, channel: &str) -> Option<&RingBuffer<M>> {
        let index = self.channels.iter().position(|c| c.as_str() == channel)?;
        self.buffers.get(index)
    }

    pub fn buffer_stats(&self) -> Vec<(ChannelId, RingStats)> {
        self.channels
            .iter()
            .cloned()
            .zip(self.buffers.iter().map(RingBuffer::stats))
            .collect()
    }
}

/// Fold member timings into one record, newest record as the base
fn merge_newest_first(mut timings: Vec<TimingMetadata>) -> TimingMetadata {
    timings.sort_by_key(|t| std::cmp::Reverse(t.latest_sample_time()));
    let mut members = timings.into_iter();
    let mut merged = members.next().unwrap_or_default();
    for older in members {
        merged.merge(older);
    }
    merged
}

impl<M: Send + 'static> Waitable for Synchronizer<M> {
    type Data = FusedGroup<M>;

    fn name(&self) -> &str {
        &self.name
    }

    fn is_ready(&self) -> bool {
        self.unread_count() > 0
    }

    fn take_data(&self) -> Result<Option<FusedGroup<M>>, ContractError> {
        self.take()
    }

    fn execute(&self, group: FusedGroup<M>) {
        self.dispatch(group);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    use contracts::ChannelConfig;

    use super::*;
    use crate::buffer::MessageBuffer;

    const MS: u64 = 1_000_000;

    fn meta(channel: &str, t_ms: u64) -> TimingMetadata {
        TimingMetadata::single(channel, t_ms * MS, t_ms.saturating_sub(10) * MS, 50 * MS)
    }

    fn config(channels: Vec<ChannelConfig>, deviation_ms: Option<u64>) -> SynchronizerConfig {
        let mut config = SynchronizerConfig::new("fusion", channels);
        config.allowed_time_deviation_ms = deviation_ms;
        config
    }

    fn build(
        channels: Vec<ChannelConfig>,
        deviation_ms: Option<u64>,
    ) -> Synchronizer<&'static str> {
        Synchronizer::builder(config(channels, deviation_ms))
            .default_buffer(BufferConfig {
                capacity: 4,
                reliable: false,
            })
            .build(SyncCallback::unique(|_| {}))
            .unwrap()
    }

    #[derive(Default)]
    struct CountingSignal(AtomicUsize);

    impl ReadinessSignal for CountingSignal {
        fn trigger(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_build_rejects_serialized_payloads() {
        let err = Synchronizer::builder(config(vec![ChannelConfig::trigger("raw")], None))
            .build(SyncCallback::<SerializedMessage>::unique(|_| {}))
            .unwrap_err();
        assert!(matches!(err, ContractError::UnsupportedOperation { .. }));
    }

    #[test]
    fn test_build_validates_channels() {
        let no_trigger = Synchronizer::builder(config(vec![ChannelConfig::optional("imu")], None))
            .build(SyncCallback::<u8>::unique(|_| {}));
        assert!(matches!(no_trigger, Err(ContractError::ConfigValidation { .. })));

        let dup = Synchronizer::builder(config(
            vec![ChannelConfig::trigger("cam"), ChannelConfig::optional("cam")],
            None,
        ))
        .build(SyncCallback::<u8>::unique(|_| {}));
        assert!(dup.unwrap_err().to_string().contains("duplicate channel 'cam'"));

        let zero = Synchronizer::builder(config(vec![ChannelConfig::trigger("cam")], Some(0)))
            .build(SyncCallback::<u8>::unique(|_| {}));
        assert!(zero.is_err());
    }

    #[test]
    fn test_publish_unknown_channel() {
        let sync = build(vec![ChannelConfig::trigger("cam")], None);
        let err = sync.publish("gps", "x", meta("gps", 1)).unwrap_err();
        assert!(matches!(err, ContractError::UnknownChannel { .. }));
    }

    #[test]
    fn test_group_needs_every_trigger_channel() {
        let signal = Arc::new(CountingSignal::default());
        let sync = Synchronizer::builder(config(
            vec![ChannelConfig::trigger("cam"), ChannelConfig::trigger("lidar")],
            Some(20),
        ))
        .signal(signal.clone())
        .build(SyncCallback::<&str>::unique(|_| {}))
        .unwrap();

        assert!(sync.publish("cam", "c100", meta("cam", 100)).unwrap());
        assert!(!sync.is_ready());
        assert_eq!(signal.0.load(Ordering::SeqCst), 0);

        sync.publish("lidar", "l105", meta("lidar", 105)).unwrap();
        assert!(sync.is_ready());
        assert_eq!(sync.unread_count(), 1);
        assert_eq!(signal.0.load(Ordering::SeqCst), 1);

        let group = sync.take().unwrap().unwrap();
        assert_eq!(group.message("cam"), Some(&"c100"));
        assert_eq!(group.message("lidar"), Some(&"l105"));
        assert_eq!(group.disparity(), 5 * MS);
        assert_eq!(group.timing.len(), 2);
        assert!(!sync.is_ready());
        assert!(sync.take().unwrap().is_none());
    }

    #[test]
    fn test_optional_channel_omitted_when_out_of_bound() {
        let sync = build(
            vec![ChannelConfig::trigger("cam"), ChannelConfig::optional("imu")],
            Some(10),
        );
        sync.publish("imu", "i0", meta("imu", 0)).unwrap();
        sync.publish("cam", "c100", meta("cam", 100)).unwrap();

        let group = sync.take().unwrap().unwrap();
        assert_eq!(group.message("cam"), Some(&"c100"));
        assert_eq!(group.message("imu"), None);
        assert_eq!(group.missing_channels(), vec![ChannelId::new("imu")]);
        // stale optional entry stays until something newer retires it
        assert_eq!(sync.buffer("imu").unwrap().len(), 1);
    }

    #[test]
    fn test_pivot_skips_stale_candidates_and_merges_history() {
        let sync = build(
            vec![ChannelConfig::trigger("cam"), ChannelConfig::trigger("lidar")],
            Some(10),
        );
        // cam@0 has no lidar partner; cam@100 pairs with lidar@104
        sync.publish("cam", "c0", meta("cam", 0)).unwrap();
        sync.publish("cam", "c100", meta("cam", 100)).unwrap();
        sync.publish("lidar", "l104", meta("lidar", 104)).unwrap();

        let group = sync.take().unwrap().unwrap();
        assert_eq!(group.message("cam"), Some(&"c100"));
        // retired cam@0 handed its history forward
        assert_eq!(group.timing.get("cam").unwrap().this_sample_time, 100 * MS);
        assert_eq!(group.timing.get("cam").unwrap().last_sample_time, 0);
        assert_eq!(sync.buffer("cam").unwrap().stats().skipped, 1);
        assert!(!sync.buffer("cam").unwrap().has_data());
    }

    #[test]
    fn test_contract_violation_surfaces_from_take() {
        let sync = build(
            vec![ChannelConfig::trigger("cam"), ChannelConfig::trigger("fused")],
            Some(10),
        );
        let mut wide = meta("fused", 100);
        wide.update("radar", 50, 0, 0);
        sync.buffer("fused").unwrap().enqueue_with_timing("bad", wide);
        sync.buffer("cam").unwrap().enqueue_with_timing("c100", meta("cam", 100));

        let err = sync.notify().unwrap_err();
        assert!(err.is_contract_violation());
        assert!(sync.take().unwrap_err().to_string().contains("fused"));
    }

    #[test]
    fn test_unread_count_tracks_pending_groups() {
        let sync = build(vec![ChannelConfig::trigger("cam")], None);
        for t in [10, 20, 30] {
            sync.publish("cam", "c", meta("cam", t)).unwrap();
        }
        assert_eq!(sync.unread_count(), 3);

        sync.take().unwrap().unwrap();
        assert_eq!(sync.unread_count(), 2);
        sync.take().unwrap().unwrap();
        sync.take().unwrap().unwrap();
        assert_eq!(sync.unread_count(), 0);
        assert!(sync.take().unwrap().is_none());
    }

    #[test]
    fn test_unpaired_arrivals_do_not_recount_pending_group() {
        let sync = build(
            vec![ChannelConfig::trigger("cam"), ChannelConfig::trigger("lidar")],
            Some(10),
        );
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        sync.set_on_new_message_callback(move |n| sink.lock().unwrap().push(n));

        sync.publish("cam", "c100", meta("cam", 100)).unwrap();
        sync.publish("lidar", "l100", meta("lidar", 100)).unwrap();
        for t in [500, 900] {
            sync.publish("cam", "c", meta("cam", t)).unwrap();
        }
        assert_eq!(sync.unread_count(), 1);
        assert_eq!(*seen.lock().unwrap(), vec![1]);

        assert!(sync.take().unwrap().is_some());
        assert_eq!(sync.unread_count(), 0);
        assert!(!sync.is_ready());
        assert!(sync.take().unwrap().is_none());
    }

    #[test]
    fn test_unread_count_matches_disjoint_groups() {
        let sync = build(
            vec![ChannelConfig::trigger("cam"), ChannelConfig::trigger("lidar")],
            Some(10),
        );
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        sync.set_on_new_message_callback(move |n| sink.lock().unwrap().push(n));

        sync.publish("cam", "c100", meta("cam", 100)).unwrap();
        sync.publish("lidar", "l100", meta("lidar", 100)).unwrap();
        sync.publish("cam", "c200", meta("cam", 200)).unwrap();
        assert_eq!(sync.unread_count(), 1);
        sync.publish("lidar", "l200", meta("lidar", 200)).unwrap();
        assert_eq!(sync.unread_count(), 2);
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);

        let first = sync.take().unwrap().unwrap();
        assert_eq!(first.message("lidar"), Some(&"l100"));
        assert_eq!(sync.unread_count(), 1);
        let second = sync.take().unwrap().unwrap();
        assert_eq!(second.message("cam"), Some(&"c200"));
        assert_eq!(sync.unread_count(), 0);
    }

    #[test]
    fn test_eviction_of_pending_member_clears_readiness() {
        let sync = Synchronizer::builder(config(
            vec![ChannelConfig::trigger("cam"), ChannelConfig::trigger("lidar")],
            Some(10),
        ))
        .default_buffer(BufferConfig {
            capacity: 1,
            reliable: false,
        })
        .build(SyncCallback::<&str>::unique(|_| {}))
        .unwrap();

        sync.publish("cam", "c100", meta("cam", 100)).unwrap();
        sync.publish("lidar", "l100", meta("lidar", 100)).unwrap();
        assert!(sync.is_ready());

        // cam@500 overwrites cam@100, lidar@100 has no partner left
        assert!(sync.publish("cam", "c500", meta("cam", 500)).unwrap());
        assert_eq!(sync.unread_count(), 0);
        assert!(!sync.is_ready());
        assert!(sync.take().unwrap().is_none());
    }

    #[test]
    fn test_on_new_message_callback_runs_for_pending_groups() {
        let sync = build(vec![ChannelConfig::trigger("cam")], None);
        sync.publish("cam", "c", meta("cam", 10)).unwrap();
        sync.publish("cam", "c", meta("cam", 20)).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        sync.set_on_new_message_callback(move |n| sink.lock().unwrap().push(n));
        assert_eq!(*seen.lock().unwrap(), vec![2]);

        sync.publish("cam", "c", meta("cam", 30)).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![2, 3]);

        sync.clear_on_new_message_callback();
        sync.publish("cam", "c", meta("cam", 40)).unwrap();
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_callback_may_reenter() {
        let sync = Arc::new(build(vec![ChannelConfig::trigger("cam")], None));
        let weak = Arc::downgrade(&sync);
        let observed = Arc::new(AtomicUsize::new(0));
        let out = observed.clone();
        sync.set_on_new_message_callback(move |_| {
            if let Some(sync) = weak.upgrade() {
                out.store(sync.unread_count(), Ordering::SeqCst);
            }
        });

        sync.publish("cam", "c", meta("cam", 10)).unwrap();
        assert_eq!(observed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_shared_and_unique_dispatch() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let shared = Synchronizer::builder(config(vec![ChannelConfig::trigger("cam")], None))
            .build(SyncCallback::shared(move |group: FusedGroup<Arc<String>>| {
                let payload = group.message("cam").map(|m| m.as_str().to_owned());
                sink.lock().unwrap().extend(payload);
            }))
            .unwrap();
        shared
            .publish("cam", "frame".to_string(), meta("cam", 1))
            .unwrap();
        let group = Waitable::take_data(&shared).unwrap().unwrap();
        Waitable::execute(&shared, group);
        assert_eq!(*received.lock().unwrap(), vec!["frame".to_string()]);

        let moved = Arc::new(Mutex::new(None));
        let sink = moved.clone();
        let unique = Synchronizer::builder(config(vec![ChannelConfig::trigger("cam")], None))
            .build(SyncCallback::unique(move |mut group: FusedGroup<Vec<u8>>| {
                *sink.lock().unwrap() = group.messages[0].take();
            }))
            .unwrap();
        unique.publish("cam", vec![1, 2, 3], meta("cam", 1)).unwrap();
        let group = unique.take().unwrap().unwrap();
        unique.dispatch(group);
        assert_eq!(*moved.lock().unwrap(), Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_diagnostics() {
        let sync = build(
            vec![ChannelConfig::optional("imu"), ChannelConfig::trigger("cam")],
            Some(25),
        );
        assert_eq!(sync.channel_ids().len(), 2);
        assert_eq!(
            sync.trigger_channels().cloned().collect::<Vec<_>>(),
            vec![ChannelId::new("cam")]
        );
        assert_eq!(
            sync.allowed_time_deviation(),
            IntervalBound::Bounded(25 * MS)
        );
        assert_eq!(sync.buffer_stats()[1].1.capacity, 4);
    }
}
