//! Per-message timing metadata.
//!
//! Every buffered payload carries a [`TimingMetadata`] describing, per contributing sensor
//! channel, when that channel was sampled, when it was sampled before that, and how much of
//! its deadline budget is left. Fusing or evicting messages merges these records so a
//! consumer downstream still sees the timing of every sensor that fed into its input.
//!
//! All times are nanoseconds on a single monotonic clock chosen by the producers.

use std::collections::btree_map::{self, BTreeMap};

use serde::{Deserialize, Serialize};

use crate::ChannelId;

/// Timing of one sensor channel inside a metadata record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelTiming {
    /// Sample time of the data this record describes
    pub this_sample_time: u64,
    /// Sample time of the previous sample on the same channel
    pub last_sample_time: u64,
    /// Remaining deadline budget
    pub remain_time: u64,
}

/// Closed time interval `[earliest, latest]` spanned by one or more metadata records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub earliest: u64,
    pub latest: u64,
}

impl TimeWindow {
    #[inline]
    pub fn new(earliest: u64, latest: u64) -> Self {
        Self { earliest, latest }
    }

    /// Disparity of the window.
    #[inline]
    pub fn width(&self) -> u64 {
        self.latest.saturating_sub(self.earliest)
    }

    /// Smallest window covering both `self` and `other`.
    #[inline]
    pub fn union(&self, other: &TimeWindow) -> TimeWindow {
        TimeWindow {
            earliest: self.earliest.min(other.earliest),
            latest: self.latest.max(other.latest),
        }
    }
}

/// Upper bound on the disparity a correlated group may span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalBound {
    /// No limit; any entry correlates with any other
    Unbounded,
    /// Limit in nanoseconds
    Bounded(u64),
}

impl IntervalBound {
    /// Whether a window of `width` nanoseconds fits the bound.
    #[inline]
    pub fn admits(&self, width: u64) -> bool {
        match *self {
            IntervalBound::Unbounded => true,
            IntervalBound::Bounded(limit) => width <= limit,
        }
    }

    #[inline]
    pub fn is_unbounded(&self) -> bool {
        matches!(self, IntervalBound::Unbounded)
    }
}

impl From<Option<u64>> for IntervalBound {
    fn from(limit: Option<u64>) -> Self {
        limit.map_or(IntervalBound::Unbounded, IntervalBound::Bounded)
    }
}

/// Timing metadata attached to one buffered message.
///
/// A channel appears at most once. Records are never cloned implicitly on the hot path:
/// [`merge`](Self::merge) takes the source by value and the source is gone afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingMetadata {
    samples: BTreeMap<ChannelId, ChannelTiming>,
}

impl TimingMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Metadata with a single channel, the usual shape of a freshly produced sample.
    pub fn single(
        channel: impl Into<ChannelId>,
        this_sample_time: u64,
        last_sample_time: u64,
        remain_time: u64,
    ) -> Self {
        let mut meta = Self::new();
        meta.update(channel, this_sample_time, last_sample_time, remain_time);
        meta
    }

    /// Insert or overwrite the timing of `channel`.
    pub fn update(
        &mut self,
        channel: impl Into<ChannelId>,
        this_sample_time: u64,
        last_sample_time: u64,
        remain_time: u64,
    ) {
        self.samples.insert(
            channel.into(),
            ChannelTiming {
                this_sample_time,
                last_sample_time,
                remain_time,
            },
        );
    }

    /// Fold `older` into `self`.
    ///
    /// Channels only `older` knows about are adopted as-is. For channels both know about,
    /// `self` keeps its own `this_sample_time` and takes `older`'s `last_sample_time` and
    /// `remain_time`. `self` must be the newer record; this is not checked.
    pub fn merge(&mut self, older: TimingMetadata) {
        if tracing::enabled!(tracing::Level::TRACE)
            && !self.is_empty()
            && older.latest_sample_time() > self.latest_sample_time()
        {
            tracing::trace!(
                into_latest = self.latest_sample_time(),
                from_latest = older.latest_sample_time(),
                "merging newer timing metadata into older record"
            );
        }

        for (channel, timing) in older.samples {
            match self.samples.entry(channel) {
                btree_map::Entry::Vacant(slot) => {
                    slot.insert(timing);
                }
                btree_map::Entry::Occupied(mut slot) => {
                    let kept = slot.get_mut();
                    kept.last_sample_time = timing.last_sample_time;
                    kept.remain_time = timing.remain_time;
                }
            }
        }
    }

    pub fn get(&self, channel: &str) -> Option<&ChannelTiming> {
        self.samples.get(channel)
    }

    pub fn contains(&self, channel: &str) -> bool {
        self.samples.contains_key(channel)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn channels(&self) -> impl Iterator<Item = &ChannelId> {
        self.samples.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ChannelId, &ChannelTiming)> {
        self.samples.iter()
    }

    /// Minimum `this_sample_time` over all channels, 0 when empty.
    pub fn earliest_sample_time(&self) -> u64 {
        self.samples
            .values()
            .map(|t| t.this_sample_time)
            .min()
            .unwrap_or(0)
    }

    /// Maximum `this_sample_time` over all channels, 0 when empty.
    pub fn latest_sample_time(&self) -> u64 {
        self.samples
            .values()
            .map(|t| t.this_sample_time)
            .max()
            .unwrap_or(0)
    }

    pub fn window(&self) -> TimeWindow {
        TimeWindow::new(self.earliest_sample_time(), self.latest_sample_time())
    }

    /// Smallest remaining deadline budget across channels, if any.
    pub fn min_remain_time(&self) -> Option<u64> {
        self.samples.values().map(|t| t.remain_time).min()
    }
}
