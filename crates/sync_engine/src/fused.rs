//! Correlated message groups produced by a [`Synchronizer`](crate::Synchronizer).

use std::sync::Arc;

use contracts::{ChannelId, TimeWindow, TimingMetadata};

/// One message per watched channel, sampled within the synchronizer's deviation bound.
///
/// `messages[i]` belongs to `channels[i]`; optional channels with no matching entry are
/// `None`, trigger channels never are.
#[derive(Debug, Clone)]
pub struct FusedGroup<P> {
    /// Monotonic per-synchronizer sequence number
    pub group_id: u64,
    pub channels: Arc<[ChannelId]>,
    pub messages: Vec<Option<P>>,
    /// Timing of every member merged into one record, retired entries included
    pub timing: TimingMetadata,
    /// Window spanned by the members' own metadata
    pub window: TimeWindow,
}

impl<P> FusedGroup<P> {
    /// Message of `channel`, if it took part
    pub fn message(&self, channel: &str) -> Option<&P> {
        let index = self.channels.iter().position(|c| c.as_str() == channel)?;
        self.messages.get(index)?.as_ref()
    }

    /// Spread between the earliest and latest member sample
    pub fn disparity(&self) -> u64 {
        self.window.width()
    }

    pub fn members(&self) -> usize {
        self.messages.iter().filter(|m| m.is_some()).count()
    }

    /// Channels that had nothing within the bound
    pub fn missing_channels(&self) -> Vec<ChannelId> {
        self.channels
            .iter()
            .zip(&self.messages)
            .filter(|(_, m)| m.is_none())
            .map(|(c, _)| c.clone())
            .collect()
    }

    pub fn map<Q>(self, mut f: impl FnMut(P) -> Q) -> FusedGroup<Q> {
        FusedGroup {
            group_id: self.group_id,
            channels: self.channels,
            messages: self.messages.into_iter().map(|m| m.map(&mut f)).collect(),
            timing: self.timing,
            window: self.window,
        }
    }
}
