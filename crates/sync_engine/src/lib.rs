//! # Sync Engine
//!
//! 进程内多传感器时间同步核心。
//!
//! 负责：
//! - 每通道定容环形缓冲区（满时覆盖最旧条目并合并其时间信息，或可靠模式下拒绝）
//! - 按允许时间偏差在各通道间搜索关联消息
//! - 组装 `FusedGroup` 并通过 `Waitable` 交给执行器
//!
//! ## 使用示例
//!
//! ```ignore
//! use sync_engine::{SyncCallback, Synchronizer};
//!
//! let sync = Synchronizer::builder(config.synchronizer("fusion").unwrap().clone())
//!     .default_buffer(config.buffer)
//!     .signal(executor.signal())
//!     .build(SyncCallback::unique(|group: FusedGroup<Frame>| {
//!         // Handle correlated frames
//!     }))?;
//!
//! // Producer threads
//! sync.publish("cam", frame, TimingMetadata::single("cam", t, prev, budget))?;
//! ```

mod buffer;
mod fused;
mod ring_buffer;
mod synchronizer;

pub use buffer::{MessageBuffer, TimedBuffer};
pub use fused::FusedGroup;
pub use ring_buffer::{RingBuffer, RingGuard, RingStats};
pub use synchronizer::{SyncCallback, Synchronizer, SynchronizerBuilder};

// Re-export contracts types
pub use contracts::{
    BufferConfig, ChannelConfig, ChannelId, ContractError, ContractViolation, IntervalBound,
    SynchronizerConfig, TimeWindow, TimingMetadata,
};
