//! # Contracts
//!
//! Frozen interface contracts shared by every crate of the synchronization core.
//! Business crates depend on this crate only; reverse dependencies are prohibited.
//!
//! ## Time Model
//! - Sample times, deadlines and windows are `u64` nanoseconds on one monotonic clock
//! - Deviation bounds in configuration are milliseconds, converted once at build time

mod channel_id;
mod error;
mod payload;
mod runtime_config;
mod timing;
mod waitable;

pub use channel_id::ChannelId;
pub use error::*;
pub use payload::SerializedMessage;
pub use runtime_config::*;
pub use timing::*;
pub use waitable::{NoopSignal, ReadinessSignal, Waitable};
