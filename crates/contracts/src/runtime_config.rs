//! Runtime configuration contracts shared by the loader, the sync engine and the executor.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ChannelId, IntervalBound};

/// Configuration version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// Complete runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Configuration version
    #[serde(default)]
    pub version: ConfigVersion,

    /// Default buffer settings for every channel
    #[serde(default)]
    pub buffer: BufferConfig,

    /// Synchronizer definitions
    #[serde(default)]
    pub synchronizers: Vec<SynchronizerConfig>,

    /// Worker pool settings
    #[serde(default)]
    pub executor: ExecutorConfig,
}

impl RuntimeConfig {
    /// Look up a synchronizer definition by name
    pub fn synchronizer(&self, name: &str) -> Option<&SynchronizerConfig> {
        self.synchronizers.iter().find(|s| s.name == name)
    }
}

/// Ring buffer configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Number of slots per channel (must be > 0)
    pub capacity: usize,
    /// Reject new entries instead of overwriting when full
    #[serde(default)]
    pub reliable: bool,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: 16,
            reliable: false,
        }
    }
}

/// One watched channel of a synchronizer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Channel name
    pub id: ChannelId,

    /// Must be present in every group; `false` marks optional context
    #[serde(default = "default_trigger")]
    pub trigger: bool,

    /// Per-channel buffer override
    #[serde(default)]
    pub buffer: Option<BufferConfig>,
}

fn default_trigger() -> bool {
    true
}

impl ChannelConfig {
    pub fn trigger(id: impl Into<ChannelId>) -> Self {
        Self {
            id: id.into(),
            trigger: true,
            buffer: None,
        }
    }

    pub fn optional(id: impl Into<ChannelId>) -> Self {
        Self {
            id: id.into(),
            trigger: false,
            buffer: None,
        }
    }
}

/// Synchronizer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynchronizerConfig {
    /// Name used in logs and metrics
    pub name: String,

    /// Watched channels, in callback argument order
    pub channels: Vec<ChannelConfig>,

    /// Allowed disparity of a correlated group in milliseconds; absent = unbounded
    #[serde(default)]
    pub allowed_time_deviation_ms: Option<u64>,

    /// Search every buffered entry for the minimum disparity instead of the first fit
    #[serde(default = "default_disparity_optimal")]
    pub disparity_optimal: bool,

    /// Buffer settings overriding the runtime default for this synchronizer
    #[serde(default)]
    pub buffer: Option<BufferConfig>,
}

fn default_disparity_optimal() -> bool {
    true
}

impl SynchronizerConfig {
    pub fn new(name: impl Into<String>, channels: Vec<ChannelConfig>) -> Self {
        Self {
            name: name.into(),
            channels,
            allowed_time_deviation_ms: None,
            disparity_optimal: true,
            buffer: None,
        }
    }

    /// Deviation bound in nanoseconds
    pub fn interval_bound(&self) -> IntervalBound {
        self.allowed_time_deviation_ms
            .map(|ms| ms.saturating_mul(1_000_000))
            .into()
    }

    /// Effective buffer settings for `channel`
    pub fn buffer_for(&self, channel: &ChannelConfig, default: BufferConfig) -> BufferConfig {
        channel.buffer.or(self.buffer).unwrap_or(default)
    }
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Name used in logs and thread names
    #[serde(default = "default_executor_name")]
    pub name: String,

    /// Number of workers; 0 = available hardware parallelism
    #[serde(default)]
    pub thread_count: usize,

    /// Yield once between claiming and executing (race-hunting aid)
    #[serde(default)]
    pub yield_before_execute: bool,

    /// Readiness wait timeout in nanoseconds; negative = block indefinitely
    #[serde(default = "default_wait_timeout_ns")]
    pub wait_timeout_ns: i64,

    /// Scheduling attributes of worker `i` at index `i`; missing entries use the platform
    /// default
    #[serde(default)]
    pub threads: Vec<ThreadAttributes>,
}

fn default_executor_name() -> String {
    "executor".to_string()
}

fn default_wait_timeout_ns() -> i64 {
    -1
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            name: default_executor_name(),
            thread_count: 0,
            yield_before_execute: false,
            wait_timeout_ns: default_wait_timeout_ns(),
            threads: Vec::new(),
        }
    }
}

impl ExecutorConfig {
    /// `None` blocks indefinitely
    pub fn wait_timeout(&self) -> Option<Duration> {
        u64::try_from(self.wait_timeout_ns)
            .ok()
            .map(Duration::from_nanos)
    }
}

/// Per-worker OS scheduling attributes, applied once when the worker starts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadAttributes {
    /// CPUs the worker may run on; empty = no pinning
    #[serde(default)]
    pub cpus: Vec<usize>,

    /// Scheduling class
    #[serde(default)]
    pub policy: SchedPolicy,
}

/// Scheduling class of a worker thread
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "class", rename_all = "snake_case")]
pub enum SchedPolicy {
    /// Platform default time-sharing scheduler
    #[default]
    Other,
    /// Fixed-priority FIFO
    Fifo { priority: i32 },
    /// Fixed-priority round robin
    RoundRobin { priority: i32 },
    /// Earliest-deadline-first with a reserved runtime per period (nanoseconds)
    Deadline {
        runtime_ns: u64,
        deadline_ns: u64,
        period_ns: u64,
    },
}

impl SchedPolicy {
    pub fn is_default(&self) -> bool {
        matches!(self, SchedPolicy::Other)
    }
}
