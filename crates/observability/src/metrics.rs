//! 同步与调度指标收集模块
//!
//! 缓冲区、同步器、执行器的运行指标，以及按融合组 TimingMetadata 做的内存统计。

use std::collections::HashMap;
use std::time::Duration;

use contracts::{ChannelId, TimingMetadata};
use metrics::{counter, gauge, histogram};

/// 纳秒 -> 毫秒
#[inline]
fn ns_to_ms(ns: u64) -> f64 {
    ns as f64 / 1_000_000.0
}

/// 记录缓冲区深度
pub fn record_buffer_depth(channel: &str, depth: usize) {
    gauge!(
        "sensor_sync_buffer_depth",
        "channel" => channel.to_string()
    )
    .set(depth as f64);
}

/// 缓冲区满，最旧条目被覆盖
pub fn record_buffer_eviction(channel: &str) {
    counter!(
        "sensor_sync_buffer_evicted_total",
        "channel" => channel.to_string()
    )
    .increment(1);
}

/// 可靠模式下缓冲区满，新条目被拒绝（背压）
pub fn record_buffer_rejected(channel: &str) {
    counter!(
        "sensor_sync_buffer_rejected_total",
        "channel" => channel.to_string()
    )
    .increment(1);
}

/// 记录被跳过（未进入任何融合组）的条目数
pub fn record_entries_skipped(synchronizer: &str, channel: &str, count: usize) {
    if count == 0 {
        return;
    }
    counter!(
        "sensor_sync_entries_skipped_total",
        "synchronizer" => synchronizer.to_string(),
        "channel" => channel.to_string()
    )
    .increment(count as u64);
}

/// 记录融合组产生
///
/// - `disparity_ns`: 组内最早与最晚采样时间之差
/// - `members`: 实际参与的通道数
pub fn record_group_fused(synchronizer: &str, disparity_ns: u64, members: usize) {
    counter!(
        "sensor_sync_groups_total",
        "synchronizer" => synchronizer.to_string()
    )
    .increment(1);

    histogram!(
        "sensor_sync_group_disparity_ms",
        "synchronizer" => synchronizer.to_string()
    )
    .record(ns_to_ms(disparity_ns));

    gauge!(
        "sensor_sync_group_members",
        "synchronizer" => synchronizer.to_string()
    )
    .set(members as f64);
}

/// 生产者时间契约被破坏
pub fn record_contract_violation(synchronizer: &str, channel: &str) {
    counter!(
        "sensor_sync_contract_violations_total",
        "synchronizer" => synchronizer.to_string(),
        "channel" => channel.to_string()
    )
    .increment(1);
}

/// 未读融合组数
pub fn record_unread_groups(synchronizer: &str, unread: usize) {
    gauge!(
        "sensor_sync_unread_groups",
        "synchronizer" => synchronizer.to_string()
    )
    .set(unread as f64);
}

/// 记录一次工作项执行
pub fn record_work_executed(executor: &str, waitable: &str, elapsed: Duration) {
    counter!(
        "sensor_sync_work_executed_total",
        "executor" => executor.to_string(),
        "waitable" => waitable.to_string()
    )
    .increment(1);

    histogram!(
        "sensor_sync_work_duration_ms",
        "executor" => executor.to_string()
    )
    .record(elapsed.as_secs_f64() * 1000.0);
}

/// 活跃工作线程数
pub fn record_workers_active(executor: &str, workers: usize) {
    gauge!(
        "sensor_sync_workers_active",
        "executor" => executor.to_string()
    )
    .set(workers as f64);
}

/// 线程调度属性应用失败（线程继续以默认属性运行）
pub fn record_rt_apply_failure(executor: &str, worker: usize) {
    counter!(
        "sensor_sync_rt_apply_failures_total",
        "executor" => executor.to_string(),
        "worker" => worker.to_string()
    )
    .increment(1);
}

/// 融合组指标聚合器
///
/// 在内存中聚合指标，便于统计和输出摘要。
#[derive(Debug, Clone, Default)]
pub struct SyncMetricsAggregator {
    /// 融合组总数
    pub total_groups: u64,

    /// 有缺失可选通道的组数
    pub groups_with_missing: u64,

    /// 契约违规次数
    pub contract_violations: u64,

    /// 组时间跨度统计 (ms)
    pub disparity_stats: RunningStats,

    /// 剩余截止预算统计 (ms)
    pub remain_stats: RunningStats,

    /// 各通道相对组最晚采样的滞后统计 (ms)
    pub lag_stats: HashMap<ChannelId, RunningStats>,

    /// 各通道缺失次数
    pub missing_counts: HashMap<ChannelId, u64>,
}

impl SyncMetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 用一个融合组的合并时间信息更新统计
    pub fn update(&mut self, timing: &TimingMetadata, missing: &[ChannelId]) {
        self.total_groups += 1;

        if !missing.is_empty() {
            self.groups_with_missing += 1;
            for channel in missing {
                *self.missing_counts.entry(channel.clone()).or_insert(0) += 1;
            }
        }

        self.disparity_stats.push(ns_to_ms(timing.window().width()));

        if let Some(remain) = timing.min_remain_time() {
            self.remain_stats.push(ns_to_ms(remain));
        }

        let latest = timing.latest_sample_time();
        for (channel, sample) in timing.iter() {
            self.lag_stats
                .entry(channel.clone())
                .or_default()
                .push(ns_to_ms(latest - sample.this_sample_time));
        }
    }

    pub fn record_violation(&mut self) {
        self.contract_violations += 1;
    }

    /// 生成摘要报告
    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            total_groups: self.total_groups,
            groups_with_missing: self.groups_with_missing,
            contract_violations: self.contract_violations,
            missing_rate: if self.total_groups > 0 {
                self.groups_with_missing as f64 / self.total_groups as f64 * 100.0
            } else {
                0.0
            },
            disparity_ms: StatsSummary::from(&self.disparity_stats),
            remain_ms: StatsSummary::from(&self.remain_stats),
            channel_missing_counts: self
                .missing_counts
                .iter()
                .map(|(channel, count)| (channel.to_string(), *count))
                .collect(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// 指标摘要
#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    pub total_groups: u64,
    pub groups_with_missing: u64,
    pub contract_violations: u64,
    pub missing_rate: f64,
    pub disparity_ms: StatsSummary,
    pub remain_ms: StatsSummary,
    pub channel_missing_counts: HashMap<String, u64>,
}

impl std::fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Sync Metrics Summary ===")?;
        writeln!(f, "Fused groups: {}", self.total_groups)?;
        writeln!(
            f,
            "Groups with missing channels: {} ({:.2}%)",
            self.groups_with_missing, self.missing_rate
        )?;
        writeln!(f, "Contract violations: {}", self.contract_violations)?;
        writeln!(f, "Disparity (ms): {}", self.disparity_ms)?;
        writeln!(f, "Remaining budget (ms): {}", self.remain_ms)?;

        if !self.channel_missing_counts.is_empty() {
            let mut counts: Vec<_> = self.channel_missing_counts.iter().collect();
            counts.sort();
            writeln!(f, "Missing channel counts:")?;
            for (channel, count) in counts {
                writeln!(f, "  {channel}: {count}")?;
            }
        }

        Ok(())
    }
}

/// 统计摘要
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            return write!(f, "N/A");
        }
        write!(
            f,
            "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
            self.min, self.max, self.mean, self.std_dev, self.count
        )
    }
}

/// 在线统计 (Welford)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        self.count += 1;
        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
            return;
        }

        self.min = self.min.min(value);
        self.max = self.max.max(value);
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// 样本方差
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}
