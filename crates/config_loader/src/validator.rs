//! 配置校验模块
//!
//! 校验规则：
//! - buffer.capacity > 0 (全局、同步器、通道三级)
//! - 同步器名称非空且唯一
//! - 通道 id 非空且在同一同步器内唯一，且至少有一个触发通道
//! - allowed_time_deviation_ms > 0 (缺省表示不限)
//! - 线程属性：CPU 不重复且在 CPU_SETSIZE 内；优先级 1..=99；
//!   deadline 参数满足 0 < runtime <= deadline <= period
//! - thread_count 非零时，线程属性条目数不超过 thread_count

use std::collections::HashSet;

use contracts::{
    BufferConfig, ContractError, ExecutorConfig, RuntimeConfig, SchedPolicy, SynchronizerConfig,
    ThreadAttributes,
};

/// 与 glibc `CPU_SETSIZE` 一致
pub const MAX_CPUS: usize = 1024;

const RT_PRIORITY_RANGE: std::ops::RangeInclusive<i32> = 1..=99;

/// 校验 RuntimeConfig
///
/// 返回第一个遇到的错误，或 Ok(())。
pub fn validate(config: &RuntimeConfig) -> Result<(), ContractError> {
    validate_buffer("buffer", &config.buffer)?;
    validate_synchronizer_names(config)?;
    for sync in &config.synchronizers {
        validate_synchronizer(sync)?;
    }
    validate_executor(&config.executor)?;
    Ok(())
}

fn validate_buffer(field: &str, buffer: &BufferConfig) -> Result<(), ContractError> {
    if buffer.capacity == 0 {
        return Err(ContractError::config_validation(
            format!("{field}.capacity"),
            "capacity must be > 0",
        ));
    }
    Ok(())
}

/// 同步器名称唯一
fn validate_synchronizer_names(config: &RuntimeConfig) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for (idx, sync) in config.synchronizers.iter().enumerate() {
        if sync.name.is_empty() {
            return Err(ContractError::config_validation(
                format!("synchronizers[{idx}].name"),
                "synchronizer name cannot be empty",
            ));
        }
        if !seen.insert(sync.name.as_str()) {
            return Err(ContractError::config_validation(
                format!("synchronizers[name={}]", sync.name),
                "duplicate synchronizer name",
            ));
        }
    }
    Ok(())
}

fn validate_synchronizer(sync: &SynchronizerConfig) -> Result<(), ContractError> {
    let prefix = format!("synchronizers[{}]", sync.name);

    if sync.channels.is_empty() {
        return Err(ContractError::config_validation(
            format!("{prefix}.channels"),
            "at least one channel is required",
        ));
    }

    let mut seen = HashSet::new();
    for channel in &sync.channels {
        if channel.id.is_empty() {
            return Err(ContractError::config_validation(
                format!("{prefix}.channels"),
                "channel id cannot be empty",
            ));
        }
        if !seen.insert(channel.id.as_str()) {
            return Err(ContractError::config_validation(
                format!("{prefix}.channels[id={}]", channel.id),
                "duplicate channel id",
            ));
        }
        if let Some(buffer) = &channel.buffer {
            validate_buffer(&format!("{prefix}.channels[{}].buffer", channel.id), buffer)?;
        }
    }

    if !sync.channels.iter().any(|c| c.trigger) {
        return Err(ContractError::config_validation(
            format!("{prefix}.channels"),
            "at least one trigger channel is required",
        ));
    }

    if sync.allowed_time_deviation_ms == Some(0) {
        return Err(ContractError::config_validation(
            format!("{prefix}.allowed_time_deviation_ms"),
            "allowed_time_deviation_ms must be > 0 (omit for unbounded)",
        ));
    }

    if let Some(buffer) = &sync.buffer {
        validate_buffer(&format!("{prefix}.buffer"), buffer)?;
    }
    Ok(())
}

fn validate_executor(executor: &ExecutorConfig) -> Result<(), ContractError> {
    if executor.name.is_empty() {
        return Err(ContractError::config_validation(
            "executor.name",
            "executor name cannot be empty",
        ));
    }

    if executor.thread_count > 0 && executor.threads.len() > executor.thread_count {
        return Err(ContractError::config_validation(
            "executor.threads",
            format!(
                "{} thread attribute entries for {} threads",
                executor.threads.len(),
                executor.thread_count
            ),
        ));
    }

    for (idx, attrs) in executor.threads.iter().enumerate() {
        validate_thread(idx, attrs)?;
    }
    Ok(())
}

/// 校验单个工作线程的调度属性
fn validate_thread(idx: usize, attrs: &ThreadAttributes) -> Result<(), ContractError> {
    let field = |name: &str| format!("executor.threads[{idx}].{name}");

    let mut seen = HashSet::new();
    for &cpu in &attrs.cpus {
        if cpu >= MAX_CPUS {
            return Err(ContractError::config_validation(
                field("cpus"),
                format!("cpu {cpu} out of range (max {})", MAX_CPUS - 1),
            ));
        }
        if !seen.insert(cpu) {
            return Err(ContractError::config_validation(
                field("cpus"),
                format!("duplicate cpu {cpu}"),
            ));
        }
    }

    match attrs.policy {
        SchedPolicy::Other => {}
        SchedPolicy::Fifo { priority } | SchedPolicy::RoundRobin { priority } => {
            if !RT_PRIORITY_RANGE.contains(&priority) {
                return Err(ContractError::config_validation(
                    field("policy.priority"),
                    format!("priority must be within 1..=99, got {priority}"),
                ));
            }
        }
        SchedPolicy::Deadline {
            runtime_ns,
            deadline_ns,
            period_ns,
        } => {
            if runtime_ns == 0 || runtime_ns > deadline_ns || deadline_ns > period_ns {
                return Err(ContractError::config_validation(
                    field("policy"),
                    format!(
                        "deadline parameters must satisfy 0 < runtime <= deadline <= period, \
                         got {runtime_ns}/{deadline_ns}/{period_ns}"
                    ),
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::ChannelConfig;

    fn minimal_config() -> RuntimeConfig {
        RuntimeConfig {
            synchronizers: vec![SynchronizerConfig::new(
                "fusion",
                vec![ChannelConfig::trigger("camera"), ChannelConfig::optional("imu")],
            )],
            ..Default::default()
        }
    }

    fn expect_err(config: &RuntimeConfig, needle: &str) {
        let err = validate(config).unwrap_err().to_string();
        assert!(err.contains(needle), "got: {err}");
    }

    #[test]
    fn test_valid_config() {
        assert!(validate(&minimal_config()).is_ok());
    }

    #[test]
    fn test_zero_capacity() {
        let mut config = minimal_config();
        config.buffer.capacity = 0;
        expect_err(&config, "buffer.capacity");

        let mut config = minimal_config();
        config.synchronizers[0].channels[1].buffer = Some(BufferConfig {
            capacity: 0,
            reliable: false,
        });
        expect_err(&config, "channels[imu].buffer.capacity");
    }

    #[test]
    fn test_duplicate_synchronizer_name() {
        let mut config = minimal_config();
        config.synchronizers.push(config.synchronizers[0].clone());
        expect_err(&config, "duplicate synchronizer name");
    }

    #[test]
    fn test_duplicate_channel_id() {
        let mut config = minimal_config();
        config.synchronizers[0]
            .channels
            .push(ChannelConfig::optional("camera"));
        expect_err(&config, "duplicate channel id");
    }

    #[test]
    fn test_requires_trigger_channel() {
        let mut config = minimal_config();
        config.synchronizers[0].channels[0].trigger = false;
        expect_err(&config, "trigger channel");
    }

    #[test]
    fn test_zero_deviation() {
        let mut config = minimal_config();
        config.synchronizers[0].allowed_time_deviation_ms = Some(0);
        expect_err(&config, "allowed_time_deviation_ms");
    }

    #[test]
    fn test_thread_attribute_count() {
        let mut config = minimal_config();
        config.executor.thread_count = 1;
        config.executor.threads = vec![ThreadAttributes::default(); 2];
        expect_err(&config, "2 thread attribute entries for 1 threads");

        // thread_count 0 resolves at runtime; any length accepted
        config.executor.thread_count = 0;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_duplicate_cpu() {
        let mut config = minimal_config();
        config.executor.threads = vec![ThreadAttributes {
            cpus: vec![1, 1],
            policy: SchedPolicy::Other,
        }];
        expect_err(&config, "duplicate cpu 1");
    }

    #[test]
    fn test_priority_range() {
        let mut config = minimal_config();
        config.executor.threads = vec![ThreadAttributes {
            cpus: vec![],
            policy: SchedPolicy::RoundRobin { priority: 0 },
        }];
        expect_err(&config, "priority must be within 1..=99");
    }

    #[test]
    fn test_deadline_ordering() {
        let mut config = minimal_config();
        config.executor.threads = vec![ThreadAttributes {
            cpus: vec![0],
            policy: SchedPolicy::Deadline {
                runtime_ns: 5_000_000,
                deadline_ns: 1_000_000,
                period_ns: 10_000_000,
            },
        }];
        expect_err(&config, "0 < runtime <= deadline <= period");
    }
}
