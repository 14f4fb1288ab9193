//! # Integration Tests
//!
//! 集成测试与端到端测试。
//!
//! 负责：
//! - 合约快照测试
//! - 配置 -> 同步器 -> 执行器 的端到端流程（多生产者线程）
//! - 契约违规、背压在整条链路上的表现

#[cfg(test)]
mod contract_tests {
    use contracts::{ChannelConfig, RuntimeConfig, SynchronizerConfig};

    #[test]
    fn test_contracts_compile() {
        let _ = contracts::ConfigVersion::V1;
    }

    #[test]
    fn test_default_runtime_config_is_valid() {
        let mut config = RuntimeConfig::default();
        config.synchronizers.push(SynchronizerConfig::new(
            "fusion",
            vec![ChannelConfig::trigger("cam")],
        ));
        assert!(config_loader::ConfigLoader::validate(&config).is_ok());
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{BufferConfig, ContractError, RuntimeConfig, TimingMetadata};
    use executor::Executor;
    use observability::SyncMetricsAggregator;
    use parking_lot::Mutex;
    use sync_engine::{FusedGroup, SyncCallback, Synchronizer, TimedBuffer};

    const MS: u64 = 1_000_000;
    const FRAMES: u64 = 100;
    const PERIOD_MS: u64 = 50;

    const PIPELINE_TOML: &str = r#"
[buffer]
capacity = 256

[[synchronizers]]
name = "fusion"
allowed_time_deviation_ms = 5

[[synchronizers.channels]]
id = "cam"

[[synchronizers.channels]]
id = "lidar"

[[synchronizers.channels]]
id = "imu"
trigger = false

[executor]
name = "e2e"
thread_count = 3
wait_timeout_ns = 2000000
"#;

    #[derive(Debug, Clone, PartialEq)]
    struct Frame {
        channel: &'static str,
        seq: u64,
    }

    fn load() -> RuntimeConfig {
        ConfigLoader::load_from_str(PIPELINE_TOML, ConfigFormat::Toml).unwrap()
    }

    /// Publish `count` samples every `period_ms` starting at `offset_ms`
    fn produce<M: Send + 'static>(
        sync: &Arc<Synchronizer<M>>,
        channel: &'static str,
        offset_ms: u64,
        period_ms: u64,
        count: u64,
        make: impl Fn(u64) -> M + Send + 'static,
    ) -> thread::JoinHandle<()> {
        let sync = sync.clone();
        thread::spawn(move || {
            for seq in 0..count {
                let t = (offset_ms + seq * period_ms) * MS;
                let last = t.saturating_sub(period_ms * MS);
                let timing = TimingMetadata::single(channel, t, last, 20 * MS);
                sync.publish(channel, make(seq), timing).unwrap();
                if seq % 16 == 0 {
                    thread::yield_now();
                }
            }
        })
    }

    fn wait_until(deadline: Duration, done: impl Fn() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        done()
    }

    /// Config -> Synchronizer + Executor -> producer threads -> fused callbacks
    #[test]
    fn test_e2e_pipeline_pairs_every_frame() {
        let config = load();
        let executor = Arc::new(Executor::new(config.executor.clone()));
        assert_eq!(executor.number_of_threads(), 3);

        let groups: Arc<Mutex<Vec<FusedGroup<Frame>>>> = Arc::default();
        let sink = groups.clone();
        let sync = Arc::new(
            Synchronizer::builder(config.synchronizer("fusion").unwrap().clone())
                .default_buffer(config.buffer)
                .signal(executor.signal())
                .build(SyncCallback::unique(move |group| sink.lock().push(group)))
                .unwrap(),
        );
        executor.add(sync.clone());

        let runner = {
            let executor = executor.clone();
            thread::spawn(move || executor.spin())
        };

        let producers = [
            produce(&sync, "cam", 0, PERIOD_MS, FRAMES, |seq| Frame { channel: "cam", seq }),
            produce(&sync, "lidar", 2, PERIOD_MS, FRAMES, |seq| Frame { channel: "lidar", seq }),
        ];
        for producer in producers {
            producer.join().unwrap();
        }

        assert!(
            wait_until(Duration::from_secs(10), || groups.lock().len() as u64 == FRAMES),
            "got {} groups",
            groups.lock().len()
        );
        executor.cancel();
        runner.join().unwrap().unwrap();

        let groups = groups.lock();
        let mut aggregator = SyncMetricsAggregator::new();
        let mut ids = HashSet::new();
        for group in groups.iter() {
            let cam = group.message("cam").unwrap();
            let lidar = group.message("lidar").unwrap();
            assert_eq!(cam.seq, lidar.seq);
            assert_eq!(lidar.channel, "lidar");
            assert_eq!(group.disparity(), 2 * MS);
            assert!(ids.insert(group.group_id));
            aggregator.update(&group.timing, &group.missing_channels());
        }

        let summary = aggregator.summary();
        assert_eq!(summary.total_groups, FRAMES);
        assert_eq!(summary.groups_with_missing, FRAMES);
        assert!((summary.disparity_ms.max - 2.0).abs() < 1e-9);
        assert_eq!(sync.unread_count(), 0);
    }

    /// Optional high-rate channel joins when a sample falls within the bound
    #[test]
    fn test_e2e_optional_channel_shared_payloads() {
        let mut config = load();
        config.synchronizers[0].channels[2].buffer = Some(BufferConfig {
            capacity: 1024,
            reliable: false,
        });
        let executor = Arc::new(Executor::new(config.executor.clone()));

        let groups: Arc<Mutex<Vec<FusedGroup<Arc<Frame>>>>> = Arc::default();
        let sink = groups.clone();
        let sync = Arc::new(
            Synchronizer::builder(config.synchronizer("fusion").unwrap().clone())
                .default_buffer(config.buffer)
                .signal(executor.signal())
                .build(SyncCallback::shared(move |group| sink.lock().push(group)))
                .unwrap(),
        );
        executor.add(sync.clone());

        // imu first so every pair finds its neighbour already buffered
        produce(&sync, "imu", 1, 10, FRAMES * 5, |seq| Frame { channel: "imu", seq })
            .join()
            .unwrap();

        let runner = {
            let executor = executor.clone();
            thread::spawn(move || executor.spin())
        };
        let producers = [
            produce(&sync, "cam", 0, PERIOD_MS, FRAMES, |seq| Frame { channel: "cam", seq }),
            produce(&sync, "lidar", 2, PERIOD_MS, FRAMES, |seq| Frame { channel: "lidar", seq }),
        ];
        for producer in producers {
            producer.join().unwrap();
        }

        assert!(wait_until(Duration::from_secs(10), || {
            groups.lock().len() as u64 == FRAMES
        }));
        executor.cancel();
        runner.join().unwrap().unwrap();

        for group in groups.lock().iter() {
            let cam = group.message("cam").unwrap();
            let imu = group.message("imu").expect("imu within bound");
            // imu@(1 + 10k) ms closest to cam@(50n) and lidar@(50n + 2) is k = 5n
            assert_eq!(imu.seq, cam.seq * 5);
            assert!(group.disparity() <= 5 * MS);
            assert!(group.timing.contains("imu"));
        }
        // every pick retires the four imu samples in between
        let imu = sync.buffer("imu").unwrap().stats();
        assert_eq!(imu.skipped, 4 * (FRAMES - 1));
        assert_eq!(imu.evicted, 0);
    }

    /// A producer breaking the timing contract stops the pool with the violation
    #[test]
    fn test_e2e_contract_violation_stops_executor() {
        let config = load();
        let executor = Executor::new(config.executor.clone());
        let sync = Arc::new(
            Synchronizer::builder(config.synchronizer("fusion").unwrap().clone())
                .signal(executor.signal())
                .build(SyncCallback::<Frame>::unique(|_| {}))
                .unwrap(),
        );
        executor.add(sync.clone());

        let frame = |channel| Frame { channel, seq: 0 };
        sync.publish("cam", frame("cam"), TimingMetadata::single("cam", 100 * MS, 0, 0))
            .unwrap();
        sync.publish("lidar", frame("lidar"), TimingMetadata::single("lidar", 101 * MS, 0, 0))
            .unwrap();
        assert_eq!(sync.unread_count(), 1);

        // already fused upstream across 40ms, wider than the 5ms bound
        let mut wide = TimingMetadata::single("lidar", 140 * MS, 0, 0);
        wide.update("radar", 100 * MS, 0, 0);
        sync.buffer("lidar")
            .unwrap()
            .enqueue_with_timing(frame("lidar"), wide);

        let err = executor.spin().unwrap_err();
        assert!(err.is_contract_violation(), "got {err}");
        match err {
            ContractError::ContractViolation { channel, violation } => {
                assert_eq!(channel, "lidar");
                assert_eq!(violation.bound, 5 * MS);
                assert_eq!(violation.window.width(), 40 * MS);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    /// Reliable buffers push back on producers instead of dropping history
    #[test]
    fn test_e2e_reliable_backpressure() {
        let mut config = load();
        config.buffer.capacity = 2;
        config.buffer.reliable = true;
        let sync = Synchronizer::builder(config.synchronizer("fusion").unwrap().clone())
            .default_buffer(config.buffer)
            .build(SyncCallback::<u64>::unique(|_| {}))
            .unwrap();

        let meta = |t: u64| TimingMetadata::single("cam", t * MS, 0, 0);
        assert!(sync.publish("cam", 0, meta(0)).unwrap());
        assert!(sync.publish("cam", 1, meta(100)).unwrap());
        assert!(!sync.publish("cam", 2, meta(200)).unwrap());

        let stats = sync.buffer("cam").unwrap().stats();
        assert_eq!(stats.len, 2);
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.evicted, 0);
    }
}
