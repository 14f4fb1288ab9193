//! # Executor
//!
//! 实时多线程执行器。
//!
//! - 工作线程共享一个就绪集合 (wait set)，取工作项时串行、执行时并行
//! - 每个工作线程启动时可绑定 CPU 并切换调度策略 (FIFO / RR / DEADLINE)
//! - 同一实例同时只允许一个 `spin()`
//!
//! ## 使用示例
//!
//! ```ignore
//! let executor = Arc::new(Executor::new(config.executor.clone()));
//! let sync = Arc::new(
//!     Synchronizer::builder(sync_config)
//!         .signal(executor.signal())
//!         .build(callback)?,
//! );
//! executor.add(sync.clone());
//!
//! let runner = {
//!     let executor = executor.clone();
//!     std::thread::spawn(move || executor.spin())
//! };
//! // ... producers publish ...
//! executor.cancel();
//! runner.join().unwrap()?;
//! ```

mod executor;
pub mod rt;
mod wait_set;

pub use executor::Executor;
pub use wait_set::WakeSignal;

pub use contracts::{ExecutorConfig, SchedPolicy, ThreadAttributes};
