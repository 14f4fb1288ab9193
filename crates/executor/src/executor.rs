//! Worker pool over a shared wait set.
//!
//! Every worker runs the same loop: take the scheduling lock, wait for a ready entity,
//! claim exactly one unit of work from it, release the lock, then execute. Claiming is
//! therefore serialized while execution runs in parallel.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use contracts::{ContractError, ExecutorConfig, ReadinessSignal, Waitable};
use parking_lot::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::rt;
use crate::wait_set::{ErasedWaitable, WaitSet};

/// Multi-threaded executor with optional per-worker CPU pinning and RT scheduling.
///
/// At most one [`spin`](Self::spin) runs per instance; a second concurrent call fails
/// with `AlreadySpinning`.
pub struct Executor {
    config: ExecutorConfig,
    number_of_threads: usize,
    wait_set: WaitSet,
    spinning: AtomicBool,
    cancelled: AtomicBool,
    schedule_lock: Mutex<()>,
    executed: AtomicU64,
}

/// Clears the spinning flag when `spin` returns or unwinds
struct SpinGuard<'a>(&'a AtomicBool);

impl Drop for SpinGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Executor {
    pub fn new(config: ExecutorConfig) -> Self {
        let number_of_threads = match config.thread_count {
            0 => thread::available_parallelism().map_or(1, |n| n.get()),
            n => n,
        };
        Self {
            config,
            number_of_threads,
            wait_set: WaitSet::new(),
            spinning: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            schedule_lock: Mutex::new(()),
            executed: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Resolved pool size
    pub fn number_of_threads(&self) -> usize {
        self.number_of_threads
    }

    pub fn is_spinning(&self) -> bool {
        self.spinning.load(Ordering::Acquire)
    }

    /// Work items executed since construction
    pub fn executed_count(&self) -> u64 {
        self.executed.load(Ordering::Relaxed)
    }

    /// Signal entities must trigger when they become ready
    pub fn signal(&self) -> Arc<dyn ReadinessSignal> {
        self.wait_set.signal().clone()
    }

    /// Register an entity; allowed while spinning
    pub fn add<W: Waitable>(&self, waitable: Arc<W>) {
        debug!(
            executor = %self.config.name,
            waitable = Waitable::name(&*waitable),
            "waitable added"
        );
        self.wait_set.add(waitable);
    }

    pub fn waitable_count(&self) -> usize {
        self.wait_set.len()
    }

    /// Stop an active spin; every blocked worker wakes, claimed work still runs.
    ///
    /// No effect while idle.
    pub fn cancel(&self) {
        if !self.is_spinning() {
            return;
        }
        self.cancelled.store(true, Ordering::Release);
        self.wait_set.signal().trigger();
    }

    /// Run the pool on `number_of_threads` workers until [`cancel`](Self::cancel).
    ///
    /// Every worker is a dedicated thread, so thread attributes never touch the caller,
    /// which only blocks until the workers exit.
    ///
    /// # Errors
    /// - `AlreadySpinning` when another `spin` is active on this instance
    /// - the first error a waitable returned while work was claimed; the pool stops on it
    #[instrument(
        name = "executor_spin",
        skip(self),
        fields(executor = %self.config.name, threads = self.number_of_threads)
    )]
    pub fn spin(&self) -> Result<(), ContractError> {
        if self
            .spinning
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ContractError::AlreadySpinning {
                name: self.config.name.clone(),
            });
        }
        let _spinning = SpinGuard(&self.spinning);

        let failure: Mutex<Option<ContractError>> = Mutex::new(None);
        info!(waitables = self.wait_set.len(), "executor spinning");
        observability::record_workers_active(&self.config.name, self.number_of_threads);

        thread::scope(|scope| {
            let failure = &failure;
            for worker in 0..self.number_of_threads {
                let spawned = thread::Builder::new()
                    .name(format!("{}-worker-{worker}", self.config.name))
                    .spawn_scoped(scope, move || self.run_worker(worker, failure));
                if let Err(e) = spawned {
                    self.fail(failure, ContractError::Io(e));
                    break;
                }
            }
        });

        observability::record_workers_active(&self.config.name, 0);
        self.cancelled.store(false, Ordering::Release);
        match failure.into_inner() {
            Some(err) => Err(err),
            None => {
                info!(executed = self.executed_count(), "executor stopped");
                Ok(())
            }
        }
    }

    fn fail(&self, failure: &Mutex<Option<ContractError>>, err: ContractError) {
        error!(executor = %self.config.name, error = %err, "executor stopping on error");
        failure.lock().get_or_insert(err);
        self.cancel();
    }

    fn run_worker(&self, worker: usize, failure: &Mutex<Option<ContractError>>) {
        if let Some(attrs) = self.config.threads.get(worker) {
            match rt::apply_thread_attributes(worker, attrs) {
                Ok(()) => debug!(worker, ?attrs, "thread attributes applied"),
                Err(err) => {
                    warn!(worker, error = %err, "running with default scheduling");
                    observability::record_rt_apply_failure(&self.config.name, worker);
                }
            }
        }

        let timeout = self.config.wait_timeout();
        while !self.cancelled.load(Ordering::Acquire) {
            let (entity, work) = {
                let _schedule = self.schedule_lock.lock();
                let Some(entity) = self.wait_set.wait_ready(timeout, &self.cancelled) else {
                    continue;
                };
                match Arc::clone(&entity).claim() {
                    Ok(Some(work)) => (entity, work),
                    Ok(None) => continue,
                    Err(err) => {
                        self.fail(failure, err);
                        break;
                    }
                }
            };

            if self.config.yield_before_execute {
                thread::yield_now();
            }

            let started = Instant::now();
            work();
            self.executed.fetch_add(1, Ordering::Relaxed);
            observability::record_work_executed(
                &self.config.name,
                entity.name(),
                started.elapsed(),
            );
        }
        debug!(worker, "worker exiting");
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.cancel();
    }
}
