//! Readiness set shared by the worker pool.
//!
//! Entities push readiness through [`WakeSignal`]; workers scan the registered entities and
//! sleep on the signal when nothing is ready. The signal carries a generation counter: a
//! waiter records the generation before scanning and only sleeps while it is unchanged, so
//! a trigger landing between the scan and the sleep is never lost.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use contracts::{ContractError, ReadinessSignal, Waitable};
use parking_lot::{Condvar, Mutex, RwLock};

/// Claimed unit of work, ready to run without any executor lock held
pub(crate) type Work = Box<dyn FnOnce() + Send>;

/// Object-safe view of a [`Waitable`]
pub(crate) trait ErasedWaitable: Send + Sync {
    fn name(&self) -> &str;
    fn is_ready(&self) -> bool;
    fn claim(self: Arc<Self>) -> Result<Option<Work>, ContractError>;
}

impl<W: Waitable> ErasedWaitable for W {
    fn name(&self) -> &str {
        Waitable::name(self)
    }

    fn is_ready(&self) -> bool {
        Waitable::is_ready(self)
    }

    fn claim(self: Arc<Self>) -> Result<Option<Work>, ContractError> {
        let Some(data) = self.take_data()? else {
            return Ok(None);
        };
        Ok(Some(Box::new(move || self.execute(data))))
    }
}

/// Condition variable with a generation counter
#[derive(Debug, Default)]
pub struct WakeSignal {
    generation: Mutex<u64>,
    condvar: Condvar,
}

impl WakeSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        *self.generation.lock()
    }

    /// Block until the generation moves past `seen` or `timeout` elapses.
    ///
    /// Returns `false` on timeout.
    pub fn wait_past(&self, seen: u64, timeout: Option<Duration>) -> bool {
        let mut generation = self.generation.lock();
        let deadline = timeout.map(|t| Instant::now() + t);
        while *generation == seen {
            match deadline {
                None => self.condvar.wait(&mut generation),
                Some(deadline) => {
                    if self.condvar.wait_until(&mut generation, deadline).timed_out() {
                        return *generation != seen;
                    }
                }
            }
        }
        true
    }
}

impl ReadinessSignal for WakeSignal {
    fn trigger(&self) {
        let mut generation = self.generation.lock();
        *generation = generation.wrapping_add(1);
        self.condvar.notify_all();
    }
}

/// Registered entities plus the signal they share
pub(crate) struct WaitSet {
    entries: RwLock<Vec<Arc<dyn ErasedWaitable>>>,
    signal: Arc<WakeSignal>,
    cursor: AtomicUsize,
}

impl WaitSet {
    pub(crate) fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            signal: Arc::new(WakeSignal::new()),
            cursor: AtomicUsize::new(0),
        }
    }

    pub(crate) fn signal(&self) -> &Arc<WakeSignal> {
        &self.signal
    }

    pub(crate) fn add(&self, entry: Arc<dyn ErasedWaitable>) {
        self.entries.write().push(entry);
        // entry may already be ready
        self.signal.trigger();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// First ready entry, scanning round robin so one busy entity cannot starve the rest
    fn next_ready(&self) -> Option<Arc<dyn ErasedWaitable>> {
        let entries = self.entries.read();
        if entries.is_empty() {
            return None;
        }
        let start = self.cursor.load(Ordering::Relaxed) % entries.len();
        (0..entries.len())
            .map(|offset| (start + offset) % entries.len())
            .find(|&i| entries[i].is_ready())
            .map(|i| {
                self.cursor.store(i + 1, Ordering::Relaxed);
                Arc::clone(&entries[i])
            })
    }

    /// Wait up to `timeout` for a ready entry; `None` on timeout or once `cancelled` is set.
    pub(crate) fn wait_ready(
        &self,
        timeout: Option<Duration>,
        cancelled: &AtomicBool,
    ) -> Option<Arc<dyn ErasedWaitable>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let seen = self.signal.generation();
            if cancelled.load(Ordering::Acquire) {
                return None;
            }
            if let Some(entry) = self.next_ready() {
                return Some(entry);
            }

            let remaining = match deadline {
                None => None,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    Some(deadline - now)
                }
            };
            self.signal.wait_past(seen, remaining);
        }
    }
}
