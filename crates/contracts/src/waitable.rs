//! Waitable - executor-facing work contract
//!
//! Anything the executor can wait on and run implements [`Waitable`]. Readiness is pushed
//! to the executor through a [`ReadinessSignal`] handed out by the wait infrastructure.

use std::sync::Arc;

use crate::ContractError;

/// Entity that becomes ready, hands out one unit of work, and executes it.
///
/// `take_data` is called by exactly one worker while it holds the executor's scheduling
/// lock; `execute` runs afterwards without that lock, possibly concurrently with other
/// items taken from the same entity.
pub trait Waitable: Send + Sync + 'static {
    /// Work unit moved from `take_data` to `execute`
    type Data: Send + 'static;

    /// Short name used in logs and metrics
    fn name(&self) -> &str;

    /// Whether at least one unit of work is pending
    fn is_ready(&self) -> bool;

    /// Claim one unit of work.
    ///
    /// `Ok(None)` when the entity looked ready but the work vanished in between.
    ///
    /// # Errors
    /// Contract violations found while assembling the work; they must not be swallowed.
    fn take_data(&self) -> Result<Option<Self::Data>, ContractError>;

    /// Run a claimed unit of work
    fn execute(&self, data: Self::Data);
}

/// Binary readiness notification consumed by an external wait primitive.
pub trait ReadinessSignal: Send + Sync {
    /// Assert readiness and wake waiters
    fn trigger(&self);
}

/// Signal for synchronizers used without an executor.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSignal;

impl ReadinessSignal for NoopSignal {
    fn trigger(&self) {}
}

impl<S: ReadinessSignal + ?Sized> ReadinessSignal for Arc<S> {
    fn trigger(&self) {
        (**self).trigger()
    }
}
