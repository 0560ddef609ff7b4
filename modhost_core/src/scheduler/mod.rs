//! Cooperative scheduling.
//!
//! The runtime never owns threads. It borrows the host's tick through a
//! [`Scheduler`]: per-tick subscriptions plus one-shot delayed tasks. Long
//! batches are cut into slices with [`SlicedBatch`] and resumed through
//! [`Scheduler::invoke_after`].

mod manual;
mod slicer;
mod tokio_driver;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub use manual::ManualScheduler;
pub use slicer::{drive_sliced, SliceOutcome, SlicePolicy, SliceReport, SlicedBatch};
pub use tokio_driver::TokioScheduler;

/// Callback run on every host tick while subscribed.
pub type TickCallback = Arc<dyn Fn() + Send + Sync>;

/// One-shot deferred work.
pub type Task = Box<dyn FnOnce() + Send>;

/// Handle returned by [`Scheduler::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub(crate) u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Host scheduling capability.
///
/// Implementations must not hold internal locks while running callbacks, so
/// a callback may freely subscribe, unsubscribe or schedule more work.
pub trait Scheduler: Send + Sync {
    /// Run `callback` on every tick until unsubscribed.
    fn subscribe(&self, callback: TickCallback) -> SubscriptionId;

    /// Stop a subscription. Returns `false` if the id was unknown.
    fn unsubscribe(&self, id: SubscriptionId) -> bool;

    /// Run `task` once, no earlier than `delay` from now.
    fn invoke_after(&self, delay: Duration, task: Task);
}
