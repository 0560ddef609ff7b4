//! Time-sliced batch processing.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::Scheduler;
use crate::clock::Clock;

/// How much work a slice may do and how long to wait before the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlicePolicy {
    /// Accumulated work after which the batch yields.
    pub threshold: Duration,
    /// Delay before the next slice starts.
    pub pause: Duration,
}

impl SlicePolicy {
    pub fn new(threshold: Duration, pause: Duration) -> Self {
        Self { threshold, pause }
    }
}

impl Default for SlicePolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(2), Duration::from_millis(500))
    }
}

/// Result of running one slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceOutcome {
    /// Every item was processed.
    Finished,
    /// The threshold was crossed with items remaining.
    Suspended,
    /// The step asked to stop.
    Stopped,
}

/// Summary handed to the completion callback of [`drive_sliced`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceReport {
    pub outcome: SliceOutcome,
    pub slices: u32,
    pub processed: usize,
}

/// A snapshot of items processed in order across several slices.
///
/// The items are owned by the batch, so appends to whatever collection they
/// came from never invalidate a suspended iteration.
pub struct SlicedBatch<T> {
    items: Vec<T>,
    cursor: usize,
    slices: u32,
    policy: SlicePolicy,
    clock: Arc<dyn Clock>,
}

impl<T> SlicedBatch<T> {
    pub fn new(items: Vec<T>, policy: SlicePolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            items,
            cursor: 0,
            slices: 0,
            policy,
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Items not yet processed.
    pub fn remaining(&self) -> usize {
        self.items.len() - self.cursor
    }

    pub fn policy(&self) -> SlicePolicy {
        self.policy
    }

    /// Process items until the batch ends or the slice budget is spent.
    pub fn run_slice<F>(&mut self, mut step: F) -> SliceOutcome
    where
        F: FnMut(&T) -> ControlFlow<()>,
    {
        self.slices += 1;
        let mut spent = Duration::ZERO;

        while self.cursor < self.items.len() {
            let started = self.clock.now();
            let flow = step(&self.items[self.cursor]);
            self.cursor += 1;
            spent += self.clock.now().saturating_duration_since(started);

            if flow.is_break() {
                return SliceOutcome::Stopped;
            }
            if spent > self.policy.threshold && self.cursor < self.items.len() {
                debug!(
                    slice = self.slices,
                    spent_ms = spent.as_millis() as u64,
                    remaining = self.remaining(),
                    "Slice budget exceeded, yielding"
                );
                return SliceOutcome::Suspended;
            }
        }

        SliceOutcome::Finished
    }

    fn report(&self, outcome: SliceOutcome) -> SliceReport {
        SliceReport {
            outcome,
            slices: self.slices,
            processed: self.cursor,
        }
    }
}

/// Run `batch` to completion, yielding to the host between slices.
///
/// The first slice runs immediately on the caller's stack; each following
/// slice is scheduled `policy.pause` after the previous one suspended.
/// `done` runs once, after the last slice or after the step stopped the batch.
pub fn drive_sliced<T, S, D>(
    scheduler: Arc<dyn Scheduler>,
    mut batch: SlicedBatch<T>,
    mut step: S,
    done: D,
) where
    T: Send + 'static,
    S: FnMut(&T) -> ControlFlow<()> + Send + 'static,
    D: FnOnce(SliceReport) + Send + 'static,
{
    match batch.run_slice(&mut step) {
        SliceOutcome::Suspended => {
            let pause = batch.policy.pause;
            let next = scheduler.clone();
            scheduler.invoke_after(
                pause,
                Box::new(move || drive_sliced(next, batch, step, done)),
            );
        }
        outcome => done(batch.report(outcome)),
    }
}
