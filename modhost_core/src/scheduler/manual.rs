//! Deterministic, host-driven scheduler.
//!
//! Nothing happens until the owner calls [`ManualScheduler::tick`] or
//! [`ManualScheduler::advance`]. A game-style host calls both once per frame;
//! tests use it to step time-sliced batches without real delays.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::trace;

use super::{Scheduler, SubscriptionId, Task, TickCallback};
use crate::clock::{Clock, ManualClock};
use crate::guard;

struct Timer {
    deadline: Instant,
    seq: u64,
    task: Task,
}

#[derive(Default)]
struct State {
    next_id: u64,
    next_seq: u64,
    subscribers: Vec<(SubscriptionId, TickCallback)>,
    timers: Vec<Timer>,
}

/// Scheduler advanced explicitly by its owner.
pub struct ManualScheduler {
    clock: Arc<ManualClock>,
    state: Mutex<State>,
}

impl ManualScheduler {
    /// Create a scheduler with its own frozen clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(ManualClock::new()))
    }

    /// Create a scheduler sharing an existing clock.
    pub fn with_clock(clock: Arc<ManualClock>) -> Self {
        Self {
            clock,
            state: Mutex::new(State::default()),
        }
    }

    /// The clock this scheduler moves.
    pub fn clock(&self) -> Arc<ManualClock> {
        self.clock.clone()
    }

    /// Run every subscriber once.
    pub fn tick(&self) {
        let subscribers: Vec<TickCallback> = self
            .state
            .lock()
            .subscribers
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();

        for callback in subscribers {
            guard::swallow("scheduler tick", || callback());
        }
    }

    /// Move time forward by `by`, running every task that falls due.
    ///
    /// Tasks run in deadline order (FIFO for equal deadlines). Tasks scheduled
    /// by a running task are picked up in the same call if they fall due
    /// before the target instant. Work inside a task may push the clock past
    /// the target; the clock never moves backwards.
    pub fn advance(&self, by: Duration) {
        let target = self.clock.now() + by;

        while let Some(timer) = self.pop_due(target) {
            let now = self.clock.now();
            if timer.deadline > now {
                self.clock.advance(timer.deadline - now);
            }
            trace!(seq = timer.seq, "Running delayed task");
            guard::swallow("scheduler task", timer.task);
        }

        let now = self.clock.now();
        if target > now {
            self.clock.advance(target - now);
        }
    }

    /// Run tasks already due without moving time.
    pub fn run_due(&self) {
        self.advance(Duration::ZERO);
    }

    /// Simulate `frames` host frames of `frame` length: tick, then advance.
    pub fn run_frames(&self, frames: usize, frame: Duration) {
        for _ in 0..frames {
            self.tick();
            self.advance(frame);
        }
    }

    pub fn pending_tasks(&self) -> usize {
        self.state.lock().timers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    fn pop_due(&self, target: Instant) -> Option<Timer> {
        let mut state = self.state.lock();
        let index = state
            .timers
            .iter()
            .enumerate()
            .filter(|(_, timer)| timer.deadline <= target)
            .min_by_key(|(_, timer)| (timer.deadline, timer.seq))
            .map(|(index, _)| index)?;
        Some(state.timers.swap_remove(index))
    }
}

impl Default for ManualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for ManualScheduler {
    fn subscribe(&self, callback: TickCallback) -> SubscriptionId {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = SubscriptionId(state.next_id);
        state.subscribers.push((id, callback));
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut state = self.state.lock();
        let before = state.subscribers.len();
        state.subscribers.retain(|(existing, _)| *existing != id);
        state.subscribers.len() != before
    }

    fn invoke_after(&self, delay: Duration, task: Task) {
        let deadline = self.clock.now() + delay;
        let mut state = self.state.lock();
        state.next_seq += 1;
        let seq = state.next_seq;
        state.timers.push(Timer {
            deadline,
            seq,
            task,
        });
    }
}
