//! Scheduler backed by a single tokio task.
//!
//! All subscribers and delayed tasks run on one driver task, one at a time,
//! which preserves the runtime's no-overlap guarantee even on a multi-threaded
//! tokio runtime.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};

use super::{Scheduler, SubscriptionId, Task, TickCallback};
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
    stopped: bool,
}

/// Real-time scheduler ticking at a fixed interval.
pub struct TokioScheduler {
    tick_interval: Duration,
    state: Mutex<State>,
    wake: Notify,
}

impl TokioScheduler {
    /// Create the scheduler and spawn its driver on the current tokio runtime.
    pub fn spawn(tick_interval: Duration) -> (Arc<Self>, JoinHandle<()>) {
        let scheduler = Arc::new(Self {
            tick_interval,
            state: Mutex::new(State::default()),
            wake: Notify::new(),
        });
        let handle = tokio::spawn(scheduler.clone().run());
        (scheduler, handle)
    }

    /// Stop the driver. Pending tasks are dropped without running.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        state.stopped = true;
        state.timers.clear();
        state.subscribers.clear();
        drop(state);
        self.wake.notify_one();
    }

    async fn run(self: Arc<Self>) {
        info!(tick_ms = self.tick_interval.as_millis() as u64, "Scheduler driver started");

        let mut ticker = time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let next_deadline = {
                let state = self.state.lock();
                if state.stopped {
                    break;
                }
                state.timers.iter().map(|timer| timer.deadline).min()
            };

            let timer_due = async {
                match next_deadline {
                    Some(deadline) => time::sleep_until(time::Instant::from_std(deadline)).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = ticker.tick() => self.run_tick(),
                _ = timer_due => self.run_due_tasks(),
                _ = self.wake.notified() => {}
            }
        }

        info!("Scheduler driver stopped");
    }

    fn run_tick(&self) {
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

    fn run_due_tasks(&self) {
        loop {
            let due = {
                let mut state = self.state.lock();
                if state.stopped {
                    return;
                }
                let now = Instant::now();
                let index = state
                    .timers
                    .iter()
                    .enumerate()
                    .filter(|(_, timer)| timer.deadline <= now)
                    .min_by_key(|(_, timer)| (timer.deadline, timer.seq))
                    .map(|(index, _)| index);
                index.map(|index| state.timers.swap_remove(index))
            };

            match due {
                Some(timer) => {
                    debug!(seq = timer.seq, "Running delayed task");
                    guard::swallow("scheduler task", timer.task);
                }
                None => return,
            }
        }
    }
}

impl Scheduler for TokioScheduler {
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
        let mut state = self.state.lock();
        if state.stopped {
            return;
        }
        state.next_seq += 1;
        let seq = state.next_seq;
        state.timers.push(Timer {
            deadline: Instant::now() + delay,
            seq,
            task,
        });
        drop(state);
        // The driver may be sleeping towards a later deadline.
        self.wake.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_delayed_task_runs() {
        let (scheduler, handle) = TokioScheduler::spawn(Duration::from_millis(5));
        let (tx, rx) = oneshot::channel();

        let started = Instant::now();
        scheduler.invoke_after(
            Duration::from_millis(30),
            Box::new(move || {
                let _ = tx.send(Instant::now());
            }),
        );

        let ran_at = time::timeout(Duration::from_secs(2), rx).await.unwrap().unwrap();
        assert!(ran_at - started >= Duration::from_millis(30));

        scheduler.stop();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_subscribers_tick_until_unsubscribed() {
        let (scheduler, handle) = TokioScheduler::spawn(Duration::from_millis(2));
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = hits.clone();
        let id = scheduler.subscribe(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        time::sleep(Duration::from_millis(40)).await;
        assert!(scheduler.unsubscribe(id));
        let seen = hits.load(Ordering::SeqCst);
        assert!(seen > 0);

        time::sleep(Duration::from_millis(20)).await;
        assert_eq!(hits.load(Ordering::SeqCst), seen);

        scheduler.stop();
        handle.await.unwrap();
    }
}
