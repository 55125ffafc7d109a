use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use futures::future::BoxFuture;
use tokio::task::JoinHandle;

pub type TimerTask = BoxFuture<'static, ()>;

/// Cancel token for one scheduled callback. Cancelling twice, or after the callback
/// already ran, does nothing.
pub trait TimerHandle: Send + Sync {
    fn cancel(&self);
}

/// Runs a task once after a delay.
pub trait Scheduler: Send + Sync {
    fn schedule(&self, delay: Duration, task: TimerTask) -> Box<dyn TimerHandle>;
}

/// Real timers on the tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

struct TokioTimer(JoinHandle<()>);

impl TimerHandle for TokioTimer {
    fn cancel(&self) {
        self.0.abort();
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: TimerTask) -> Box<dyn TimerHandle> {
        Box::new(TokioTimer(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        })))
    }
}

struct ManualEntry {
    due: Duration,
    seq: u64,
    task: TimerTask,
    cancelled: Arc<AtomicBool>,
}

#[derive(Default)]
struct ManualClock {
    now: Duration,
    next_seq: u64,
    entries: Vec<ManualEntry>,
}

struct ManualTimer(Arc<AtomicBool>);

impl TimerHandle for ManualTimer {
    fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Virtual clock: nothing fires until [`ManualScheduler::advance`] moves time forward.
#[derive(Default)]
pub struct ManualScheduler {
    clock: Mutex<ManualClock>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> Duration {
        self.lock().now
    }

    /// Scheduled, not yet fired and not cancelled.
    pub fn pending(&self) -> usize {
        self.lock()
            .entries
            .iter()
            .filter(|entry| !entry.cancelled.load(Ordering::SeqCst))
            .count()
    }

    /// Delay until the earliest live timer fires, if any.
    pub fn next_due_in(&self) -> Option<Duration> {
        let clock = self.lock();
        clock
            .entries
            .iter()
            .filter(|entry| !entry.cancelled.load(Ordering::SeqCst))
            .map(|entry| entry.due.saturating_sub(clock.now))
            .min()
    }

    /// Moves the clock forward by `by`, running every live timer that comes due, in
    /// due order. Timers scheduled by a running task fire too if they fall inside the window.
    pub async fn advance(&self, by: Duration) {
        let target = self.lock().now + by;
        loop {
            let task = {
                let mut clock = self.lock();
                clock
                    .entries
                    .retain(|entry| !entry.cancelled.load(Ordering::SeqCst));
                let next = clock
                    .entries
                    .iter()
                    .enumerate()
                    .filter(|(_, entry)| entry.due <= target)
                    .min_by_key(|(_, entry)| (entry.due, entry.seq))
                    .map(|(index, _)| index);
                match next {
                    Some(index) => {
                        let entry = clock.entries.swap_remove(index);
                        clock.now = clock.now.max(entry.due);
                        entry.task
                    }
                    None => {
                        clock.now = target;
                        break;
                    }
                }
            };
            task.await;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualClock> {
        self.clock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: TimerTask) -> Box<dyn TimerHandle> {
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut clock = self.lock();
        let seq = clock.next_seq;
        clock.next_seq += 1;
        let due = clock.now + delay;
        clock.entries.push(ManualEntry {
            due,
            seq,
            task,
            cancelled: cancelled.clone(),
        });
        Box::new(ManualTimer(cancelled))
    }
}

#[cfg(test)]
#[path = "tests/scheduler_tests.rs"]
mod tests;
