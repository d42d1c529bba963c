//! Timer scheduler (C6): produces periodic and one-shot `Timer` events onto
//! the event bus. One task per active timer id, each watching its own
//! `CancellationToken` so `cancel`/`shutdown` are prompt per §5.

use crate::events::{ControlEvent, EventBusSender, TimerId};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct TimerTask {
    handle: JoinHandle<()>,
    token: CancellationToken,
}

/// Not `Send + Sync` across an `Arc` boundary by accident: the task table is
/// guarded by a single mutex, and every public method only ever holds that
/// lock long enough to spawn or cancel a task, never while awaiting one —
/// so `cancel` is safe to call from within a timer's own publication path.
pub struct Scheduler {
    events: EventBusSender,
    tasks: Mutex<HashMap<TimerId, TimerTask>>,
}

impl Scheduler {
    pub fn new(events: EventBusSender) -> Self {
        Self { events, tasks: Mutex::new(HashMap::new()) }
    }

    /// Starts a periodic timer, cancelling any existing timer with the same
    /// id first. Drift is not corrected: each tick sleeps for `interval`
    /// before publishing, per §4.5.
    pub fn start_interval(&self, timer_id: TimerId, interval: Duration) {
        self.replace(timer_id, move |events, token| async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        events.publish(ControlEvent::Timer(timer_id));
                    }
                }
            }
        });
    }

    /// Starts a one-shot timer that fires at most once then exits.
    pub fn schedule_once(&self, timer_id: TimerId, delay: Duration) {
        self.replace(timer_id, move |events, token| async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    events.publish(ControlEvent::Timer(timer_id));
                }
            }
        });
    }

    fn replace<F, Fut>(&self, timer_id: TimerId, task: F)
    where
        F: FnOnce(EventBusSender, CancellationToken) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock().unwrap();
        if let Some(existing) = tasks.remove(&timer_id) {
            existing.token.cancel();
        }
        let token = CancellationToken::new();
        let events = self.events.clone();
        let child = token.clone();
        let handle = tokio::spawn(task(events, child));
        tasks.insert(timer_id, TimerTask { handle, token });
    }

    /// Cancels an existing timer, if any. A no-op if the id has no task.
    pub fn cancel(&self, timer_id: TimerId) {
        let mut tasks = self.tasks.lock().unwrap();
        if let Some(existing) = tasks.remove(&timer_id) {
            existing.token.cancel();
        }
    }

    /// Stops every active timer. Does not join the underlying tasks; they
    /// observe cancellation within at most one interval, per §5.
    pub fn shutdown(&self) {
        let mut tasks = self.tasks.lock().unwrap();
        for (_, task) in tasks.drain() {
            task.token.cancel();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
