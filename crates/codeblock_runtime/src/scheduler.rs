//! Tick Scheduler
//!
//! Repeating behavior in the engine is never a sleeping thread. Work is handed
//! to a [`TickScheduler`], which the host drives once per simulation tick.
//! [`TickQueue`] is the in-process implementation used by the binary and tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::error;

use crate::executor::panic_message;

/// Handle of a scheduled task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Returned by repeating tasks after each run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskControl {
    Continue,
    Stop,
}

/// One-shot task body
pub type OnceTask = Box<dyn FnOnce() + Send>;

/// Repeating task body
pub type RepeatingTask = Box<dyn FnMut() -> TaskControl + Send>;

// ─────────────────────────────────────────────────────────────────────────────
// Scheduler Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Tick-based task scheduling provided by the host
///
/// Tasks run on the simulation thread. A delay of 0 means the next tick.
pub trait TickScheduler: Send + Sync {
    /// The tick currently being processed
    fn current_tick(&self) -> u64;

    /// Run `task` once after `delay_ticks`
    fn schedule_once(&self, delay_ticks: u64, task: OnceTask) -> TaskId;

    /// Run `task` after `delay_ticks`, then every `period_ticks` until it
    /// returns [`TaskControl::Stop`] or is cancelled
    fn schedule_repeating(
        &self,
        delay_ticks: u64,
        period_ticks: u64,
        task: RepeatingTask,
    ) -> TaskId;

    /// Cancel a task. Returns false if it was not pending.
    fn cancel(&self, id: TaskId) -> bool;
}

// ─────────────────────────────────────────────────────────────────────────────
// Tick Queue
// ─────────────────────────────────────────────────────────────────────────────

enum TaskBody {
    Once(OnceTask),
    Repeating { period: u64, task: RepeatingTask },
}

struct Entry {
    id: TaskId,
    body: TaskBody,
}

/// Queue key: due tick, then insertion order
type Slot = (u64, u64);

#[derive(Default)]
struct QueueState {
    queue: BTreeMap<Slot, Entry>,
    slots: HashMap<TaskId, Slot>,
    running: HashSet<TaskId>,
    cancelled: HashSet<TaskId>,
    next_seq: u64,
}

impl QueueState {
    fn push(&mut self, due: u64, entry: Entry) {
        let slot = (due, self.next_seq);
        self.next_seq += 1;
        self.slots.insert(entry.id, slot);
        self.queue.insert(slot, entry);
    }
}

/// In-process [`TickScheduler`] advanced by [`TickQueue::tick`]
///
/// The queue lock is released while a task runs, so tasks may schedule and
/// cancel other tasks (or themselves).
#[derive(Default)]
pub struct TickQueue {
    tick: AtomicU64,
    next_id: AtomicU64,
    state: Mutex<QueueState>,
}

impl TickQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks waiting to run
    pub fn pending(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_scheduled(&self, id: TaskId) -> bool {
        self.state.lock().slots.contains_key(&id)
    }

    /// Advance one tick and run every task that is due. Returns how many ran.
    ///
    /// A task that panics is dropped; the rest of the tick still runs.
    pub fn tick(&self) -> usize {
        let now = self.tick.fetch_add(1, Ordering::SeqCst) + 1;
        let mut ran = 0;

        loop {
            let entry = {
                let mut state = self.state.lock();
                match state.queue.first_key_value() {
                    Some((&(due, _), _)) if due <= now => {}
                    _ => break,
                }
                let Some((_, entry)) = state.queue.pop_first() else {
                    break;
                };
                state.slots.remove(&entry.id);
                state.running.insert(entry.id);
                entry
            };

            ran += 1;
            let id = entry.id;
            match entry.body {
                TaskBody::Once(task) => {
                    if let Err(payload) = catch_unwind(AssertUnwindSafe(task)) {
                        report_panic(id, now, payload.as_ref());
                    }
                    let mut state = self.state.lock();
                    state.running.remove(&id);
                    state.cancelled.remove(&id);
                }
                TaskBody::Repeating { period, mut task } => {
                    let control = match catch_unwind(AssertUnwindSafe(&mut task)) {
                        Ok(control) => control,
                        Err(payload) => {
                            report_panic(id, now, payload.as_ref());
                            TaskControl::Stop
                        }
                    };
                    let mut state = self.state.lock();
                    state.running.remove(&id);
                    let cancelled = state.cancelled.remove(&id);
                    if control == TaskControl::Continue && !cancelled {
                        state.push(
                            now + period.max(1),
                            Entry {
                                id,
                                body: TaskBody::Repeating { period, task },
                            },
                        );
                    }
                }
            }
        }

        ran
    }

    /// Run `ticks` ticks back to back
    pub fn advance(&self, ticks: u64) -> usize {
        (0..ticks).map(|_| self.tick()).sum()
    }

    fn allocate(&self) -> TaskId {
        TaskId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn due(&self, delay_ticks: u64) -> u64 {
        self.current_tick() + delay_ticks.max(1)
    }
}

impl TickScheduler for TickQueue {
    fn current_tick(&self) -> u64 {
        self.tick.load(Ordering::SeqCst)
    }

    fn schedule_once(&self, delay_ticks: u64, task: OnceTask) -> TaskId {
        let id = self.allocate();
        let due = self.due(delay_ticks);
        self.state.lock().push(
            due,
            Entry {
                id,
                body: TaskBody::Once(task),
            },
        );
        id
    }

    fn schedule_repeating(
        &self,
        delay_ticks: u64,
        period_ticks: u64,
        task: RepeatingTask,
    ) -> TaskId {
        let id = self.allocate();
        let due = self.due(delay_ticks);
        self.state.lock().push(
            due,
            Entry {
                id,
                body: TaskBody::Repeating {
                    period: period_ticks,
                    task,
                },
            },
        );
        id
    }

    fn cancel(&self, id: TaskId) -> bool {
        let mut state = self.state.lock();
        if let Some(slot) = state.slots.remove(&id) {
            state.queue.remove(&slot);
            return true;
        }
        if state.running.contains(&id) {
            return state.cancelled.insert(id);
        }
        false
    }
}

fn report_panic(id: TaskId, tick: u64, payload: &(dyn std::any::Any + Send)) {
    let message = panic_message(payload);
    error!(task = %id, tick, panic = %message, "Scheduled task panicked");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_delay_zero_runs_next_tick() {
        let queue = TickQueue::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        queue.schedule_once(0, Box::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(queue.tick(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(queue.tick(), 0);
    }

    fn broken_task() {
        panic!("broken task");
    }

    fn broken_loop() -> TaskControl {
        panic!("broken loop");
    }

    #[test]
    fn test_panicking_task_does_not_stop_the_tick() {
        let queue = TickQueue::new();
        let hits = Arc::new(AtomicUsize::new(0));

        queue.schedule_once(0, Box::new(broken_task));
        let h = hits.clone();
        queue.schedule_once(0, Box::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        }));
        let broken = queue.schedule_repeating(0, 1, Box::new(broken_loop));
        let h = hits.clone();
        queue.schedule_repeating(0, 1, Box::new(move || {
            h.fetch_add(10, Ordering::SeqCst);
            TaskControl::Continue
        }));

        assert_eq!(queue.tick(), 4);
        assert_eq!(hits.load(Ordering::SeqCst), 11);

        // The panicked loop is gone, the healthy one keeps going
        assert!(!queue.is_scheduled(broken));
        assert_eq!(queue.pending(), 1);
        assert_eq!(queue.tick(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 21);
    }

    #[test]
    fn test_repeating_period() {
        let queue = TickQueue::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        queue.schedule_repeating(1, 2, Box::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
            TaskControl::Continue
        }));

        // ticks 1, 3, 5
        queue.advance(5);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_repeating_stops_itself() {
        let queue = TickQueue::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        queue.schedule_repeating(1, 1, Box::new(move || {
            if h.fetch_add(1, Ordering::SeqCst) + 1 >= 2 {
                TaskControl::Stop
            } else {
                TaskControl::Continue
            }
        }));

        queue.advance(10);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn test_cancel_pending_task() {
        let queue = TickQueue::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let id = queue.schedule_repeating(1, 1, Box::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
            TaskControl::Continue
        }));

        queue.tick();
        assert!(queue.cancel(id));
        assert!(!queue.cancel(id));
        queue.advance(5);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_task_can_cancel_itself() {
        let queue = Arc::new(TickQueue::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let own_id = Arc::new(Mutex::new(None::<TaskId>));

        let q = queue.clone();
        let h = hits.clone();
        let slot = own_id.clone();
        let id = queue.schedule_repeating(1, 1, Box::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
            if let Some(id) = *slot.lock() {
                q.cancel(id);
            }
            TaskControl::Continue
        }));
        *own_id.lock() = Some(id);

        queue.advance(4);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!queue.is_scheduled(id));
    }
}
