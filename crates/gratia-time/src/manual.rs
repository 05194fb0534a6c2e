//! Virtual-time scheduler
//!
//! Time only moves when `advance` is called. Due timers fire in deadline
//! order (ties in arming order), and the clock reads the deadline of the
//! timer being fired, so tasks observe exactly the time they were due.

use std::collections::HashMap;
use std::time::Duration;

use gratia_core::Timestamp;
use parking_lot::Mutex;

use crate::{Scheduler, TimerId, TimerIds, TimerTask};

struct ArmedTimer {
    due: Timestamp,
    seq: u64,
    interval: Option<Duration>,
    /// `None` while the task is running
    task: Option<TimerTask>,
}

struct ManualState {
    now: Timestamp,
    seq: u64,
    timers: HashMap<TimerId, ArmedTimer>,
}

/// Scheduler driven by explicit calls to `advance`
pub struct ManualScheduler {
    ids: TimerIds,
    state: Mutex<ManualState>,
}

impl ManualScheduler {
    /// Create a scheduler whose clock starts at zero
    pub fn new() -> Self {
        Self::starting_at(Timestamp::ZERO)
    }

    /// Create a scheduler whose clock starts at `start`
    pub fn starting_at(start: Timestamp) -> Self {
        ManualScheduler {
            ids: TimerIds::default(),
            state: Mutex::new(ManualState {
                now: start,
                seq: 0,
                timers: HashMap::new(),
            }),
        }
    }

    /// Move the clock forward by `dt`, firing every timer that falls due
    pub fn advance(&self, dt: Duration) {
        let target = self.state.lock().now.saturating_add(dt);
        self.advance_to(target);
    }

    /// Move the clock forward to `target`, firing every timer due by then
    pub fn advance_to(&self, target: Timestamp) {
        loop {
            let (id, mut task) = {
                let mut state = self.state.lock();
                let next = state
                    .timers
                    .iter()
                    .filter(|(_, t)| t.task.is_some() && t.due <= target)
                    .min_by_key(|(_, t)| (t.due, t.seq))
                    .map(|(id, t)| (*id, t.due));

                let Some((id, due)) = next else {
                    break;
                };

                if due > state.now {
                    state.now = due;
                }
                let repeating = state.timers.get(&id).and_then(|t| t.interval).is_some();
                let task = if repeating {
                    state.timers.get_mut(&id).and_then(|t| t.task.take())
                } else {
                    state.timers.remove(&id).and_then(|t| t.task)
                };
                match task {
                    Some(task) => (id, task),
                    None => continue,
                }
            };

            task();

            let mut state = self.state.lock();
            let seq = state.seq;
            if let Some(timer) = state.timers.get_mut(&id) {
                if let Some(interval) = timer.interval {
                    timer.due = timer.due.saturating_add(interval);
                    timer.seq = seq;
                    timer.task = Some(task);
                    state.seq += 1;
                }
            }
        }

        let mut state = self.state.lock();
        if target > state.now {
            state.now = target;
        }
    }

    /// Number of armed timers
    pub fn pending(&self) -> usize {
        self.state.lock().timers.len()
    }

    fn arm(&self, delay: Duration, interval: Option<Duration>, task: TimerTask) -> TimerId {
        let id = self.ids.next();
        let mut state = self.state.lock();
        let due = state.now.saturating_add(delay);
        let seq = state.seq;
        state.seq += 1;
        state.timers.insert(
            id,
            ArmedTimer {
                due,
                seq,
                interval,
                task: Some(task),
            },
        );
        id
    }
}

impl Default for ManualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for ManualScheduler {
    fn now(&self) -> Timestamp {
        self.state.lock().now
    }

    fn arm_once(&self, delay: Duration, task: TimerTask) -> TimerId {
        self.arm(delay, None, task)
    }

    fn arm_repeating(&self, interval: Duration, task: TimerTask) -> TimerId {
        // A zero interval would fire forever within one advance
        let interval = interval.max(Duration::from_millis(1));
        self.arm(interval, Some(interval), task)
    }

    fn cancel(&self, id: TimerId) {
        self.state.lock().timers.remove(&id);
    }
}
