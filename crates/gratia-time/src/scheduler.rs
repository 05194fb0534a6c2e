//! Scheduler port

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use gratia_core::Timestamp;

/// Timer identity, unique per scheduler
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

impl fmt::Debug for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timer({})", self.0)
    }
}

/// Work run when a timer fires
pub type TimerTask = Box<dyn FnMut() + Send + 'static>;

/// Abstract timer capability
///
/// Implementations never invoke a task while holding their own locks, so a
/// task may arm or cancel timers. `cancel` is synchronous: once it returns,
/// the cancelled task will not start again.
pub trait Scheduler: Send + Sync {
    /// Current time as seen by this scheduler
    fn now(&self) -> Timestamp;

    /// Run `task` once after `delay`
    fn arm_once(&self, delay: Duration, task: TimerTask) -> TimerId;

    /// Run `task` every `interval`, first firing one interval from now
    fn arm_repeating(&self, interval: Duration, task: TimerTask) -> TimerId;

    /// Disarm a timer; unknown or already-fired ids are ignored
    fn cancel(&self, id: TimerId);
}

/// Monotonic timer id source
#[derive(Debug, Default)]
pub(crate) struct TimerIds(AtomicU64);

impl TimerIds {
    pub(crate) fn next(&self) -> TimerId {
        TimerId(self.0.fetch_add(1, Ordering::Relaxed) + 1)
    }
}
