//! Real-time scheduler on a tokio runtime

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gratia_core::{GratiaError, GratiaResult, Timestamp};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::{Scheduler, TimerId, TimerIds, TimerTask};

struct ArmedTask {
    cancelled: Arc<AtomicBool>,
    abort: AbortHandle,
}

/// Scheduler backed by tokio timers; `now` reads the wall clock
pub struct TokioScheduler {
    handle: Handle,
    ids: TimerIds,
    timers: Arc<Mutex<HashMap<TimerId, ArmedTask>>>,
}

impl TokioScheduler {
    /// Bind to the runtime of the calling context
    pub fn try_current() -> GratiaResult<Self> {
        let handle = Handle::try_current()
            .map_err(|e| GratiaError::InvalidConfig(format!("no tokio runtime: {e}")))?;
        Ok(Self::with_handle(handle))
    }

    pub fn with_handle(handle: Handle) -> Self {
        TokioScheduler {
            handle,
            ids: TimerIds::default(),
            timers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of armed timers
    pub fn pending(&self) -> usize {
        self.timers.lock().len()
    }

    fn register(&self, id: TimerId, cancelled: Arc<AtomicBool>, abort: AbortHandle) {
        // The task may already have finished and tried to deregister itself
        if cancelled.load(Ordering::Acquire) || abort.is_finished() {
            return;
        }
        self.timers.lock().insert(id, ArmedTask { cancelled, abort });
    }
}

impl Scheduler for TokioScheduler {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }

    fn arm_once(&self, delay: Duration, mut task: TimerTask) -> TimerId {
        let id = self.ids.next();
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let timers = Arc::clone(&self.timers);

        let join = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if flag.load(Ordering::Acquire) {
                return;
            }
            timers.lock().remove(&id);
            task();
        });

        self.register(id, cancelled, join.abort_handle());
        id
    }

    fn arm_repeating(&self, interval: Duration, mut task: TimerTask) -> TimerId {
        let id = self.ids.next();
        let interval = interval.max(Duration::from_millis(1));
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);

        let join = self.handle.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if flag.load(Ordering::Acquire) {
                    break;
                }
                task();
            }
        });

        self.register(id, cancelled, join.abort_handle());
        id
    }

    fn cancel(&self, id: TimerId) {
        if let Some(armed) = self.timers.lock().remove(&id) {
            armed.cancelled.store(true, Ordering::Release);
            armed.abort.abort();
            tracing::trace!(?id, "timer cancelled");
        }
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        for (_, armed) in self.timers.lock().drain() {
            armed.cancelled.store(true, Ordering::Release);
            armed.abort.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, TimerTask) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        (
            count,
            Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_once_fires_after_delay() {
        let sched = TokioScheduler::try_current().unwrap();
        let (count, task) = counter();
        sched.arm_once(Duration::from_millis(450), task);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(sched.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeating_and_cancel() {
        let sched = TokioScheduler::try_current().unwrap();
        let (count, task) = counter();
        let id = sched.arm_repeating(Duration::from_millis(100), task);

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        sched.cancel(id);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_deadline() {
        let sched = TokioScheduler::try_current().unwrap();
        let (count, task) = counter();
        let id = sched.arm_once(Duration::from_millis(50), task);
        sched.cancel(id);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_requires_runtime() {
        assert!(TokioScheduler::try_current().is_err());
    }
}
