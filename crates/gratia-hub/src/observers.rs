//! Stock observers

use std::sync::Arc;
use std::time::Duration;

use gratia_core::{KernelEvent, PeerId, PresenceSnapshot, Timestamp};
use gratia_time::{Scheduler, TimerId};
use parking_lot::Mutex;

use crate::{PresenceHub, PresenceObserver, WeakPresenceHub};

/// Logs hub lifecycle, a periodic summary and every whisper
#[derive(Debug)]
pub struct TracingObserver {
    summary_every: Duration,
    last_summary: Mutex<Option<Timestamp>>,
}

impl TracingObserver {
    pub fn new(summary_every: Duration) -> Self {
        TracingObserver {
            summary_every,
            last_summary: Mutex::new(None),
        }
    }

    /// Time of the last periodic summary
    pub fn last_summary(&self) -> Option<Timestamp> {
        *self.last_summary.lock()
    }
}

impl Default for TracingObserver {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl PresenceObserver for TracingObserver {
    fn init(&self, hub: &PresenceHub) {
        let snapshot = hub.snapshot();
        tracing::info!(
            phase = %snapshot.phase,
            mood = %snapshot.mood,
            peers = snapshot.peer_count,
            "presence online"
        );
    }

    fn on_tick(&self, snapshot: &PresenceSnapshot) {
        let mut last = self.last_summary.lock();
        let due = match *last {
            None => true,
            Some(at) => snapshot.t.millis_since(at) >= self.summary_every.as_millis() as i64,
        };
        if !due {
            return;
        }
        *last = Some(snapshot.t);
        drop(last);
        tracing::debug!(
            phase = %snapshot.phase,
            mood = %snapshot.mood,
            peers = snapshot.peer_count,
            "presence"
        );
    }

    fn on_event(&self, event: &KernelEvent) {
        if let KernelEvent::Whisper { message, .. } = event {
            tracing::info!(%message, "whisper");
        }
    }

    fn dispose(&self) {
        tracing::info!("presence offline");
    }
}

struct PingState {
    hub: Option<WeakPresenceHub>,
    scheduler: Option<Arc<dyn Scheduler>>,
    timer: Option<TimerId>,
}

/// Keeps one peer alive in the hub's liveness map while the hub runs
///
/// Upserts the peer on init and every `interval` after, and drops it on
/// dispose.
pub struct PresencePing {
    peer: PeerId,
    interval: Duration,
    state: Mutex<PingState>,
}

impl PresencePing {
    pub fn new(peer: impl Into<PeerId>) -> Self {
        Self::with_interval(peer, Duration::from_secs(5))
    }

    pub fn with_interval(peer: impl Into<PeerId>, interval: Duration) -> Self {
        PresencePing {
            peer: peer.into(),
            interval,
            state: Mutex::new(PingState {
                hub: None,
                scheduler: None,
                timer: None,
            }),
        }
    }

    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    pub fn is_armed(&self) -> bool {
        self.state.lock().timer.is_some()
    }
}

impl PresenceObserver for PresencePing {
    fn init(&self, hub: &PresenceHub) {
        let scheduler = hub.scheduler();
        let weak = hub.downgrade();
        let peer = self.peer.clone();
        let timer = scheduler.arm_repeating(
            self.interval,
            Box::new(move || {
                if let Some(hub) = weak.upgrade() {
                    hub.upsert_peer(peer.clone());
                }
            }),
        );

        let previous = {
            let mut state = self.state.lock();
            state.hub = Some(hub.downgrade());
            state.scheduler = Some(Arc::clone(&scheduler));
            state.timer.replace(timer)
        };
        if let Some(previous) = previous {
            scheduler.cancel(previous);
        }
        hub.upsert_peer(self.peer.clone());
    }

    fn dispose(&self) {
        let (hub, scheduler, timer) = {
            let mut state = self.state.lock();
            (state.hub.take(), state.scheduler.take(), state.timer.take())
        };
        if let (Some(scheduler), Some(timer)) = (scheduler, timer) {
            scheduler.cancel(timer);
        }
        if let Some(hub) = hub.and_then(|h| h.upgrade()) {
            hub.drop_peer(self.peer.clone());
        }
    }
}
