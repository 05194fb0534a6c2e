//! Presence hub - state, tick clock and event publication

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use gratia_core::{
    GratiaResult, KernelEvent, ListenerSet, Mood, PeerId, Phase, PresenceSnapshot, Subscription,
    Timestamp,
};
use gratia_time::{Scheduler, TimerId};
use parking_lot::{Mutex, ReentrantMutex};

use crate::PresenceObserver;

/// Hub configuration
#[derive(Clone, Debug)]
pub struct HubConfig {
    /// Tick interval
    pub tick_interval: Duration,
    /// Liveness window used by snapshots and `active_peer_count`
    pub peer_stale_after: Duration,
    pub initial_phase: Phase,
    pub initial_mood: Mood,
}

impl Default for HubConfig {
    fn default() -> Self {
        HubConfig {
            tick_interval: Duration::from_millis(1000),
            peer_stale_after: Duration::from_millis(15_000),
            initial_phase: Phase::default(),
            initial_mood: Mood::default(),
        }
    }
}

impl HubConfig {
    /// Configuration with initial facets given by name
    ///
    /// Unknown names are rejected here, never coerced later.
    pub fn with_initial(phase: &str, mood: &str) -> GratiaResult<Self> {
        Ok(HubConfig {
            initial_phase: phase.parse()?,
            initial_mood: mood.parse()?,
            ..Default::default()
        })
    }

    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }
}

#[derive(Clone, Debug, Default)]
pub struct HubStats {
    pub ticks: u64,
    pub events_published: u64,
    pub peers_evicted: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Lifecycle {
    Idle,
    Running,
    Stopped,
}

struct HubState {
    phase: Phase,
    mood: Mood,
    whisper: String,
    /// Peer id -> last seen
    peers: HashMap<PeerId, Timestamp>,
    lifecycle: Lifecycle,
    tick_timer: Option<TimerId>,
    stats: HubStats,
}

impl HubState {
    fn evict_stale(&mut self, now: Timestamp, window: Duration) -> usize {
        let before = self.peers.len();
        self.peers.retain(|_, seen| !now.is_stale(*seen, window));
        let evicted = before - self.peers.len();
        self.stats.peers_evicted += evicted as u64;
        self.peers.len()
    }

    fn snapshot(&mut self, now: Timestamp, window: Duration) -> PresenceSnapshot {
        let peer_count = self.evict_stale(now, window);
        PresenceSnapshot {
            t: now,
            phase: self.phase,
            mood: self.mood,
            peer_count,
            whisper: (!self.whisper.is_empty()).then(|| self.whisper.clone()),
        }
    }
}

struct HubShared {
    config: HubConfig,
    scheduler: Arc<dyn Scheduler>,
    /// Held from mutation through publication so events leave in mutation
    /// order across threads; reentrant for hooks that mutate the hub
    serial: ReentrantMutex<()>,
    state: Mutex<HubState>,
    observers: Mutex<Vec<Arc<dyn PresenceObserver>>>,
    listeners: ListenerSet<KernelEvent>,
}

/// Presence hub handle
///
/// Cloning yields another handle to the same hub.
#[derive(Clone)]
pub struct PresenceHub {
    shared: Arc<HubShared>,
}

/// Non-owning hub handle, for observers and timers
#[derive(Clone)]
pub struct WeakPresenceHub {
    shared: Weak<HubShared>,
}

impl WeakPresenceHub {
    pub fn upgrade(&self) -> Option<PresenceHub> {
        self.shared.upgrade().map(|shared| PresenceHub { shared })
    }
}

impl PresenceHub {
    /// Create a hub with default configuration
    pub fn new(scheduler: Arc<dyn Scheduler>) -> Self {
        Self::with_config(scheduler, HubConfig::default())
    }

    /// Create a hub with custom configuration
    pub fn with_config(scheduler: Arc<dyn Scheduler>, config: HubConfig) -> Self {
        let state = HubState {
            phase: config.initial_phase,
            mood: config.initial_mood,
            whisper: String::new(),
            peers: HashMap::new(),
            lifecycle: Lifecycle::Idle,
            tick_timer: None,
            stats: HubStats::default(),
        };
        PresenceHub {
            shared: Arc::new(HubShared {
                config,
                scheduler,
                serial: ReentrantMutex::new(()),
                state: Mutex::new(state),
                observers: Mutex::new(Vec::new()),
                listeners: ListenerSet::new(),
            }),
        }
    }

    pub fn downgrade(&self) -> WeakPresenceHub {
        WeakPresenceHub {
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.shared.config
    }

    /// Scheduler driving this hub
    pub fn scheduler(&self) -> Arc<dyn Scheduler> {
        Arc::clone(&self.shared.scheduler)
    }

    pub fn now(&self) -> Timestamp {
        self.shared.scheduler.now()
    }

    pub fn phase(&self) -> Phase {
        self.shared.state.lock().phase
    }

    pub fn mood(&self) -> Mood {
        self.shared.state.lock().mood
    }

    pub fn is_running(&self) -> bool {
        self.shared.state.lock().lifecycle == Lifecycle::Running
    }

    pub fn stats(&self) -> HubStats {
        self.shared.state.lock().stats.clone()
    }

    /// Current snapshot; evicts stale peers as a side effect
    pub fn snapshot(&self) -> PresenceSnapshot {
        let now = self.now();
        self.shared
            .state
            .lock()
            .snapshot(now, self.shared.config.peer_stale_after)
    }

    pub fn set_phase(&self, next: Phase) {
        let _serial = self.shared.serial.lock();
        let event = {
            let mut state = self.shared.state.lock();
            if state.phase == next {
                return;
            }
            state.phase = next;
            KernelEvent::PhaseSet {
                phase: next,
                snapshot: self.snapshot_locked(&mut state),
            }
        };
        self.publish(event);
    }

    pub fn set_mood(&self, next: Mood) {
        let _serial = self.shared.serial.lock();
        let event = {
            let mut state = self.shared.state.lock();
            if state.mood == next {
                return;
            }
            state.mood = next;
            KernelEvent::MoodSet {
                mood: next,
                snapshot: self.snapshot_locked(&mut state),
            }
        };
        self.publish(event);
    }

    /// Set the whisper; publishes even when the text is unchanged
    pub fn whisper(&self, message: impl Into<String>) {
        let message = message.into();
        let _serial = self.shared.serial.lock();
        let event = {
            let mut state = self.shared.state.lock();
            state.whisper = message.clone();
            KernelEvent::Whisper {
                message,
                snapshot: self.snapshot_locked(&mut state),
            }
        };
        self.publish(event);
    }

    /// Mark a peer as seen now
    pub fn upsert_peer(&self, id: impl Into<PeerId>) {
        let _serial = self.shared.serial.lock();
        let id = id.into();
        let event = {
            let mut state = self.shared.state.lock();
            let now = self.now();
            state.peers.insert(id.clone(), now);
            KernelEvent::PeerUp {
                id,
                snapshot: self.snapshot_locked(&mut state),
            }
        };
        self.publish(event);
    }

    pub fn drop_peer(&self, id: impl Into<PeerId>) {
        let _serial = self.shared.serial.lock();
        let id = id.into();
        let event = {
            let mut state = self.shared.state.lock();
            state.peers.remove(&id);
            KernelEvent::PeerDown {
                id,
                snapshot: self.snapshot_locked(&mut state),
            }
        };
        self.publish(event);
    }

    /// Live peers within the configured liveness window
    pub fn active_peer_count(&self) -> usize {
        self.active_peer_count_within(self.shared.config.peer_stale_after)
    }

    /// Live peers within `stale_after`; older entries are evicted
    pub fn active_peer_count_within(&self, stale_after: Duration) -> usize {
        let now = self.now();
        self.shared.state.lock().evict_stale(now, stale_after)
    }

    /// Attach an observer; fires its `init` right away if the hub is running
    pub fn register(&self, observer: Arc<dyn PresenceObserver>) -> &Self {
        let _serial = self.shared.serial.lock();
        self.shared.observers.lock().push(Arc::clone(&observer));
        if self.is_running() {
            observer.init(self);
        }
        self
    }

    /// Apply a configuration function to this hub
    pub fn plugin<F>(&self, plugin: F) -> &Self
    where
        F: FnOnce(&PresenceHub),
    {
        plugin(self);
        self
    }

    /// Listen to every published event
    pub fn on<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&KernelEvent) + Send + Sync + 'static,
    {
        self.shared.listeners.subscribe(listener)
    }

    /// Arm the tick clock and initialize observers; idempotent
    pub fn start(&self) {
        let _serial = self.shared.serial.lock();
        {
            let mut state = self.shared.state.lock();
            if state.lifecycle == Lifecycle::Running {
                return;
            }
            state.lifecycle = Lifecycle::Running;

            let weak = self.downgrade();
            let timer = self.shared.scheduler.arm_repeating(
                self.shared.config.tick_interval,
                Box::new(move || {
                    if let Some(hub) = weak.upgrade() {
                        hub.tick();
                    }
                }),
            );
            state.tick_timer = Some(timer);
        }

        tracing::info!(
            interval_ms = self.shared.config.tick_interval.as_millis() as u64,
            "presence hub started"
        );

        for observer in self.observers() {
            observer.init(self);
        }
        self.tick();
    }

    /// Disarm the tick clock and dispose observers; idempotent
    pub fn stop(&self) {
        let _serial = self.shared.serial.lock();
        let timer = {
            let mut state = self.shared.state.lock();
            if state.lifecycle != Lifecycle::Running {
                return;
            }
            state.lifecycle = Lifecycle::Stopped;
            state.tick_timer.take()
        };

        if let Some(timer) = timer {
            self.shared.scheduler.cancel(timer);
        }
        for observer in self.observers() {
            observer.dispose();
        }
        tracing::info!("presence hub stopped");
    }

    /// One tick: observers' `on_tick`, then a `Tick` event
    pub fn tick(&self) {
        let _serial = self.shared.serial.lock();
        let snapshot = {
            let mut state = self.shared.state.lock();
            if state.lifecycle != Lifecycle::Running {
                return;
            }
            state.stats.ticks += 1;
            self.snapshot_locked(&mut state)
        };

        for observer in self.observers() {
            observer.on_tick(&snapshot);
        }
        self.publish(KernelEvent::Tick { snapshot });
    }

    fn snapshot_locked(&self, state: &mut HubState) -> PresenceSnapshot {
        state.snapshot(self.now(), self.shared.config.peer_stale_after)
    }

    fn observers(&self) -> Vec<Arc<dyn PresenceObserver>> {
        self.shared.observers.lock().clone()
    }

    fn publish(&self, event: KernelEvent) {
        {
            let mut state = self.shared.state.lock();
            if state.lifecycle == Lifecycle::Stopped {
                return;
            }
            state.stats.events_published += 1;
        }
        tracing::trace!(kind = ?event.kind(), "hub event");

        for observer in self.observers() {
            observer.on_event(&event);
        }
        self.shared.listeners.notify(&event);
    }
}
