//! Signal adapter - bridges a presence hub and a signal channel
//!
//! Outbound: one broadcast on attach, one per broadcast interval, and one
//! after every burst of phase/mood/whisper changes once the debounce quiet
//! period has elapsed. Inbound: every foreign signal is scored against the
//! last local broadcast and stored in the radar.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use gratia_core::{clamp01, EventKind, GratiaSignal, KernelEvent, PeerId, PresenceSnapshot, Subscription, Timestamp};
use gratia_hub::{PresenceHub, PresenceObserver, WeakPresenceHub};
use gratia_time::{Scheduler, TimerId};
use parking_lot::Mutex;

use crate::{
    DefaultResonance, DriftingEnergy, EnergySampler, Radar, RadarEntry, RadarHandle, Resonance,
    SignalChannel,
};

/// Signal adapter configuration
#[derive(Clone)]
pub struct SignalConfig {
    /// Identity put on every outbound signal
    pub peer_id: PeerId,
    /// Correlation token copied into every outbound signal
    pub seed: Option<String>,
    /// Periodic broadcast interval
    pub broadcast_interval: Duration,
    /// Quiet period after the last presence change before broadcasting
    pub debounce: Duration,
    /// Radar staleness window
    pub stale_after: Duration,
    /// Whether outbound signals carry the whisper text
    pub include_whisper: bool,
    pub energy: Arc<dyn EnergySampler>,
    pub resonance: Arc<dyn Resonance>,
}

impl Default for SignalConfig {
    fn default() -> Self {
        SignalConfig {
            peer_id: PeerId::random(),
            seed: None,
            broadcast_interval: Duration::from_millis(15_000),
            debounce: Duration::from_millis(450),
            stale_after: Duration::from_millis(60_000),
            include_whisper: true,
            energy: Arc::new(DriftingEnergy),
            resonance: Arc::new(DefaultResonance),
        }
    }
}

impl SignalConfig {
    pub fn with_peer_id(mut self, peer_id: impl Into<PeerId>) -> Self {
        self.peer_id = peer_id.into();
        self
    }

    pub fn with_seed(mut self, seed: impl Into<String>) -> Self {
        self.seed = Some(seed.into());
        self
    }

    pub fn with_energy(mut self, energy: impl EnergySampler + 'static) -> Self {
        self.energy = Arc::new(energy);
        self
    }

    pub fn with_resonance(mut self, resonance: impl Resonance + 'static) -> Self {
        self.resonance = Arc::new(resonance);
        self
    }
}

impl fmt::Debug for SignalConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalConfig")
            .field("peer_id", &self.peer_id)
            .field("seed", &self.seed)
            .field("broadcast_interval", &self.broadcast_interval)
            .field("debounce", &self.debounce)
            .field("stale_after", &self.stale_after)
            .field("include_whisper", &self.include_whisper)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Debug, Default)]
pub struct SignalStats {
    pub broadcasts: u64,
    pub send_failures: u64,
    pub received: u64,
    /// Inbound signals dropped because nothing had been broadcast yet
    pub discarded_unscored: u64,
}

struct Attachment {
    hub: WeakPresenceHub,
    scheduler: Arc<dyn Scheduler>,
    broadcast_timer: TimerId,
    debounce_timer: Option<TimerId>,
    inbound: Subscription,
}

struct AdapterState {
    attachment: Option<Attachment>,
    /// Last scheduler seen, kept for `current()` after detach
    scheduler: Option<Arc<dyn Scheduler>>,
    last: Option<GratiaSignal>,
    /// Bumped on every debounce re-arm and on detach
    debounce_generation: u64,
    stats: SignalStats,
}

/// Hub observer producing and consuming presence signals
pub struct SignalAdapter {
    config: SignalConfig,
    channel: Arc<dyn SignalChannel>,
    radar: RadarHandle,
    state: Mutex<AdapterState>,
    me: Weak<SignalAdapter>,
}

impl SignalAdapter {
    pub fn new(channel: Arc<dyn SignalChannel>, config: SignalConfig) -> Arc<Self> {
        let radar = RadarHandle::new(Radar::new(config.peer_id.clone(), config.stale_after));
        Arc::new_cyclic(|me| SignalAdapter {
            config,
            channel,
            radar,
            state: Mutex::new(AdapterState {
                attachment: None,
                scheduler: None,
                last: None,
                debounce_generation: 0,
                stats: SignalStats::default(),
            }),
            me: me.clone(),
        })
    }

    /// Register with a hub; attaches now if the hub is running
    pub fn attach_to(self: &Arc<Self>, hub: &PresenceHub) {
        hub.register(Arc::clone(self) as Arc<dyn PresenceObserver>);
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.config.peer_id
    }

    pub fn config(&self) -> &SignalConfig {
        &self.config
    }

    pub fn radar(&self) -> RadarHandle {
        self.radar.clone()
    }

    pub fn is_attached(&self) -> bool {
        self.state.lock().attachment.is_some()
    }

    pub fn stats(&self) -> SignalStats {
        self.state.lock().stats.clone()
    }

    /// Last broadcast signal, or a neutral one if nothing was sent yet
    pub fn current(&self) -> GratiaSignal {
        let state = self.state.lock();
        if let Some(last) = &state.last {
            return last.clone();
        }
        let t = state
            .scheduler
            .as_ref()
            .map(|s| s.now())
            .unwrap_or(Timestamp::ZERO);
        GratiaSignal::neutral(self.config.peer_id.clone(), t)
    }

    /// Cancel timers and unsubscribe from both directions
    pub fn detach(&self) {
        let attachment = {
            let mut state = self.state.lock();
            state.debounce_generation += 1;
            state.attachment.take()
        };
        let Some(attachment) = attachment else {
            return;
        };

        attachment.scheduler.cancel(attachment.broadcast_timer);
        if let Some(timer) = attachment.debounce_timer {
            attachment.scheduler.cancel(timer);
        }
        attachment.inbound.unsubscribe();
        tracing::debug!(peer = %self.config.peer_id, "signal adapter detached");
    }

    /// Broadcast the local signal now
    pub fn broadcast(&self) {
        let hub = {
            let state = self.state.lock();
            match state.attachment.as_ref().and_then(|a| a.hub.upgrade()) {
                Some(hub) => hub,
                None => return,
            }
        };

        let signal = self.compose(&hub.snapshot());
        {
            let mut state = self.state.lock();
            if state.attachment.is_none() {
                return;
            }
            state.last = Some(signal.clone());
            state.stats.broadcasts += 1;
        }

        tracing::trace!(peer = %signal.id, phase = %signal.phase, mood = %signal.mood, "broadcast");
        if let Err(e) = self.channel.send(&signal) {
            self.state.lock().stats.send_failures += 1;
            tracing::debug!(error = %e, "signal send failed");
        }
    }

    fn compose(&self, snapshot: &PresenceSnapshot) -> GratiaSignal {
        let signal = GratiaSignal::from_snapshot(self.config.peer_id.clone(), snapshot)
            .with_seed(self.config.seed.clone())
            .with_energy(self.config.energy.sample(snapshot.t));
        if self.config.include_whisper {
            signal
        } else {
            signal.without_whisper()
        }
    }

    fn arm_debounce(&self) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let Some(attachment) = state.attachment.as_mut() else {
            return;
        };

        if let Some(previous) = attachment.debounce_timer.take() {
            attachment.scheduler.cancel(previous);
        }
        state.debounce_generation += 1;
        let generation = state.debounce_generation;

        let weak = self.me.clone();
        let timer = attachment.scheduler.arm_once(
            self.config.debounce,
            Box::new(move || {
                if let Some(adapter) = weak.upgrade() {
                    adapter.debounce_elapsed(generation);
                }
            }),
        );
        attachment.debounce_timer = Some(timer);
    }

    fn debounce_elapsed(&self, generation: u64) {
        {
            let mut state = self.state.lock();
            if state.debounce_generation != generation {
                return;
            }
            match state.attachment.as_mut() {
                Some(attachment) => attachment.debounce_timer = None,
                None => return,
            }
        }
        self.broadcast();
    }

    fn receive(&self, signal: &GratiaSignal) {
        if signal.id == self.config.peer_id {
            return;
        }

        let (local, now) = {
            let mut state = self.state.lock();
            let Some(now) = state.attachment.as_ref().map(|a| a.scheduler.now()) else {
                return;
            };
            state.stats.received += 1;
            match state.last.clone() {
                Some(local) => (local, now),
                None => {
                    state.stats.discarded_unscored += 1;
                    return;
                }
            }
        };

        let resonance = clamp01(self.config.resonance.score(&local, signal));
        tracing::trace!(from = %signal.id, resonance, "signal received");
        self.radar.upsert(signal.clone(), now, resonance);
    }

    /// Radar entries in rank order
    pub fn radar_list(&self) -> Vec<RadarEntry> {
        self.radar.list()
    }
}

impl PresenceObserver for SignalAdapter {
    fn init(&self, hub: &PresenceHub) {
        if self.is_attached() {
            return;
        }

        let scheduler = hub.scheduler();

        let weak = self.me.clone();
        let broadcast_timer = scheduler.arm_repeating(
            self.config.broadcast_interval,
            Box::new(move || {
                if let Some(adapter) = weak.upgrade() {
                    adapter.broadcast();
                }
            }),
        );

        let weak = self.me.clone();
        let inbound = self.channel.subscribe(Box::new(move |signal| {
            if let Some(adapter) = weak.upgrade() {
                adapter.receive(signal);
            }
        }));

        {
            let mut state = self.state.lock();
            state.scheduler = Some(Arc::clone(&scheduler));
            state.attachment = Some(Attachment {
                hub: hub.downgrade(),
                scheduler,
                broadcast_timer,
                debounce_timer: None,
                inbound,
            });
        }
        tracing::debug!(peer = %self.config.peer_id, "signal adapter attached");

        self.broadcast();
    }

    fn on_event(&self, event: &KernelEvent) {
        match event.kind() {
            kind if kind.is_presence_change() => self.arm_debounce(),
            EventKind::Tick => {
                if self.is_attached() {
                    let removed = self.radar.sweep(event.snapshot().t);
                    if removed > 0 {
                        tracing::debug!(removed, "radar swept");
                    }
                }
            }
            _ => {}
        }
    }

    fn dispose(&self) {
        self.detach();
    }
}
