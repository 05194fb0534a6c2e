//! Observer capability
//!
//! Every hook is optional; the default bodies are no-ops.

use gratia_core::{KernelEvent, PresenceSnapshot};

use crate::PresenceHub;

/// Collaborator attached to a `PresenceHub`
pub trait PresenceObserver: Send + Sync {
    /// Called when the hub starts, or on registration if it is already running
    fn init(&self, hub: &PresenceHub) {
        let _ = hub;
    }

    /// Called on every tick, before the `Tick` event is published
    fn on_tick(&self, snapshot: &PresenceSnapshot) {
        let _ = snapshot;
    }

    /// Called for every published event
    fn on_event(&self, event: &KernelEvent) {
        let _ = event;
    }

    /// Called when the hub stops
    fn dispose(&self) {}
}
