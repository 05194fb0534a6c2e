//! Hub event definitions
//!
//! Every event carries the snapshot taken at publication time. Events are
//! delivered synchronously in the order the state changes happened.

use crate::{Mood, PeerId, Phase, PresenceSnapshot};

/// Event type classification
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    Tick,
    PhaseSet,
    MoodSet,
    Whisper,
    PeerUp,
    PeerDown,
}

impl EventKind {
    /// Does this event change what the local peer would broadcast?
    pub fn is_presence_change(self) -> bool {
        matches!(self, EventKind::PhaseSet | EventKind::MoodSet | EventKind::Whisper)
    }
}

/// Event published by the presence hub
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KernelEvent {
    Tick {
        snapshot: PresenceSnapshot,
    },
    PhaseSet {
        phase: Phase,
        snapshot: PresenceSnapshot,
    },
    MoodSet {
        mood: Mood,
        snapshot: PresenceSnapshot,
    },
    Whisper {
        message: String,
        snapshot: PresenceSnapshot,
    },
    PeerUp {
        id: PeerId,
        snapshot: PresenceSnapshot,
    },
    PeerDown {
        id: PeerId,
        snapshot: PresenceSnapshot,
    },
}

impl KernelEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            KernelEvent::Tick { .. } => EventKind::Tick,
            KernelEvent::PhaseSet { .. } => EventKind::PhaseSet,
            KernelEvent::MoodSet { .. } => EventKind::MoodSet,
            KernelEvent::Whisper { .. } => EventKind::Whisper,
            KernelEvent::PeerUp { .. } => EventKind::PeerUp,
            KernelEvent::PeerDown { .. } => EventKind::PeerDown,
        }
    }

    pub fn snapshot(&self) -> &PresenceSnapshot {
        match self {
            KernelEvent::Tick { snapshot }
            | KernelEvent::PhaseSet { snapshot, .. }
            | KernelEvent::MoodSet { snapshot, .. }
            | KernelEvent::Whisper { snapshot, .. }
            | KernelEvent::PeerUp { snapshot, .. }
            | KernelEvent::PeerDown { snapshot, .. } => snapshot,
        }
    }
}
