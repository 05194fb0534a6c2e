//! Wire-level presence signal
//!
//! A `GratiaSignal` is the compact record a peer broadcasts about itself.
//! On every carrier it travels inside a `SignalFrame`, one JSON object per
//! message: `{"kind":"signal","payload":{...}}`.

use serde::{Deserialize, Serialize};

use crate::{GratiaResult, Mood, PeerId, Phase, PresenceSnapshot, Timestamp};

/// Presence record exchanged between peers
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GratiaSignal {
    pub id: PeerId,
    pub t: Timestamp,
    pub phase: Phase,
    pub mood: Mood,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub whisper: Option<String>,
    /// Correlation token chosen by the sender
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub energy: Option<f64>,
    /// Authenticity token, carried but never interpreted
    #[serde(default, rename = "sig", alias = "signature", skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl GratiaSignal {
    /// Neutral signal used before the hub has produced a snapshot
    pub fn neutral(id: PeerId, t: Timestamp) -> Self {
        GratiaSignal {
            id,
            t,
            phase: Phase::default(),
            mood: Mood::default(),
            whisper: None,
            seed: None,
            energy: None,
            signature: None,
        }
    }

    /// Build a signal from a hub snapshot
    pub fn from_snapshot(id: PeerId, snapshot: &PresenceSnapshot) -> Self {
        GratiaSignal {
            id,
            t: snapshot.t,
            phase: snapshot.phase,
            mood: snapshot.mood,
            whisper: snapshot.whisper.clone(),
            seed: None,
            energy: None,
            signature: None,
        }
    }

    pub fn with_seed(mut self, seed: Option<String>) -> Self {
        self.seed = seed;
        self
    }

    /// Attach an energy reading, clamped into [0, 1]
    pub fn with_energy(mut self, energy: f64) -> Self {
        self.energy = Some(clamp01(energy));
        self
    }

    pub fn without_whisper(mut self) -> Self {
        self.whisper = None;
        self
    }
}

/// Clamp into [0, 1]; NaN maps to 0
#[inline]
pub fn clamp01(x: f64) -> f64 {
    if x.is_nan() {
        return 0.0;
    }
    x.clamp(0.0, 1.0)
}

/// Carrier framing for signals
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SignalFrame {
    Signal { payload: GratiaSignal },
}

impl SignalFrame {
    /// Encode a signal as one JSON frame
    pub fn encode(signal: &GratiaSignal) -> GratiaResult<String> {
        let frame = SignalFrame::Signal {
            payload: signal.clone(),
        };
        Ok(serde_json::to_string(&frame)?)
    }

    /// Decode one frame, yielding the carried signal
    ///
    /// Energy from the wire is clamped into [0, 1].
    pub fn decode(bytes: &[u8]) -> GratiaResult<GratiaSignal> {
        let SignalFrame::Signal { mut payload } = serde_json::from_slice(bytes)?;
        payload.energy = payload.energy.map(clamp01);
        Ok(payload)
    }
}
