//! Relay wire messages
//!
//! One JSON object per message, discriminated by `kind`:
//! `hello{room, peerId}`, `peers{list}`, `offer{from, to, sdp}`,
//! `answer{from, to, sdp}`, `candidate{from, to, candidate}`.

use gratia_core::{GratiaResult, PeerId};
use serde::{Deserialize, Serialize};

/// Session description type
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// Opaque session description produced by the connectivity layer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        SessionDescription {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        SessionDescription {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Opaque connectivity candidate
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
}

impl Candidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Candidate {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RelayMessage {
    /// Announce presence in a room
    #[serde(rename_all = "camelCase")]
    Hello { room: String, peer_id: PeerId },
    /// Current room membership
    Peers { list: Vec<PeerId> },
    Offer {
        from: PeerId,
        to: PeerId,
        sdp: SessionDescription,
    },
    Answer {
        from: PeerId,
        to: PeerId,
        sdp: SessionDescription,
    },
    Candidate {
        from: PeerId,
        to: PeerId,
        candidate: Candidate,
    },
}

impl RelayMessage {
    /// Addressee of a routed message
    pub fn to(&self) -> Option<&PeerId> {
        match self {
            RelayMessage::Offer { to, .. }
            | RelayMessage::Answer { to, .. }
            | RelayMessage::Candidate { to, .. } => Some(to),
            _ => None,
        }
    }

    pub fn from(&self) -> Option<&PeerId> {
        match self {
            RelayMessage::Offer { from, .. }
            | RelayMessage::Answer { from, .. }
            | RelayMessage::Candidate { from, .. } => Some(from),
            RelayMessage::Hello { peer_id, .. } => Some(peer_id),
            RelayMessage::Peers { .. } => None,
        }
    }

    pub fn encode(&self) -> GratiaResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> GratiaResult<Self> {
        Ok(serde_json::from_str(text)?)
    }
}
