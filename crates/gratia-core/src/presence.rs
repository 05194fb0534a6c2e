//! Presence facets and snapshots
//!
//! A peer's presence is two finite facets (phase and mood) plus an optional
//! whisper. Parsing from text is the only way to produce an out-of-domain
//! value, and it is rejected there.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{GratiaError, Timestamp};

/// Phase facet
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Companion,
    Presence,
    Archive,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::Companion, Phase::Presence, Phase::Archive];

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Companion => "companion",
            Phase::Presence => "presence",
            Phase::Archive => "archive",
        }
    }
}

impl FromStr for Phase {
    type Err = GratiaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Phase::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| GratiaError::InvalidPhase(s.to_string()))
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mood facet
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mood {
    #[default]
    Soft,
    Presence,
    Focused,
    Celebratory,
}

impl Mood {
    pub const ALL: [Mood; 4] = [Mood::Soft, Mood::Presence, Mood::Focused, Mood::Celebratory];

    pub fn as_str(self) -> &'static str {
        match self {
            Mood::Soft => "soft",
            Mood::Presence => "presence",
            Mood::Focused => "focused",
            Mood::Celebratory => "celebratory",
        }
    }
}

impl FromStr for Mood {
    type Err = GratiaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Mood::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| GratiaError::InvalidMood(s.to_string()))
    }
}

impl fmt::Display for Mood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of the local presence state
///
/// Produced on demand by the hub, never stored by it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceSnapshot {
    pub t: Timestamp,
    pub phase: Phase,
    pub mood: Mood,
    pub peer_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub whisper: Option<String>,
}
