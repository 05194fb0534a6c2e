//! Node configuration
//!
//! Loaded from a JSON file, then overridden by environment variables and
//! command-line flags. Durations use humantime notation (`"450ms"`, `"15s"`).

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use gratia_core::{GratiaError, GratiaResult, Mood, PeerId, Phase};
use gratia_hub::HubConfig;
use gratia_signal::SignalConfig;
use gratia_transport::{BroadcastConfig, MeshConfig};
use serde::{Deserialize, Serialize};

/// Which signal carrier the node uses
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// In-process only
    Local,
    /// UDP broadcast to other processes on this host
    #[default]
    Broadcast,
    /// Pairwise channels negotiated through a relay
    Mesh,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Local => "local",
            TransportKind::Broadcast => "broadcast",
            TransportKind::Mesh => "mesh",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = GratiaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(TransportKind::Local),
            "broadcast" => Ok(TransportKind::Broadcast),
            "mesh" => Ok(TransportKind::Mesh),
            other => Err(GratiaError::InvalidConfig(format!(
                "unknown transport {other:?}"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct GratiaConfig {
    /// Fixed peer id; random when absent
    pub peer_id: Option<PeerId>,
    pub seed: Option<String>,
    pub phase: Phase,
    pub mood: Mood,
    pub transport: TransportKind,
    /// Mesh rendezvous room
    pub room: String,
    /// Mesh relay server address
    pub relay: Option<SocketAddr>,
    pub broadcast_host: IpAddr,
    pub broadcast_base_port: u16,
    pub broadcast_port_span: u16,
    #[serde(with = "duration")]
    pub tick_interval: Duration,
    #[serde(with = "duration")]
    pub peer_stale_after: Duration,
    #[serde(with = "duration")]
    pub broadcast_interval: Duration,
    #[serde(with = "duration")]
    pub debounce: Duration,
    #[serde(with = "duration")]
    pub radar_stale_after: Duration,
    pub include_whisper: bool,
    /// `tracing` filter directive used when `RUST_LOG` is unset
    pub log_filter: String,
    pub log_json: bool,
}

impl Default for GratiaConfig {
    fn default() -> Self {
        let hub = HubConfig::default();
        let signal = SignalConfig::default();
        let broadcast = BroadcastConfig::default();
        GratiaConfig {
            peer_id: None,
            seed: None,
            phase: hub.initial_phase,
            mood: hub.initial_mood,
            transport: TransportKind::default(),
            room: MeshConfig::default().room,
            relay: None,
            broadcast_host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            broadcast_base_port: broadcast.base_port,
            broadcast_port_span: broadcast.port_span,
            tick_interval: hub.tick_interval,
            peer_stale_after: hub.peer_stale_after,
            broadcast_interval: signal.broadcast_interval,
            debounce: signal.debounce,
            radar_stale_after: signal.stale_after,
            include_whisper: signal.include_whisper,
            log_filter: "info".to_string(),
            log_json: false,
        }
    }
}

impl GratiaConfig {
    pub fn from_json(text: &str) -> GratiaResult<Self> {
        serde_json::from_str(text).map_err(|e| GratiaError::InvalidConfig(e.to_string()))
    }

    pub fn load(path: &Path) -> GratiaResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            GratiaError::InvalidConfig(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> GratiaResult<()> {
        let intervals = [
            ("tickInterval", self.tick_interval),
            ("broadcastInterval", self.broadcast_interval),
            ("radarStaleAfter", self.radar_stale_after),
        ];
        for (name, value) in intervals {
            if value.is_zero() {
                return Err(GratiaError::InvalidConfig(format!("{name} must be positive")));
            }
        }
        if self.transport == TransportKind::Broadcast && self.broadcast_port_span == 0 {
            return Err(GratiaError::InvalidConfig(
                "broadcastPortSpan must be positive".into(),
            ));
        }
        if self.room.is_empty() {
            return Err(GratiaError::InvalidConfig("room must not be empty".into()));
        }
        Ok(())
    }

    /// Resolve the peer id, drawing a random one if none is configured
    pub fn resolve_peer_id(&mut self) -> PeerId {
        self.peer_id.get_or_insert_with(PeerId::random).clone()
    }

    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            tick_interval: self.tick_interval,
            peer_stale_after: self.peer_stale_after,
            initial_phase: self.phase,
            initial_mood: self.mood,
        }
    }

    pub fn signal_config(&self, peer_id: PeerId) -> SignalConfig {
        SignalConfig {
            peer_id,
            seed: self.seed.clone(),
            broadcast_interval: self.broadcast_interval,
            debounce: self.debounce,
            stale_after: self.radar_stale_after,
            include_whisper: self.include_whisper,
            ..SignalConfig::default()
        }
    }

    pub fn mesh_config(&self, peer_id: PeerId) -> MeshConfig {
        MeshConfig::default()
            .with_room(self.room.clone())
            .with_peer_id(peer_id)
    }

    pub fn broadcast_config(&self) -> BroadcastConfig {
        BroadcastConfig {
            host: self.broadcast_host,
            ..BroadcastConfig::default()
        }
        .with_ports(self.broadcast_base_port, self.broadcast_port_span)
    }
}

/// Serde adapter for humantime durations
pub mod duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&humantime::format_duration(*value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}

/// Parse a humantime duration, as accepted on the command line
pub fn parse_duration(text: &str) -> GratiaResult<Duration> {
    humantime::parse_duration(text)
        .map_err(|e| GratiaError::InvalidConfig(format!("bad duration {text:?}: {e}")))
}
