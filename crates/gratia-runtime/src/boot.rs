//! Boot sequence and the node handle
//!
//! `boot` picks the carrier from configuration, builds a hub and a signal
//! adapter over it, starts the hub and hands back a `Gratia` handle. The
//! handle is the only way to reach the running node; there is no global.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use gratia_core::{GratiaError, GratiaResult, GratiaSignal, Mood, PeerId, Phase};
use gratia_hub::{HubStats, PresenceHub, TracingObserver};
use gratia_signal::{LocalChannel, RadarEntry, SignalAdapter, SignalChannel, SignalStats};
use gratia_time::{Scheduler, TokioScheduler};
use gratia_transport::{Connector, MeshBus, MeshStats, TcpRelayLink, UdpBroadcastChannel};

use crate::{GratiaConfig, TransportKind};

/// The carrier a node runs on
#[derive(Clone)]
pub enum Transport {
    Local(Arc<LocalChannel>),
    Broadcast(Arc<UdpBroadcastChannel>),
    Mesh(Arc<MeshBus>),
}

impl Transport {
    pub fn kind(&self) -> TransportKind {
        match self {
            Transport::Local(_) => TransportKind::Local,
            Transport::Broadcast(_) => TransportKind::Broadcast,
            Transport::Mesh(_) => TransportKind::Mesh,
        }
    }

    pub fn channel(&self) -> Arc<dyn SignalChannel> {
        match self {
            Transport::Local(channel) => channel.clone(),
            Transport::Broadcast(channel) => channel.clone(),
            Transport::Mesh(bus) => bus.clone(),
        }
    }

    pub fn mesh_stats(&self) -> Option<MeshStats> {
        match self {
            Transport::Mesh(bus) => Some(bus.stats()),
            _ => None,
        }
    }

    pub fn close(&self) {
        match self {
            Transport::Local(channel) => channel.close(),
            Transport::Broadcast(channel) => channel.close(),
            Transport::Mesh(bus) => bus.close(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct NodeStats {
    pub hub: HubStats,
    pub signal: SignalStats,
    pub radar: usize,
    pub mesh: Option<MeshStats>,
}

/// Handle to a running node
pub struct Gratia {
    config: GratiaConfig,
    hub: PresenceHub,
    adapter: Arc<SignalAdapter>,
    transport: Transport,
    stopped: AtomicBool,
}

impl Gratia {
    pub fn peer_id(&self) -> &PeerId {
        self.adapter.peer_id()
    }

    /// Resolved configuration; `peer_id` is always set
    pub fn config(&self) -> &GratiaConfig {
        &self.config
    }

    pub fn hub(&self) -> &PresenceHub {
        &self.hub
    }

    pub fn adapter(&self) -> &Arc<SignalAdapter> {
        &self.adapter
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Our own most recent signal
    pub fn me(&self) -> GratiaSignal {
        self.adapter.current()
    }

    /// Peers currently on the radar, highest resonance first
    pub fn radar(&self) -> Vec<RadarEntry> {
        self.adapter.radar_list()
    }

    pub fn set_phase(&self, phase: Phase) {
        self.hub.set_phase(phase);
    }

    pub fn set_mood(&self, mood: Mood) {
        self.hub.set_mood(mood);
    }

    pub fn whisper(&self, message: impl Into<String>) {
        self.hub.whisper(message);
    }

    pub fn stats(&self) -> NodeStats {
        NodeStats {
            hub: self.hub.stats(),
            signal: self.adapter.stats(),
            radar: self.adapter.radar().len(),
            mesh: self.transport.mesh_stats(),
        }
    }

    pub fn is_running(&self) -> bool {
        !self.stopped.load(Ordering::Acquire)
    }

    /// Stop the hub, detach the adapter and close the carrier; idempotent
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.hub.stop();
        self.transport.close();
        tracing::info!(peer = %self.peer_id(), "gratia node stopped");
    }
}

impl Drop for Gratia {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Boot a node on the current tokio runtime
///
/// The mesh carrier negotiates through `connector`; it is an error to ask for
/// the mesh without one.
pub async fn boot(
    mut config: GratiaConfig,
    connector: Option<Arc<dyn Connector>>,
) -> GratiaResult<Gratia> {
    config.validate()?;
    let peer_id = config.resolve_peer_id();
    let scheduler: Arc<dyn Scheduler> = Arc::new(TokioScheduler::try_current()?);

    let transport = match config.transport {
        TransportKind::Local => Transport::Local(Arc::new(LocalChannel::new())),
        TransportKind::Broadcast => {
            Transport::Broadcast(UdpBroadcastChannel::bind(config.broadcast_config()).await?)
        }
        TransportKind::Mesh => {
            let relay = config.relay.ok_or_else(|| {
                GratiaError::InvalidConfig("mesh transport needs a relay address".into())
            })?;
            let connector = connector.ok_or_else(|| {
                GratiaError::InvalidConfig("mesh transport needs a connector".into())
            })?;
            let (link, inbound) = TcpRelayLink::connect(relay).await?;
            Transport::Mesh(MeshBus::start(
                config.mesh_config(peer_id),
                link,
                inbound,
                connector,
            )?)
        }
    };

    boot_with(config, scheduler, transport)
}

/// Boot a node over an already-built carrier and scheduler
pub fn boot_with(
    mut config: GratiaConfig,
    scheduler: Arc<dyn Scheduler>,
    transport: Transport,
) -> GratiaResult<Gratia> {
    config.validate()?;
    let peer_id = config.resolve_peer_id();

    let hub = PresenceHub::with_config(scheduler, config.hub_config());
    hub.register(Arc::new(TracingObserver::default()));
    let adapter = SignalAdapter::new(transport.channel(), config.signal_config(peer_id.clone()));
    adapter.attach_to(&hub);
    hub.start();

    tracing::info!(peer = %peer_id, transport = %transport.kind(), "gratia node up");
    Ok(Gratia {
        config,
        hub,
        adapter,
        transport,
        stopped: AtomicBool::new(false),
    })
}
