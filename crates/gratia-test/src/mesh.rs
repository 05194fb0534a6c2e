//! Mesh swarm simulator
//!
//! Nodes join a room on an in-memory relay and negotiate over the in-memory
//! connectivity layer. Negotiation runs on tokio; hubs and adapters run on a
//! shared `ManualScheduler`, so presence timing stays under test control.

use std::sync::Arc;
use std::time::Duration;

use gratia_core::{GratiaResult, PeerId, Timestamp};
use gratia_hub::PresenceHub;
use gratia_signal::{SignalAdapter, SignalConfig};
use gratia_time::ManualScheduler;
use gratia_transport::{MeshBus, MeshConfig, MemoryNetwork, MemoryRelay};

pub struct MeshNode {
    pub id: PeerId,
    pub hub: PresenceHub,
    pub adapter: Arc<SignalAdapter>,
    pub bus: Arc<MeshBus>,
}

impl MeshNode {
    /// Still in the room
    pub fn is_active(&self) -> bool {
        !self.bus.is_closed()
    }

    pub fn radar_ids(&self) -> Vec<PeerId> {
        self.adapter.radar_list().into_iter().map(|e| e.signal.id).collect()
    }
}

pub struct MeshSwarm {
    room: String,
    scheduler: Arc<ManualScheduler>,
    relay: MemoryRelay,
    network: MemoryNetwork,
    nodes: Vec<MeshNode>,
}

impl MeshSwarm {
    pub fn new(room: impl Into<String>) -> Self {
        MeshSwarm {
            room: room.into(),
            scheduler: Arc::new(ManualScheduler::starting_at(Timestamp::from_millis(1_000_000))),
            relay: MemoryRelay::new(),
            network: MemoryNetwork::new(),
            nodes: Vec::new(),
        }
    }

    pub fn scheduler(&self) -> &Arc<ManualScheduler> {
        &self.scheduler
    }

    pub fn relay(&self) -> &MemoryRelay {
        &self.relay
    }

    pub fn network(&self) -> &MemoryNetwork {
        &self.network
    }

    pub fn nodes(&self) -> &[MeshNode] {
        &self.nodes
    }

    pub fn node(&self, index: usize) -> &MeshNode {
        &self.nodes[index]
    }

    /// Add a node to the room; must run inside a tokio runtime
    pub fn join(&mut self, id: &str) -> GratiaResult<usize> {
        let id = PeerId::from(id);
        let (link, inbound) = self.relay.connect();
        let bus = MeshBus::start(
            MeshConfig::default()
                .with_room(self.room.clone())
                .with_peer_id(id.clone()),
            link,
            inbound,
            Arc::new(self.network.clone()),
        )?;

        let hub = PresenceHub::new(self.scheduler.clone());
        let adapter = SignalAdapter::new(bus.clone(), SignalConfig::default().with_peer_id(id.clone()));
        adapter.attach_to(&hub);
        hub.start();

        self.nodes.push(MeshNode {
            id,
            hub,
            adapter,
            bus,
        });
        Ok(self.nodes.len() - 1)
    }

    /// Stop a node's hub and leave the room
    pub fn leave(&self, index: usize) {
        let node = &self.nodes[index];
        node.hub.stop();
        node.bus.close();
    }

    /// Every active node holds an open channel to every other active node
    pub fn is_fully_connected(&self) -> bool {
        let active: Vec<&MeshNode> = self.nodes.iter().filter(|n| n.is_active()).collect();
        let expected = active.len().saturating_sub(1);
        active.iter().all(|node| {
            let stats = node.bus.stats();
            stats.channels == expected && node.bus.connected_peers().len() == expected
        })
    }

    /// Wait (in real time) for the mesh to become fully connected
    pub async fn settle(&self, max_wait: Duration) -> bool {
        let step = Duration::from_millis(5);
        let mut waited = Duration::ZERO;
        while waited < max_wait {
            if self.is_fully_connected() {
                return true;
            }
            tokio::time::sleep(step).await;
            waited += step;
        }
        self.is_fully_connected()
    }

    /// Advance presence time
    pub fn advance(&self, dt: Duration) {
        self.scheduler.advance(dt);
    }

    pub fn shutdown(&self) {
        for index in 0..self.nodes.len() {
            self.leave(index);
        }
    }
}
