//! Local swarm simulator
//!
//! Every node is a hub plus a signal adapter. All nodes share one
//! `ManualScheduler` and talk over one in-process medium, each through its
//! own chaos channel.

use std::sync::Arc;
use std::time::Duration;

use gratia_core::{PeerId, Timestamp};
use gratia_hub::{HubConfig, PresenceHub};
use gratia_signal::{LocalChannel, SignalAdapter, SignalConfig};
use gratia_time::{ManualScheduler, Scheduler};

use crate::{ChaosChannel, ChaosConfig, ChaosStats};

pub struct SwarmNode {
    pub id: PeerId,
    pub hub: PresenceHub,
    pub adapter: Arc<SignalAdapter>,
    pub channel: Arc<ChaosChannel>,
}

impl SwarmNode {
    pub fn is_running(&self) -> bool {
        self.hub.is_running()
    }

    /// Ids on this node's radar, in rank order
    pub fn radar_ids(&self) -> Vec<PeerId> {
        self.adapter.radar_list().into_iter().map(|e| e.signal.id).collect()
    }

    pub fn sees(&self, other: &PeerId) -> bool {
        self.adapter.radar().get(other).is_some()
    }
}

pub struct Swarm {
    scheduler: Arc<ManualScheduler>,
    medium: Arc<LocalChannel>,
    nodes: Vec<SwarmNode>,
}

impl Swarm {
    pub fn scheduler(&self) -> &Arc<ManualScheduler> {
        &self.scheduler
    }

    pub fn medium(&self) -> &Arc<LocalChannel> {
        &self.medium
    }

    pub fn now(&self) -> Timestamp {
        self.scheduler.now()
    }

    pub fn nodes(&self) -> &[SwarmNode] {
        &self.nodes
    }

    pub fn node(&self, index: usize) -> &SwarmNode {
        &self.nodes[index]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn advance(&self, dt: Duration) {
        self.scheduler.advance(dt);
    }

    /// Advance `total` in steps of `step`, stopping early once `until` holds
    ///
    /// Returns whether `until` held at the end.
    pub fn run_until(&self, total: Duration, step: Duration, until: impl Fn(&Swarm) -> bool) -> bool {
        let deadline = self.now().saturating_add(total);
        while self.now() < deadline {
            if until(self) {
                return true;
            }
            self.advance(step);
        }
        until(self)
    }

    /// Every running node has every other running node on its radar
    pub fn is_converged(&self) -> bool {
        let running: Vec<&SwarmNode> = self.nodes.iter().filter(|n| n.is_running()).collect();
        running.iter().all(|node| {
            running
                .iter()
                .filter(|other| other.id != node.id)
                .all(|other| node.sees(&other.id))
        })
    }

    /// Stop one node's hub; its adapter detaches with it
    pub fn stop_node(&self, index: usize) {
        self.nodes[index].hub.stop();
    }

    pub fn chaos_stats(&self) -> ChaosStats {
        let mut total = ChaosStats::default();
        for node in &self.nodes {
            total.merge(&node.channel.stats());
        }
        total
    }

    pub fn shutdown(&self) {
        for node in &self.nodes {
            node.hub.stop();
        }
        self.medium.close();
    }
}

/// Builds a `Swarm`; nodes are named `node-00`, `node-01`, ...
pub struct SwarmBuilder {
    nodes: usize,
    chaos: ChaosConfig,
    seed: u64,
    start: Timestamp,
    hub: HubConfig,
    broadcast_interval: Duration,
    debounce: Duration,
    stale_after: Duration,
}

impl SwarmBuilder {
    pub fn new() -> Self {
        let signal = SignalConfig::default();
        SwarmBuilder {
            nodes: 0,
            chaos: ChaosConfig::perfect(),
            seed: 0,
            start: Timestamp::from_millis(1_000_000),
            hub: HubConfig::default(),
            broadcast_interval: signal.broadcast_interval,
            debounce: signal.debounce,
            stale_after: signal.stale_after,
        }
    }

    pub fn with_nodes(mut self, count: usize) -> Self {
        self.nodes = count;
        self
    }

    /// Set network conditions
    pub fn with_chaos(mut self, chaos: ChaosConfig, seed: u64) -> Self {
        self.chaos = chaos;
        self.seed = seed;
        self
    }

    pub fn with_hub_config(mut self, hub: HubConfig) -> Self {
        self.hub = hub;
        self
    }

    pub fn with_broadcast_interval(mut self, interval: Duration) -> Self {
        self.broadcast_interval = interval;
        self
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Build and start every node, in index order
    pub fn build(self) -> Swarm {
        let scheduler = Arc::new(ManualScheduler::starting_at(self.start));
        let medium = Arc::new(LocalChannel::new());

        let nodes = (0..self.nodes)
            .map(|i| {
                let id = PeerId::new(format!("node-{i:02}"));
                let hub = PresenceHub::with_config(scheduler.clone(), self.hub.clone());
                let channel = Arc::new(ChaosChannel::new(
                    medium.clone(),
                    scheduler.clone(),
                    self.chaos.clone(),
                    self.seed.wrapping_add(i as u64),
                ));
                let config = SignalConfig {
                    broadcast_interval: self.broadcast_interval,
                    debounce: self.debounce,
                    stale_after: self.stale_after,
                    ..SignalConfig::default()
                }
                .with_peer_id(id.clone());
                let adapter = SignalAdapter::new(channel.clone(), config);
                adapter.attach_to(&hub);
                hub.start();
                SwarmNode {
                    id,
                    hub,
                    adapter,
                    channel,
                }
            })
            .collect();

        Swarm {
            scheduler,
            medium,
            nodes,
        }
    }
}

impl Default for SwarmBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_names_and_starts_nodes() {
        let swarm = SwarmBuilder::new().with_nodes(3).build();
        assert_eq!(swarm.len(), 3);
        assert_eq!(swarm.node(2).id, PeerId::from("node-02"));
        assert!(swarm.nodes().iter().all(SwarmNode::is_running));
        assert_eq!(swarm.medium().subscriber_count(), 3);
    }

    #[test]
    fn test_later_nodes_are_seen_first() {
        let swarm = SwarmBuilder::new().with_nodes(3).build();
        // Each start broadcast only reaches nodes already listening
        assert_eq!(swarm.node(0).radar_ids().len(), 2);
        assert_eq!(swarm.node(1).radar_ids(), vec![PeerId::from("node-02")]);
        assert!(swarm.node(2).radar_ids().is_empty());
        assert!(!swarm.is_converged());
    }

    #[test]
    fn test_converges_after_one_interval() {
        let swarm = SwarmBuilder::new().with_nodes(4).build();
        swarm.advance(Duration::from_secs(15));
        assert!(swarm.is_converged());
        assert_eq!(swarm.chaos_stats().lost, 0);
    }

    #[test]
    fn test_run_until_stops_early() {
        let swarm = SwarmBuilder::new()
            .with_nodes(2)
            .with_broadcast_interval(Duration::from_secs(5))
            .build();
        let start = swarm.now();
        assert!(swarm.run_until(Duration::from_secs(60), Duration::from_secs(1), Swarm::is_converged));
        assert_eq!(swarm.now().millis_since(start), 5_000);
    }

    #[test]
    fn test_shutdown_leaves_no_timers() {
        let swarm = SwarmBuilder::new().with_nodes(3).build();
        swarm.shutdown();
        assert_eq!(swarm.scheduler().pending(), 0);
        assert_eq!(swarm.medium().subscriber_count(), 0);
    }
}
