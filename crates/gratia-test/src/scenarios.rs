//! End-to-end scenarios
//!
//! Reusable runs over the swarm simulators, plus the scenario tests that
//! exercise hub, adapter, radar and carriers together.

use std::time::Duration;

use crate::{ChaosConfig, ChaosStats, SwarmBuilder};

/// Outcome of a convergence run
#[derive(Clone, Debug)]
pub struct ConvergenceReport {
    /// Virtual time until every node saw every other, if it happened
    pub converged_after: Option<Duration>,
    pub chaos: ChaosStats,
}

impl ConvergenceReport {
    pub fn converged(&self) -> bool {
        self.converged_after.is_some()
    }
}

/// Start `nodes` nodes under `chaos` and advance until they all see each
/// other or `budget` runs out
pub fn run_convergence(nodes: usize, chaos: ChaosConfig, seed: u64, budget: Duration) -> ConvergenceReport {
    let swarm = SwarmBuilder::new().with_nodes(nodes).with_chaos(chaos, seed).build();
    let start = swarm.now();
    let step = Duration::from_millis(100);

    let converged = swarm.run_until(budget, step, |s| s.is_converged());
    let elapsed = swarm.now().millis_since(start).max(0) as u64;
    let report = ConvergenceReport {
        converged_after: converged.then(|| Duration::from_millis(elapsed)),
        chaos: swarm.chaos_stats(),
    };
    swarm.shutdown();
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MeshSwarm;
    use gratia_core::{EventKind, GratiaSignal, KernelEvent, Mood, PeerId, Phase};
    use gratia_hub::PresencePing;
    use gratia_signal::SignalChannel;
    use parking_lot::Mutex;
    use proptest::prelude::*;
    use std::sync::Arc;

    #[test]
    fn test_perfect_network_converges_within_one_interval() {
        let report = run_convergence(6, ChaosConfig::perfect(), 1, Duration::from_secs(60));
        assert!(report.converged());
        assert!(report.converged_after.unwrap() <= Duration::from_secs(15));
        assert_eq!(report.chaos.lost, 0);
    }

    #[test]
    fn test_poor_network_still_converges() {
        let report = run_convergence(5, ChaosConfig::poor(), 11, Duration::from_secs(120));
        assert!(report.converged(), "{report:?}");
    }

    #[test]
    fn test_hostile_network_converges_eventually() {
        let report = run_convergence(4, ChaosConfig::hostile(), 5, Duration::from_secs(300));
        assert!(report.converged(), "{report:?}");
        assert!(report.chaos.sent >= 8);
    }

    #[test]
    fn test_presence_change_reaches_everyone_after_debounce() {
        let swarm = SwarmBuilder::new().with_nodes(4).build();
        swarm.advance(Duration::from_secs(15));
        assert!(swarm.is_converged());

        let speaker = swarm.node(0);
        speaker.hub.set_mood(Mood::Presence);
        swarm.advance(Duration::from_millis(100));
        speaker.hub.set_mood(Mood::Focused);
        swarm.advance(Duration::from_millis(100));
        speaker.hub.set_phase(Phase::Presence);
        swarm.advance(Duration::from_millis(449));

        let stale = swarm.node(1).adapter.radar().get(&speaker.id).unwrap();
        assert_eq!(stale.signal.mood, Mood::Soft);

        swarm.advance(Duration::from_millis(1));
        for listener in &swarm.nodes()[1..] {
            let entry = listener.adapter.radar().get(&speaker.id).unwrap();
            assert_eq!(entry.signal.mood, Mood::Focused);
            assert_eq!(entry.signal.phase, Phase::Presence);
        }
        // One start broadcast, one periodic, one debounced
        assert_eq!(speaker.adapter.stats().broadcasts, 3);
    }

    #[test]
    fn test_departed_node_expires_from_radars() {
        let swarm = SwarmBuilder::new().with_nodes(3).build();
        swarm.advance(Duration::from_secs(15));
        assert!(swarm.is_converged());

        let gone = swarm.node(2).id.clone();
        swarm.stop_node(2);
        // Last heard at +15s; the window is 60s
        swarm.advance(Duration::from_secs(60));
        assert!(swarm.node(0).sees(&gone));
        swarm.advance(Duration::from_secs(1));
        assert!(!swarm.node(0).sees(&gone));
        assert!(!swarm.node(1).sees(&gone));
        assert!(swarm.is_converged());
    }

    #[test]
    fn test_radar_ranks_kindred_peers_first() {
        let swarm = SwarmBuilder::new().with_nodes(3).build();
        swarm.node(1).hub.set_phase(Phase::Archive);
        swarm.node(1).hub.set_mood(Mood::Celebratory);
        swarm.advance(Duration::from_secs(15));

        assert_eq!(
            swarm.node(0).radar_ids(),
            vec![PeerId::from("node-02"), PeerId::from("node-01")]
        );
        let radar = swarm.node(0).adapter.radar_list();
        assert!(radar[0].resonance > radar[1].resonance);
    }

    #[test]
    fn test_whisper_privacy_across_the_swarm() {
        let swarm = SwarmBuilder::new().with_nodes(2).build();
        swarm.node(0).hub.whisper("meet at the fountain");
        swarm.advance(Duration::from_millis(450));
        let entry = swarm.node(1).adapter.radar().get(&PeerId::from("node-00")).unwrap();
        assert_eq!(entry.signal.whisper.as_deref(), Some("meet at the fountain"));
    }

    #[test]
    fn test_hub_events_and_liveness_together() {
        let swarm = SwarmBuilder::new().with_nodes(1).build();
        let hub = &swarm.node(0).hub;
        let kinds = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&kinds);
        let _sub = hub.on(move |e: &KernelEvent| sink.lock().push(e.kind()));

        hub.set_phase(Phase::Presence);
        hub.set_phase(Phase::Presence);
        hub.whisper("x");
        hub.whisper("x");
        hub.upsert_peer("visitor");
        swarm.advance(Duration::from_millis(14_999));
        assert_eq!(hub.active_peer_count(), 1);
        swarm.advance(Duration::from_millis(2));
        assert_eq!(hub.active_peer_count(), 0);

        let kinds = kinds.lock();
        let phase_sets = kinds.iter().filter(|k| **k == EventKind::PhaseSet).count();
        let whispers = kinds.iter().filter(|k| **k == EventKind::Whisper).count();
        assert_eq!(phase_sets, 1);
        assert_eq!(whispers, 2);
    }

    #[test]
    fn test_pinged_peer_stays_live_until_stop() {
        let swarm = SwarmBuilder::new().with_nodes(2).build();
        let hub = &swarm.node(0).hub;
        hub.register(Arc::new(PresencePing::new("lamp")));
        swarm.advance(Duration::from_secs(30));
        assert_eq!(hub.snapshot().peer_count, 1);

        hub.stop();
        assert_eq!(hub.active_peer_count(), 0);
    }

    #[test]
    fn test_foreign_signals_on_the_medium() {
        let swarm = SwarmBuilder::new().with_nodes(2).build();
        let stranger = GratiaSignal::neutral(PeerId::from("stranger"), swarm.now());
        swarm.medium().send(&stranger).unwrap();
        assert!(swarm.node(0).sees(&PeerId::from("stranger")));
        assert!(swarm.node(1).sees(&PeerId::from("stranger")));
    }

    #[tokio::test]
    async fn test_mesh_swarm_exchanges_presence() {
        let mut swarm = MeshSwarm::new("plaza");
        for id in ["alice", "bob", "carol", "dave"] {
            swarm.join(id).unwrap();
        }
        assert!(swarm.settle(Duration::from_secs(3)).await);

        // Every pair dialed exactly once, by the smaller id
        let offers: Vec<_> = swarm
            .relay()
            .history()
            .into_iter()
            .filter_map(|m| match m {
                gratia_transport::RelayMessage::Offer { from, to, .. } => Some((from, to)),
                _ => None,
            })
            .collect();
        assert_eq!(offers.len(), 6);
        assert!(offers.iter().all(|(from, to)| from < to));

        swarm.advance(Duration::from_secs(15));
        for node in swarm.nodes() {
            assert_eq!(node.radar_ids().len(), 3, "{} radar", node.id);
        }

        swarm.node(3).hub.set_phase(Phase::Archive);
        swarm.advance(Duration::from_millis(450));
        let entry = swarm.node(0).adapter.radar().get(&PeerId::from("dave")).unwrap();
        assert_eq!(entry.signal.phase, Phase::Archive);
        swarm.shutdown();
    }

    #[tokio::test]
    async fn test_mesh_departure_then_return() {
        let mut swarm = MeshSwarm::new("plaza");
        swarm.join("alice").unwrap();
        swarm.join("bob").unwrap();
        assert!(swarm.settle(Duration::from_secs(2)).await);

        swarm.leave(1);
        assert!(swarm.settle(Duration::from_secs(2)).await);
        assert!(swarm.node(0).bus.connected_peers().is_empty());

        swarm.join("bob").unwrap();
        assert!(swarm.settle(Duration::from_secs(2)).await);
        assert_eq!(swarm.node(0).bus.connected_peers(), vec![PeerId::from("bob")]);
        swarm.shutdown();
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn test_any_seed_converges_on_a_poor_network(seed in any::<u64>(), nodes in 2usize..5) {
            let report = run_convergence(nodes, ChaosConfig::poor(), seed, Duration::from_secs(180));
            prop_assert!(report.converged());
        }
    }
}
