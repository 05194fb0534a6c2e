//! Radar - scored, self-expiring table of remote peers

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use gratia_core::{clamp01, GratiaSignal, PeerId, Timestamp};
use parking_lot::Mutex;

/// One remote peer as last seen
#[derive(Clone, Debug, PartialEq)]
pub struct RadarEntry {
    pub signal: GratiaSignal,
    /// Local arrival time
    pub seen_at: Timestamp,
    pub resonance: f64,
}

impl RadarEntry {
    pub fn id(&self) -> &PeerId {
        &self.signal.id
    }
}

/// Highest resonance first, most recent arrival breaking ties
fn rank(a: &RadarEntry, b: &RadarEntry) -> Ordering {
    b.resonance
        .partial_cmp(&a.resonance)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.seen_at.cmp(&a.seen_at))
}

/// Peer table keyed by signal id
#[derive(Debug)]
pub struct Radar {
    local_id: PeerId,
    stale_after: Duration,
    entries: HashMap<PeerId, RadarEntry>,
}

impl Radar {
    pub fn new(local_id: PeerId, stale_after: Duration) -> Self {
        Radar {
            local_id,
            stale_after,
            entries: HashMap::new(),
        }
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    /// Insert or replace the entry for the signal's peer
    ///
    /// Returns false for the local peer's own signal, which is never stored.
    pub fn upsert(&mut self, signal: GratiaSignal, seen_at: Timestamp, resonance: f64) -> bool {
        if signal.id == self.local_id {
            return false;
        }
        let entry = RadarEntry {
            signal,
            seen_at,
            resonance: clamp01(resonance),
        };
        self.entries.insert(entry.signal.id.clone(), entry);
        true
    }

    pub fn get(&self, id: &PeerId) -> Option<&RadarEntry> {
        self.entries.get(id)
    }

    /// All entries in rank order
    pub fn list(&self) -> Vec<RadarEntry> {
        let mut entries: Vec<RadarEntry> = self.entries.values().cloned().collect();
        entries.sort_by(rank);
        entries
    }

    /// Drop entries older than the staleness window; returns how many
    pub fn sweep(&mut self, now: Timestamp) -> usize {
        let before = self.entries.len();
        let window = self.stale_after;
        self.entries.retain(|_, entry| !now.is_stale(entry.seen_at, window));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Shared read/sweep view of a radar
#[derive(Clone, Debug)]
pub struct RadarHandle {
    radar: Arc<Mutex<Radar>>,
}

impl RadarHandle {
    pub fn new(radar: Radar) -> Self {
        RadarHandle {
            radar: Arc::new(Mutex::new(radar)),
        }
    }

    pub fn list(&self) -> Vec<RadarEntry> {
        self.radar.lock().list()
    }

    pub fn get(&self, id: &PeerId) -> Option<RadarEntry> {
        self.radar.lock().get(id).cloned()
    }

    pub fn sweep(&self, now: Timestamp) -> usize {
        self.radar.lock().sweep(now)
    }

    pub fn len(&self) -> usize {
        self.radar.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.radar.lock().is_empty()
    }

    pub(crate) fn upsert(&self, signal: GratiaSignal, seen_at: Timestamp, resonance: f64) -> bool {
        self.radar.lock().upsert(signal, seen_at, resonance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn radar() -> Radar {
        Radar::new(PeerId::from("me"), Duration::from_millis(60_000))
    }

    fn sig(id: &str) -> GratiaSignal {
        GratiaSignal::neutral(PeerId::from(id), Timestamp::ZERO)
    }

    #[test]
    fn test_radar_expiry_boundary() {
        let now = Timestamp::from_millis(1_000_000);
        let mut radar = radar();
        radar.upsert(sig("old"), now - Duration::from_millis(61_000), 0.5);
        radar.upsert(sig("fresh"), now - Duration::from_millis(59_000), 0.5);

        assert_eq!(radar.sweep(now), 1);
        assert!(radar.get(&PeerId::from("old")).is_none());
        assert!(radar.get(&PeerId::from("fresh")).is_some());
    }

    #[test]
    fn test_never_stores_self() {
        let mut radar = radar();
        assert!(!radar.upsert(sig("me"), Timestamp::ZERO, 1.0));
        assert!(radar.is_empty());
    }

    #[test]
    fn test_latest_arrival_wins() {
        let mut radar = radar();
        radar.upsert(sig("p"), Timestamp::from_millis(10), 0.9);
        radar.upsert(sig("p"), Timestamp::from_millis(20), 0.1);

        assert_eq!(radar.len(), 1);
        let entry = radar.get(&PeerId::from("p")).unwrap();
        assert_eq!(entry.seen_at, Timestamp::from_millis(20));
        assert_eq!(entry.resonance, 0.1);
    }

    #[test]
    fn test_list_order() {
        let mut radar = radar();
        radar.upsert(sig("low"), Timestamp::from_millis(50), 0.2);
        radar.upsert(sig("tie-old"), Timestamp::from_millis(10), 0.6);
        radar.upsert(sig("tie-new"), Timestamp::from_millis(30), 0.6);
        radar.upsert(sig("top"), Timestamp::from_millis(5), 0.9);

        let order: Vec<String> = radar.list().iter().map(|e| e.id().to_string()).collect();
        assert_eq!(order, vec!["top", "tie-new", "tie-old", "low"]);
    }

    #[test]
    fn test_resonance_clamped_on_insert() {
        let mut radar = radar();
        radar.upsert(sig("a"), Timestamp::ZERO, 4.2);
        radar.upsert(sig("b"), Timestamp::ZERO, -1.0);
        assert_eq!(radar.get(&PeerId::from("a")).unwrap().resonance, 1.0);
        assert_eq!(radar.get(&PeerId::from("b")).unwrap().resonance, 0.0);
    }

    proptest! {
        #[test]
        fn prop_list_is_ranked(entries in proptest::collection::vec((0u8..20, 0i64..1000, 0.0f64..=1.0), 0..30)) {
            let mut radar = radar();
            for (id, seen, res) in entries {
                radar.upsert(sig(&format!("p{id}")), Timestamp::from_millis(seen), res);
            }
            let list = radar.list();
            prop_assert_eq!(list.len(), radar.len());
            for pair in list.windows(2) {
                prop_assert!(rank(&pair[0], &pair[1]) != Ordering::Greater);
            }
        }
    }
}
