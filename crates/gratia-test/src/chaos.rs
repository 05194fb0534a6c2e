//! Chaos carrier
//!
//! Wraps a `SignalChannel` and degrades what goes out through it:
//! - Loss
//! - Latency with uniform jitter, which also reorders
//! - Duplication
//!
//! Delayed deliveries are armed on the scheduler, so under a
//! `ManualScheduler` the whole run is deterministic for a given seed.

use std::sync::Arc;
use std::time::Duration;

use gratia_core::{GratiaResult, GratiaSignal, Subscription};
use gratia_signal::{SignalChannel, SignalHandler};
use gratia_time::Scheduler;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Clone, Debug)]
pub struct ChaosConfig {
    pub base_latency: Duration,
    /// Upper bound of the uniform extra delay
    pub max_jitter: Duration,
    /// Packet loss rate (0.0 - 1.0)
    pub loss_rate: f64,
    pub duplicate_prob: f64,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self::perfect()
    }
}

impl ChaosConfig {
    /// Synchronous, lossless delivery
    pub fn perfect() -> Self {
        ChaosConfig {
            base_latency: Duration::ZERO,
            max_jitter: Duration::ZERO,
            loss_rate: 0.0,
            duplicate_prob: 0.0,
        }
    }

    pub fn good() -> Self {
        ChaosConfig {
            base_latency: Duration::from_millis(20),
            max_jitter: Duration::from_millis(10),
            loss_rate: 0.001,
            duplicate_prob: 0.001,
        }
    }

    pub fn poor() -> Self {
        ChaosConfig {
            base_latency: Duration::from_millis(100),
            max_jitter: Duration::from_millis(150),
            loss_rate: 0.05,
            duplicate_prob: 0.02,
        }
    }

    /// Hostile network conditions
    pub fn hostile() -> Self {
        ChaosConfig {
            base_latency: Duration::from_millis(200),
            max_jitter: Duration::from_millis(800),
            loss_rate: 0.3,
            duplicate_prob: 0.05,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChaosStats {
    pub sent: u64,
    pub lost: u64,
    pub duplicated: u64,
}

impl ChaosStats {
    pub fn loss_rate(&self) -> f64 {
        if self.sent == 0 {
            0.0
        } else {
            self.lost as f64 / self.sent as f64
        }
    }

    pub fn merge(&mut self, other: &ChaosStats) {
        self.sent += other.sent;
        self.lost += other.lost;
        self.duplicated += other.duplicated;
    }
}

pub struct ChaosChannel {
    inner: Arc<dyn SignalChannel>,
    scheduler: Arc<dyn Scheduler>,
    config: ChaosConfig,
    rng: Mutex<StdRng>,
    stats: Mutex<ChaosStats>,
}

impl ChaosChannel {
    pub fn new(
        inner: Arc<dyn SignalChannel>,
        scheduler: Arc<dyn Scheduler>,
        config: ChaosConfig,
        seed: u64,
    ) -> Self {
        ChaosChannel {
            inner,
            scheduler,
            config,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            stats: Mutex::new(ChaosStats::default()),
        }
    }

    pub fn config(&self) -> &ChaosConfig {
        &self.config
    }

    pub fn stats(&self) -> ChaosStats {
        self.stats.lock().clone()
    }

    /// Delays for each copy to deliver; empty when the packet is lost
    fn plan(&self) -> Vec<Duration> {
        let mut rng = self.rng.lock();
        let mut stats = self.stats.lock();
        stats.sent += 1;

        if rng.gen::<f64>() < self.config.loss_rate {
            stats.lost += 1;
            return Vec::new();
        }
        let copies = if rng.gen::<f64>() < self.config.duplicate_prob {
            stats.duplicated += 1;
            2
        } else {
            1
        };

        let jitter_ms = self.config.max_jitter.as_millis() as u64;
        (0..copies)
            .map(|_| {
                let jitter = if jitter_ms == 0 {
                    0
                } else {
                    rng.gen_range(0..=jitter_ms)
                };
                self.config.base_latency + Duration::from_millis(jitter)
            })
            .collect()
    }

    fn deliver(inner: &dyn SignalChannel, signal: &GratiaSignal) {
        if let Err(e) = inner.send(signal) {
            tracing::trace!(error = %e, "chaos delivery failed");
        }
    }
}

impl SignalChannel for ChaosChannel {
    fn send(&self, signal: &GratiaSignal) -> GratiaResult<()> {
        for delay in self.plan() {
            if delay.is_zero() {
                Self::deliver(self.inner.as_ref(), signal);
                continue;
            }
            let inner = Arc::clone(&self.inner);
            let signal = signal.clone();
            self.scheduler.arm_once(
                delay,
                Box::new(move || Self::deliver(inner.as_ref(), &signal)),
            );
        }
        Ok(())
    }

    fn subscribe(&self, handler: SignalHandler) -> Subscription {
        self.inner.subscribe(handler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gratia_core::{PeerId, Timestamp};
    use gratia_signal::LocalChannel;
    use gratia_time::ManualScheduler;

    fn setup(config: ChaosConfig, seed: u64) -> (Arc<ManualScheduler>, ChaosChannel, Arc<Mutex<Vec<Timestamp>>>) {
        let sched = Arc::new(ManualScheduler::new());
        let medium = Arc::new(LocalChannel::new());
        let arrivals = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&arrivals);
        let clock = Arc::clone(&sched);
        let _sub = medium.subscribe(Box::new(move |_| sink.lock().push(clock.now())));
        let chaos = ChaosChannel::new(medium, sched.clone(), config, seed);
        (sched, chaos, arrivals)
    }

    fn signal() -> GratiaSignal {
        GratiaSignal::neutral(PeerId::from("alice"), Timestamp::ZERO)
    }

    #[test]
    fn test_perfect_is_synchronous() {
        let (_sched, chaos, arrivals) = setup(ChaosConfig::perfect(), 1);
        chaos.send(&signal()).unwrap();
        assert_eq!(*arrivals.lock(), vec![Timestamp::ZERO]);
        assert_eq!(chaos.stats(), ChaosStats { sent: 1, lost: 0, duplicated: 0 });
    }

    #[test]
    fn test_latency_is_applied() {
        let config = ChaosConfig {
            base_latency: Duration::from_millis(100),
            ..ChaosConfig::perfect()
        };
        let (sched, chaos, arrivals) = setup(config, 1);
        chaos.send(&signal()).unwrap();
        assert!(arrivals.lock().is_empty());

        sched.advance(Duration::from_millis(99));
        assert!(arrivals.lock().is_empty());
        sched.advance(Duration::from_millis(1));
        assert_eq!(*arrivals.lock(), vec![Timestamp::from_millis(100)]);
    }

    #[test]
    fn test_total_loss() {
        let config = ChaosConfig {
            loss_rate: 1.0,
            ..ChaosConfig::perfect()
        };
        let (sched, chaos, arrivals) = setup(config, 7);
        for _ in 0..10 {
            chaos.send(&signal()).unwrap();
        }
        sched.advance(Duration::from_secs(1));
        assert!(arrivals.lock().is_empty());
        assert_eq!(chaos.stats().loss_rate(), 1.0);
    }

    #[test]
    fn test_duplicates_arrive_twice() {
        let config = ChaosConfig {
            duplicate_prob: 1.0,
            ..ChaosConfig::perfect()
        };
        let (_sched, chaos, arrivals) = setup(config, 3);
        chaos.send(&signal()).unwrap();
        assert_eq!(arrivals.lock().len(), 2);
        assert_eq!(chaos.stats().duplicated, 1);
    }

    #[test]
    fn test_same_seed_same_outcome() {
        let run = |seed| {
            let (sched, chaos, arrivals) = setup(ChaosConfig::hostile(), seed);
            for _ in 0..50 {
                chaos.send(&signal()).unwrap();
            }
            sched.advance(Duration::from_secs(2));
            let out = arrivals.lock().clone();
            (out, chaos.stats())
        };
        assert_eq!(run(42), run(42));
    }

    #[test]
    fn test_hostile_loses_some() {
        let (sched, chaos, arrivals) = setup(ChaosConfig::hostile(), 9);
        for _ in 0..200 {
            chaos.send(&signal()).unwrap();
        }
        sched.advance(Duration::from_secs(2));
        let stats = chaos.stats();
        assert!(stats.lost > 20 && stats.lost < 120, "lost {}", stats.lost);
        assert_eq!(
            arrivals.lock().len() as u64,
            stats.sent - stats.lost + stats.duplicated
        );
    }
}
