//! Energy sampling

use gratia_core::Timestamp;

/// Produces the energy reading attached to each outbound signal
pub trait EnergySampler: Send + Sync {
    fn sample(&self, now: Timestamp) -> f64;
}

impl<F> EnergySampler for F
where
    F: Fn(Timestamp) -> f64 + Send + Sync,
{
    fn sample(&self, now: Timestamp) -> f64 {
        self(now)
    }
}

/// Slow sawtooth over a 3 second period, within [0.4, 0.7)
#[derive(Clone, Copy, Debug, Default)]
pub struct DriftingEnergy;

impl EnergySampler for DriftingEnergy {
    fn sample(&self, now: Timestamp) -> f64 {
        0.4 + now.as_millis().rem_euclid(3_000) as f64 / 10_000.0
    }
}

/// Fixed energy
#[derive(Clone, Copy, Debug)]
pub struct ConstantEnergy(pub f64);

impl EnergySampler for ConstantEnergy {
    fn sample(&self, _now: Timestamp) -> f64 {
        self.0
    }
}
