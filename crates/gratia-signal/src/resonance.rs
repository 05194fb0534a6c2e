//! Resonance - similarity of two presence signals
//!
//! The default weights are an untuned heuristic. Anything implementing
//! `Resonance` (including plain closures) can replace it.

use gratia_core::{clamp01, GratiaSignal};

pub const PHASE_WEIGHT: f64 = 0.4;
pub const MOOD_WEIGHT: f64 = 0.2;
pub const WHISPER_WEIGHT: f64 = 0.3;
pub const ENERGY_WEIGHT: f64 = 0.1;

/// Scores a remote signal against the local one, in [0, 1]
pub trait Resonance: Send + Sync {
    fn score(&self, local: &GratiaSignal, remote: &GratiaSignal) -> f64;
}

impl<F> Resonance for F
where
    F: Fn(&GratiaSignal, &GratiaSignal) -> f64 + Send + Sync,
{
    fn score(&self, local: &GratiaSignal, remote: &GratiaSignal) -> f64 {
        self(local, remote)
    }
}

/// Weighted facet match
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultResonance;

impl Resonance for DefaultResonance {
    fn score(&self, local: &GratiaSignal, remote: &GratiaSignal) -> f64 {
        default_resonance(local, remote)
    }
}

pub fn default_resonance(a: &GratiaSignal, b: &GratiaSignal) -> f64 {
    let mut score = 0.0;
    if a.phase == b.phase {
        score += PHASE_WEIGHT;
    }
    if a.mood == b.mood {
        score += MOOD_WEIGHT;
    }
    if let (Some(wa), Some(wb)) = (&a.whisper, &b.whisper) {
        if wa.to_lowercase() == wb.to_lowercase() {
            score += WHISPER_WEIGHT;
        }
    }
    if let (Some(ea), Some(eb)) = (a.energy, b.energy) {
        score += (ENERGY_WEIGHT - (ea - eb).abs()).max(0.0);
    }
    clamp01(score.min(1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gratia_core::{Mood, PeerId, Phase, Timestamp};
    use proptest::prelude::*;

    fn signal(phase: Phase, mood: Mood, whisper: Option<&str>, energy: Option<f64>) -> GratiaSignal {
        GratiaSignal {
            id: PeerId::from("x"),
            t: Timestamp::ZERO,
            phase,
            mood,
            whisper: whisper.map(str::to_string),
            seed: None,
            energy,
            signature: None,
        }
    }

    #[test]
    fn test_resonance_ceiling() {
        let a = signal(Phase::Presence, Mood::Focused, Some("Hello There"), Some(0.6));
        let b = signal(Phase::Presence, Mood::Focused, Some("hello there"), Some(0.6));
        assert_eq!(default_resonance(&a, &b), 1.0);
    }

    #[test]
    fn test_resonance_floor() {
        let a = signal(Phase::Companion, Mood::Soft, Some("rain"), Some(0.25));
        let b = signal(Phase::Archive, Mood::Celebratory, Some("sun"), Some(0.75));
        assert_eq!(default_resonance(&a, &b), 0.0);
    }

    #[test]
    fn test_partial_scores() {
        let a = signal(Phase::Presence, Mood::Soft, None, None);
        let b = signal(Phase::Presence, Mood::Focused, Some("x"), None);
        assert!((default_resonance(&a, &b) - 0.4).abs() < 1e-9);

        let c = signal(Phase::Archive, Mood::Soft, None, None);
        assert!((default_resonance(&a, &c) - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_whisper_needs_both_sides() {
        let a = signal(Phase::Archive, Mood::Soft, Some("x"), None);
        let b = signal(Phase::Presence, Mood::Focused, None, None);
        assert_eq!(default_resonance(&a, &b), 0.0);
    }

    #[test]
    fn test_energy_bonus_decays_with_distance() {
        let a = signal(Phase::Archive, Mood::Soft, None, Some(0.5));
        let near = signal(Phase::Presence, Mood::Focused, None, Some(0.5));
        let far = signal(Phase::Presence, Mood::Focused, None, Some(0.55));
        assert!((default_resonance(&a, &near) - 0.1).abs() < 1e-9);
        assert!((default_resonance(&a, &far) - 0.05).abs() < 1e-9);
    }

    #[test]
    fn test_closure_is_pluggable() {
        let always_half = |_: &GratiaSignal, _: &GratiaSignal| 0.5;
        let a = signal(Phase::Archive, Mood::Soft, None, None);
        assert_eq!(always_half.score(&a, &a), 0.5);
    }

    fn any_signal() -> impl Strategy<Value = GratiaSignal> {
        (
            0usize..3,
            0usize..4,
            proptest::option::of("[a-cA-C]{0,3}"),
            proptest::option::of(0.0f64..=1.0),
        )
            .prop_map(|(p, m, w, e)| GratiaSignal {
                id: PeerId::from("x"),
                t: Timestamp::ZERO,
                phase: Phase::ALL[p],
                mood: Mood::ALL[m],
                whisper: w,
                seed: None,
                energy: e,
                signature: None,
            })
    }

    proptest! {
        #[test]
        fn prop_resonance_in_unit_interval(a in any_signal(), b in any_signal()) {
            let score = default_resonance(&a, &b);
            prop_assert!((0.0..=1.0).contains(&score));
        }

        #[test]
        fn prop_resonance_symmetric(a in any_signal(), b in any_signal()) {
            prop_assert_eq!(default_resonance(&a, &b), default_resonance(&b, &a));
        }
    }
}
