//! Bot affect: the three continuous mood variables plus a free-text reflection.
//!
//! Valence is positivity (-1.0 to 1.0), energy is activation (0.0 to 1.0) and
//! bond is closeness to the user (0.0 to 1.0). Every constructor and mutator
//! clamps, so a `BotState` can never hold an out-of-range value.

use serde::{Deserialize, Serialize};

use crate::verdict::MoodVerdict;

pub const DEFAULT_VALENCE: f32 = 0.2;
pub const DEFAULT_ENERGY: f32 = 0.8;
pub const DEFAULT_BOND: f32 = 0.3;
pub const DEFAULT_REFLECTION: &str = "Feeling bright today, ready to chat.";

/// A turn counts as a persona shift when valence or bond moves more than this.
pub const VALENCE_SHIFT_THRESHOLD: f32 = 0.25;
pub const BOND_SHIFT_THRESHOLD: f32 = 0.2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotState {
    pub valence: f32,
    pub energy: f32,
    pub bond: f32,
    pub reflection: Option<String>,
}

impl Default for BotState {
    fn default() -> Self {
        Self {
            valence: DEFAULT_VALENCE,
            energy: DEFAULT_ENERGY,
            bond: DEFAULT_BOND,
            reflection: Some(DEFAULT_REFLECTION.to_string()),
        }
    }
}

/// Clamp into `[lo, hi]`, mapping NaN/inf to `fallback`.
pub fn clamp_unit(value: f32, lo: f32, hi: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value.clamp(lo, hi)
    } else {
        fallback
    }
}

impl BotState {
    pub fn new(valence: f32, energy: f32, bond: f32, reflection: Option<String>) -> Self {
        Self {
            valence: clamp_unit(valence, -1.0, 1.0, DEFAULT_VALENCE),
            energy: clamp_unit(energy, 0.0, 1.0, DEFAULT_ENERGY),
            bond: clamp_unit(bond, 0.0, 1.0, DEFAULT_BOND),
            reflection,
        }
    }

    /// Re-clamp all numeric fields in place.
    pub fn clamped(self) -> Self {
        Self::new(self.valence, self.energy, self.bond, self.reflection)
    }

    /// Apply a mood verdict. The bond scar is subtracted after the bond change.
    pub fn apply(&self, verdict: &MoodVerdict) -> Self {
        Self::new(
            self.valence + verdict.valence_change,
            self.energy + verdict.energy_change,
            self.bond + verdict.bond_change - verdict.bond_scar.max(0.0),
            self.reflection.clone(),
        )
    }

    /// Permanent bond reduction. Never raises bond.
    pub fn scarred(&self, penalty: f32) -> Self {
        let penalty = if penalty.is_finite() { penalty.max(0.0) } else { 0.0 };
        Self::new(
            self.valence,
            self.energy,
            (self.bond - penalty).max(0.0),
            self.reflection.clone(),
        )
    }

    pub fn mood_label(&self) -> &'static str {
        match self.valence {
            v if v > 0.6 => "elated",
            v if v > 0.3 => "cheerful",
            v if v > -0.1 => "calm",
            v if v > -0.4 => "low",
            _ => "upset",
        }
    }

    pub fn energy_label(&self) -> &'static str {
        match self.energy {
            e if e > 0.7 => "lively",
            e if e > 0.4 => "steady",
            e if e > 0.2 => "tired",
            _ => "drained",
        }
    }

    pub fn bond_label(&self) -> &'static str {
        match self.bond {
            b if b > 0.8 => "inseparable",
            b if b > 0.6 => "close",
            b if b > 0.35 => "friendly",
            b if b > 0.15 => "acquainted",
            _ => "distant",
        }
    }

    /// True when moving from `self` to `after` is a visible personality change.
    pub fn is_persona_shift(&self, after: &BotState) -> bool {
        (after.valence - self.valence).abs() > VALENCE_SHIFT_THRESHOLD
            || (after.bond - self.bond).abs() > BOND_SHIFT_THRESHOLD
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_clamps_every_field() {
        let s = BotState::new(5.0, -3.0, 2.0, None);
        assert_eq!(s.valence, 1.0);
        assert_eq!(s.energy, 0.0);
        assert_eq!(s.bond, 1.0);
    }

    #[test]
    fn test_non_finite_falls_back() {
        let s = BotState::new(f32::NAN, f32::INFINITY, f32::NEG_INFINITY, None);
        assert_eq!(s.valence, DEFAULT_VALENCE);
        assert_eq!(s.energy, DEFAULT_ENERGY);
        assert_eq!(s.bond, DEFAULT_BOND);
    }

    #[test]
    fn test_apply_subtracts_scar_after_change() {
        let s = BotState::new(0.0, 0.5, 0.5, None);
        let v = MoodVerdict {
            bond_change: 0.1,
            bond_scar: 0.3,
            ..MoodVerdict::neutral()
        };
        let next = s.apply(&v);
        assert!((next.bond - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_scar_never_raises_bond() {
        let s = BotState::new(0.0, 0.5, 0.4, None);
        assert!((s.scarred(-1.0).bond - 0.4).abs() < 1e-6);
        assert_eq!(s.scarred(0.9).bond, 0.0);
    }

    #[test]
    fn test_persona_shift_thresholds() {
        let base = BotState::new(0.0, 0.5, 0.5, None);
        assert!(!base.is_persona_shift(&BotState::new(0.2, 0.5, 0.6, None)));
        assert!(base.is_persona_shift(&BotState::new(0.3, 0.5, 0.5, None)));
        assert!(base.is_persona_shift(&BotState::new(0.0, 0.5, 0.25, None)));
    }

    #[test]
    fn test_labels() {
        let s = BotState::default();
        assert_eq!(s.mood_label(), "calm");
        assert_eq!(s.energy_label(), "lively");
        assert_eq!(s.bond_label(), "acquainted");
    }
}
