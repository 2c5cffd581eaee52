//! Relationship growth rules: XP curve, time gates, trust bands, maturity.
//!
//! Everything here is pure. The stateful engine in `kindred_memory` reads a
//! `RelationshipState`, calls [`advance`], and persists the result.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipState {
    pub level: u32,
    pub current_xp: i64,
    pub total_xp: i64,
    pub trust_score: f32,
    pub days_active: i64,
    pub last_interaction_date: NaiveDate,
}

impl RelationshipState {
    /// The state a brand new relationship starts in.
    pub fn fresh(today: NaiveDate) -> Self {
        Self {
            level: 1,
            current_xp: 0,
            total_xp: 0,
            trust_score: 0.5,
            days_active: 1,
            last_interaction_date: today,
        }
    }

    pub fn maturity(&self) -> MaturityStage {
        MaturityStage::for_level(self.level)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct XpCurve {
    pub base_xp: f64,
    pub growth_factor: f64,
}

impl Default for XpCurve {
    fn default() -> Self {
        Self {
            base_xp: 100.0,
            growth_factor: 1.5,
        }
    }
}

impl XpCurve {
    /// XP needed to leave `level`: `round(base * factor^(level-1))`.
    pub fn required_for_next(&self, level: u32) -> i64 {
        let exp = level.saturating_sub(1) as i32;
        (self.base_xp * self.growth_factor.powi(exp)).round() as i64
    }
}

/// Minimum active days before `target_level` can be reached.
pub fn time_gate(target_level: u32) -> i64 {
    match target_level {
        3 => 1,
        4 => 3,
        5 => 7,
        10 => 30,
        _ => 0,
    }
}

/// Map a judged XP change onto a trust delta.
///
/// Bands are checked strongest first on each side, so `-6` lands in the
/// harsh `<= -5` band rather than the mild `< 0` band.
pub fn trust_change(xp_change: i32) -> f32 {
    if xp_change >= 5 {
        0.02
    } else if xp_change > 0 {
        0.005
    } else if xp_change <= -5 {
        -0.05
    } else if xp_change < 0 {
        -0.01
    } else {
        0.0
    }
}

/// Outcome of applying one interaction's XP to a relationship.
#[derive(Debug, Clone, PartialEq)]
pub struct XpStep {
    pub state: RelationshipState,
    pub trust_change: f32,
    pub level_up: bool,
    /// XP threshold met but the time gate held the level back.
    pub gated: bool,
}

/// Apply `xp_change` to `state`. At most one level is gained per call and
/// gated XP stays in `current_xp` until the day requirement is met.
pub fn advance(state: &RelationshipState, xp_change: i32, curve: &XpCurve) -> XpStep {
    let mut next = state.clone();
    let delta = trust_change(xp_change);

    next.current_xp = (state.current_xp + xp_change as i64).max(0);
    next.total_xp = state.total_xp + (xp_change as i64).max(0);
    next.trust_score = (state.trust_score + delta).clamp(0.0, 1.0);

    let required = curve.required_for_next(state.level);
    let target = state.level + 1;
    let mut level_up = false;
    let mut gated = false;
    if next.current_xp >= required {
        if next.days_active >= time_gate(target) {
            next.level = target;
            next.current_xp -= required;
            level_up = true;
        } else {
            gated = true;
        }
    }

    XpStep {
        state: next,
        trust_change: delta,
        level_up,
        gated,
    }
}

// ============================================================================
// Maturity
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaturityStage {
    Teenage,
    Student,
    Soulmate,
}

impl MaturityStage {
    pub fn for_level(level: u32) -> Self {
        match level {
            0..=4 => MaturityStage::Teenage,
            5..=9 => MaturityStage::Student,
            _ => MaturityStage::Soulmate,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MaturityStage::Teenage => "teenage",
            MaturityStage::Student => "student",
            MaturityStage::Soulmate => "soulmate",
        }
    }

    /// Communication-style descriptor handed to the prompt builder.
    pub fn instruction(&self) -> &'static str {
        match self {
            MaturityStage::Teenage => {
                "Talk like a bubbly teenager: short messages, lots of emoji, playful teasing, \
                 quick to sulk and quick to forgive."
            }
            MaturityStage::Student => {
                "Talk like a thoughtful university student: warmer and steadier, curious about \
                 the user's day, jokes are gentler and advice is more considered."
            }
            MaturityStage::Soulmate => {
                "Talk like a long-time soulmate: calm, deeply attentive, refer to shared history \
                 naturally and say what you feel without games."
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn state(level: u32, xp: i64, days: i64) -> RelationshipState {
        RelationshipState {
            level,
            current_xp: xp,
            total_xp: xp,
            trust_score: 0.5,
            days_active: days,
            last_interaction_date: day(1),
        }
    }

    #[test]
    fn test_required_xp_curve() {
        let c = XpCurve::default();
        assert_eq!(c.required_for_next(1), 100);
        assert_eq!(c.required_for_next(2), 150);
        assert_eq!(c.required_for_next(3), 225);
        assert_eq!(c.required_for_next(4), 338);
    }

    #[test]
    fn test_time_gate_table() {
        assert_eq!(time_gate(2), 0);
        assert_eq!(time_gate(3), 1);
        assert_eq!(time_gate(4), 3);
        assert_eq!(time_gate(5), 7);
        assert_eq!(time_gate(10), 30);
        assert_eq!(time_gate(11), 0);
    }

    #[test]
    fn test_trust_bands() {
        assert_eq!(trust_change(10), 0.02);
        assert_eq!(trust_change(5), 0.02);
        assert_eq!(trust_change(4), 0.005);
        assert_eq!(trust_change(1), 0.005);
        assert_eq!(trust_change(0), 0.0);
        assert_eq!(trust_change(-1), -0.01);
        assert_eq!(trust_change(-4), -0.01);
        assert_eq!(trust_change(-5), -0.05);
        assert_eq!(trust_change(-6), -0.05);
    }

    #[test]
    fn test_gate_blocks_and_preserves_xp() {
        let step = advance(&state(2, 300, 0), 0, &XpCurve::default());
        assert!(!step.level_up);
        assert!(step.gated);
        assert_eq!(step.state.level, 2);
        assert_eq!(step.state.current_xp, 300);
    }

    #[test]
    fn test_gate_met_levels_up_with_carry() {
        let step = advance(&state(2, 300, 2), 0, &XpCurve::default());
        assert!(step.level_up);
        assert_eq!(step.state.level, 3);
        assert_eq!(step.state.current_xp, 150);
    }

    #[test]
    fn test_fresh_state_small_gain() {
        let fresh = RelationshipState::fresh(day(1));
        let step = advance(&fresh, 8, &XpCurve::default());
        assert_eq!(step.state.current_xp, 8);
        assert!((step.state.trust_score - 0.52).abs() < 1e-6);
        assert!((step.trust_change - 0.02).abs() < 1e-6);
        assert!(!step.level_up);
    }

    #[test]
    fn test_negative_xp_floors_at_zero_and_total_unchanged() {
        let step = advance(&state(1, 3, 1), -5, &XpCurve::default());
        assert_eq!(step.state.current_xp, 0);
        assert_eq!(step.state.total_xp, 3);
    }

    #[test]
    fn test_trust_clamped() {
        let mut s = state(1, 0, 1);
        s.trust_score = 0.99;
        assert_eq!(advance(&s, 10, &XpCurve::default()).state.trust_score, 1.0);
        s.trust_score = 0.01;
        assert_eq!(advance(&s, -5, &XpCurve::default()).state.trust_score, 0.0);
    }

    #[test]
    fn test_maturity_bands() {
        assert_eq!(MaturityStage::for_level(1), MaturityStage::Teenage);
        assert_eq!(MaturityStage::for_level(4), MaturityStage::Teenage);
        assert_eq!(MaturityStage::for_level(5), MaturityStage::Student);
        assert_eq!(MaturityStage::for_level(9), MaturityStage::Student);
        assert_eq!(MaturityStage::for_level(10), MaturityStage::Soulmate);
        assert_eq!(MaturityStage::for_level(42), MaturityStage::Soulmate);
    }
}
