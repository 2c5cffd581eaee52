//! Heartbeat configuration for the attention loop
//!
//! The heartbeat decides how often idle time is re-evaluated, and the
//! thresholds decide what a given stretch of silence means.

use kindred_core::config::HeartbeatSettings;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// How often the loop wakes up (default: 30s)
    pub interval: Duration,
    /// Silence after a proactive message before checking in.
    pub check_in_after: Duration,
    /// Silence after the check-in before escalating.
    pub escalate_after: Duration,
    /// Silence in the idle state before a spontaneous opener is considered.
    pub spontaneous_after: Duration,
    pub spontaneous_chance: f64,
    pub max_spontaneous_per_day: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self::from_settings(&HeartbeatSettings::default())
    }
}

impl HeartbeatConfig {
    pub fn from_settings(s: &HeartbeatSettings) -> Self {
        Self {
            interval: Duration::from_secs(s.interval_secs.max(1)),
            check_in_after: Duration::from_secs(s.check_in_after_secs),
            escalate_after: Duration::from_secs(s.escalate_after_secs),
            spontaneous_after: Duration::from_secs(s.spontaneous_after_secs),
            spontaneous_chance: s.spontaneous_chance.clamp(0.0, 1.0),
            max_spontaneous_per_day: s.max_spontaneous_per_day,
        }
    }

    /// Tight thresholds for tests
    pub fn testing() -> Self {
        Self {
            interval: Duration::from_secs(1),
            check_in_after: Duration::from_secs(5),
            escalate_after: Duration::from_secs(10),
            spontaneous_after: Duration::from_secs(20),
            spontaneous_chance: 1.0,
            max_spontaneous_per_day: 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_settings_clamps() {
        let s = HeartbeatSettings {
            interval_secs: 0,
            spontaneous_chance: 4.0,
            ..HeartbeatSettings::default()
        };
        let c = HeartbeatConfig::from_settings(&s);
        assert_eq!(c.interval, Duration::from_secs(1));
        assert_eq!(c.spontaneous_chance, 1.0);
        assert_eq!(c.check_in_after, Duration::from_secs(300));
    }
}
