use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::growth::XpCurve;

// ============================================================================
// Top-level config
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct KindredConfig {
    pub llm: LlmConfig,
    pub storage: StorageConfig,
    pub persona: PersonaConfig,
    pub session: SessionConfig,
    pub growth: GrowthConfig,
    pub memory: MemoryConfig,
    pub consolidation: ConsolidationConfig,
    pub heartbeat: HeartbeatSettings,
    pub background: BackgroundConfig,
    pub scheduler: SchedulerConfig,
}

impl KindredConfig {
    /// Load config from a TOML file, falling back to defaults for missing fields.
    /// After loading, env var overrides are applied.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let mut config: KindredConfig =
            toml::from_str(&content).with_context(|| "Failed to parse TOML config")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Try to load from path; if the file is missing or broken, return defaults with env overrides.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::info!("Config file not found or invalid ({}), using defaults", e);
                let mut cfg = Self::default();
                cfg.apply_env_overrides();
                cfg
            }
        }
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("KINDRED_DB_PATH") {
            self.storage.db_path = v;
        }
        if let Ok(v) = std::env::var("KINDRED_LLM_MODEL") {
            self.llm.model = v;
        }
        match std::env::var("KINDRED_LLM_BASE_URL") {
            Ok(v) => self.llm.base_url = v,
            Err(_) => {
                if let Ok(v) = std::env::var("OLLAMA_HOST") {
                    self.llm.base_url = v;
                }
            }
        }
        if let Ok(v) = std::env::var("KINDRED_LLM_TIMEOUT_SECS") {
            if let Ok(n) = v.parse() {
                self.llm.timeout_secs = n;
            }
        }
        if let Ok(v) = std::env::var("KINDRED_SESSION_GAP_HOURS") {
            if let Ok(n) = v.parse() {
                self.session.idle_gap_hours = n;
            }
        }
    }
}

// ============================================================================
// Sub-configs
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    /// Judges want near-deterministic output.
    pub judge_temperature: f32,
    /// Deadline for each Judge/Summarizer call. Elapsed means fallback.
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "qwen2.5:3b-instruct".to_string(),
            temperature: 0.7,
            judge_temperature: 0.1,
            timeout_secs: 20,
            max_retries: 2,
        }
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: "kindred.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PersonaConfig {
    pub name: String,
    pub default_reflection: String,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            name: "Linh".to_string(),
            default_reflection: crate::affect::DEFAULT_REFLECTION.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Idle time after which the next message opens a new session.
    pub idle_gap_hours: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_gap_hours: crate::temporal::DEFAULT_SESSION_GAP_HOURS,
        }
    }
}

impl SessionConfig {
    pub fn idle_gap(&self) -> chrono::Duration {
        chrono::Duration::hours(self.idle_gap_hours.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GrowthConfig {
    pub base_xp: f64,
    pub growth_factor: f64,
}

impl Default for GrowthConfig {
    fn default() -> Self {
        let curve = XpCurve::default();
        Self {
            base_xp: curve.base_xp,
            growth_factor: curve.growth_factor,
        }
    }
}

impl GrowthConfig {
    pub fn curve(&self) -> XpCurve {
        XpCurve {
            base_xp: self.base_xp,
            growth_factor: self.growth_factor,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub recall_limit: u32,
    pub decay_grace_days: i64,
    pub decay_interval_secs: i64,
    pub default_sensitivity: f32,
    pub breaking_point_sensitivity: f32,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            recall_limit: 5,
            decay_grace_days: 7,
            decay_interval_secs: 3600,
            default_sensitivity: 0.1,
            breaking_point_sensitivity: 0.8,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConsolidationConfig {
    pub pattern_lookback_days: u32,
    /// Token-set similarity at or above which two pattern descriptions are the same pattern.
    pub pattern_similarity: f32,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            pattern_lookback_days: 7,
            pattern_similarity: 0.8,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HeartbeatSettings {
    pub interval_secs: u64,
    pub check_in_after_secs: u64,
    pub escalate_after_secs: u64,
    pub spontaneous_after_secs: u64,
    pub spontaneous_chance: f64,
    pub max_spontaneous_per_day: u32,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            check_in_after_secs: 300,
            escalate_after_secs: 900,
            spontaneous_after_secs: 1800,
            spontaneous_chance: 0.3,
            max_spontaneous_per_day: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackgroundConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    /// Ask the Judge to score every reply after the turn.
    pub self_evaluation: bool,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_capacity: 64,
            self_evaluation: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub tick_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { tick_secs: 600 }
    }
}

// ============================================================================
// Tests
// ============================================================================
