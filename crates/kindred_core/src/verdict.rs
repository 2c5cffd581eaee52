//! Structured judgments returned by the external Judge.
//!
//! Model output is noisy: numbers arrive as strings or floats, enum values in
//! odd casing, fields go missing. Every field here defaults and the numeric
//! fields accept any JSON number or numeric string.

use serde::{Deserialize, Deserializer, Serialize};

// ============================================================================
// Lenient field decoding
// ============================================================================

#[derive(Deserialize)]
#[serde(untagged)]
enum Numberish {
    Num(f64),
    Text(String),
    Flag(bool),
}

impl Numberish {
    fn as_f64(&self) -> Option<f64> {
        match self {
            Numberish::Num(n) if n.is_finite() => Some(*n),
            Numberish::Num(_) => None,
            Numberish::Text(s) => s
                .trim()
                .trim_start_matches('+')
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite()),
            Numberish::Flag(b) => Some(if *b { 1.0 } else { 0.0 }),
        }
    }
}

fn lenient_f32<'de, D: Deserializer<'de>>(d: D) -> Result<f32, D::Error> {
    let raw = Option::<Numberish>::deserialize(d)?;
    Ok(raw.and_then(|n| n.as_f64()).unwrap_or(0.0) as f32)
}

fn lenient_i32<'de, D: Deserializer<'de>>(d: D) -> Result<i32, D::Error> {
    let raw = Option::<Numberish>::deserialize(d)?;
    Ok(raw.and_then(|n| n.as_f64()).map(|n| n.round() as i32).unwrap_or(0))
}

fn lenient_bool<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    let raw = Option::<Numberish>::deserialize(d)?;
    Ok(match raw {
        Some(Numberish::Flag(b)) => b,
        Some(Numberish::Text(s)) => {
            matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "yes" | "1")
        }
        Some(Numberish::Num(n)) => n != 0.0,
        None => false,
    })
}

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(d)?.unwrap_or_default())
}

// ============================================================================
// Interaction judging
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    #[default]
    Neutral,
    Negative,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Neutral => "neutral",
            Sentiment::Negative => "negative",
        }
    }

    pub fn parse_str(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "positive" | "happy" | "good" => Sentiment::Positive,
            "negative" | "sad" | "angry" | "bad" => Sentiment::Negative,
            _ => Sentiment::Neutral,
        }
    }
}

impl<'de> Deserialize<'de> for Sentiment {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(d)?;
        Ok(raw.map(|s| Sentiment::parse_str(&s)).unwrap_or_default())
    }
}

pub const XP_CHANGE_MIN: i32 = -5;
pub const XP_CHANGE_MAX: i32 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionVerdict {
    #[serde(default, deserialize_with = "lenient_i32")]
    pub xp_change: i32,
    #[serde(default)]
    pub sentiment: Sentiment,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub is_core_memory: bool,
    #[serde(default, deserialize_with = "lenient_string")]
    pub memory_type: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub reason: String,
}

impl InteractionVerdict {
    /// Deterministic stand-in when the Judge is unreachable or incoherent.
    pub fn fallback(text: &str) -> Self {
        let words = text.split_whitespace().count();
        Self {
            xp_change: if words > 10 { 2 } else { 1 },
            sentiment: Sentiment::Neutral,
            is_core_memory: false,
            memory_type: "daily".to_string(),
            reason: "fallback heuristic".to_string(),
        }
    }

    /// Clamp `xp_change` into the range the growth rules accept.
    pub fn sanitized(mut self) -> Self {
        self.xp_change = self.xp_change.clamp(XP_CHANGE_MIN, XP_CHANGE_MAX);
        if self.memory_type.trim().is_empty() {
            self.memory_type = "daily".to_string();
        }
        self
    }
}

// ============================================================================
// Mood pre-processing
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoodVerdict {
    #[serde(default, deserialize_with = "lenient_f32")]
    pub valence_change: f32,
    #[serde(default, deserialize_with = "lenient_f32")]
    pub energy_change: f32,
    #[serde(default, deserialize_with = "lenient_f32")]
    pub bond_change: f32,
    #[serde(default, deserialize_with = "lenient_f32")]
    pub bond_scar: f32,
    #[serde(default, deserialize_with = "lenient_string")]
    pub micro_mood: String,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub is_breaking_point: bool,
}

impl MoodVerdict {
    pub fn neutral() -> Self {
        Self {
            valence_change: 0.0,
            energy_change: 0.0,
            bond_change: 0.0,
            bond_scar: 0.0,
            micro_mood: "steady".to_string(),
            is_breaking_point: false,
        }
    }

    pub fn sanitized(mut self) -> Self {
        self.valence_change = self.valence_change.clamp(-1.0, 1.0);
        self.energy_change = self.energy_change.clamp(-1.0, 1.0);
        self.bond_change = self.bond_change.clamp(-1.0, 1.0);
        self.bond_scar = self.bond_scar.clamp(0.0, 1.0);
        if self.micro_mood.trim().is_empty() {
            self.micro_mood = "steady".to_string();
        }
        self
    }
}

// ============================================================================
// Post-turn archiving
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileUpdate {
    #[serde(default, deserialize_with = "lenient_string")]
    pub key: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub value: String,
    #[serde(default, deserialize_with = "lenient_f32")]
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraitObservation {
    #[serde(rename = "trait", default, deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_f32")]
    pub strength: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeDraft {
    #[serde(default, deserialize_with = "lenient_string")]
    pub content: String,
    #[serde(default, deserialize_with = "lenient_i32")]
    pub importance: i32,
    #[serde(default, deserialize_with = "lenient_string")]
    pub emotion: String,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub is_core: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArchiveVerdict {
    #[serde(default)]
    pub profile_updates: Vec<ProfileUpdate>,
    #[serde(default)]
    pub self_image_updates: Vec<TraitObservation>,
    #[serde(default)]
    pub episode: Option<EpisodeDraft>,
}

impl ArchiveVerdict {
    /// Drop entries with empty keys, empty trait names or empty episode text.
    pub fn sanitized(mut self) -> Self {
        self.profile_updates
            .retain(|u| !u.key.trim().is_empty() && !u.value.trim().is_empty());
        self.self_image_updates.retain(|t| !t.name.trim().is_empty());
        if self
            .episode
            .as_ref()
            .is_some_and(|e| e.content.trim().is_empty())
        {
            self.episode = None;
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.profile_updates.is_empty()
            && self.self_image_updates.is_empty()
            && self.episode.is_none()
    }
}

// ============================================================================
// Pattern detection
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternCandidate {
    #[serde(rename = "type", default, deserialize_with = "lenient_string")]
    pub pattern_type: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub description: String,
    #[serde(default, deserialize_with = "lenient_f32")]
    pub confidence: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternReport {
    #[serde(default)]
    pub patterns: Vec<PatternCandidate>,
}

// ============================================================================
// Response self-evaluation
// ============================================================================

pub const SCORE_MIN: i32 = 1;
pub const SCORE_MAX: i32 = 5;
const SCORE_DEFAULT: i32 = 3;

fn default_score() -> i32 {
    SCORE_DEFAULT
}

fn lenient_score<'de, D: Deserializer<'de>>(d: D) -> Result<i32, D::Error> {
    let raw = Option::<Numberish>::deserialize(d)?;
    Ok(raw
        .and_then(|n| n.as_f64())
        .map(|n| n.round() as i32)
        .unwrap_or(SCORE_DEFAULT))
}

/// How the companion rates one of its own replies, each score on `1..=5`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityVerdict {
    #[serde(default = "default_score", deserialize_with = "lenient_score")]
    pub relevance: i32,
    #[serde(default = "default_score", deserialize_with = "lenient_score")]
    pub creativity: i32,
    #[serde(default = "default_score", deserialize_with = "lenient_score")]
    pub personality: i32,
    #[serde(default, deserialize_with = "lenient_string")]
    pub critique: String,
}

impl QualityVerdict {
    pub fn sanitized(mut self) -> Self {
        self.relevance = self.relevance.clamp(SCORE_MIN, SCORE_MAX);
        self.creativity = self.creativity.clamp(SCORE_MIN, SCORE_MAX);
        self.personality = self.personality.clamp(SCORE_MIN, SCORE_MAX);
        self.critique = self.critique.trim().to_string();
        self
    }
}
