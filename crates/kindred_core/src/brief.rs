use serde::{Deserialize, Serialize};

use crate::affect::BotState;
use crate::growth::MaturityStage;
use crate::judge::ChatMessage;

/// Everything the reply generator needs to stay in character for one turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaBrief {
    pub persona_name: String,
    pub state: BotState,
    pub micro_mood: String,
    pub maturity: MaturityStage,
    pub level: u32,
    pub trust_score: f32,
    pub memories: Vec<String>,
    pub profile: Vec<(String, String)>,
    pub self_image: Vec<(String, f32)>,
    pub time_context: String,
    pub history: Vec<ChatMessage>,
    /// Set on the first turn of a session.
    pub yesterday_summary: Option<String>,
    pub greeting_hint: Option<String>,
}

impl PersonaBrief {
    /// Render the brief as a plain-text system prompt section.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "You are {}. Mood: {} ({}), energy {}, bond {} with the user. Micro mood: {}.\n",
            self.persona_name,
            self.state.mood_label(),
            format_signed(self.state.valence),
            self.state.energy_label(),
            self.state.bond_label(),
            self.micro_mood
        ));
        out.push_str(&format!(
            "Relationship level {} (trust {:.2}). Style: {}\n",
            self.level,
            self.trust_score,
            self.maturity.instruction()
        ));
        if let Some(reflection) = &self.state.reflection {
            out.push_str(&format!("Your current thought: {}\n", reflection));
        }
        out.push_str(&format!("Time: {}\n", self.time_context));
        if !self.self_image.is_empty() {
            let traits: Vec<String> = self
                .self_image
                .iter()
                .map(|(t, s)| format!("{} {:.1}", t, s))
                .collect();
            out.push_str(&format!("How you see yourself: {}\n", traits.join(", ")));
        }
        if !self.profile.is_empty() {
            out.push_str("What you know about the user:\n");
            for (k, v) in &self.profile {
                out.push_str(&format!("- {}: {}\n", k, v));
            }
        }
        if !self.memories.is_empty() {
            out.push_str("Things you remember:\n");
            for m in &self.memories {
                out.push_str(&format!("- {}\n", m));
            }
        }
        if let Some(summary) = &self.yesterday_summary {
            out.push_str(&format!("Yesterday: {}\n", summary));
        }
        if let Some(hint) = &self.greeting_hint {
            out.push_str(&format!(
                "This is a new conversation. A greeting in your voice: {}\n",
                hint
            ));
        }
        out
    }
}

fn format_signed(v: f32) -> String {
    format!("{:+.2}", v)
}
