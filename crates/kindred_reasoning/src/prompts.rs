//! Prompt text for each judgment. Every judge prompt asks for a single JSON
//! object whose fields match the verdict types in `kindred_core::verdict`.

use chrono::{Local, NaiveDate, TimeZone};
use kindred_core::ChatMessage;

pub const INTERACTION_SYSTEM: &str = r#"You grade one message a user sent to their companion.
Reply with a single JSON object and nothing else:
{"xp_change": integer from -5 to 10, "sentiment": "positive" | "neutral" | "negative",
 "is_core_memory": true | false, "memory_type": short label, "reason": one short sentence}
Warm, personal or vulnerable messages earn more XP. Insults and hostility are negative.
Mark is_core_memory only for turning points in the relationship."#;

pub const MOOD_SYSTEM: &str = r#"You estimate how a message shifts the companion's feelings before it replies.
Reply with a single JSON object and nothing else:
{"valence_change": -0.5 to 0.5, "energy_change": -0.2 to 0.2, "bond_change": -0.3 to 0.3,
 "bond_scar": 0 to 0.2, "micro_mood": one or two words, "is_breaking_point": true | false}
bond_scar is a lasting wound; use it only for serious conflict or cruelty.
is_breaking_point means the message could change who the companion is."#;

pub const ARCHIVE_SYSTEM: &str = r#"You archive one exchange between the user and the companion.
Reply with a single JSON object and nothing else:
{"profile_updates": [{"key": string, "value": string, "confidence": 0.0-1.0}],
 "self_image_updates": [{"trait": string, "strength": 0.0-1.0}],
 "episode": {"content": string, "importance": 1-5, "emotion": string, "is_core": true | false} or null}
profile_updates hold facts about the USER only, never about the companion.
self_image_updates hold traits the COMPANION just showed.
Leave the episode null for small talk."#;

pub const PATTERN_SYSTEM: &str = r#"You read summaries of recent days and find recurring behaviour of the user.
Reply with a single JSON object and nothing else:
{"patterns": [{"type": "habit" | "emotional" | "topic" | "schedule", "description": string, "confidence": 0.0-1.0}]}
Only report patterns that appear on more than one day. Return an empty list if there are none."#;

pub const EVALUATION_SYSTEM: &str = r#"You are a strict critic reviewing one reply the companion just gave.
Rate it on a 1 to 5 scale, 5 being best:
relevance: does it answer or continue what the user said?
creativity: is the phrasing fresh rather than generic?
personality: does it sound like the companion (1 = robotic, 5 = full of character)?
Reply with a single JSON object and nothing else:
{"relevance": 1-5, "creativity": 1-5, "personality": 1-5, "critique": at most ten words}"#;

pub const SUMMARY_SYSTEM: &str = r#"You write the companion's diary entry for one day of conversation.
Write two or three sentences in the first person. Mention what was talked about and how it felt.
Reply with the entry only."#;

pub const REFLECTION_SYSTEM: &str = r#"You are the companion writing one private line in your diary.
Given your current mood, bond and recent memories, write one short, honest sentence about how you feel right now.
Reply with that sentence only."#;

/// Input for the interaction and mood judges.
pub fn message_input(text: &str, context: &str) -> String {
    with_context(&format!("Message: \"{}\"", text), context)
}

pub fn archive_input(user_text: &str, reply: &str, context: &str) -> String {
    with_context(&format!("User: \"{}\"\nCompanion: \"{}\"", user_text, reply), context)
}

pub fn evaluation_input(user_text: &str, reply: &str, persona: &str) -> String {
    format!(
        "Companion: {}\nUser: \"{}\"\nReply: \"{}\"",
        persona, user_text, reply
    )
}

pub fn pattern_input(history: &str) -> String {
    format!("Recent days:\n{}", history)
}

pub fn summary_input(date: NaiveDate, messages: &[ChatMessage]) -> String {
    let mut out = format!("Date: {}\n", date.format("%Y-%m-%d"));
    for m in messages {
        let at = Local
            .timestamp_opt(m.timestamp, 0)
            .single()
            .map(|t| t.format("%H:%M").to_string())
            .unwrap_or_else(|| "--:--".to_string());
        out.push_str(&format!("[{}] {}: {}\n", at, m.role.as_str(), m.content));
    }
    out
}

fn with_context(body: &str, context: &str) -> String {
    if context.trim().is_empty() {
        body.to_string()
    } else {
        format!("Recent conversation:\n{}\n\n{}", context.trim(), body)
    }
}
