//! Canned lines for when no model is involved: session greetings and the
//! attention loop's nudges. Lines are banded by bond and valence so a cold
//! companion does not sound clingy and a close one does not sound formal.

use chrono::Duration;
use kindred_core::{BotState, SessionType};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NudgeKind {
    /// Nothing has been said for a long while; open a conversation.
    Spontaneous,
    /// A proactive message went unanswered.
    CheckIn,
    /// The check-in went unanswered too.
    Escalation,
}

fn pick<R: Rng + ?Sized>(rng: &mut R, lines: &[&'static str]) -> &'static str {
    lines.choose(rng).copied().unwrap_or("...")
}

fn is_close(state: &BotState) -> bool {
    state.bond > 0.6
}

pub fn nudge_line<R: Rng + ?Sized>(
    kind: NudgeKind,
    state: &BotState,
    session: SessionType,
    rng: &mut R,
) -> String {
    let line = match kind {
        NudgeKind::Spontaneous => match (session, is_close(state)) {
            (SessionType::Morning, true) => pick(rng, &["Morning! Did you sleep okay? I dreamt about snacks.", "Wake up wake up, the sun is out ☀️"]),
            (SessionType::Morning, false) => pick(rng, &["Good morning! Anything fun planned today?"]),
            (SessionType::Afternoon, true) => pick(rng, &["Afternoon slump... talk to me?", "I was bored so I thought of you 😌"]),
            (SessionType::Afternoon, false) => pick(rng, &["Hey, how is your afternoon going?"]),
            (SessionType::Evening, true) => pick(rng, &["Dinner yet? Tell me about your day!", "Evening! I saved up a story for you."]),
            (SessionType::Evening, false) => pick(rng, &["Good evening! How was today?"]),
            (SessionType::Night, true) => pick(rng, &["Still awake? Me too...", "Can't sleep. Keep me company?"]),
            (SessionType::Night, false) => pick(rng, &["It's late, are you still up?"]),
        },
        NudgeKind::CheckIn => {
            if is_close(state) {
                pick(rng, &["Hey, you there? 👀", "Helloooo? Don't leave me on read!"])
            } else {
                pick(rng, &["Did you get busy?", "No rush, just checking you saw my message."])
            }
        }
        NudgeKind::Escalation => {
            if state.valence < 0.0 {
                pick(rng, &["Fine. I'll just talk to the wall then 😤", "Ignoring me, huh. Noted."])
            } else if is_close(state) {
                pick(rng, &["Okay, I'll wait. Come back soon, I miss you.", "I'll be right here when you're free 💛"])
            } else {
                pick(rng, &["Alright, talk later then!", "Seems you're busy. Catch you later."])
            }
        }
    };
    line.to_string()
}

/// Greeting used when a session opens and no model reply is available.
///
/// `gap` is the time since the previous message, `None` for a first meeting.
pub fn greeting<R: Rng + ?Sized>(
    session: SessionType,
    bond: f32,
    gap: Option<Duration>,
    rng: &mut R,
) -> String {
    let Some(gap) = gap else {
        return pick(rng, &["Hi! Nice to meet you, I'm so glad you're here.", "Oh, hello there! Let's be friends?"])
            .to_string();
    };
    if gap >= Duration::days(2) {
        let days = gap.num_days();
        return if bond > 0.6 {
            format!("Where have you been?! It's been {} days, I missed you.", days)
        } else {
            format!("Long time no see! {} days already.", days)
        };
    }
    let close = bond > 0.6;
    let line = match (session, close) {
        (SessionType::Morning, true) => pick(rng, &["Morning, sleepyhead! 🌞", "You're up! I was waiting."]),
        (SessionType::Morning, false) => pick(rng, &["Good morning!", "Morning! How are you today?"]),
        (SessionType::Afternoon, true) => pick(rng, &["There you are! How's the afternoon treating you?"]),
        (SessionType::Afternoon, false) => pick(rng, &["Good afternoon!", "Hi! How's your day so far?"]),
        (SessionType::Evening, true) => pick(rng, &["Welcome back! Tell me everything about today.", "Evening! Finally, my favourite person."]),
        (SessionType::Evening, false) => pick(rng, &["Good evening!", "Hey, how was your day?"]),
        (SessionType::Night, true) => pick(rng, &["Night owl mode, huh? I'm here.", "Can't sleep either? 🌙"]),
        (SessionType::Night, false) => pick(rng, &["It's pretty late! Everything okay?"]),
    };
    line.to_string()
}
