//! # Kindred limbic layer
//!
//! The fast, non-verbal side of the companion: a heartbeat-driven attention
//! loop that notices silence, and the canned expressive lines it uses when it
//! decides to speak first or to greet a new session.

mod attention;
pub mod expression;
mod heartbeat;

pub use attention::{evaluate, AttentionLoop, Nudge, WaitingState};
pub use expression::{greeting, nudge_line, NudgeKind};
pub use heartbeat::HeartbeatConfig;
