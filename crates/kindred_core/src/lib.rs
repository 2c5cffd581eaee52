//! Kindred core: the domain model shared by every other crate.
//!
//! Pure rules live here (clamping, growth math, session boundaries, text
//! keys). Anything that touches storage, HTTP or timers lives elsewhere.

pub mod affect;
pub mod brief;
pub mod config;
pub mod growth;
pub mod judge;
pub mod temporal;
pub mod text;
pub mod verdict;

pub use affect::BotState;
pub use brief::PersonaBrief;
pub use config::KindredConfig;
pub use growth::{
    advance, time_gate, trust_change, MaturityStage, RelationshipState, XpCurve, XpStep,
};
pub use judge::{ChatMessage, Guarded, Judge, JudgeError, Responder, Role, Summarizer};
pub use temporal::{should_start_new_session, Clock, ManualClock, SessionType, SystemClock};
pub use verdict::{
    ArchiveVerdict, EpisodeDraft, InteractionVerdict, MoodVerdict, PatternCandidate, PatternReport,
    ProfileUpdate, QualityVerdict, Sentiment, TraitObservation,
};
