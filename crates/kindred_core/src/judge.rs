//! Contracts for the external language-model capabilities.
//!
//! The core never parses free text itself. A `Judge` turns text into one of
//! the verdict shapes in [`crate::verdict`], a `Summarizer` writes prose, and a
//! `Responder` produces the user-visible reply. Callers treat any
//! [`JudgeError`] as "use the deterministic fallback".

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::brief::PersonaBrief;
use crate::verdict::{
    ArchiveVerdict, InteractionVerdict, MoodVerdict, PatternReport, QualityVerdict,
};

#[derive(Debug, thiserror::Error)]
pub enum JudgeError {
    #[error("judge unavailable: {0}")]
    Unavailable(String),
    #[error("judge timed out after {0:?}")]
    Timeout(Duration),
    #[error("judge returned malformed output: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse_str(s: &str) -> Self {
        match s {
            "user" => Role::User,
            _ => Role::Assistant,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Unix seconds.
    pub timestamp: i64,
    pub is_proactive: bool,
}

#[async_trait]
pub trait Judge: Send + Sync {
    async fn judge_interaction(
        &self,
        text: &str,
        context: &str,
    ) -> Result<InteractionVerdict, JudgeError>;

    async fn judge_mood(&self, text: &str, context: &str) -> Result<MoodVerdict, JudgeError>;

    async fn archive_turn(
        &self,
        user_text: &str,
        reply: &str,
        context: &str,
    ) -> Result<ArchiveVerdict, JudgeError>;

    async fn detect_patterns(&self, history: &str) -> Result<PatternReport, JudgeError>;

    /// Score a reply the companion (named `persona`) just gave.
    async fn evaluate_response(
        &self,
        user_text: &str,
        reply: &str,
        persona: &str,
    ) -> Result<QualityVerdict, JudgeError>;
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize_day(
        &self,
        date: NaiveDate,
        messages: &[ChatMessage],
    ) -> Result<String, JudgeError>;

    /// First-person reflection given a description of the current state.
    async fn reflect(&self, context: &str) -> Result<String, JudgeError>;
}

#[async_trait]
pub trait Responder: Send + Sync {
    async fn reply(&self, brief: &PersonaBrief, user_text: &str) -> anyhow::Result<String>;
}

// ============================================================================
// Deadline wrapper
// ============================================================================

/// Run `fut` with a deadline, turning an elapsed deadline into `JudgeError::Timeout`.
pub async fn with_deadline<T, F>(limit: Duration, fut: F) -> Result<T, JudgeError>
where
    F: Future<Output = Result<T, JudgeError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(JudgeError::Timeout(limit)),
    }
}

/// Wraps any Judge/Summarizer so every call carries a deadline.
pub struct Guarded<T: ?Sized> {
    inner: Arc<T>,
    timeout: Duration,
}

impl<T: ?Sized> Guarded<T> {
    pub fn new(inner: Arc<T>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl<T: Judge + ?Sized> Judge for Guarded<T> {
    async fn judge_interaction(
        &self,
        text: &str,
        context: &str,
    ) -> Result<InteractionVerdict, JudgeError> {
        with_deadline(self.timeout, self.inner.judge_interaction(text, context)).await
    }

    async fn judge_mood(&self, text: &str, context: &str) -> Result<MoodVerdict, JudgeError> {
        with_deadline(self.timeout, self.inner.judge_mood(text, context)).await
    }

    async fn archive_turn(
        &self,
        user_text: &str,
        reply: &str,
        context: &str,
    ) -> Result<ArchiveVerdict, JudgeError> {
        with_deadline(self.timeout, self.inner.archive_turn(user_text, reply, context)).await
    }

    async fn detect_patterns(&self, history: &str) -> Result<PatternReport, JudgeError> {
        with_deadline(self.timeout, self.inner.detect_patterns(history)).await
    }

    async fn evaluate_response(
        &self,
        user_text: &str,
        reply: &str,
        persona: &str,
    ) -> Result<QualityVerdict, JudgeError> {
        with_deadline(self.timeout, self.inner.evaluate_response(user_text, reply, persona)).await
    }
}

#[async_trait]
impl<T: Summarizer + ?Sized> Summarizer for Guarded<T> {
    async fn summarize_day(
        &self,
        date: NaiveDate,
        messages: &[ChatMessage],
    ) -> Result<String, JudgeError> {
        with_deadline(self.timeout, self.inner.summarize_day(date, messages)).await
    }

    async fn reflect(&self, context: &str) -> Result<String, JudgeError> {
        with_deadline(self.timeout, self.inner.reflect(context)).await
    }
}
