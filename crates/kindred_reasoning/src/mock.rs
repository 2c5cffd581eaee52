//! Deterministic Judge, Summarizer and Responder for tests and offline runs.
//!
//! Each capability has its own queue of scripted outcomes. An empty queue
//! behaves like an unreachable model (`JudgeError::Unavailable`), except
//! `reply`, which echoes the user.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::VecDeque;
use std::sync::Mutex;

use kindred_core::{
    ArchiveVerdict, ChatMessage, InteractionVerdict, Judge, JudgeError, MoodVerdict, PatternReport,
    PersonaBrief, QualityVerdict, Responder, Summarizer,
};

type Script<T> = Mutex<VecDeque<Result<T, String>>>;

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

fn enqueue<T>(script: &Script<T>, outcome: Result<T, String>) {
    lock(script).push_back(outcome);
}

fn next<T>(script: &Script<T>, what: &str) -> Result<T, JudgeError> {
    match lock(script).pop_front() {
        Some(Ok(v)) => Ok(v),
        Some(Err(reason)) => Err(JudgeError::Unavailable(reason)),
        None => Err(JudgeError::Unavailable(format!("no scripted {}", what))),
    }
}

#[derive(Default)]
pub struct ScriptedJudge {
    interactions: Script<InteractionVerdict>,
    moods: Script<MoodVerdict>,
    archives: Script<ArchiveVerdict>,
    patterns: Script<PatternReport>,
    evaluations: Script<QualityVerdict>,
    summaries: Script<String>,
    reflections: Script<String>,
    replies: Script<String>,
    calls: Mutex<Vec<&'static str>>,
    last_brief: Mutex<Option<PersonaBrief>>,
}

impl ScriptedJudge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_interaction(&self, verdict: InteractionVerdict) {
        enqueue(&self.interactions, Ok(verdict));
    }

    pub fn fail_interaction(&self) {
        enqueue(&self.interactions, Err("scripted interaction failure".into()));
    }

    pub fn push_mood(&self, verdict: MoodVerdict) {
        enqueue(&self.moods, Ok(verdict));
    }

    pub fn fail_mood(&self) {
        enqueue(&self.moods, Err("scripted mood failure".into()));
    }

    pub fn push_archive(&self, verdict: ArchiveVerdict) {
        enqueue(&self.archives, Ok(verdict));
    }

    pub fn fail_archive(&self) {
        enqueue(&self.archives, Err("scripted archive failure".into()));
    }

    pub fn push_patterns(&self, report: PatternReport) {
        enqueue(&self.patterns, Ok(report));
    }

    pub fn fail_patterns(&self) {
        enqueue(&self.patterns, Err("scripted pattern failure".into()));
    }

    pub fn push_evaluation(&self, verdict: QualityVerdict) {
        enqueue(&self.evaluations, Ok(verdict));
    }

    pub fn fail_evaluation(&self) {
        enqueue(&self.evaluations, Err("scripted evaluation failure".into()));
    }

    pub fn push_summary(&self, text: impl Into<String>) {
        enqueue(&self.summaries, Ok(text.into()));
    }

    pub fn fail_summary(&self) {
        enqueue(&self.summaries, Err("scripted summary failure".into()));
    }

    pub fn push_reflection(&self, text: impl Into<String>) {
        enqueue(&self.reflections, Ok(text.into()));
    }

    pub fn fail_reflection(&self) {
        enqueue(&self.reflections, Err("scripted reflection failure".into()));
    }

    pub fn push_reply(&self, text: impl Into<String>) {
        enqueue(&self.replies, Ok(text.into()));
    }

    pub fn fail_reply(&self) {
        enqueue(&self.replies, Err("scripted reply failure".into()));
    }

    /// Names of the trait methods called so far, in call order.
    pub fn calls(&self) -> Vec<&'static str> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self, name: &str) -> usize {
        lock(&self.calls).iter().filter(|c| **c == name).count()
    }

    /// The brief passed to the most recent `reply`.
    pub fn last_brief(&self) -> Option<PersonaBrief> {
        lock(&self.last_brief).clone()
    }

    fn record(&self, name: &'static str) {
        lock(&self.calls).push(name);
    }
}

#[async_trait]
impl Judge for ScriptedJudge {
    async fn judge_interaction(
        &self,
        _text: &str,
        _context: &str,
    ) -> Result<InteractionVerdict, JudgeError> {
        self.record("judge_interaction");
        next(&self.interactions, "interaction")
    }

    async fn judge_mood(&self, _text: &str, _context: &str) -> Result<MoodVerdict, JudgeError> {
        self.record("judge_mood");
        next(&self.moods, "mood")
    }

    async fn archive_turn(
        &self,
        _user_text: &str,
        _reply: &str,
        _context: &str,
    ) -> Result<ArchiveVerdict, JudgeError> {
        self.record("archive_turn");
        next(&self.archives, "archive")
    }

    async fn detect_patterns(&self, _history: &str) -> Result<PatternReport, JudgeError> {
        self.record("detect_patterns");
        next(&self.patterns, "patterns")
    }

    async fn evaluate_response(
        &self,
        _user_text: &str,
        _reply: &str,
        _persona: &str,
    ) -> Result<QualityVerdict, JudgeError> {
        self.record("evaluate_response");
        next(&self.evaluations, "evaluation")
    }
}

#[async_trait]
impl Summarizer for ScriptedJudge {
    async fn summarize_day(
        &self,
        _date: NaiveDate,
        _messages: &[ChatMessage],
    ) -> Result<String, JudgeError> {
        self.record("summarize_day");
        next(&self.summaries, "summary")
    }

    async fn reflect(&self, _context: &str) -> Result<String, JudgeError> {
        self.record("reflect");
        next(&self.reflections, "reflection")
    }
}

#[async_trait]
impl Responder for ScriptedJudge {
    async fn reply(&self, brief: &PersonaBrief, user_text: &str) -> anyhow::Result<String> {
        self.record("reply");
        *lock(&self.last_brief) = Some(brief.clone());
        match lock(&self.replies).pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(reason)) => anyhow::bail!(reason),
            None => Ok(format!("You said: {}", user_text)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_queues_pop_in_order_then_fail() {
        let judge = ScriptedJudge::new();
        judge.push_summary("first");
        judge.fail_summary();
        let date = NaiveDate::from_ymd_opt(2024, 6, 10).unwrap();
        assert_eq!(judge.summarize_day(date, &[]).await.unwrap(), "first");
        assert!(judge.summarize_day(date, &[]).await.is_err());
        assert!(matches!(
            judge.summarize_day(date, &[]).await,
            Err(JudgeError::Unavailable(_))
        ));
        assert_eq!(judge.call_count("summarize_day"), 3);
    }

    #[tokio::test]
    async fn test_reply_defaults_to_echo() {
        let judge = ScriptedJudge::new();
        let brief = PersonaBrief {
            persona_name: "Linh".into(),
            state: Default::default(),
            micro_mood: "steady".into(),
            maturity: kindred_core::MaturityStage::Teenage,
            level: 1,
            trust_score: 0.5,
            memories: vec![],
            profile: vec![],
            self_image: vec![],
            time_context: String::new(),
            history: vec![],
            yesterday_summary: None,
            greeting_hint: None,
        };
        assert_eq!(judge.reply(&brief, "hello").await.unwrap(), "You said: hello");
        judge.fail_reply();
        assert!(judge.reply(&brief, "again").await.is_err());
        assert_eq!(judge.last_brief().unwrap().persona_name, "Linh");
        assert_eq!(judge.calls(), vec!["reply", "reply"]);
    }
}
