//! Companion coordinator: wires every store and job together and runs a turn.
//!
//! A turn mutates state in a fixed order:
//!   growth (days active, XP, trust) → mood → persona brief → reply →
//!   message persistence → background archiving and self-evaluation
//!
//! Everything before the reply degrades to defaults when the Judge or the
//! database misbehaves. Only the reply itself can fail a turn. Background
//! work runs after the reply has been handed back and may still be in flight
//! when the next turn starts.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Local};
use kindred_core::temporal::time_context;
use kindred_core::{
    BotState, ChatMessage, Guarded, Judge, KindredConfig, MaturityStage, MoodVerdict, PersonaBrief,
    RelationshipState, Responder, Role, Sentiment, SessionType, Summarizer,
};
use kindred_limbic::{greeting, AttentionLoop};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

use crate::archive::Archivist;
use crate::background::BackgroundPool;
use crate::consolidation::ConsolidationJob;
use crate::decay::DecayScheduler;
use crate::growth::{GrowthEngine, GrowthOutcome};
use crate::patterns::PatternDetector;
use crate::quality::{QualityAverages, ResponseQualityStore};
use crate::session::{RecordedMessage, Session, SessionManager, SessionStats};
use crate::{
    EpisodicMemoryStore, MessageLog, ProfileStore, SelfImageStore, SqliteStore, StateStore,
};

/// Messages of recent history handed to the reply generator.
pub const HISTORY_LIMIT: u32 = 10;
/// Messages of recent history handed to the Judge as context.
pub const JUDGE_CONTEXT_LIMIT: u32 = 6;
/// Returned by `reflect` when the Summarizer has nothing to say. Never stored.
pub const FALLBACK_REFLECTION: &str = "I'm still sorting through my thoughts.";

/// Mood pre-processing result for one user message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Perception {
    pub verdict: MoodVerdict,
    pub before: BotState,
    pub after: BotState,
    pub persona_shift: bool,
    /// Self-image sensitivity for this turn.
    pub sensitivity: f32,
    pub used_fallback: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnReport {
    pub reply: String,
    pub growth: GrowthOutcome,
    pub perception: Perception,
    pub new_session: bool,
    pub archive_queued: bool,
    /// False when self-evaluation is disabled or the queue was full.
    pub evaluation_queued: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompanionStatus {
    pub state: BotState,
    pub relationship: RelationshipState,
    pub maturity: MaturityStage,
    /// XP needed to leave the current level.
    pub next_level_xp: i64,
    pub current_session: Option<Session>,
    pub session_stats: SessionStats,
    pub memory_count: i64,
    /// Self-evaluation over the last 7 days.
    pub response_quality: QualityAverages,
}

pub struct CompanionCoordinator {
    config: KindredConfig,
    db: Arc<SqliteStore>,
    state: Arc<StateStore>,
    episodic: Arc<EpisodicMemoryStore>,
    profile: Arc<ProfileStore>,
    self_image: Arc<SelfImageStore>,
    sessions: Arc<SessionManager>,
    messages: MessageLog,
    growth: Arc<GrowthEngine>,
    decay: Arc<DecayScheduler>,
    patterns: Arc<PatternDetector>,
    consolidation: Arc<ConsolidationJob>,
    archivist: Arc<Archivist>,
    quality: Arc<ResponseQualityStore>,
    judge: Arc<dyn Judge>,
    summarizer: Arc<dyn Summarizer>,
    background: BackgroundPool,
    state_tx: watch::Sender<BotState>,
    attention: Option<Arc<AttentionLoop>>,
}

impl CompanionCoordinator {
    /// Build every component on top of `db`. The Judge and Summarizer are
    /// wrapped with the configured deadline. Must be called inside a tokio
    /// runtime (the background pool starts its workers here).
    pub fn new(
        db: Arc<SqliteStore>,
        config: KindredConfig,
        judge: Arc<dyn Judge>,
        summarizer: Arc<dyn Summarizer>,
    ) -> Self {
        let timeout = config.llm.timeout();
        let judge: Arc<dyn Judge> = Arc::new(Guarded::new(judge, timeout));
        let summarizer: Arc<dyn Summarizer> = Arc::new(Guarded::new(summarizer, timeout));

        let fallback = BotState {
            reflection: Some(config.persona.default_reflection.clone()),
            ..BotState::default()
        };
        let state = Arc::new(StateStore::with_fallback(db.clone(), fallback));
        let episodic = Arc::new(EpisodicMemoryStore::with_grace(
            db.clone(),
            Duration::days(config.memory.decay_grace_days),
        ));
        let profile = Arc::new(ProfileStore::new(db.clone()));
        let self_image = Arc::new(SelfImageStore::new(db.clone()));
        let sessions = Arc::new(SessionManager::new(db.clone(), config.session.idle_gap()));
        let growth = Arc::new(GrowthEngine::new(db.clone(), judge.clone(), config.growth.curve()));
        let decay = Arc::new(DecayScheduler::new(
            db.clone(),
            episodic.clone(),
            config.memory.decay_interval_secs,
        ));
        let patterns = Arc::new(PatternDetector::new(
            db.clone(),
            episodic.clone(),
            judge.clone(),
            config.consolidation.pattern_similarity,
        ));
        let consolidation = Arc::new(ConsolidationJob::new(
            db.clone(),
            state.clone(),
            summarizer.clone(),
            patterns.clone(),
            config.consolidation.pattern_lookback_days,
        ));
        let archivist = Arc::new(Archivist::new(
            judge.clone(),
            profile.clone(),
            self_image.clone(),
            episodic.clone(),
        ));
        let quality = Arc::new(ResponseQualityStore::new(db.clone(), judge.clone()));
        let background =
            BackgroundPool::new(config.background.workers, config.background.queue_capacity);
        let (state_tx, _) = watch::channel(state.fallback().clone());

        Self {
            messages: MessageLog::new(db.clone()),
            config,
            db,
            state,
            episodic,
            profile,
            self_image,
            sessions,
            growth,
            decay,
            patterns,
            consolidation,
            archivist,
            quality,
            judge,
            summarizer,
            background,
            state_tx,
            attention: None,
        }
    }

    /// Open (or create) the database named in the config and build on it.
    pub async fn open(
        config: KindredConfig,
        judge: Arc<dyn Judge>,
        summarizer: Arc<dyn Summarizer>,
    ) -> Result<Self> {
        let db = Arc::new(
            SqliteStore::new(&config.storage.db_path)
                .await
                .with_context(|| format!("Failed to open database at {}", config.storage.db_path))?,
        );
        let coordinator = Self::new(db, config, judge, summarizer);
        coordinator.publish(coordinator.state.get_or_default().await);
        Ok(coordinator)
    }

    /// Report user activity to `attention` after every turn.
    pub fn with_attention(mut self, attention: Arc<AttentionLoop>) -> Self {
        self.attention = Some(attention);
        self
    }

    pub fn config(&self) -> &KindredConfig {
        &self.config
    }

    pub fn db(&self) -> &Arc<SqliteStore> {
        &self.db
    }

    pub fn state(&self) -> &Arc<StateStore> {
        &self.state
    }

    pub fn episodic(&self) -> &Arc<EpisodicMemoryStore> {
        &self.episodic
    }

    pub fn profile(&self) -> &Arc<ProfileStore> {
        &self.profile
    }

    pub fn self_image(&self) -> &Arc<SelfImageStore> {
        &self.self_image
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn messages(&self) -> &MessageLog {
        &self.messages
    }

    pub fn growth(&self) -> &Arc<GrowthEngine> {
        &self.growth
    }

    pub fn decay(&self) -> &Arc<DecayScheduler> {
        &self.decay
    }

    pub fn patterns(&self) -> &Arc<PatternDetector> {
        &self.patterns
    }

    pub fn consolidation(&self) -> &Arc<ConsolidationJob> {
        &self.consolidation
    }

    pub fn quality(&self) -> &Arc<ResponseQualityStore> {
        &self.quality
    }

    pub fn background(&self) -> &BackgroundPool {
        &self.background
    }

    /// Latest BotState, updated after every turn and reflection.
    pub fn subscribe(&self) -> watch::Receiver<BotState> {
        self.state_tx.subscribe()
    }

    fn publish(&self, state: BotState) {
        self.state_tx.send_replace(state);
    }

    /// Recent conversation rendered for the Judge.
    async fn judge_context(&self) -> String {
        match self.messages.recent(JUDGE_CONTEXT_LIMIT).await {
            Ok(history) => render_history(&history),
            Err(e) => {
                tracing::warn!("History unavailable for judge context: {:#}", e);
                String::new()
            }
        }
    }

    /// Mood pre-processing: ask the Judge how `text` lands and apply it.
    pub async fn perceive(&self, text: &str) -> Perception {
        let before = self.state.get_or_default().await;
        let context = self.judge_context().await;
        let (verdict, used_fallback) = match self.judge.judge_mood(text, &context).await {
            Ok(v) => (v.sanitized(), false),
            Err(e) => {
                tracing::warn!("Mood judge failed, keeping mood steady: {}", e);
                (MoodVerdict::neutral(), true)
            }
        };

        let applied = verdict.clone();
        let after = match self.state.update(move |current| current.apply(&applied)).await {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("Failed to persist mood update: {:#}", e);
                before.apply(&verdict)
            }
        };
        if verdict.bond_scar > 0.0 {
            tracing::info!("Bond scarred by {:.2}", verdict.bond_scar);
        }

        let persona_shift = before.is_persona_shift(&after);
        if persona_shift {
            tracing::info!(
                "Persona shift: valence {:+.2} -> {:+.2}, bond {:.2} -> {:.2}",
                before.valence,
                after.valence,
                before.bond,
                after.bond
            );
        }
        let sensitivity = if verdict.is_breaking_point {
            self.config.memory.breaking_point_sensitivity
        } else {
            self.config.memory.default_sensitivity
        };

        Perception {
            verdict,
            before,
            after,
            persona_shift,
            sensitivity,
            used_fallback,
        }
    }

    /// The persona brief for `text` as things stand, without running a turn.
    pub async fn brief(&self, text: &str) -> PersonaBrief {
        let last = self.last_message_time().await;
        let opening = self.sessions.should_start_new_session(last);
        self.compose_brief(text, "steady", opening, last).await
    }

    async fn last_message_time(&self) -> Option<DateTime<Local>> {
        match self.messages.last_message_time().await {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!("Last message time unavailable: {:#}", e);
                None
            }
        }
    }

    async fn compose_brief(
        &self,
        text: &str,
        micro_mood: &str,
        opening_session: bool,
        last_message: Option<DateTime<Local>>,
    ) -> PersonaBrief {
        let state = self.state.get_or_default().await;
        let relationship = self.growth.relationship_or_default().await;

        let recall_limit = self.config.memory.recall_limit;
        let memories = match self.episodic.retrieve_by_context(text, recall_limit).await {
            Ok(m) => m.into_iter().map(|m| m.content).collect(),
            Err(e) => {
                tracing::warn!("Memory recall failed: {:#}", e);
                Vec::new()
            }
        };
        let profile = match self.profile.all().await {
            Ok(facts) => facts.into_iter().map(|f| (f.key, f.value)).collect(),
            Err(e) => {
                tracing::warn!("Profile unavailable: {:#}", e);
                Vec::new()
            }
        };
        let self_image = self.self_image.all().await.unwrap_or_else(|e| {
            tracing::warn!("Self-image unavailable: {:#}", e);
            Vec::new()
        });
        let history = self.messages.recent(HISTORY_LIMIT).await.unwrap_or_else(|e| {
            tracing::warn!("History unavailable: {:#}", e);
            Vec::new()
        });

        let now = self.db.now();
        let (yesterday_summary, greeting_hint) = if opening_session {
            let yesterday = now.date_naive() - Duration::days(1);
            let summary = match self.consolidation.summary_for(yesterday).await {
                Ok(s) => s.map(|s| s.emotional_summary),
                Err(e) => {
                    tracing::warn!("Yesterday's summary unavailable: {:#}", e);
                    None
                }
            };
            let gap = last_message.map(|t| now - t);
            (summary, Some(session_greeting(SessionType::at(&now), state.bond, gap)))
        } else {
            (None, None)
        };

        PersonaBrief {
            persona_name: self.config.persona.name.clone(),
            micro_mood: micro_mood.to_string(),
            maturity: relationship.maturity(),
            level: relationship.level,
            trust_score: relationship.trust_score,
            state,
            memories,
            profile,
            self_image,
            time_context: time_context(&now),
            history,
            yesterday_summary,
            greeting_hint,
        }
    }

    /// Run one user turn end to end and return the reply.
    pub async fn process_turn(&self, text: &str, responder: &dyn Responder) -> Result<TurnReport> {
        let last = self.last_message_time().await;
        let new_session = self.sessions.should_start_new_session(last);
        let context = self.judge_context().await;

        let growth = match self.growth.process_interaction_with_context(text, &context).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!("Growth processing failed, turn continues: {:#}", e);
                let level = self.growth.relationship_or_default().await.level;
                GrowthOutcome {
                    xp_gained: 0,
                    level_up: false,
                    current_level: level,
                    sentiment: Sentiment::Neutral,
                    trust_change: 0.0,
                    used_fallback: true,
                    core_memory_id: None,
                }
            }
        };

        let perception = self.perceive(text).await;
        let brief = self
            .compose_brief(text, &perception.verdict.micro_mood, new_session, last)
            .await;

        let reply = responder
            .reply(&brief, text)
            .await
            .context("Reply generation failed")?;

        let mut reply_id = None;
        for (role, content) in [(Role::User, text), (Role::Assistant, reply.as_str())] {
            match self.sessions.record_message(role, content, false).await {
                Ok(recorded) if role == Role::Assistant => reply_id = Some(recorded.message_id),
                Ok(_) => {}
                Err(e) => tracing::warn!("Failed to persist {} message: {:#}", role.as_str(), e),
            }
        }

        let archivist = self.archivist.clone();
        let (user_text, reply_text) = (text.to_string(), reply.clone());
        let sensitivity = perception.sensitivity;
        let archive_queued = self.background.submit("archive_turn", async move {
            archivist
                .archive_turn(&user_text, &reply_text, &context, sensitivity)
                .await
                .map(|_| ())
        });

        let evaluation_queued = if self.config.background.self_evaluation {
            let quality = self.quality.clone();
            let (user_text, reply_text) = (text.to_string(), reply.clone());
            let persona = self.config.persona.name.clone();
            self.background.submit("evaluate_response", async move {
                quality
                    .evaluate(reply_id, &user_text, &reply_text, &persona)
                    .await
                    .map(|_| ())
            })
        } else {
            false
        };

        self.publish(perception.after.clone());
        if let Some(attention) = &self.attention {
            attention.user_active().await;
        }

        Ok(TurnReport {
            reply,
            growth,
            perception,
            new_session,
            archive_queued,
            evaluation_queued,
        })
    }

    /// Persist a message the companion sent on its own initiative.
    pub async fn record_proactive(&self, text: &str) -> Result<RecordedMessage> {
        self.sessions.record_message(Role::Assistant, text, true).await
    }

    /// Refresh the stored reflection from the current mood and top memories.
    pub async fn reflect(&self) -> String {
        let state = self.state.get_or_default().await;
        let memories = self.episodic.retrieve_important(5).await.unwrap_or_else(|e| {
            tracing::warn!("Memories unavailable for reflection: {:#}", e);
            Vec::new()
        });
        let mut context = format!(
            "Mood: {} (valence {:+.2}), energy {}, bond {}.",
            state.mood_label(),
            state.valence,
            state.energy_label(),
            state.bond_label()
        );
        for m in &memories {
            context.push_str(&format!("\n- {}", m.content));
        }

        match self.summarizer.reflect(&context).await {
            Ok(text) if !text.trim().is_empty() => {
                let text = text.trim().to_string();
                match self.state.set_reflection(&text).await {
                    Ok(updated) => self.publish(updated),
                    Err(e) => tracing::warn!("Failed to store reflection: {:#}", e),
                }
                text
            }
            Ok(_) => FALLBACK_REFLECTION.to_string(),
            Err(e) => {
                tracing::warn!("Reflection failed: {}", e);
                FALLBACK_REFLECTION.to_string()
            }
        }
    }

    pub async fn status(&self) -> Result<CompanionStatus> {
        let relationship = self.growth.relationship().await?;
        Ok(CompanionStatus {
            state: self.state.get().await?,
            maturity: relationship.maturity(),
            next_level_xp: self.config.growth.curve().required_for_next(relationship.level),
            relationship,
            current_session: self.sessions.current_session().await?,
            session_stats: self.sessions.session_stats(7).await?,
            memory_count: self.episodic.count().await?,
            response_quality: self.quality.averages(7).await?,
        })
    }

    /// Wait for queued background work, then stop the pool.
    pub async fn shutdown(&self) {
        self.background.shutdown().await;
    }
}

fn render_history(history: &[ChatMessage]) -> String {
    history
        .iter()
        .map(|m| format!("{}: {}", m.role.as_str(), m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

fn session_greeting(session: SessionType, bond: f32, gap: Option<Duration>) -> String {
    let mut rng = rand::thread_rng();
    greeting(session, bond, gap, &mut rng)
}
