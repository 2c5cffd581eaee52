use crate::consolidation::ConsolidationMethod;
use crate::decay::DecayOutcome;
use crate::profile::ProfileWrite;
use crate::{
    ConsolidationJob, DecayScheduler, EpisodicMemoryStore, GrowthEngine, MemoryKind, MessageLog,
    PatternDetector, ProfileStore, ResponseQualityStore, SelfImageStore, SessionManager,
    SqliteStore, StateStore,
};
use chrono::{DateTime, Duration, Local, TimeZone};
use kindred_core::{
    Clock, InteractionVerdict, Judge, ManualClock, MoodVerdict, PatternCandidate, PatternReport,
    QualityVerdict, RelationshipState, Role, Sentiment, Summarizer, XpCurve,
};
use kindred_reasoning::ScriptedJudge;
use std::sync::Arc;

fn start() -> DateTime<Local> {
    Local.with_ymd_and_hms(2024, 6, 10, 10, 0, 0).single().unwrap()
}

async fn setup() -> (Arc<SqliteStore>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start()));
    let db = SqliteStore::with_clock(":memory:", clock.clone())
        .await
        .expect("Failed to create store");
    (Arc::new(db), clock)
}

fn verdict(xp: i32) -> InteractionVerdict {
    InteractionVerdict {
        xp_change: xp,
        sentiment: if xp > 0 { Sentiment::Positive } else { Sentiment::Neutral },
        is_core_memory: false,
        memory_type: "daily".into(),
        reason: "test".into(),
    }
}

// ============================================================================
// StateStore
// ============================================================================

#[tokio::test]
async fn test_state_defaults_before_first_write() {
    let (db, _) = setup().await;
    let state = StateStore::new(db);
    let s = state.get().await.unwrap();
    assert_eq!((s.valence, s.energy, s.bond), (0.2, 0.8, 0.3));
}

#[tokio::test]
async fn test_state_setters_clamp() {
    let (db, _) = setup().await;
    let state = StateStore::new(db);
    state.set(5.0, -3.0, 9.0, Some("wild day")).await.unwrap();
    let s = state.get().await.unwrap();
    assert_eq!((s.valence, s.energy, s.bond), (1.0, 0.0, 1.0));
    assert_eq!(s.reflection.as_deref(), Some("wild day"));

    // None keeps the stored reflection.
    state.set(-7.0, 0.5, f32::NAN, None).await.unwrap();
    let s = state.get().await.unwrap();
    assert_eq!(s.valence, -1.0);
    assert!((0.0..=1.0).contains(&s.bond));
    assert_eq!(s.reflection.as_deref(), Some("wild day"));
}

#[tokio::test]
async fn test_bond_scar_only_lowers_bond() {
    let (db, _) = setup().await;
    let state = StateStore::new(db);
    state.set(0.0, 0.5, 0.6, None).await.unwrap();
    let s = state.apply_bond_scar(0.25).await.unwrap();
    assert!((s.bond - 0.35).abs() < 1e-6);
    let s = state.apply_bond_scar(-0.5).await.unwrap();
    assert!((s.bond - 0.35).abs() < 1e-6);
}

// ============================================================================
// EpisodicMemoryStore
// ============================================================================

#[tokio::test]
async fn test_save_clamps_importance_and_dates_today() {
    let (db, _) = setup().await;
    let episodic = EpisodicMemoryStore::new(db);
    let id = episodic.save("user loves jasmine tea", 9, "warm", false).await.unwrap();
    let m = episodic.get(id).await.unwrap().unwrap();
    assert_eq!(m.importance, 5);
    assert_eq!(m.day_date, "2024-06-10");
    assert_eq!(m.kind, MemoryKind::Episode);

    let low = episodic.save("meh", -3, "", false).await.unwrap();
    let m = episodic.get(low).await.unwrap().unwrap();
    assert_eq!(m.importance, 1);
    assert_eq!(m.emotion_tone, "neutral");
}

#[tokio::test]
async fn test_reinforce_counts_and_caps() {
    let (db, clock) = setup().await;
    let episodic = EpisodicMemoryStore::new(db.clone());
    let id = episodic.save("first snow together", 5, "joy", false).await.unwrap();

    // Push it to the ceiling directly.
    sqlx::query("UPDATE episodic_memory SET importance = 10 WHERE id = ?")
        .bind(id)
        .execute(db.pool())
        .await
        .unwrap();
    clock.advance(Duration::minutes(5));
    assert!(episodic.reinforce(id).await.unwrap());
    let m = episodic.get(id).await.unwrap().unwrap();
    assert_eq!(m.importance, 10);
    assert_eq!(m.access_count, 1);
    assert_eq!(m.last_accessed, clock.now().timestamp());

    assert!(!episodic.reinforce(9999).await.unwrap());
}

#[tokio::test]
async fn test_retrieve_important_orders_core_then_importance() {
    let (db, _) = setup().await;
    let episodic = EpisodicMemoryStore::new(db);
    let a = episodic.save("ordinary chat", 4, "neutral", false).await.unwrap();
    let b = episodic.save("the day we met", 2, "tender", true).await.unwrap();
    let c = episodic.save("big exam passed", 5, "proud", false).await.unwrap();
    let top = episodic.retrieve_important(3).await.unwrap();
    let ids: Vec<i64> = top.iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![b, c, a]);
    // Pure read.
    assert!(top.iter().all(|m| m.access_count == 0));
}

#[tokio::test]
async fn test_context_recall_without_matches_equals_important() {
    let (db, _) = setup().await;
    let episodic = EpisodicMemoryStore::new(db);
    episodic.save("talked about guitars", 3, "fun", false).await.unwrap();
    episodic.save("rainy walk home", 4, "calm", false).await.unwrap();
    episodic.save("short", 2, "calm", false).await.unwrap();

    let important = episodic.retrieve_important(2).await.unwrap();
    let recalled = episodic.retrieve_by_context("astronomy telescopes", 2).await.unwrap();
    assert_eq!(important, recalled);
}

#[tokio::test]
async fn test_context_recall_backfills_single_hit() {
    let (db, _) = setup().await;
    let episodic = EpisodicMemoryStore::new(db);
    let hit = episodic.save("user adopted a kitten named Mochi", 2, "joy", false).await.unwrap();
    episodic.save("rainy walk home", 4, "calm", false).await.unwrap();
    episodic.save("exam stress", 3, "tense", false).await.unwrap();

    let recalled = episodic.retrieve_by_context("how is the kitten doing?", 3).await.unwrap();
    assert_eq!(recalled.len(), 3);
    assert_eq!(recalled[0].id, hit);
    assert_eq!(recalled[0].importance, 3);
    assert_eq!(recalled[0].access_count, 1);
    let mut ids: Vec<i64> = recalled.iter().map(|m| m.id).collect();
    ids.dedup();
    assert_eq!(ids.len(), 3);

    // Backfill is a pure read.
    let backfilled = episodic.get(recalled[1].id).await.unwrap().unwrap();
    assert_eq!(backfilled.access_count, 0);
}

#[tokio::test]
async fn test_context_recall_escapes_like_wildcards() {
    let (db, _) = setup().await;
    let episodic = EpisodicMemoryStore::new(db);
    let literal = episodic.save("coupon 50%_off worked", 2, "glee", false).await.unwrap();
    let decoy = episodic.save("coupon 50xxoff failed", 3, "meh", false).await.unwrap();
    let hits = episodic.retrieve_by_context("50%_off", 2).await.unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].id, literal);
    assert_eq!(hits[0].access_count, 1);
    assert_eq!(hits[1].id, decoy);
    assert_eq!(episodic.get(decoy).await.unwrap().unwrap().access_count, 0);
}

#[tokio::test]
async fn test_context_recall_folds_non_ascii_case() {
    let (db, _) = setup().await;
    let episodic = EpisodicMemoryStore::new(db);
    let target = episodic.save("Đường về nhà hôm nay rất đẹp", 1, "calm", false).await.unwrap();
    episodic.save("unrelated note", 5, "neutral", false).await.unwrap();
    let ascii = episodic.save("Street food night", 1, "glee", false).await.unwrap();

    let hits = episodic.retrieve_by_context("đường", 1).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, target);
    assert_eq!(hits[0].access_count, 1);
    assert_eq!(hits[0].content, "Đường về nhà hôm nay rất đẹp");

    let hits = episodic.retrieve_by_context("STREET", 1).await.unwrap();
    assert_eq!(hits[0].id, ascii);
}

#[tokio::test]
async fn test_migrate_folds_rows_written_before_case_folding() {
    let (db, _) = setup().await;
    sqlx::query(
        "INSERT INTO episodic_memory (content, importance, created_at, last_accessed, day_date)
         VALUES ('Ánh trăng trên hồ', 3, 0, 0, '2024-06-09')",
    )
    .execute(db.pool())
    .await
    .unwrap();
    db.migrate().await.unwrap();

    let episodic = EpisodicMemoryStore::new(db);
    episodic.save("another thing", 5, "neutral", false).await.unwrap();
    let hits = episodic.retrieve_by_context("ánh trăng", 1).await.unwrap();
    assert_eq!(hits[0].content, "Ánh trăng trên hồ");
    assert_eq!(hits[0].access_count, 1);
}

#[tokio::test]
async fn test_decay_spares_core_and_locked_and_runs_once_per_window() {
    let (db, clock) = setup().await;
    let episodic = EpisodicMemoryStore::new(db);
    let plain = episodic.save("lunch chat", 4, "neutral", false).await.unwrap();
    let core = episodic.save("confessed a fear", 4, "vulnerable", true).await.unwrap();
    let locked = episodic.save("birthday wish", 4, "warm", false).await.unwrap();
    let floor = episodic.save("tiny thing", 1, "neutral", false).await.unwrap();
    episodic.set_decay_locked(locked, true).await.unwrap();

    clock.advance(Duration::days(3));
    assert_eq!(episodic.decay_cycle().await.unwrap(), 0);

    clock.advance(Duration::days(5));
    assert_eq!(episodic.decay_cycle().await.unwrap(), 1);
    assert_eq!(episodic.get(plain).await.unwrap().unwrap().importance, 3);
    assert_eq!(episodic.get(core).await.unwrap().unwrap().importance, 4);
    assert_eq!(episodic.get(locked).await.unwrap().unwrap().importance, 4);
    assert_eq!(episodic.get(floor).await.unwrap().unwrap().importance, 1);

    // Same week again: nothing moves.
    clock.advance(Duration::hours(2));
    assert_eq!(episodic.decay_cycle().await.unwrap(), 0);
    assert_eq!(episodic.get(plain).await.unwrap().unwrap().importance, 3);

    clock.advance(Duration::days(7));
    assert_eq!(episodic.decay_cycle().await.unwrap(), 1);
    assert_eq!(episodic.get(plain).await.unwrap().unwrap().importance, 2);
}

#[tokio::test]
async fn test_prune_only_removes_faded_unprotected_rows() {
    let (db, _) = setup().await;
    let episodic = EpisodicMemoryStore::new(db.clone());
    let faded = episodic.save("gone", 1, "neutral", false).await.unwrap();
    let core = episodic.save("kept forever", 1, "neutral", true).await.unwrap();
    sqlx::query("UPDATE episodic_memory SET importance = 0")
        .execute(db.pool())
        .await
        .unwrap();
    assert_eq!(episodic.prune_faded().await.unwrap(), 1);
    assert!(episodic.get(faded).await.unwrap().is_none());
    assert!(episodic.get(core).await.unwrap().is_some());
}

// ============================================================================
// Profile and self image
// ============================================================================

#[tokio::test]
async fn test_profile_overwrite_hysteresis() {
    let (db, _) = setup().await;
    let profile = ProfileStore::new(db);
    assert_eq!(profile.update("city", "Hanoi", 0.8).await.unwrap(), ProfileWrite::Inserted);
    assert_eq!(profile.update("city", "Hue", 0.71).await.unwrap(), ProfileWrite::Kept);
    assert_eq!(profile.get("city").await.unwrap().unwrap().value, "Hanoi");
    assert_eq!(profile.update("city", "Da Nang", 0.73).await.unwrap(), ProfileWrite::Overwritten);
    let fact = profile.get("city").await.unwrap().unwrap();
    assert_eq!(fact.value, "Da Nang");
    assert!((fact.confidence - 0.73).abs() < 1e-6);
}

#[tokio::test]
async fn test_self_image_seed_and_moving_average() {
    let (db, _) = setup().await;
    let image = SelfImageStore::new(db);
    assert_eq!(image.all().await.unwrap().len(), 4);
    let playful = image.update("Playful", 1.0, 0.1).await.unwrap();
    assert!((playful - 0.73).abs() < 1e-5);
    let sulky = image.update("sulky", 1.0, 0.8).await.unwrap();
    assert!((sulky - 0.88).abs() < 1e-5);
    let fresh = image.update("curious", 0.6, 0.1).await.unwrap();
    assert!((fresh - 0.6).abs() < 1e-6);
}

// ============================================================================
// Sessions
// ============================================================================

#[tokio::test]
async fn test_messages_open_sessions_on_gap() {
    let (db, clock) = setup().await;
    let sessions = SessionManager::new(db.clone(), Duration::hours(4));
    let log = MessageLog::new(db);

    assert!(sessions.should_start_new_session(None));
    let first = sessions.record_message(Role::User, "hi", false).await.unwrap();
    assert!(first.opened_session);
    assert!(first.gap.is_none());

    clock.advance(Duration::hours(3) + Duration::minutes(59));
    let second = sessions.record_message(Role::User, "still there?", false).await.unwrap();
    assert!(!second.opened_session);
    assert_eq!(second.session_id, first.session_id);

    clock.advance(Duration::hours(4));
    let third = sessions.record_message(Role::User, "back", false).await.unwrap();
    assert!(third.opened_session);
    assert_ne!(third.session_id, first.session_id);

    let closed = sessions.get(&first.session_id).await.unwrap().unwrap();
    assert!(closed.end_time.is_some());
    assert_eq!(closed.message_count, 2);
    let open = sessions.current_session().await.unwrap().unwrap();
    assert_eq!(open.session_id, third.session_id);
    assert_eq!(log.recent(10).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_midnight_crossing_opens_session() {
    let clock = Arc::new(ManualClock::new(
        Local.with_ymd_and_hms(2024, 6, 10, 23, 59, 30).single().unwrap(),
    ));
    let db = Arc::new(SqliteStore::with_clock(":memory:", clock.clone()).await.unwrap());
    let sessions = SessionManager::new(db, Duration::hours(4));
    let a = sessions.record_message(Role::User, "late night", false).await.unwrap();
    clock.advance(Duration::minutes(1));
    let b = sessions.record_message(Role::User, "new day", false).await.unwrap();
    assert!(b.opened_session);
    assert_ne!(a.session_id, b.session_id);
}

#[tokio::test]
async fn test_start_session_keeps_single_open_session() {
    let (db, _) = setup().await;
    let sessions = SessionManager::new(db.clone(), Duration::hours(4));
    sessions.start_session().await.unwrap();
    sessions.start_session().await.unwrap();
    let open: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM conversation_sessions WHERE end_time IS NULL",
    )
    .fetch_one(db.pool())
    .await
    .unwrap();
    assert_eq!(open, 1);
    let stats = sessions.session_stats(7).await.unwrap();
    assert_eq!(stats.total_sessions, 2);
}

#[tokio::test]
async fn test_message_after_gap_lands_in_explicitly_started_session() {
    let (db, clock) = setup().await;
    let sessions = SessionManager::new(db.clone(), Duration::hours(4));
    let first = sessions.record_message(Role::User, "morning", false).await.unwrap();

    clock.advance(Duration::hours(5));
    assert!(sessions.should_start_new_session(Some(start())));
    let started = sessions.start_session().await.unwrap();
    let msg = sessions.record_message(Role::User, "back again", false).await.unwrap();

    assert_eq!(msg.session_id, started.session_id);
    assert!(!msg.opened_session);
    assert_eq!(msg.gap, Some(Duration::hours(5)));
    let open = sessions.current_session().await.unwrap().unwrap();
    assert_eq!(open.session_id, started.session_id);
    assert!(open.end_time.is_none());

    let closed = sessions.get(&first.session_id).await.unwrap().unwrap();
    assert_eq!(closed.message_count, 1);
    let stats = sessions.session_stats(7).await.unwrap();
    assert_eq!(stats.total_sessions, 2);
    assert_eq!(stats.avg_messages, 1.0);
}

// ============================================================================
// Growth
// ============================================================================

#[tokio::test]
async fn test_fresh_relationship_gains_xp_and_trust() {
    let (db, _) = setup().await;
    let judge = Arc::new(ScriptedJudge::new());
    judge.push_interaction(verdict(8));
    let growth = GrowthEngine::new(db, judge, XpCurve::default());

    let outcome = growth.process_interaction("we went hiking and it was amazing").await.unwrap();
    assert_eq!(outcome.xp_gained, 8);
    assert!(!outcome.level_up);
    assert_eq!(outcome.current_level, 1);
    assert!((outcome.trust_change - 0.02).abs() < 1e-6);
    assert!(!outcome.used_fallback);

    let rel = growth.relationship().await.unwrap();
    assert_eq!(rel.current_xp, 8);
    assert!((rel.trust_score - 0.52).abs() < 1e-6);
    assert_eq!(rel.days_active, 1);
}

#[tokio::test]
async fn test_time_gate_holds_then_releases() {
    let (db, clock) = setup().await;
    let judge = Arc::new(ScriptedJudge::new());
    let growth = GrowthEngine::new(db, judge.clone(), XpCurve::default());
    let today = clock.today();

    growth
        .save_relationship(&RelationshipState {
            level: 2,
            current_xp: 300,
            total_xp: 400,
            trust_score: 0.5,
            days_active: 0,
            last_interaction_date: today,
        })
        .await
        .unwrap();

    judge.push_interaction(verdict(0));
    let held = growth.process_interaction("ok").await.unwrap();
    assert!(!held.level_up);
    assert_eq!(held.current_level, 2);
    assert_eq!(growth.relationship().await.unwrap().current_xp, 300);

    let mut rel = growth.relationship().await.unwrap();
    rel.days_active = 2;
    growth.save_relationship(&rel).await.unwrap();
    judge.push_interaction(verdict(0));
    let released = growth.process_interaction("ok").await.unwrap();
    assert!(released.level_up);
    assert_eq!(released.current_level, 3);
    assert_eq!(growth.relationship().await.unwrap().current_xp, 150);
}

#[tokio::test]
async fn test_judge_failure_uses_word_count_heuristic() {
    let (db, _) = setup().await;
    let judge = Arc::new(ScriptedJudge::new());
    judge.fail_interaction();
    let growth = GrowthEngine::new(db, judge, XpCurve::default());
    let outcome = growth
        .process_interaction("one two three four five six seven eight nine ten eleven")
        .await
        .unwrap();
    assert!(outcome.used_fallback);
    assert_eq!(outcome.xp_gained, 2);
    assert_eq!(outcome.sentiment, Sentiment::Neutral);
}

#[tokio::test]
async fn test_harsh_negative_band_and_core_memory() {
    let (db, _) = setup().await;
    let judge = Arc::new(ScriptedJudge::new());
    judge.push_interaction(InteractionVerdict {
        xp_change: -6,
        sentiment: Sentiment::Negative,
        is_core_memory: true,
        memory_type: "conflict".into(),
        reason: "insult".into(),
    });
    let growth = GrowthEngine::new(db, judge, XpCurve::default());
    let outcome = growth.process_interaction("you are useless").await.unwrap();
    // -6 is clamped to -5, which still lands in the harsh band.
    assert_eq!(outcome.xp_gained, -5);
    assert!((outcome.trust_change + 0.05).abs() < 1e-6);
    assert!(outcome.core_memory_id.is_some());

    let core = growth.core_memories(5).await.unwrap();
    assert_eq!(core.len(), 1);
    assert_eq!(core[0].content, "USER: you are useless | REASON: insult");
    assert_eq!(core[0].related_level, 1);
    assert_eq!(core[0].emotional_impact, 5);
}

#[tokio::test]
async fn test_days_active_counts_each_new_day_once() {
    let (db, clock) = setup().await;
    let judge = Arc::new(ScriptedJudge::new());
    let growth = GrowthEngine::new(db, judge, XpCurve::default());
    growth.touch_active_day().await.unwrap();
    growth.touch_active_day().await.unwrap();
    assert_eq!(growth.relationship().await.unwrap().days_active, 1);
    clock.advance(Duration::days(1));
    growth.touch_active_day().await.unwrap();
    growth.touch_active_day().await.unwrap();
    assert_eq!(growth.relationship().await.unwrap().days_active, 2);
}

// ============================================================================
// Decay scheduler
// ============================================================================

#[tokio::test]
async fn test_decay_scheduler_is_hour_gated() {
    let (db, clock) = setup().await;
    let episodic = Arc::new(EpisodicMemoryStore::new(db.clone()));
    let scheduler = DecayScheduler::new(db, episodic.clone(), 3600);
    let id = episodic.save("old news", 4, "neutral", false).await.unwrap();
    clock.advance(Duration::days(8));

    assert_eq!(scheduler.run_if_due().await.unwrap(), DecayOutcome::Ran { decayed: 1, pruned: 0 });
    clock.advance(Duration::minutes(30));
    assert!(matches!(scheduler.run_if_due().await.unwrap(), DecayOutcome::Skipped { .. }));
    assert_eq!(episodic.get(id).await.unwrap().unwrap().importance, 3);
}

// ============================================================================
// Consolidation and patterns
// ============================================================================

struct Pipeline {
    db: Arc<SqliteStore>,
    episodic: Arc<EpisodicMemoryStore>,
    sessions: SessionManager,
    job: ConsolidationJob,
    patterns: Arc<PatternDetector>,
}

fn pipeline(db: Arc<SqliteStore>, judge: Arc<ScriptedJudge>) -> Pipeline {
    let episodic = Arc::new(EpisodicMemoryStore::new(db.clone()));
    let state = Arc::new(StateStore::new(db.clone()));
    let j: Arc<dyn Judge> = judge.clone();
    let s: Arc<dyn Summarizer> = judge;
    let patterns = Arc::new(PatternDetector::new(db.clone(), episodic.clone(), j, 0.8));
    Pipeline {
        db: db.clone(),
        episodic,
        sessions: SessionManager::new(db.clone(), Duration::hours(4)),
        job: ConsolidationJob::new(db, state, s, patterns.clone(), 7),
        patterns,
    }
}

#[tokio::test]
async fn test_consolidation_summarizes_and_archives() {
    let (db, clock) = setup().await;
    let judge = Arc::new(ScriptedJudge::new());
    let p = pipeline(db, judge.clone());

    p.sessions.record_message(Role::User, "my guitar lesson went well", false).await.unwrap();
    p.sessions.record_message(Role::Assistant, "that's great!", false).await.unwrap();
    let fragment = p.episodic.save("guitar lesson", 3, "proud", false).await.unwrap();
    let core = p.episodic.save("first time user cried", 3, "sad", true).await.unwrap();
    let vivid = p.episodic.save("promise to visit", 5, "warm", false).await.unwrap();
    sqlx::query("UPDATE episodic_memory SET importance = 9 WHERE id = ?")
        .bind(vivid)
        .execute(p.db.pool())
        .await
        .unwrap();

    clock.advance(Duration::days(1));
    assert!(p.job.should_consolidate_yesterday().await.unwrap());

    judge.push_summary("A cheerful day about music.");
    let report = p.job.consolidate_pending().await.unwrap().expect("day should consolidate");
    assert_eq!(report.total_messages, 2);
    assert_eq!(report.session_count, 1);
    assert_eq!(report.archived, 1);
    assert_eq!(report.method, ConsolidationMethod::Judge);
    assert!(report.key_topics.contains(&"guitar".to_string()));

    assert_eq!(p.episodic.get(fragment).await.unwrap().unwrap().importance, 0);
    assert_eq!(p.episodic.get(core).await.unwrap().unwrap().importance, 3);
    assert_eq!(p.episodic.get(vivid).await.unwrap().unwrap().importance, 9);

    let summary = p.episodic.get(report.summary_memory_id).await.unwrap().unwrap();
    assert_eq!(summary.kind, MemoryKind::Consolidated);
    assert_eq!(summary.importance, 5);
    assert_eq!(summary.day_date, "2024-06-10");

    // Idempotent guard.
    assert!(!p.job.should_consolidate_yesterday().await.unwrap());
    assert!(p.job.consolidate_pending().await.unwrap().is_none());
}

#[tokio::test]
async fn test_consolidation_without_messages_is_noop() {
    let (db, clock) = setup().await;
    let p = pipeline(db, Arc::new(ScriptedJudge::new()));
    let today = clock.today();
    assert!(p.job.consolidate_day(today).await.unwrap().is_none());
    assert!(!p.job.should_consolidate_yesterday().await.unwrap());
}

#[tokio::test]
async fn test_consolidation_falls_back_to_rule_based_summary() {
    let (db, clock) = setup().await;
    let judge = Arc::new(ScriptedJudge::new());
    let p = pipeline(db, judge.clone());
    p.sessions.record_message(Role::User, "talking about coffee again", false).await.unwrap();
    judge.fail_summary();

    let report = p.job.consolidate_day(clock.today()).await.unwrap().unwrap();
    assert_eq!(report.method, ConsolidationMethod::RuleBased);
    let stored = p.job.summary_for(clock.today()).await.unwrap().unwrap();
    assert_eq!(stored.consolidation_method, ConsolidationMethod::RuleBased);
    assert!(stored
        .emotional_summary
        .starts_with("On 2024-06-10 we exchanged 1 messages across 1 conversation."));
    assert_eq!(stored.total_messages, 1);
    assert!(stored.valence_avg.is_some());

    // Re-running rewrites in place.
    judge.push_summary("Coffee talk.");
    let again = p.job.consolidate_day(clock.today()).await.unwrap().unwrap();
    assert_eq!(again.summary_memory_id, report.summary_memory_id);
    assert_eq!(p.episodic.consolidated(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_patterns_need_two_summaries_and_merge_near_duplicates() {
    let (db, clock) = setup().await;
    let judge = Arc::new(ScriptedJudge::new());
    let p = pipeline(db, judge.clone());

    p.sessions.record_message(Role::User, "late night coding", false).await.unwrap();
    judge.push_summary("Stayed up late coding.");
    let first = p.job.consolidate_day(clock.today()).await.unwrap().unwrap();
    assert!(first.patterns.is_empty());

    clock.advance(Duration::days(1));
    p.sessions.record_message(Role::User, "coding late again", false).await.unwrap();
    judge.push_summary("Another late coding night.");
    judge.push_patterns(PatternReport {
        patterns: vec![PatternCandidate {
            pattern_type: "schedule".into(),
            description: "User codes late at night".into(),
            confidence: 0.7,
        }],
    });
    let second = p.job.consolidate_day(clock.today()).await.unwrap().unwrap();
    assert_eq!(second.patterns.len(), 1);
    assert!(second.patterns[0].is_new);

    judge.push_patterns(PatternReport {
        patterns: vec![PatternCandidate {
            pattern_type: "schedule".into(),
            description: "user codes late at night.".into(),
            confidence: 0.9,
        }],
    });
    let merged = p.patterns.detect_patterns(7).await.unwrap();
    assert_eq!(merged.len(), 1);
    assert!(!merged[0].is_new);
    assert_eq!(merged[0].frequency, 2);

    let all = p.patterns.all().await.unwrap();
    assert_eq!(all.len(), 1);
    assert!((all[0].confidence_score - 0.9).abs() < 1e-6);
}

#[tokio::test]
async fn test_pattern_judge_failure_does_not_fail_consolidation() {
    let (db, clock) = setup().await;
    let judge = Arc::new(ScriptedJudge::new());
    let p = pipeline(db, judge.clone());
    for day in 0..2 {
        p.sessions.record_message(Role::User, "hello there friend", false).await.unwrap();
        judge.push_summary(format!("Day {}", day));
        if day == 1 {
            judge.fail_patterns();
        }
        assert!(p.job.consolidate_day(clock.today()).await.unwrap().is_some());
        clock.advance(Duration::days(1));
    }
    assert!(p.patterns.all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_mood_verdict_applies_through_state_update() {
    let (db, _) = setup().await;
    let state = StateStore::new(db);
    let verdict = MoodVerdict {
        valence_change: 0.5,
        energy_change: -0.2,
        bond_change: 0.1,
        bond_scar: 0.3,
        micro_mood: "hurt".into(),
        is_breaking_point: true,
    };
    let after = state.update(move |s| s.apply(&verdict)).await.unwrap();
    assert!((after.valence - 0.7).abs() < 1e-6);
    assert!((after.energy - 0.6).abs() < 1e-6);
    assert!((after.bond - 0.1).abs() < 1e-6);
}

// ============================================================================
// Response quality
// ============================================================================

fn quality(relevance: i32, creativity: i32, personality: i32) -> QualityVerdict {
    QualityVerdict {
        relevance,
        creativity,
        personality,
        critique: String::new(),
    }
}

#[tokio::test]
async fn test_quality_scores_clamp_and_average_over_window() {
    let (db, clock) = setup().await;
    let judge = Arc::new(ScriptedJudge::new());
    let store = ResponseQualityStore::new(db, judge);

    store.record(None, quality(1, 1, 1)).await.unwrap();
    clock.advance(Duration::days(10));
    let kept = store.record(Some(7), quality(4, 0, 12)).await.unwrap();
    assert_eq!((kept.relevance, kept.creativity, kept.personality), (4, 1, 5));
    store.record(Some(9), quality(5, 3, 4)).await.unwrap();

    let averages = store.averages(7).await.unwrap();
    assert_eq!(averages.evaluations, 2);
    assert!((averages.relevance - 4.5).abs() < 1e-9);
    assert!((averages.creativity - 2.0).abs() < 1e-9);
    assert!((averages.personality - 4.5).abs() < 1e-9);

    let recent = store.recent(2).await.unwrap();
    assert_eq!(recent[0].message_id, Some(9));
    assert_eq!(recent[1].message_id, Some(7));
}

#[tokio::test]
async fn test_quality_judge_failure_stores_nothing() {
    let (db, _) = setup().await;
    let judge = Arc::new(ScriptedJudge::new());
    judge.fail_evaluation();
    let store = ResponseQualityStore::new(db, judge.clone());
    assert!(store.evaluate(Some(1), "hi", "hello", "Linh").await.is_err());
    assert!(store.recent(5).await.unwrap().is_empty());
    assert_eq!(store.averages(7).await.unwrap().evaluations, 0);
    assert_eq!(judge.call_count("evaluate_response"), 1);
}
