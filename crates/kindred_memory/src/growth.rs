//! Relationship growth: XP, trust and time-gated levels, driven by one Judge
//! verdict per user turn.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use kindred_core::temporal::{day_key, parse_day_key};
use kindred_core::{
    advance, InteractionVerdict, Judge, MaturityStage, RelationshipState, Sentiment, XpCurve,
};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use std::sync::Arc;

use crate::SqliteStore;

/// Single-user system: every relationship row is keyed by this id.
pub const USER_ID: &str = "user";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GrowthOutcome {
    pub xp_gained: i32,
    pub level_up: bool,
    pub current_level: u32,
    pub sentiment: Sentiment,
    pub trust_change: f32,
    /// The Judge failed and the word-count heuristic was used.
    pub used_fallback: bool,
    pub core_memory_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreMemory {
    pub id: i64,
    pub content: String,
    pub memory_type: String,
    pub emotional_impact: i64,
    pub related_level: u32,
    pub created_at: i64,
}

fn row_to_relationship(row: &SqliteRow, today: NaiveDate) -> RelationshipState {
    RelationshipState {
        level: row.get::<i64, _>("level").max(1) as u32,
        current_xp: row.get::<i64, _>("current_xp").max(0),
        total_xp: row.get::<i64, _>("total_xp").max(0),
        trust_score: (row.get::<f64, _>("trust_score") as f32).clamp(0.0, 1.0),
        days_active: row.get("days_active"),
        last_interaction_date: parse_day_key(&row.get::<String, _>("last_interaction_date"))
            .unwrap_or(today),
    }
}

async fn load_or_create(
    conn: &mut SqliteConnection,
    today: NaiveDate,
    now: i64,
) -> Result<RelationshipState> {
    let row = sqlx::query(
        "SELECT level, current_xp, total_xp, trust_score, days_active, last_interaction_date
         FROM relationship_state WHERE user_id = ?",
    )
    .bind(USER_ID)
    .fetch_optional(&mut *conn)
    .await
    .context("Failed to read relationship state")?;
    if let Some(row) = row {
        return Ok(row_to_relationship(&row, today));
    }
    let fresh = RelationshipState::fresh(today);
    store(conn, &fresh, now).await?;
    Ok(fresh)
}

async fn store(conn: &mut SqliteConnection, s: &RelationshipState, now: i64) -> Result<()> {
    sqlx::query(
        "INSERT INTO relationship_state
            (user_id, level, current_xp, total_xp, trust_score, days_active,
             last_interaction_date, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(user_id) DO UPDATE SET
            level = excluded.level,
            current_xp = excluded.current_xp,
            total_xp = excluded.total_xp,
            trust_score = excluded.trust_score,
            days_active = excluded.days_active,
            last_interaction_date = excluded.last_interaction_date,
            updated_at = excluded.updated_at",
    )
    .bind(USER_ID)
    .bind(s.level as i64)
    .bind(s.current_xp)
    .bind(s.total_xp)
    .bind(s.trust_score as f64)
    .bind(s.days_active)
    .bind(day_key(s.last_interaction_date))
    .bind(now)
    .execute(conn)
    .await
    .context("Failed to write relationship state")?;
    Ok(())
}

pub struct GrowthEngine {
    db: Arc<SqliteStore>,
    judge: Arc<dyn Judge>,
    curve: XpCurve,
}

impl GrowthEngine {
    pub fn new(db: Arc<SqliteStore>, judge: Arc<dyn Judge>, curve: XpCurve) -> Self {
        Self { db, judge, curve }
    }

    /// Current relationship, creating the fresh default on first use.
    pub async fn relationship(&self) -> Result<RelationshipState> {
        let now = self.db.now();
        let _guard = self.db.write_lock().await;
        let mut conn = self.db.pool().acquire().await?;
        load_or_create(&mut conn, now.date_naive(), now.timestamp()).await
    }

    /// Degrading read for the turn path.
    pub async fn relationship_or_default(&self) -> RelationshipState {
        match self.relationship().await {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("Relationship state unavailable, using default: {:#}", e);
                RelationshipState::fresh(self.db.now().date_naive())
            }
        }
    }

    /// Overwrite the relationship row. Values are clamped to their domains.
    pub async fn save_relationship(&self, state: &RelationshipState) -> Result<()> {
        let mut s = state.clone();
        s.level = s.level.max(1);
        s.current_xp = s.current_xp.max(0);
        s.total_xp = s.total_xp.max(0);
        s.trust_score = s.trust_score.clamp(0.0, 1.0);
        let now = self.db.now().timestamp();
        let _guard = self.db.write_lock().await;
        let mut conn = self.db.pool().acquire().await?;
        store(&mut conn, &s, now).await
    }

    pub async fn maturity(&self) -> MaturityStage {
        self.relationship_or_default().await.maturity()
    }

    /// Count a new active day if the last interaction was on an earlier date.
    pub async fn touch_active_day(&self) -> Result<RelationshipState> {
        let now = self.db.now();
        let today = now.date_naive();
        let _guard = self.db.write_lock().await;
        let mut tx = self.db.pool().begin().await?;
        let mut state = load_or_create(&mut tx, today, now.timestamp()).await?;
        if state.last_interaction_date < today {
            state.days_active += 1;
            state.last_interaction_date = today;
            store(&mut tx, &state, now.timestamp()).await?;
            tracing::info!("New active day, days_active = {}", state.days_active);
        }
        tx.commit().await?;
        Ok(state)
    }

    pub async fn process_interaction(&self, raw_text: &str) -> Result<GrowthOutcome> {
        self.process_interaction_with_context(raw_text, "").await
    }

    /// Judge the turn and apply XP, trust and level changes atomically.
    pub async fn process_interaction_with_context(
        &self,
        raw_text: &str,
        context: &str,
    ) -> Result<GrowthOutcome> {
        self.touch_active_day().await?;

        // The Judge runs outside the write lock; it can take seconds.
        let (verdict, used_fallback) = match self.judge.judge_interaction(raw_text, context).await {
            Ok(v) => (v.sanitized(), false),
            Err(e) => {
                tracing::warn!("Interaction judge failed, using heuristic: {}", e);
                (InteractionVerdict::fallback(raw_text), true)
            }
        };

        let now = self.db.now();
        let _guard = self.db.write_lock().await;
        let mut tx = self.db.pool().begin().await?;
        let state = load_or_create(&mut tx, now.date_naive(), now.timestamp()).await?;

        let core_memory_id = if verdict.is_core_memory {
            let result = sqlx::query(
                "INSERT INTO core_memories
                    (content, memory_type, emotional_impact, related_level, created_at)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(format!("USER: {} | REASON: {}", raw_text, verdict.reason))
            .bind(&verdict.memory_type)
            .bind(verdict.xp_change.abs() as i64)
            .bind(state.level as i64)
            .bind(now.timestamp())
            .execute(&mut *tx)
            .await
            .context("Failed to insert core memory")?;
            Some(result.last_insert_rowid())
        } else {
            None
        };

        let step = advance(&state, verdict.xp_change, &self.curve);
        store(&mut tx, &step.state, now.timestamp()).await?;
        tx.commit().await?;

        if step.level_up {
            tracing::info!("Level up: {} -> {}", state.level, step.state.level);
        } else if step.gated {
            tracing::debug!(
                "Level {} XP met but time gate holds ({} active days)",
                state.level,
                step.state.days_active
            );
        }

        Ok(GrowthOutcome {
            xp_gained: verdict.xp_change,
            level_up: step.level_up,
            current_level: step.state.level,
            sentiment: verdict.sentiment,
            trust_change: step.trust_change,
            used_fallback,
            core_memory_id,
        })
    }

    /// Core memories, newest first.
    pub async fn core_memories(&self, limit: u32) -> Result<Vec<CoreMemory>> {
        let rows = sqlx::query(
            "SELECT id, content, memory_type, emotional_impact, related_level, created_at
             FROM core_memories ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(self.db.pool())
        .await
        .context("Failed to read core memories")?;
        Ok(rows
            .iter()
            .map(|r| CoreMemory {
                id: r.get("id"),
                content: r.get("content"),
                memory_type: r.get("memory_type"),
                emotional_impact: r.get("emotional_impact"),
                related_level: r.get::<i64, _>("related_level") as u32,
                created_at: r.get("created_at"),
            })
            .collect())
    }
}
