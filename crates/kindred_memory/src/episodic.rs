//! Episodic memory: an append-only log of remembered moments.
//!
//! Importance is the only thing that changes after insert. Recall raises it
//! (reinforcement), idle weeks lower it (decay), consolidation zeroes the
//! fragments a daily summary supersedes, and a prune pass deletes what has
//! faded to nothing. Core and decay-locked rows are exempt from all of that.

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate};
use kindred_core::temporal::day_key;
use kindred_core::text::{escape_like, keywords};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use std::sync::Arc;

use crate::SqliteStore;

pub const MAX_IMPORTANCE: i32 = 10;
/// Rows above this importance no longer decay.
pub const DECAY_CEILING: i32 = 8;
/// Recall with fewer keyword hits than this is topped up from important memories.
pub const MIN_CONTEXT_HITS: usize = 2;

const COLUMNS: &str = "id, content, importance, emotion_tone, is_core, created_at, last_accessed, \
                       access_count, decay_locked, day_date, kind";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    Episode,
    Consolidated,
}

impl MemoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryKind::Episode => "episode",
            MemoryKind::Consolidated => "consolidated",
        }
    }

    pub fn parse_str(s: &str) -> Self {
        match s {
            "consolidated" => MemoryKind::Consolidated,
            _ => MemoryKind::Episode,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodicMemory {
    pub id: i64,
    pub content: String,
    pub importance: i32,
    pub emotion_tone: String,
    pub is_core: bool,
    pub created_at: i64,
    pub last_accessed: i64,
    pub access_count: i64,
    pub decay_locked: bool,
    pub day_date: String,
    pub kind: MemoryKind,
}

fn row_to_memory(row: &SqliteRow) -> EpisodicMemory {
    EpisodicMemory {
        id: row.get("id"),
        content: row.get("content"),
        importance: row.get::<i64, _>("importance") as i32,
        emotion_tone: row.get("emotion_tone"),
        is_core: row.get("is_core"),
        created_at: row.get("created_at"),
        last_accessed: row.get("last_accessed"),
        access_count: row.get("access_count"),
        decay_locked: row.get("decay_locked"),
        day_date: row.get("day_date"),
        kind: MemoryKind::parse_str(&row.get::<String, _>("kind")),
    }
}

/// A row about to be written. Internal paths may use the full `[0, 10]` range.
#[derive(Debug, Clone)]
pub(crate) struct NewMemory<'a> {
    pub content: &'a str,
    pub importance: i32,
    pub emotion_tone: &'a str,
    pub is_core: bool,
    pub kind: MemoryKind,
    pub day_date: NaiveDate,
    pub at: i64,
}

pub(crate) async fn insert_memory(conn: &mut SqliteConnection, m: &NewMemory<'_>) -> Result<i64> {
    let result = sqlx::query(
        "INSERT INTO episodic_memory
            (content, content_folded, importance, emotion_tone, is_core, created_at, last_accessed,
             access_count, decay_locked, day_date, kind)
         VALUES (?, ?, ?, ?, ?, ?, ?, 0, 0, ?, ?)",
    )
    .bind(m.content)
    .bind(m.content.to_lowercase())
    .bind(m.importance.clamp(0, MAX_IMPORTANCE) as i64)
    .bind(m.emotion_tone)
    .bind(m.is_core)
    .bind(m.at)
    .bind(m.at)
    .bind(day_key(m.day_date))
    .bind(m.kind.as_str())
    .execute(conn)
    .await
    .context("Failed to insert episodic memory")?;
    Ok(result.last_insert_rowid())
}

pub struct EpisodicMemoryStore {
    db: Arc<SqliteStore>,
    grace: Duration,
}

impl EpisodicMemoryStore {
    pub fn new(db: Arc<SqliteStore>) -> Self {
        Self::with_grace(db, Duration::days(7))
    }

    /// `grace` is how long a memory may go unrecalled before it starts to fade.
    pub fn with_grace(db: Arc<SqliteStore>, grace: Duration) -> Self {
        Self { db, grace }
    }

    /// Append a memory dated now. Importance is clamped to `[1, 5]`.
    pub async fn save(
        &self,
        content: &str,
        importance: i32,
        emotion_tone: &str,
        is_core: bool,
    ) -> Result<i64> {
        let now = self.db.now();
        let _guard = self.db.write_lock().await;
        let mut conn = self.db.pool().acquire().await?;
        let id = insert_memory(
            &mut conn,
            &NewMemory {
                content,
                importance: importance.clamp(1, 5),
                emotion_tone: if emotion_tone.trim().is_empty() { "neutral" } else { emotion_tone },
                is_core,
                kind: MemoryKind::Episode,
                day_date: now.date_naive(),
                at: now.timestamp(),
            },
        )
        .await?;
        tracing::debug!("Saved episodic memory #{} (core={})", id, is_core);
        Ok(id)
    }

    pub async fn get(&self, id: i64) -> Result<Option<EpisodicMemory>> {
        let sql = format!("SELECT {} FROM episodic_memory WHERE id = ?", COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(self.db.pool())
            .await
            .context("Failed to read episodic memory")?;
        Ok(row.as_ref().map(row_to_memory))
    }

    /// Top memories by `(is_core, importance, recency)`. Pure read.
    pub async fn retrieve_important(&self, limit: u32) -> Result<Vec<EpisodicMemory>> {
        self.retrieve_important_excluding(limit, &[]).await
    }

    async fn retrieve_important_excluding(
        &self,
        limit: u32,
        exclude: &[i64],
    ) -> Result<Vec<EpisodicMemory>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let not_in = if exclude.is_empty() {
            String::new()
        } else {
            format!(" AND id NOT IN ({})", vec!["?"; exclude.len()].join(", "))
        };
        let sql = format!(
            "SELECT {} FROM episodic_memory WHERE importance > 0{}
             ORDER BY is_core DESC, importance DESC, created_at DESC, id DESC LIMIT ?",
            COLUMNS, not_in
        );
        let mut query = sqlx::query(&sql);
        for id in exclude {
            query = query.bind(*id);
        }
        let rows = query
            .bind(limit as i64)
            .fetch_all(self.db.pool())
            .await
            .context("Failed to retrieve important memories")?;
        Ok(rows.iter().map(row_to_memory).collect())
    }

    /// Keyword recall. Every hit is reinforced; sparse results are topped up
    /// with important memories so callers get up to `limit` distinct rows.
    pub async fn retrieve_by_context(
        &self,
        query_text: &str,
        limit: u32,
    ) -> Result<Vec<EpisodicMemory>> {
        let words = keywords(query_text);
        if words.is_empty() {
            return self.retrieve_important(limit).await;
        }
        if limit == 0 {
            return Ok(Vec::new());
        }

        let conditions = vec!["content_folded LIKE ? ESCAPE '\\'"; words.len()].join(" OR ");
        let sql = format!(
            "SELECT {} FROM episodic_memory WHERE importance > 0 AND ({})
             ORDER BY is_core DESC, importance DESC, created_at DESC, id DESC LIMIT ?",
            COLUMNS, conditions
        );
        let mut query = sqlx::query(&sql);
        for word in &words {
            query = query.bind(format!("%{}%", escape_like(word)));
        }
        let rows = query
            .bind(limit as i64)
            .fetch_all(self.db.pool())
            .await
            .context("Failed to search episodic memory")?;
        let mut hits: Vec<EpisodicMemory> = rows.iter().map(row_to_memory).collect();

        let ids: Vec<i64> = hits.iter().map(|m| m.id).collect();
        let touched_at = self.reinforce_many(&ids).await?;
        for m in hits.iter_mut() {
            m.importance = (m.importance + 1).min(MAX_IMPORTANCE);
            m.access_count += 1;
            m.last_accessed = touched_at;
        }

        if hits.len() < MIN_CONTEXT_HITS {
            let remaining = limit.saturating_sub(hits.len() as u32);
            let backfill = self.retrieve_important_excluding(remaining, &ids).await?;
            tracing::debug!(
                "Context recall found {} hits, backfilled {}",
                hits.len(),
                backfill.len()
            );
            hits.extend(backfill);
        }
        Ok(hits)
    }

    /// Recall strengthens memory. Returns false if the id does not exist.
    pub async fn reinforce(&self, id: i64) -> Result<bool> {
        let now = self.db.now().timestamp();
        let _guard = self.db.write_lock().await;
        let result = sqlx::query(
            "UPDATE episodic_memory
             SET last_accessed = ?, importance = MIN(importance + 1, ?),
                 access_count = access_count + 1
             WHERE id = ?",
        )
        .bind(now)
        .bind(MAX_IMPORTANCE as i64)
        .bind(id)
        .execute(self.db.pool())
        .await
        .context("Failed to reinforce memory")?;
        Ok(result.rows_affected() > 0)
    }

    async fn reinforce_many(&self, ids: &[i64]) -> Result<i64> {
        let now = self.db.now().timestamp();
        if ids.is_empty() {
            return Ok(now);
        }
        let _guard = self.db.write_lock().await;
        let mut tx = self.db.pool().begin().await?;
        for id in ids {
            sqlx::query(
                "UPDATE episodic_memory
                 SET last_accessed = ?, importance = MIN(importance + 1, ?),
                     access_count = access_count + 1
                 WHERE id = ?",
            )
            .bind(now)
            .bind(MAX_IMPORTANCE as i64)
            .bind(*id)
            .execute(&mut *tx)
            .await
            .context("Failed to reinforce memory")?;
        }
        tx.commit().await?;
        Ok(now)
    }

    /// Fade memories idle past the grace window by one step. A row decays at
    /// most once per grace window, so repeated runs are harmless.
    pub async fn decay_cycle(&self) -> Result<u64> {
        let now = self.db.now().timestamp();
        let cutoff = now - self.grace.num_seconds();
        let _guard = self.db.write_lock().await;
        let result = sqlx::query(
            "UPDATE episodic_memory
             SET importance = importance - 1, last_decayed = ?
             WHERE last_accessed < ?
               AND (last_decayed IS NULL OR last_decayed < ?)
               AND importance > 1 AND importance <= ?
               AND decay_locked = 0 AND is_core = 0",
        )
        .bind(now)
        .bind(cutoff)
        .bind(cutoff)
        .bind(DECAY_CEILING as i64)
        .execute(self.db.pool())
        .await
        .context("Failed to run decay cycle")?;
        Ok(result.rows_affected())
    }

    /// Hard-delete rows that have faded to nothing.
    pub async fn prune_faded(&self) -> Result<u64> {
        let _guard = self.db.write_lock().await;
        let result = sqlx::query(
            "DELETE FROM episodic_memory
             WHERE importance <= 0 AND is_core = 0 AND decay_locked = 0",
        )
        .execute(self.db.pool())
        .await
        .context("Failed to prune faded memories")?;
        Ok(result.rows_affected())
    }

    pub async fn set_decay_locked(&self, id: i64, locked: bool) -> Result<bool> {
        let _guard = self.db.write_lock().await;
        let result = sqlx::query("UPDATE episodic_memory SET decay_locked = ? WHERE id = ?")
            .bind(locked)
            .bind(id)
            .execute(self.db.pool())
            .await
            .context("Failed to set decay lock")?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn for_day(&self, date: NaiveDate) -> Result<Vec<EpisodicMemory>> {
        let sql = format!("SELECT {} FROM episodic_memory WHERE day_date = ? ORDER BY id", COLUMNS);
        let rows = sqlx::query(&sql)
            .bind(day_key(date))
            .fetch_all(self.db.pool())
            .await
            .context("Failed to read memories for day")?;
        Ok(rows.iter().map(row_to_memory).collect())
    }

    /// Consolidation artifacts, newest day first.
    pub async fn consolidated(&self, limit: u32) -> Result<Vec<EpisodicMemory>> {
        let sql = format!(
            "SELECT {} FROM episodic_memory WHERE kind = 'consolidated' AND importance > 0
             ORDER BY day_date DESC, id DESC LIMIT ?",
            COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(limit as i64)
            .fetch_all(self.db.pool())
            .await
            .context("Failed to read consolidated memories")?;
        Ok(rows.iter().map(row_to_memory).collect())
    }

    pub async fn count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM episodic_memory")
            .fetch_one(self.db.pool())
            .await
            .context("Failed to count memories")?;
        Ok(row.get("n"))
    }
}
