//! Self-evaluation of replies. After a turn the Judge rates the reply for
//! relevance, creativity and personality; the scores are kept as a running
//! record of how well the companion sounds like itself.

use anyhow::{Context, Result};
use kindred_core::temporal::day_key;
use kindred_core::{Judge, QualityVerdict};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::sync::Arc;

use crate::SqliteStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseQuality {
    pub id: i64,
    /// The assistant message that was rated, when it was persisted.
    pub message_id: Option<i64>,
    pub relevance: i32,
    pub creativity: i32,
    pub personality: i32,
    pub critique: String,
    pub evaluated_at: i64,
    pub day_date: String,
}

fn row_to_quality(row: &SqliteRow) -> ResponseQuality {
    ResponseQuality {
        id: row.get("id"),
        message_id: row.get("message_id"),
        relevance: row.get::<i64, _>("relevance") as i32,
        creativity: row.get::<i64, _>("creativity") as i32,
        personality: row.get::<i64, _>("personality") as i32,
        critique: row.get("critique"),
        evaluated_at: row.get("evaluated_at"),
        day_date: row.get("day_date"),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QualityAverages {
    pub evaluations: i64,
    pub relevance: f64,
    pub creativity: f64,
    pub personality: f64,
}

pub struct ResponseQualityStore {
    db: Arc<SqliteStore>,
    judge: Arc<dyn Judge>,
}

impl ResponseQualityStore {
    pub fn new(db: Arc<SqliteStore>, judge: Arc<dyn Judge>) -> Self {
        Self { db, judge }
    }

    /// Ask the Judge to rate `reply` and store the scores.
    pub async fn evaluate(
        &self,
        message_id: Option<i64>,
        user_text: &str,
        reply: &str,
        persona: &str,
    ) -> Result<ResponseQuality> {
        let verdict = self
            .judge
            .evaluate_response(user_text, reply, persona)
            .await
            .context("Evaluation judge failed")?;
        let recorded = self.record(message_id, verdict).await?;
        tracing::info!(
            "Self-evaluation: relevance {}/5, creativity {}/5, personality {}/5 {}",
            recorded.relevance,
            recorded.creativity,
            recorded.personality,
            recorded.critique
        );
        Ok(recorded)
    }

    pub async fn record(
        &self,
        message_id: Option<i64>,
        verdict: QualityVerdict,
    ) -> Result<ResponseQuality> {
        let verdict = verdict.sanitized();
        let now = self.db.now();
        let _guard = self.db.write_lock().await;
        let result = sqlx::query(
            "INSERT INTO response_quality
                (message_id, relevance, creativity, personality, critique, evaluated_at, day_date)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(message_id)
        .bind(verdict.relevance as i64)
        .bind(verdict.creativity as i64)
        .bind(verdict.personality as i64)
        .bind(&verdict.critique)
        .bind(now.timestamp())
        .bind(day_key(now.date_naive()))
        .execute(self.db.pool())
        .await
        .context("Failed to store response quality")?;

        Ok(ResponseQuality {
            id: result.last_insert_rowid(),
            message_id,
            relevance: verdict.relevance,
            creativity: verdict.creativity,
            personality: verdict.personality,
            critique: verdict.critique,
            evaluated_at: now.timestamp(),
            day_date: day_key(now.date_naive()),
        })
    }

    /// Newest first.
    pub async fn recent(&self, limit: u32) -> Result<Vec<ResponseQuality>> {
        let rows = sqlx::query(
            "SELECT id, message_id, relevance, creativity, personality, critique,
                    evaluated_at, day_date
             FROM response_quality ORDER BY evaluated_at DESC, id DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(self.db.pool())
        .await
        .context("Failed to read response quality")?;
        Ok(rows.iter().map(row_to_quality).collect())
    }

    /// Mean scores over evaluations from the last `days` days.
    pub async fn averages(&self, days: i64) -> Result<QualityAverages> {
        let since = (self.db.now() - chrono::Duration::days(days)).timestamp();
        let row = sqlx::query(
            "SELECT COUNT(*) AS n,
                    AVG(relevance) AS relevance,
                    AVG(creativity) AS creativity,
                    AVG(personality) AS personality
             FROM response_quality WHERE evaluated_at >= ?",
        )
        .bind(since)
        .fetch_one(self.db.pool())
        .await
        .context("Failed to average response quality")?;

        let evaluations: i64 = row.get("n");
        if evaluations == 0 {
            return Ok(QualityAverages::default());
        }
        Ok(QualityAverages {
            evaluations,
            relevance: row.get::<Option<f64>, _>("relevance").unwrap_or(0.0),
            creativity: row.get::<Option<f64>, _>("creativity").unwrap_or(0.0),
            personality: row.get::<Option<f64>, _>("personality").unwrap_or(0.0),
        })
    }
}
