//! Behavioral patterns distilled from recent daily summaries.

use anyhow::{Context, Result};
use kindred_core::text::{normalize, token_similarity};
use kindred_core::Judge;
use serde::{Deserialize, Serialize};
use sqlx::Row;
use std::sync::Arc;

use crate::{EpisodicMemoryStore, SqliteStore};

/// Fewer summaries than this is not enough signal to call anything a pattern.
pub const MIN_SUMMARIES: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPattern {
    pub id: i64,
    pub pattern_type: String,
    pub description: String,
    pub confidence_score: f32,
    pub frequency: i64,
    pub detected_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectedPattern {
    pub id: i64,
    pub description: String,
    pub frequency: i64,
    pub is_new: bool,
}

pub struct PatternDetector {
    db: Arc<SqliteStore>,
    episodic: Arc<EpisodicMemoryStore>,
    judge: Arc<dyn Judge>,
    similarity: f32,
}

impl PatternDetector {
    /// Two descriptions are the same pattern when equal after normalisation or
    /// when their token overlap reaches `similarity`.
    pub fn new(
        db: Arc<SqliteStore>,
        episodic: Arc<EpisodicMemoryStore>,
        judge: Arc<dyn Judge>,
        similarity: f32,
    ) -> Self {
        Self {
            db,
            episodic,
            judge,
            similarity: similarity.clamp(0.0, 1.0),
        }
    }

    pub async fn detect_patterns(&self, lookback_days: u32) -> Result<Vec<DetectedPattern>> {
        let summaries = self.episodic.consolidated(lookback_days).await?;
        if summaries.len() < MIN_SUMMARIES {
            tracing::debug!("Pattern detection skipped: {} summaries", summaries.len());
            return Ok(Vec::new());
        }

        let history = summaries
            .iter()
            .map(|m| format!("- {}: {}", m.day_date, m.content))
            .collect::<Vec<_>>()
            .join("\n");
        let report = self
            .judge
            .detect_patterns(&history)
            .await
            .context("Pattern judge failed")?;

        let mut detected = Vec::new();
        for candidate in report.patterns {
            let description = candidate.description.trim();
            if description.is_empty() {
                continue;
            }
            let confidence = if candidate.confidence.is_finite() {
                candidate.confidence.clamp(0.0, 1.0)
            } else {
                0.5
            };
            let pattern_type = if candidate.pattern_type.trim().is_empty() {
                "general"
            } else {
                candidate.pattern_type.trim()
            };
            detected.push(self.upsert(pattern_type, description, confidence).await?);
        }
        tracing::info!("Pattern detection: {} candidates recorded", detected.len());
        Ok(detected)
    }

    async fn upsert(
        &self,
        pattern_type: &str,
        description: &str,
        confidence: f32,
    ) -> Result<DetectedPattern> {
        let now = self.db.now().timestamp();
        let _guard = self.db.write_lock().await;
        let mut tx = self.db.pool().begin().await?;

        let rows = sqlx::query("SELECT id, description FROM user_patterns")
            .fetch_all(&mut *tx)
            .await
            .context("Failed to read patterns")?;
        let wanted = normalize(description);
        let mut best: Option<(i64, f32)> = None;
        for row in &rows {
            let existing: String = row.get("description");
            let score = if normalize(&existing) == wanted {
                1.0
            } else {
                token_similarity(&existing, description)
            };
            if score >= self.similarity && best.map_or(true, |(_, s)| score > s) {
                best = Some((row.get("id"), score));
            }
        }

        let result = match best {
            Some((id, _)) => {
                sqlx::query(
                    "UPDATE user_patterns
                     SET frequency = frequency + 1, confidence_score = ?, detected_at = ?
                     WHERE id = ?",
                )
                .bind(confidence as f64)
                .bind(now)
                .bind(id)
                .execute(&mut *tx)
                .await
                .context("Failed to update pattern")?;
                let row = sqlx::query(
                    "SELECT frequency, description FROM user_patterns WHERE id = ?",
                )
                .bind(id)
                .fetch_one(&mut *tx)
                .await
                .context("Failed to read updated pattern")?;
                DetectedPattern {
                    id,
                    description: row.get("description"),
                    frequency: row.get("frequency"),
                    is_new: false,
                }
            }
            None => {
                let inserted = sqlx::query(
                    "INSERT INTO user_patterns
                        (pattern_type, description, confidence_score, frequency, detected_at)
                     VALUES (?, ?, ?, 1, ?)",
                )
                .bind(pattern_type)
                .bind(description)
                .bind(confidence as f64)
                .bind(now)
                .execute(&mut *tx)
                .await
                .context("Failed to insert pattern")?;
                DetectedPattern {
                    id: inserted.last_insert_rowid(),
                    description: description.to_string(),
                    frequency: 1,
                    is_new: true,
                }
            }
        };
        tx.commit().await?;
        Ok(result)
    }

    /// Stored patterns, most frequent first.
    pub async fn all(&self) -> Result<Vec<UserPattern>> {
        let rows = sqlx::query(
            "SELECT id, pattern_type, description, confidence_score, frequency, detected_at
             FROM user_patterns ORDER BY frequency DESC, confidence_score DESC, id",
        )
        .fetch_all(self.db.pool())
        .await
        .context("Failed to list patterns")?;
        Ok(rows
            .iter()
            .map(|r| UserPattern {
                id: r.get("id"),
                pattern_type: r.get("pattern_type"),
                description: r.get("description"),
                confidence_score: r.get::<f64, _>("confidence_score") as f32,
                frequency: r.get("frequency"),
                detected_at: r.get("detected_at"),
            })
            .collect())
    }
}
