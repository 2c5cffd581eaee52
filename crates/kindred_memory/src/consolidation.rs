//! Daily consolidation
//!
//! Once a day has ended its raw conversation is rolled into one summary
//! memory. Fragments the summary supersedes are archived (importance zeroed)
//! so retrieval stops surfacing them, while anything important, core or
//! pinned survives untouched. Pattern detection runs downstream.

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate};
use kindred_core::temporal::day_key;
use kindred_core::text::key_topics;
use kindred_core::{ChatMessage, Role, Summarizer};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use std::sync::Arc;

use crate::episodic::{insert_memory, MemoryKind, NewMemory};
use crate::patterns::{DetectedPattern, PatternDetector};
use crate::{MessageLog, SqliteStore, StateStore};

/// Importance given to every summary memory.
pub const SUMMARY_IMPORTANCE: i32 = 5;
/// Fragments of the day at or above this importance survive archival.
pub const ARCHIVE_BELOW: i32 = 8;
pub const KEY_TOPIC_LIMIT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsolidationMethod {
    Judge,
    RuleBased,
}

impl ConsolidationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsolidationMethod::Judge => "judge",
            ConsolidationMethod::RuleBased => "rule_based",
        }
    }

    pub fn parse_str(s: &str) -> Self {
        match s {
            "rule_based" => ConsolidationMethod::RuleBased,
            _ => ConsolidationMethod::Judge,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySummary {
    pub summary_date: String,
    pub total_messages: i64,
    pub session_count: i64,
    pub emotional_summary: String,
    pub key_topics: Vec<String>,
    pub valence_avg: Option<f32>,
    pub energy_avg: Option<f32>,
    pub bond_avg: Option<f32>,
    pub consolidation_method: ConsolidationMethod,
    pub generated_at: i64,
}

/// Result of one consolidation run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsolidationReport {
    pub date: NaiveDate,
    pub summary_memory_id: i64,
    pub total_messages: i64,
    pub session_count: i64,
    pub archived: u64,
    pub method: ConsolidationMethod,
    pub key_topics: Vec<String>,
    pub patterns: Vec<DetectedPattern>,
}

/// Summary used when the Summarizer is unavailable.
pub fn rule_based_summary(
    date: NaiveDate,
    total_messages: i64,
    session_count: i64,
    topics: &[String],
) -> String {
    let mut text = format!(
        "On {} we exchanged {} messages across {} conversation{}.",
        day_key(date),
        total_messages,
        session_count,
        if session_count == 1 { "" } else { "s" }
    );
    if !topics.is_empty() {
        text.push_str(&format!(" We talked about {}.", topics.join(", ")));
    }
    text
}

pub struct ConsolidationJob {
    db: Arc<SqliteStore>,
    messages: MessageLog,
    state: Arc<StateStore>,
    summarizer: Arc<dyn Summarizer>,
    patterns: Arc<PatternDetector>,
    lookback_days: u32,
}

impl ConsolidationJob {
    pub fn new(
        db: Arc<SqliteStore>,
        state: Arc<StateStore>,
        summarizer: Arc<dyn Summarizer>,
        patterns: Arc<PatternDetector>,
        lookback_days: u32,
    ) -> Self {
        Self {
            messages: MessageLog::new(db.clone()),
            db,
            state,
            summarizer,
            patterns,
            lookback_days,
        }
    }

    /// Roll `date` into a summary. Returns `None` when the day has no messages.
    ///
    /// Re-running a day rewrites its summary row and summary memory in place.
    pub async fn consolidate_day(&self, date: NaiveDate) -> Result<Option<ConsolidationReport>> {
        let messages = self.messages.for_day(date).await?;
        if messages.is_empty() {
            tracing::debug!("Nothing to consolidate for {}", date);
            return Ok(None);
        }
        let total_messages = messages.len() as i64;
        let session_count = self.messages.session_count_for_day(date).await?;
        let topics = key_topics(user_texts(&messages), KEY_TOPIC_LIMIT);

        let fallback = || rule_based_summary(date, total_messages, session_count, &topics);
        let (summary, method) = match self.summarizer.summarize_day(date, &messages).await {
            Ok(text) if !text.trim().is_empty() => {
                (text.trim().to_string(), ConsolidationMethod::Judge)
            }
            Ok(_) => {
                tracing::warn!(
                    "Summarizer returned an empty summary for {}, using rule-based",
                    date
                );
                (fallback(), ConsolidationMethod::RuleBased)
            }
            Err(e) => {
                tracing::warn!("Summarizer failed for {}, using rule-based: {}", date, e);
                (fallback(), ConsolidationMethod::RuleBased)
            }
        };
        let snapshot = self.state.get_or_default().await;
        let topics_json = serde_json::to_string(&topics).context("Failed to encode key topics")?;

        let now = self.db.now().timestamp();
        let key = day_key(date);
        let (summary_memory_id, archived) = {
            let _guard = self.db.write_lock().await;
            let mut tx = self.db.pool().begin().await?;

            sqlx::query(
                "INSERT INTO daily_summaries
                    (summary_date, total_messages, session_count, emotional_summary, key_topics,
                     valence_avg, energy_avg, bond_avg, consolidation_method, generated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(summary_date) DO UPDATE SET
                    total_messages = excluded.total_messages,
                    session_count = excluded.session_count,
                    emotional_summary = excluded.emotional_summary,
                    key_topics = excluded.key_topics,
                    valence_avg = excluded.valence_avg,
                    energy_avg = excluded.energy_avg,
                    bond_avg = excluded.bond_avg,
                    consolidation_method = excluded.consolidation_method,
                    generated_at = excluded.generated_at",
            )
            .bind(&key)
            .bind(total_messages)
            .bind(session_count)
            .bind(&summary)
            .bind(&topics_json)
            .bind(snapshot.valence as f64)
            .bind(snapshot.energy as f64)
            .bind(snapshot.bond as f64)
            .bind(method.as_str())
            .bind(now)
            .execute(&mut *tx)
            .await
            .context("Failed to upsert daily summary")?;

            let existing = sqlx::query(
                "SELECT id FROM episodic_memory
                 WHERE kind = 'consolidated' AND day_date = ? ORDER BY id LIMIT 1",
            )
            .bind(&key)
            .fetch_optional(&mut *tx)
            .await
            .context("Failed to look up summary memory")?;

            let summary_memory_id = match existing {
                Some(row) => {
                    let id: i64 = row.get("id");
                    sqlx::query(
                        "UPDATE episodic_memory
                         SET content = ?, content_folded = ?, importance = ?, last_accessed = ?
                         WHERE id = ?",
                    )
                    .bind(&summary)
                    .bind(summary.to_lowercase())
                    .bind(SUMMARY_IMPORTANCE as i64)
                    .bind(now)
                    .bind(id)
                    .execute(&mut *tx)
                    .await
                    .context("Failed to rewrite summary memory")?;
                    id
                }
                None => {
                    insert_memory(
                        &mut tx,
                        &NewMemory {
                            content: &summary,
                            importance: SUMMARY_IMPORTANCE,
                            emotion_tone: snapshot.mood_label(),
                            is_core: false,
                            kind: MemoryKind::Consolidated,
                            day_date: date,
                            at: now,
                        },
                    )
                    .await?
                }
            };

            let archived = sqlx::query(
                "UPDATE episodic_memory SET importance = 0
                 WHERE day_date = ? AND kind = 'episode' AND importance > 0 AND importance < ?
                   AND is_core = 0 AND decay_locked = 0 AND id != ?",
            )
            .bind(&key)
            .bind(ARCHIVE_BELOW as i64)
            .bind(summary_memory_id)
            .execute(&mut *tx)
            .await
            .context("Failed to archive superseded memories")?
            .rows_affected();

            tx.commit().await?;
            (summary_memory_id, archived)
        };
        tracing::info!(
            "Consolidated {}: {} messages, {} fragments archived ({})",
            date,
            total_messages,
            archived,
            method.as_str()
        );

        let patterns = match self.patterns.detect_patterns(self.lookback_days).await {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("Pattern detection after consolidation failed: {:#}", e);
                Vec::new()
            }
        };

        Ok(Some(ConsolidationReport {
            date,
            summary_memory_id,
            total_messages,
            session_count,
            archived,
            method,
            key_topics: topics,
            patterns,
        }))
    }

    /// Yesterday has messages and no summary yet.
    pub async fn should_consolidate_yesterday(&self) -> Result<bool> {
        let yesterday = self.db.now().date_naive() - Duration::days(1);
        if self.messages.count_for_day(yesterday).await? == 0 {
            return Ok(false);
        }
        Ok(self.summary_for(yesterday).await?.is_none())
    }

    /// Consolidate yesterday if the guard allows it.
    pub async fn consolidate_pending(&self) -> Result<Option<ConsolidationReport>> {
        if !self.should_consolidate_yesterday().await? {
            return Ok(None);
        }
        let yesterday = self.db.now().date_naive() - Duration::days(1);
        self.consolidate_day(yesterday).await
    }

    pub async fn summary_for(&self, date: NaiveDate) -> Result<Option<DailySummary>> {
        let row = sqlx::query(
            "SELECT summary_date, total_messages, session_count, emotional_summary, key_topics,
                    valence_avg, energy_avg, bond_avg, consolidation_method, generated_at
             FROM daily_summaries WHERE summary_date = ?",
        )
        .bind(day_key(date))
        .fetch_optional(self.db.pool())
        .await
        .context("Failed to read daily summary")?;
        Ok(row.map(|r| DailySummary {
            summary_date: r.get("summary_date"),
            total_messages: r.get("total_messages"),
            session_count: r.get("session_count"),
            emotional_summary: r.get("emotional_summary"),
            key_topics: serde_json::from_str(&r.get::<String, _>("key_topics")).unwrap_or_default(),
            valence_avg: r.get::<Option<f64>, _>("valence_avg").map(|v| v as f32),
            energy_avg: r.get::<Option<f64>, _>("energy_avg").map(|v| v as f32),
            bond_avg: r.get::<Option<f64>, _>("bond_avg").map(|v| v as f32),
            consolidation_method: ConsolidationMethod::parse_str(
                &r.get::<String, _>("consolidation_method"),
            ),
            generated_at: r.get("generated_at"),
        }))
    }
}

fn user_texts(messages: &[ChatMessage]) -> impl Iterator<Item = &str> {
    messages
        .iter()
        .filter(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_based_summary_mentions_counts_and_topics() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        let text = rule_based_summary(date, 12, 1, &["exams".to_string(), "coffee".to_string()]);
        assert_eq!(
            text,
            "On 2024-03-09 we exchanged 12 messages across 1 conversation. \
             We talked about exams, coffee."
        );
        let bare = rule_based_summary(date, 3, 2, &[]);
        assert!(bare.ends_with("2 conversations."));
    }

    #[test]
    fn test_method_round_trips_through_storage_strings() {
        for m in [ConsolidationMethod::Judge, ConsolidationMethod::RuleBased] {
            assert_eq!(ConsolidationMethod::parse_str(m.as_str()), m);
        }
    }
}
