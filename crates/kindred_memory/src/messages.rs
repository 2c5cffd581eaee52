use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDate, TimeZone};
use kindred_core::temporal::day_key;
use kindred_core::{ChatMessage, Role};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use std::sync::Arc;

use crate::SqliteStore;

fn row_to_message(row: &SqliteRow) -> ChatMessage {
    ChatMessage {
        role: Role::parse_str(&row.get::<String, _>("role")),
        content: row.get("content"),
        timestamp: row.get("timestamp"),
        is_proactive: row.get("is_proactive"),
    }
}

pub(crate) fn local_time(ts: i64) -> Option<DateTime<Local>> {
    Local.timestamp_opt(ts, 0).single()
}

pub(crate) async fn insert_message(
    conn: &mut SqliteConnection,
    role: Role,
    content: &str,
    at: &DateTime<Local>,
    session_id: Option<&str>,
    is_proactive: bool,
) -> Result<i64> {
    let result = sqlx::query(
        "INSERT INTO messages (role, content, timestamp, day_date, session_id, is_proactive)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(role.as_str())
    .bind(content)
    .bind(at.timestamp())
    .bind(day_key(at.date_naive()))
    .bind(session_id)
    .bind(is_proactive)
    .execute(conn)
    .await
    .context("Failed to insert message")?;
    Ok(result.last_insert_rowid())
}

pub(crate) async fn last_timestamp(conn: &mut SqliteConnection) -> Result<Option<i64>> {
    let row = sqlx::query("SELECT timestamp FROM messages ORDER BY timestamp DESC, id DESC LIMIT 1")
        .fetch_optional(conn)
        .await
        .context("Failed to read last message time")?;
    Ok(row.map(|r| r.get("timestamp")))
}

/// Read side of the conversation log. Writes go through `SessionManager`
/// so every message lands in a session.
pub struct MessageLog {
    db: Arc<SqliteStore>,
}

impl MessageLog {
    pub fn new(db: Arc<SqliteStore>) -> Self {
        Self { db }
    }

    /// The last `limit` messages in chronological order.
    pub async fn recent(&self, limit: u32) -> Result<Vec<ChatMessage>> {
        let rows = sqlx::query(
            "SELECT role, content, timestamp, is_proactive FROM messages
             ORDER BY timestamp DESC, id DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(self.db.pool())
        .await
        .context("Failed to read recent messages")?;
        let mut messages: Vec<ChatMessage> = rows.iter().map(row_to_message).collect();
        messages.reverse();
        Ok(messages)
    }

    pub async fn last_message_time(&self) -> Result<Option<DateTime<Local>>> {
        let mut conn = self.db.pool().acquire().await?;
        Ok(last_timestamp(&mut conn).await?.and_then(local_time))
    }

    pub async fn for_day(&self, date: NaiveDate) -> Result<Vec<ChatMessage>> {
        let rows = sqlx::query(
            "SELECT role, content, timestamp, is_proactive FROM messages
             WHERE day_date = ? ORDER BY timestamp, id",
        )
        .bind(day_key(date))
        .fetch_all(self.db.pool())
        .await
        .context("Failed to read messages for day")?;
        Ok(rows.iter().map(row_to_message).collect())
    }

    pub async fn count_for_day(&self, date: NaiveDate) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM messages WHERE day_date = ?")
            .bind(day_key(date))
            .fetch_one(self.db.pool())
            .await
            .context("Failed to count messages for day")?;
        Ok(row.get("n"))
    }

    pub async fn session_count_for_day(&self, date: NaiveDate) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(DISTINCT session_id) AS n FROM messages
             WHERE day_date = ? AND session_id IS NOT NULL",
        )
        .bind(day_key(date))
        .fetch_one(self.db.pool())
        .await
        .context("Failed to count sessions for day")?;
        Ok(row.get("n"))
    }
}
