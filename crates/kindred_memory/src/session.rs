//! Conversation sessions.
//!
//! A session is a run of messages without a long pause. Exactly one session
//! is open at a time; opening the next one closes the previous and freezes
//! its message count. Messages are attributed at write time, and a message
//! arriving after a boundary opens the new session on its way in.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Local};
use kindred_core::temporal::day_key;
use kindred_core::{should_start_new_session, Role, SessionType};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::messages::{insert_message, last_timestamp, local_time};
use crate::SqliteStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub start_time: i64,
    pub end_time: Option<i64>,
    pub day_date: String,
    pub session_type: SessionType,
    pub message_count: i64,
}

fn row_to_session(row: &SqliteRow) -> Session {
    Session {
        session_id: row.get("session_id"),
        start_time: row.get("start_time"),
        end_time: row.get("end_time"),
        day_date: row.get("day_date"),
        session_type: SessionType::parse_str(&row.get::<String, _>("session_type")),
        message_count: row.get("message_count"),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedMessage {
    pub message_id: i64,
    pub session_id: String,
    /// This message opened a new session.
    pub opened_session: bool,
    /// Time since the previous message, if there was one.
    pub gap: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStats {
    pub total_sessions: i64,
    pub avg_messages: f64,
    pub most_common_type: Option<SessionType>,
}

/// Close every open session and open a fresh one at `now`.
async fn rotate(conn: &mut SqliteConnection, now: &DateTime<Local>) -> Result<Session> {
    sqlx::query(
        "UPDATE conversation_sessions
         SET end_time = ?,
             message_count = (SELECT COUNT(*) FROM messages m
                              WHERE m.session_id = conversation_sessions.session_id)
         WHERE end_time IS NULL",
    )
    .bind(now.timestamp())
    .execute(&mut *conn)
    .await
    .context("Failed to close open session")?;

    let session = Session {
        session_id: Uuid::new_v4().to_string(),
        start_time: now.timestamp(),
        end_time: None,
        day_date: day_key(now.date_naive()),
        session_type: SessionType::at(now),
        message_count: 0,
    };
    sqlx::query(
        "INSERT INTO conversation_sessions
            (session_id, start_time, end_time, day_date, session_type, message_count)
         VALUES (?, ?, NULL, ?, ?, 0)",
    )
    .bind(&session.session_id)
    .bind(session.start_time)
    .bind(&session.day_date)
    .bind(session.session_type.as_str())
    .execute(&mut *conn)
    .await
    .context("Failed to open session")?;
    Ok(session)
}

async fn open_session(conn: &mut SqliteConnection) -> Result<Option<Session>> {
    let row = sqlx::query(
        "SELECT session_id, start_time, end_time, day_date, session_type, message_count
         FROM conversation_sessions WHERE end_time IS NULL ORDER BY start_time DESC LIMIT 1",
    )
    .fetch_optional(conn)
    .await
    .context("Failed to read open session")?;
    Ok(row.as_ref().map(row_to_session))
}

/// The later of the last message and the open session's start.
fn latest_activity(last: Option<DateTime<Local>>, open: &Session) -> Option<DateTime<Local>> {
    match (last, local_time(open.start_time)) {
        (Some(m), Some(s)) => Some(m.max(s)),
        (m, s) => m.or(s),
    }
}

pub struct SessionManager {
    db: Arc<SqliteStore>,
    idle_gap: Duration,
}

impl SessionManager {
    pub fn new(db: Arc<SqliteStore>, idle_gap: Duration) -> Self {
        Self { db, idle_gap }
    }

    pub fn idle_gap(&self) -> Duration {
        self.idle_gap
    }

    pub fn should_start_new_session(&self, last_message_time: Option<DateTime<Local>>) -> bool {
        should_start_new_session(last_message_time, self.db.now(), self.idle_gap)
    }

    pub async fn start_session(&self) -> Result<Session> {
        let now = self.db.now();
        let _guard = self.db.write_lock().await;
        let mut tx = self.db.pool().begin().await?;
        let session = rotate(&mut tx, &now).await?;
        tx.commit().await?;
        tracing::info!("Session {} opened ({})", session.session_id, session.session_type.as_str());
        Ok(session)
    }

    pub async fn current_session(&self) -> Result<Option<Session>> {
        let mut conn = self.db.pool().acquire().await?;
        open_session(&mut conn).await
    }

    /// Persist a message in the open session, opening one first if the gap
    /// since the session's latest activity crossed a session boundary.
    ///
    /// Activity is the later of the previous message and the open session's
    /// start, so a session opened with [`start_session`](Self::start_session)
    /// receives the next message instead of being replaced by it.
    pub async fn record_message(
        &self,
        role: Role,
        content: &str,
        is_proactive: bool,
    ) -> Result<RecordedMessage> {
        let now = self.db.now();
        let _guard = self.db.write_lock().await;
        let mut tx = self.db.pool().begin().await?;

        let last = last_timestamp(&mut tx).await?.and_then(local_time);
        let open = open_session(&mut tx).await?;
        let anchor = open.as_ref().map_or(last, |session| latest_activity(last, session));
        let (session, opened_session) = match open {
            Some(session) if !should_start_new_session(anchor, now, self.idle_gap) => {
                (session, false)
            }
            _ => (rotate(&mut tx, &now).await?, true),
        };

        let message_id =
            insert_message(&mut tx, role, content, &now, Some(&session.session_id), is_proactive)
                .await?;
        tx.commit().await?;

        if opened_session {
            tracing::info!("Session {} opened by incoming message", session.session_id);
        }
        Ok(RecordedMessage {
            message_id,
            session_id: session.session_id,
            opened_session,
            gap: last.map(|t| now - t),
        })
    }

    pub async fn get(&self, session_id: &str) -> Result<Option<Session>> {
        let row = sqlx::query(
            "SELECT session_id, start_time, end_time, day_date, session_type, message_count
             FROM conversation_sessions WHERE session_id = ?",
        )
        .bind(session_id)
        .fetch_optional(self.db.pool())
        .await
        .context("Failed to read session")?;
        Ok(row.as_ref().map(row_to_session))
    }

    /// Sessions started in the last `days` days, with live counts for the open one.
    pub async fn session_stats(&self, days: i64) -> Result<SessionStats> {
        let since = (self.db.now() - Duration::days(days)).timestamp();
        let rows = sqlx::query(
            "SELECT s.session_type AS session_type,
                    (SELECT COUNT(*) FROM messages m WHERE m.session_id = s.session_id) AS n
             FROM conversation_sessions s WHERE s.start_time >= ?",
        )
        .bind(since)
        .fetch_all(self.db.pool())
        .await
        .context("Failed to read session stats")?;

        let total = rows.len() as i64;
        let mut messages = 0i64;
        let mut by_type: HashMap<SessionType, i64> = HashMap::new();
        for row in &rows {
            messages += row.get::<i64, _>("n");
            *by_type
                .entry(SessionType::parse_str(&row.get::<String, _>("session_type")))
                .or_insert(0) += 1;
        }
        let most_common_type = by_type
            .into_iter()
            .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.as_str().cmp(a.0.as_str())))
            .map(|(t, _)| t);

        Ok(SessionStats {
            total_sessions: total,
            avg_messages: if total == 0 { 0.0 } else { messages as f64 / total as f64 },
            most_common_type,
        })
    }
}
