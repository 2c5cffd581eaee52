use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use kindred_core::{Clock, SystemClock};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Row, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};

/// Shared storage handle. Every component takes an `Arc<SqliteStore>`.
///
/// Writes that read-modify-write go through [`SqliteStore::write_lock`] so two
/// background tasks can never interleave an EMA or XP update.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    write_lock: Mutex<()>,
    clock: Arc<dyn Clock>,
}

impl SqliteStore {
    pub async fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        Self::with_clock(db_path, Arc::new(SystemClock)).await
    }

    pub async fn with_clock<P: AsRef<Path>>(db_path: P, clock: Arc<dyn Clock>) -> Result<Self> {
        let path = db_path.as_ref().display().to_string();
        let pool = if path == ":memory:" {
            // One long-lived connection, otherwise every pooled connection
            // would see its own empty database.
            let options = SqliteConnectOptions::from_str("sqlite::memory:")
                .context("Failed to build in-memory SQLite options")?;
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await
                .context("Failed to open in-memory SQLite database")?
        } else {
            let options = SqliteConnectOptions::new()
                .filename(db_path.as_ref())
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .busy_timeout(Duration::from_secs(5))
                .foreign_keys(true);
            SqlitePoolOptions::new()
                .max_connections(4)
                .connect_with(options)
                .await
                .context("Failed to connect to SQLite database")?
        };

        let store = Self {
            pool,
            write_lock: Mutex::new(()),
            clock,
        };
        store.migrate().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    pub fn now(&self) -> DateTime<Local> {
        self.clock.now()
    }

    /// Serialize a mutation. Hold the guard for the whole transaction.
    pub async fn write_lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().await
    }

    pub(crate) async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bot_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                valence REAL NOT NULL,
                energy REAL NOT NULL,
                bond REAL NOT NULL,
                reflection TEXT,
                updated_at INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create bot_state table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                day_date TEXT NOT NULL,
                session_id TEXT,
                is_proactive INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create messages table")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_day ON messages(day_date)")
            .execute(&self.pool)
            .await
            .context("Failed to create messages day index")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id)")
            .execute(&self.pool)
            .await
            .context("Failed to create messages session index")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS profile (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                confidence REAL NOT NULL,
                updated_at INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create profile table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS episodic_memory (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                content TEXT NOT NULL,
                importance INTEGER NOT NULL,
                emotion_tone TEXT NOT NULL DEFAULT 'neutral',
                is_core INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                last_accessed INTEGER NOT NULL,
                access_count INTEGER NOT NULL DEFAULT 0,
                decay_locked INTEGER NOT NULL DEFAULT 0,
                day_date TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create episodic_memory table")?;

        // Consolidation artifacts are told apart by kind, not by content prefix.
        if let Err(e) = sqlx::query(
            "ALTER TABLE episodic_memory ADD COLUMN kind TEXT NOT NULL DEFAULT 'episode'",
        )
        .execute(&self.pool)
        .await
        {
            tracing::debug!("Column 'kind' likely exists or migration skipped: {}", e);
        }

        // One decay step per idle week: a row remembers when it last decayed.
        if let Err(e) = sqlx::query("ALTER TABLE episodic_memory ADD COLUMN last_decayed INTEGER")
            .execute(&self.pool)
            .await
        {
            tracing::debug!("Column 'last_decayed' likely exists or migration skipped: {}", e);
        }

        // SQLite only folds ASCII case, so recall matches against a copy
        // lowercased here.
        if let Err(e) = sqlx::query("ALTER TABLE episodic_memory ADD COLUMN content_folded TEXT")
            .execute(&self.pool)
            .await
        {
            tracing::debug!("Column 'content_folded' likely exists or migration skipped: {}", e);
        }
        self.backfill_folded_content().await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_episodic_day ON episodic_memory(day_date)")
            .execute(&self.pool)
            .await
            .context("Failed to create episodic day index")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_episodic_rank ON episodic_memory(is_core, importance)",
        )
        .execute(&self.pool)
        .await
        .context("Failed to create episodic rank index")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS self_image (
                trait TEXT PRIMARY KEY,
                strength REAL NOT NULL,
                updated_at INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create self_image table")?;

        for (name, strength) in crate::profile::SEED_TRAITS {
            sqlx::query(
                "INSERT OR IGNORE INTO self_image (trait, strength, updated_at) VALUES (?, ?, 0)",
            )
            .bind(*name)
            .bind(*strength as f64)
            .execute(&self.pool)
            .await
            .context("Failed to seed self_image")?;
        }

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS memory_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create memory_meta table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversation_sessions (
                session_id TEXT PRIMARY KEY,
                start_time INTEGER NOT NULL,
                end_time INTEGER,
                day_date TEXT NOT NULL,
                session_type TEXT NOT NULL,
                message_count INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create conversation_sessions table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS daily_summaries (
                summary_date TEXT PRIMARY KEY,
                total_messages INTEGER NOT NULL,
                session_count INTEGER NOT NULL DEFAULT 0,
                emotional_summary TEXT NOT NULL,
                key_topics TEXT NOT NULL DEFAULT '[]',
                valence_avg REAL,
                energy_avg REAL,
                bond_avg REAL,
                consolidation_method TEXT NOT NULL DEFAULT 'judge',
                generated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create daily_summaries table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS relationship_state (
                user_id TEXT PRIMARY KEY,
                level INTEGER NOT NULL DEFAULT 1,
                current_xp INTEGER NOT NULL DEFAULT 0,
                total_xp INTEGER NOT NULL DEFAULT 0,
                trust_score REAL NOT NULL DEFAULT 0.5,
                days_active INTEGER NOT NULL DEFAULT 1,
                last_interaction_date TEXT NOT NULL,
                updated_at INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create relationship_state table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS core_memories (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                content TEXT NOT NULL,
                memory_type TEXT NOT NULL,
                emotional_impact INTEGER NOT NULL,
                related_level INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create core_memories table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_patterns (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                pattern_type TEXT NOT NULL,
                description TEXT NOT NULL,
                confidence_score REAL NOT NULL,
                frequency INTEGER NOT NULL DEFAULT 1,
                detected_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create user_patterns table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_patterns_description ON user_patterns(description)",
        )
        .execute(&self.pool)
        .await
        .context("Failed to create user_patterns description index")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS response_quality (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id INTEGER,
                relevance INTEGER NOT NULL,
                creativity INTEGER NOT NULL,
                personality INTEGER NOT NULL,
                critique TEXT NOT NULL DEFAULT '',
                evaluated_at INTEGER NOT NULL,
                day_date TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create response_quality table")?;

        Ok(())
    }

    async fn backfill_folded_content(&self) -> Result<()> {
        let rows = sqlx::query(
            "SELECT id, content FROM episodic_memory WHERE content_folded IS NULL",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to read memories for case folding")?;
        if rows.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for row in &rows {
            sqlx::query("UPDATE episodic_memory SET content_folded = ? WHERE id = ?")
                .bind(row.get::<String, _>("content").to_lowercase())
                .bind(row.get::<i64, _>("id"))
                .execute(&mut *tx)
                .await
                .context("Failed to fold memory content")?;
        }
        tx.commit().await?;
        tracing::info!("Case-folded {} existing memories", rows.len());
        Ok(())
    }

    // ========================================================================
    // Meta key/value
    // ========================================================================

    pub async fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM memory_meta WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to read meta key {}", key))?;
        Ok(row.map(|r| r.get::<String, _>("value")))
    }

    pub async fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.write_lock().await;
        sqlx::query(
            "INSERT INTO memory_meta (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to write meta key {}", key))?;
        Ok(())
    }
}
