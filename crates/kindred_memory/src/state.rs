//! Current mood record. One row, overwritten in place, never deleted.

use anyhow::{Context, Result};
use kindred_core::BotState;
use sqlx::Row;
use std::sync::Arc;

use crate::SqliteStore;

pub struct StateStore {
    db: Arc<SqliteStore>,
    fallback: BotState,
}

impl StateStore {
    pub fn new(db: Arc<SqliteStore>) -> Self {
        Self::with_fallback(db, BotState::default())
    }

    /// `fallback` is returned when nothing has been stored yet or the read fails.
    pub fn with_fallback(db: Arc<SqliteStore>, fallback: BotState) -> Self {
        Self {
            db,
            fallback: fallback.clamped(),
        }
    }

    pub fn fallback(&self) -> &BotState {
        &self.fallback
    }

    pub async fn get(&self) -> Result<BotState> {
        let row = sqlx::query(
            "SELECT valence, energy, bond, reflection FROM bot_state WHERE id = 1",
        )
        .fetch_optional(self.db.pool())
        .await
        .context("Failed to read bot_state")?;
        Ok(match row {
            Some(row) => BotState::new(
                row.get::<f64, _>("valence") as f32,
                row.get::<f64, _>("energy") as f32,
                row.get::<f64, _>("bond") as f32,
                row.get::<Option<String>, _>("reflection"),
            ),
            None => self.fallback.clone(),
        })
    }

    /// Never fails: storage errors are logged and the fallback state is returned.
    pub async fn get_or_default(&self) -> BotState {
        match self.get().await {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!("Bot state unavailable, using default: {:#}", e);
                self.fallback.clone()
            }
        }
    }

    /// Clamp and persist. `reflection: None` keeps the stored reflection.
    pub async fn set(
        &self,
        valence: f32,
        energy: f32,
        bond: f32,
        reflection: Option<&str>,
    ) -> Result<BotState> {
        let reflection = reflection.map(str::to_string);
        self.update(move |current| {
            BotState::new(valence, energy, bond, reflection.or(current.reflection))
        })
        .await
    }

    /// Read-modify-write under the store's write lock, in one transaction.
    pub async fn update<F>(&self, f: F) -> Result<BotState>
    where
        F: FnOnce(BotState) -> BotState + Send,
    {
        let _guard = self.db.write_lock().await;
        let mut tx = self.db.pool().begin().await?;

        let row = sqlx::query(
            "SELECT valence, energy, bond, reflection FROM bot_state WHERE id = 1",
        )
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to read bot_state")?;
        let current = match row {
            Some(row) => BotState::new(
                row.get::<f64, _>("valence") as f32,
                row.get::<f64, _>("energy") as f32,
                row.get::<f64, _>("bond") as f32,
                row.get::<Option<String>, _>("reflection"),
            ),
            None => self.fallback.clone(),
        };
        let state = f(current).clamped();

        sqlx::query(
            "INSERT INTO bot_state (id, valence, energy, bond, reflection, updated_at)
             VALUES (1, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                valence = excluded.valence,
                energy = excluded.energy,
                bond = excluded.bond,
                reflection = excluded.reflection,
                updated_at = excluded.updated_at",
        )
        .bind(state.valence as f64)
        .bind(state.energy as f64)
        .bind(state.bond as f64)
        .bind(&state.reflection)
        .bind(self.db.now().timestamp())
        .execute(&mut *tx)
        .await
        .context("Failed to write bot_state")?;

        tx.commit().await?;
        Ok(state)
    }

    pub async fn save(&self, state: &BotState) -> Result<BotState> {
        self.set(state.valence, state.energy, state.bond, state.reflection.as_deref())
            .await
    }

    pub async fn set_reflection(&self, reflection: &str) -> Result<BotState> {
        let reflection = reflection.to_string();
        self.update(move |current| BotState {
            reflection: Some(reflection),
            ..current
        })
        .await
    }

    /// Permanent bond reduction after a severe negative event.
    pub async fn apply_bond_scar(&self, penalty: f32) -> Result<BotState> {
        let state = self.update(move |current| current.scarred(penalty)).await?;
        tracing::info!("Bond scar {:.2} applied, bond now {:.2}", penalty, state.bond);
        Ok(state)
    }
}
