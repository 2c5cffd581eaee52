//! What the companion believes about the user (profile facts) and about
//! itself (self-image traits).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use std::sync::Arc;

use crate::SqliteStore;

/// Overwrite a stored fact only when the new confidence beats the old one by
/// more than this factor, so one noisy extraction cannot flip a fact.
pub const OVERWRITE_MARGIN: f64 = 0.9;

pub const SEED_TRAITS: &[(&str, f32)] = &[
    ("playful", 0.7),
    ("humorous", 0.8),
    ("subtle", 0.6),
    ("sulky", 0.4),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileFact {
    pub key: String,
    pub value: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileWrite {
    Inserted,
    Overwritten,
    /// Existing fact kept; the new one was not confident enough.
    Kept,
}

pub struct ProfileStore {
    db: Arc<SqliteStore>,
}

impl ProfileStore {
    pub fn new(db: Arc<SqliteStore>) -> Self {
        Self { db }
    }

    pub async fn update(&self, key: &str, value: &str, confidence: f32) -> Result<ProfileWrite> {
        let key = key.trim();
        let confidence = f64::from(if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        });
        let now = self.db.now().timestamp();

        let _guard = self.db.write_lock().await;
        let mut tx = self.db.pool().begin().await?;
        let existing: Option<f64> = sqlx::query("SELECT confidence FROM profile WHERE key = ?")
            .bind(key)
            .fetch_optional(&mut *tx)
            .await
            .context("Failed to read profile fact")?
            .map(|r| r.get("confidence"));

        let outcome = match existing {
            Some(old) if confidence <= old * OVERWRITE_MARGIN => {
                tracing::debug!(
                    "Profile '{}' kept (new {:.2} <= {:.2} * {})",
                    key,
                    confidence,
                    old,
                    OVERWRITE_MARGIN
                );
                return Ok(ProfileWrite::Kept);
            }
            Some(_) => ProfileWrite::Overwritten,
            None => ProfileWrite::Inserted,
        };

        sqlx::query(
            "INSERT INTO profile (key, value, confidence, updated_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                confidence = excluded.confidence,
                updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(confidence)
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("Failed to write profile fact")?;
        tx.commit().await?;
        Ok(outcome)
    }

    pub async fn get(&self, key: &str) -> Result<Option<ProfileFact>> {
        let row = sqlx::query("SELECT key, value, confidence FROM profile WHERE key = ?")
            .bind(key.trim())
            .fetch_optional(self.db.pool())
            .await
            .context("Failed to read profile fact")?;
        Ok(row.map(|r| ProfileFact {
            key: r.get("key"),
            value: r.get("value"),
            confidence: r.get::<f64, _>("confidence") as f32,
        }))
    }

    /// All facts, most confident first.
    pub async fn all(&self) -> Result<Vec<ProfileFact>> {
        let rows = sqlx::query(
            "SELECT key, value, confidence FROM profile ORDER BY confidence DESC, key",
        )
        .fetch_all(self.db.pool())
        .await
        .context("Failed to list profile")?;
        Ok(rows
            .into_iter()
            .map(|r| ProfileFact {
                key: r.get("key"),
                value: r.get("value"),
                confidence: r.get::<f64, _>("confidence") as f32,
            })
            .collect())
    }
}

// ============================================================================
// Self image
// ============================================================================

pub struct SelfImageStore {
    db: Arc<SqliteStore>,
}

impl SelfImageStore {
    pub fn new(db: Arc<SqliteStore>) -> Self {
        Self { db }
    }

    /// Exponential moving average toward `observed` with weight `sensitivity`.
    /// Unknown traits are inserted at the observed strength.
    pub async fn update(&self, name: &str, observed: f32, sensitivity: f32) -> Result<f32> {
        let name = name.trim().to_lowercase();
        let observed = f64::from(if observed.is_finite() { observed.clamp(0.0, 1.0) } else { 0.5 });
        let s = f64::from(if sensitivity.is_finite() { sensitivity.clamp(0.0, 1.0) } else { 0.1 });
        let now = self.db.now().timestamp();

        let _guard = self.db.write_lock().await;
        let mut tx = self.db.pool().begin().await?;
        let old: Option<f64> = sqlx::query("SELECT strength FROM self_image WHERE trait = ?")
            .bind(&name)
            .fetch_optional(&mut *tx)
            .await
            .context("Failed to read self-image trait")?
            .map(|r| r.get("strength"));

        let next = match old {
            Some(old) => (old * (1.0 - s) + observed * s).clamp(0.0, 1.0),
            None => observed,
        };

        sqlx::query(
            "INSERT INTO self_image (trait, strength, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(trait) DO UPDATE SET
                strength = excluded.strength,
                updated_at = excluded.updated_at",
        )
        .bind(&name)
        .bind(next)
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("Failed to write self-image trait")?;
        tx.commit().await?;

        tracing::debug!("Self-image '{}' -> {:.3} (s={:.2})", name, next, s);
        Ok(next as f32)
    }

    pub async fn get(&self, name: &str) -> Result<Option<f32>> {
        let row = sqlx::query("SELECT strength FROM self_image WHERE trait = ?")
            .bind(name.trim().to_lowercase())
            .fetch_optional(self.db.pool())
            .await
            .context("Failed to read self-image trait")?;
        Ok(row.map(|r| r.get::<f64, _>("strength") as f32))
    }

    /// All traits, strongest first.
    pub async fn all(&self) -> Result<Vec<(String, f32)>> {
        let rows = sqlx::query(
            "SELECT trait, strength FROM self_image ORDER BY strength DESC, trait",
        )
        .fetch_all(self.db.pool())
        .await
        .context("Failed to list self-image")?;
        Ok(rows
            .into_iter()
            .map(|r| (r.get::<String, _>("trait"), r.get::<f64, _>("strength") as f32))
            .collect())
    }
}
