use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;

use crate::{EpisodicMemoryStore, SqliteStore};

pub const LAST_DECAY_KEY: &str = "last_decay_ts";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DecayOutcome {
    /// The last run was too recent.
    Skipped { seconds_since_last: i64 },
    Ran { decayed: u64, pruned: u64 },
}

/// Hour-gated wrapper around the episodic decay and prune passes. The
/// checkpoint lives in `memory_meta`, so restarts do not re-run it.
pub struct DecayScheduler {
    db: Arc<SqliteStore>,
    episodic: Arc<EpisodicMemoryStore>,
    min_interval_secs: i64,
}

impl DecayScheduler {
    pub fn new(
        db: Arc<SqliteStore>,
        episodic: Arc<EpisodicMemoryStore>,
        min_interval_secs: i64,
    ) -> Self {
        Self {
            db,
            episodic,
            min_interval_secs,
        }
    }

    pub async fn run_if_due(&self) -> Result<DecayOutcome> {
        let now = self.db.now().timestamp();
        let last = match self.db.get_meta(LAST_DECAY_KEY).await? {
            Some(v) => v.parse::<i64>().unwrap_or(0),
            None => 0,
        };
        let since = now - last;
        if since < self.min_interval_secs {
            tracing::debug!("Decay skipped, last run {}s ago", since);
            return Ok(DecayOutcome::Skipped { seconds_since_last: since });
        }
        self.run_now().await
    }

    /// Run decay then prune, and record the checkpoint.
    pub async fn run_now(&self) -> Result<DecayOutcome> {
        let decayed = self.episodic.decay_cycle().await?;
        let pruned = self.episodic.prune_faded().await?;
        self.db
            .set_meta(LAST_DECAY_KEY, &self.db.now().timestamp().to_string())
            .await?;
        tracing::info!("Memory decay: {} faded, {} pruned", decayed, pruned);
        Ok(DecayOutcome::Ran { decayed, pruned })
    }
}
