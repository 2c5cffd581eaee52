//! Post-turn archiving: what the Judge learned from a finished exchange is
//! written into the profile, the self-image and episodic memory.

use anyhow::{Context, Result};
use kindred_core::{ArchiveVerdict, Judge};
use serde::Serialize;
use std::sync::Arc;

use crate::profile::ProfileWrite;
use crate::{EpisodicMemoryStore, ProfileStore, SelfImageStore};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ArchiveOutcome {
    pub profile_written: usize,
    pub profile_kept: usize,
    pub traits_updated: usize,
    pub episode_id: Option<i64>,
}

pub struct Archivist {
    judge: Arc<dyn Judge>,
    profile: Arc<ProfileStore>,
    self_image: Arc<SelfImageStore>,
    episodic: Arc<EpisodicMemoryStore>,
}

impl Archivist {
    pub fn new(
        judge: Arc<dyn Judge>,
        profile: Arc<ProfileStore>,
        self_image: Arc<SelfImageStore>,
        episodic: Arc<EpisodicMemoryStore>,
    ) -> Self {
        Self {
            judge,
            profile,
            self_image,
            episodic,
        }
    }

    /// Ask the Judge what to keep from this exchange, then apply it.
    /// `sensitivity` weights self-image updates for this turn.
    pub async fn archive_turn(
        &self,
        user_text: &str,
        reply: &str,
        context: &str,
        sensitivity: f32,
    ) -> Result<ArchiveOutcome> {
        let verdict = self
            .judge
            .archive_turn(user_text, reply, context)
            .await
            .context("Archive judge failed")?;
        self.apply(verdict, sensitivity).await
    }

    pub async fn apply(&self, verdict: ArchiveVerdict, sensitivity: f32) -> Result<ArchiveOutcome> {
        let verdict = verdict.sanitized();
        let mut outcome = ArchiveOutcome::default();
        if verdict.is_empty() {
            return Ok(outcome);
        }

        for update in &verdict.profile_updates {
            match self.profile.update(&update.key, update.value.trim(), update.confidence).await? {
                ProfileWrite::Kept => outcome.profile_kept += 1,
                ProfileWrite::Inserted | ProfileWrite::Overwritten => outcome.profile_written += 1,
            }
        }

        for observation in &verdict.self_image_updates {
            self.self_image
                .update(&observation.name, observation.strength, sensitivity)
                .await?;
            outcome.traits_updated += 1;
        }

        if let Some(episode) = &verdict.episode {
            let id = self
                .episodic
                .save(episode.content.trim(), episode.importance, &episode.emotion, episode.is_core)
                .await?;
            outcome.episode_id = Some(id);
        }

        tracing::debug!(
            "Archived turn: {} facts written, {} kept, {} traits, episode {:?}",
            outcome.profile_written,
            outcome.profile_kept,
            outcome.traits_updated,
            outcome.episode_id
        );
        Ok(outcome)
    }
}
