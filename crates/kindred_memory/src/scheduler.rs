//! Drives the batch jobs. Each job keeps its own persisted idempotency guard,
//! so ticking more often than needed is harmless.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::consolidation::{ConsolidationJob, ConsolidationReport};
use crate::decay::{DecayOutcome, DecayScheduler};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickReport {
    pub decay: Option<DecayOutcome>,
    pub consolidation: Option<ConsolidationReport>,
}

pub struct MaintenanceScheduler {
    decay: Arc<DecayScheduler>,
    consolidation: Arc<ConsolidationJob>,
    tick_every: Duration,
}

impl MaintenanceScheduler {
    pub fn new(
        decay: Arc<DecayScheduler>,
        consolidation: Arc<ConsolidationJob>,
        tick_every: Duration,
    ) -> Self {
        Self {
            decay,
            consolidation,
            tick_every,
        }
    }

    /// Run every job once. Failures are logged and reported as `None`.
    pub async fn tick(&self) -> TickReport {
        let decay = match self.decay.run_if_due().await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                tracing::warn!("Scheduled decay failed: {:#}", e);
                None
            }
        };
        let consolidation = match self.consolidation.consolidate_pending().await {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!("Scheduled consolidation failed: {:#}", e);
                None
            }
        };
        TickReport { decay, consolidation }
    }

    /// Tick immediately, then every `tick_every`, until `shutdown` flips to true.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.tick_every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let report = self.tick().await;
                        if let Some(c) = &report.consolidation {
                            tracing::info!("Scheduler consolidated {}", c.date);
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            tracing::info!("Maintenance scheduler stopping");
                            break;
                        }
                    }
                }
            }
        })
    }
}
