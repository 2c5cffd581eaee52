//! Attention loop: decides when the companion speaks without being spoken to.
//!
//! The loop wakes on every heartbeat, looks at how long the user has been
//! silent and what the companion last did, and may emit a [`Nudge`]. It never
//! touches storage; the front-end owns delivery and persistence.

use chrono::{Local, NaiveDate};
use kindred_core::{BotState, SessionType};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::expression::{nudge_line, NudgeKind};
use crate::heartbeat::HeartbeatConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitingState {
    /// No outstanding proactive message.
    Idle,
    /// Spoke first, waiting for the user.
    AwaitingReply,
    /// Already checked in once.
    Nudged,
    /// Escalated and got nothing; stay quiet until the user returns.
    GaveUp,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Nudge {
    pub kind: NudgeKind,
    pub text: String,
}

/// Pure decision: given the waiting state and timings, should we speak?
pub fn evaluate(
    config: &HeartbeatConfig,
    waiting: WaitingState,
    in_state_for: Duration,
    silence: Duration,
    spontaneous_today: u32,
    roll: f64,
) -> Option<NudgeKind> {
    match waiting {
        WaitingState::Idle => {
            let eligible = silence >= config.spontaneous_after
                && spontaneous_today < config.max_spontaneous_per_day
                && roll < config.spontaneous_chance;
            eligible.then_some(NudgeKind::Spontaneous)
        }
        WaitingState::AwaitingReply => {
            (in_state_for >= config.check_in_after).then_some(NudgeKind::CheckIn)
        }
        WaitingState::Nudged => {
            (in_state_for >= config.escalate_after).then_some(NudgeKind::Escalation)
        }
        WaitingState::GaveUp => None,
    }
}

#[derive(Debug)]
struct Tracker {
    waiting: WaitingState,
    state_since: Instant,
    last_activity: Instant,
    spontaneous_today: u32,
    counted_day: NaiveDate,
}

pub struct AttentionLoop {
    config: HeartbeatConfig,
    tracker: Mutex<Tracker>,
}

impl AttentionLoop {
    pub fn new(config: HeartbeatConfig) -> Self {
        let now = Instant::now();
        Self {
            config,
            tracker: Mutex::new(Tracker {
                waiting: WaitingState::Idle,
                state_since: now,
                last_activity: now,
                spontaneous_today: 0,
                counted_day: Local::now().date_naive(),
            }),
        }
    }

    pub fn config(&self) -> &HeartbeatConfig {
        &self.config
    }

    /// The user said something: reset silence and any pending wait.
    pub async fn user_active(&self) {
        let mut t = self.tracker.lock().await;
        let now = Instant::now();
        t.last_activity = now;
        t.waiting = WaitingState::Idle;
        t.state_since = now;
    }

    pub async fn waiting_state(&self) -> WaitingState {
        self.tracker.lock().await.waiting
    }

    /// Evaluate once. Applies the state transition when a nudge fires.
    pub async fn tick<R: Rng + ?Sized>(
        &self,
        mood: &BotState,
        today: NaiveDate,
        session: SessionType,
        rng: &mut R,
    ) -> Option<Nudge> {
        let mut t = self.tracker.lock().await;
        if t.counted_day != today {
            t.counted_day = today;
            t.spontaneous_today = 0;
        }
        let now = Instant::now();
        let kind = evaluate(
            &self.config,
            t.waiting,
            now.duration_since(t.state_since),
            now.duration_since(t.last_activity),
            t.spontaneous_today,
            rng.gen::<f64>(),
        )?;

        t.waiting = match kind {
            NudgeKind::Spontaneous => {
                t.spontaneous_today += 1;
                WaitingState::AwaitingReply
            }
            NudgeKind::CheckIn => WaitingState::Nudged,
            NudgeKind::Escalation => WaitingState::GaveUp,
        };
        t.state_since = now;
        tracing::debug!("Attention nudge {:?}, now {:?}", kind, t.waiting);

        Some(Nudge {
            kind,
            text: nudge_line(kind, mood, session, rng),
        })
    }

    /// Run the heartbeat until `shutdown` flips to true or the receiver side of
    /// `nudges` goes away.
    pub fn spawn(
        self: Arc<Self>,
        mood_rx: watch::Receiver<BotState>,
        nudges: mpsc::Sender<Nudge>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut rng = StdRng::from_entropy();
            let mut interval = tokio::time::interval(self.config.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let mood = mood_rx.borrow().clone();
                        let now = Local::now();
                        let session = SessionType::at(&now);
                        let nudge = self.tick(&mood, now.date_naive(), session, &mut rng).await;
                        if let Some(nudge) = nudge {
                            if nudges.send(nudge).await.is_err() {
                                tracing::debug!("Nudge receiver dropped, attention loop exiting");
                                break;
                            }
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            tracing::debug!("Attention loop shutting down");
                            break;
                        }
                    }
                }
            }
        })
    }
}
