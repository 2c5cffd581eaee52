//! Property-based tests for the attention policy.

use proptest::prelude::*;
use std::time::Duration;
use kindred_limbic::{evaluate, HeartbeatConfig, NudgeKind, WaitingState};

fn arb_waiting() -> impl Strategy<Value = WaitingState> {
    prop_oneof![
        Just(WaitingState::Idle),
        Just(WaitingState::AwaitingReply),
        Just(WaitingState::Nudged),
        Just(WaitingState::GaveUp),
    ]
}

proptest! {
    #[test]
    fn gave_up_is_silent(
        in_state in 0u64..100_000,
        silence in 0u64..100_000,
        roll in 0.0f64..1.0,
    ) {
        let c = HeartbeatConfig::default();
        let in_state = Duration::from_secs(in_state);
        let silence = Duration::from_secs(silence);
        prop_assert_eq!(evaluate(&c, WaitingState::GaveUp, in_state, silence, 0, roll), None);
    }

    #[test]
    fn spontaneous_respects_daily_budget(
        silence in 0u64..100_000,
        roll in 0.0f64..1.0,
        used in 3u32..50,
    ) {
        let c = HeartbeatConfig::default();
        let silence = Duration::from_secs(silence);
        prop_assert_eq!(
            evaluate(&c, WaitingState::Idle, Duration::ZERO, silence, used, roll),
            None
        );
    }

    #[test]
    fn nudge_kind_matches_state(
        waiting in arb_waiting(),
        secs in 0u64..10_000,
        roll in 0.0f64..1.0,
    ) {
        let c = HeartbeatConfig::default();
        let d = Duration::from_secs(secs);
        if let Some(kind) = evaluate(&c, waiting, d, d, 0, roll) {
            let expected = match waiting {
                WaitingState::Idle => NudgeKind::Spontaneous,
                WaitingState::AwaitingReply => NudgeKind::CheckIn,
                WaitingState::Nudged => NudgeKind::Escalation,
                WaitingState::GaveUp => unreachable!(),
            };
            prop_assert_eq!(kind, expected);
        }
    }
}
