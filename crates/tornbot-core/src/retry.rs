use std::collections::BTreeMap;
use std::time::Duration;

use crate::{
    time::{add_duration, EpochMs},
    ActionOutcome, ActionResult, ActivityKind, Backoff, FailureKind,
};

/// What the scheduler should do with a module after an outcome.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Success: counters reset, nothing pending.
    Clear,
    /// Eligible again from the next cycle with no delay.
    RetryImmediately,
    /// Held back for at least this long.
    RetryAfter(Duration),
    /// Not attempted this cycle; no penalty.
    DisableForCycle,
    /// Surfaced to the operator; the module stays disabled until reconfigured.
    Escalate,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RetryState {
    pub consecutive_failures: u32,
    pub next_eligible_retry_at: EpochMs,
    /// Set by an ambiguous failure; cleared by a snapshot captured after it.
    pub awaiting_fresh_snapshot_since: Option<EpochMs>,
    pub escalated: bool,
}

impl RetryState {
    pub fn is_ready(&self, now: EpochMs) -> bool {
        !self.escalated
            && self.awaiting_fresh_snapshot_since.is_none()
            && now >= self.next_eligible_retry_at
    }
}

/// Retry bookkeeping for every module, owned by the scheduler.
#[derive(Clone, Debug, Default)]
pub struct RetryBook {
    states: BTreeMap<ActivityKind, RetryState>,
}

impl RetryBook {
    pub fn state(&self, kind: ActivityKind) -> RetryState {
        self.states.get(&kind).cloned().unwrap_or_default()
    }

    pub fn is_ready(&self, kind: ActivityKind, now: EpochMs) -> bool {
        self.states.get(&kind).map_or(true, |s| s.is_ready(now))
    }

    /// Release modules that were waiting on re-verification after an ambiguous failure.
    pub fn note_fresh_snapshot(&mut self, captured_at: EpochMs) {
        for state in self.states.values_mut() {
            if state
                .awaiting_fresh_snapshot_since
                .is_some_and(|since| captured_at > since)
            {
                state.awaiting_fresh_snapshot_since = None;
            }
        }
    }

    /// Earliest future retry time among modules that can still retry.
    pub fn earliest_pending(&self, now: EpochMs) -> Option<EpochMs> {
        self.states
            .values()
            .filter(|s| !s.escalated && s.next_eligible_retry_at > now)
            .map(|s| s.next_eligible_retry_at)
            .min()
    }

    fn entry(&mut self, kind: ActivityKind) -> &mut RetryState {
        self.states.entry(kind).or_default()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub backoff: Backoff,
    /// Consecutive failures at which any module is escalated.
    pub ceiling: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: Backoff::default(),
            ceiling: 10,
        }
    }
}

impl RetryPolicy {
    /// Update `book` for `outcome` and decide what happens to the module next.
    pub fn on_outcome(&self, book: &mut RetryBook, outcome: &ActionOutcome, now: EpochMs) -> Decision {
        let state = book.entry(outcome.kind);
        match &outcome.result {
            ActionResult::Success => {
                *state = RetryState::default();
                Decision::Clear
            }
            ActionResult::Skipped { .. } => Decision::DisableForCycle,
            ActionResult::Failure { kind, .. } => {
                state.consecutive_failures = state.consecutive_failures.saturating_add(1);
                if kind.is_fatal() || state.consecutive_failures >= self.ceiling {
                    state.escalated = true;
                    return Decision::Escalate;
                }
                match kind {
                    FailureKind::Transient => {
                        let delay = self.backoff.delay(state.consecutive_failures);
                        state.next_eligible_retry_at = add_duration(now, delay);
                        if delay.is_zero() {
                            Decision::RetryImmediately
                        } else {
                            Decision::RetryAfter(delay)
                        }
                    }
                    FailureKind::Ambiguous => {
                        // One step more conservative than a transient failure.
                        let delay = self
                            .backoff
                            .delay(state.consecutive_failures.saturating_add(1))
                            .max(self.backoff.base)
                            .max(Duration::from_secs(1));
                        state.next_eligible_retry_at = add_duration(now, delay);
                        state.awaiting_fresh_snapshot_since = Some(now);
                        Decision::RetryAfter(delay)
                    }
                    FailureKind::Fatal | FailureKind::AuthRejected => Decision::Escalate,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fail(kind: FailureKind, at: EpochMs) -> ActionOutcome {
        ActionOutcome::failure(ActivityKind::Gym, at, kind, "boom")
    }

    #[test]
    fn transient_backoff_strictly_increases_then_resets() {
        let policy = RetryPolicy::default();
        let mut book = RetryBook::default();
        let now = 1_000_000;
        let mut last = now;
        for _ in 0..5 {
            policy.on_outcome(&mut book, &fail(FailureKind::Transient, now), now);
            let next = book.state(ActivityKind::Gym).next_eligible_retry_at;
            assert!(next > last);
            last = next;
        }
        let d = policy.on_outcome(
            &mut book,
            &ActionOutcome::success(ActivityKind::Gym, now, None),
            now,
        );
        assert_eq!(d, Decision::Clear);
        assert_eq!(book.state(ActivityKind::Gym), RetryState::default());
        assert!(book.is_ready(ActivityKind::Gym, now));
    }

    #[test]
    fn ambiguous_never_retries_immediately() {
        let policy = RetryPolicy {
            backoff: Backoff {
                base: Duration::ZERO,
                factor: 2,
                cap: Duration::ZERO,
            },
            ceiling: 10,
        };
        let mut book = RetryBook::default();
        let d = policy.on_outcome(&mut book, &fail(FailureKind::Ambiguous, 0), 0);
        assert!(matches!(d, Decision::RetryAfter(x) if !x.is_zero()));

        let t = policy.on_outcome(&mut book, &fail(FailureKind::Transient, 0), 0);
        assert_eq!(t, Decision::RetryImmediately);
    }

    #[test]
    fn ambiguous_holds_until_fresh_snapshot() {
        let policy = RetryPolicy::default();
        let mut book = RetryBook::default();
        policy.on_outcome(&mut book, &fail(FailureKind::Ambiguous, 100), 100);
        let far_future = 100 + 3_600_000;
        assert!(!book.is_ready(ActivityKind::Gym, far_future));

        book.note_fresh_snapshot(100);
        assert!(!book.is_ready(ActivityKind::Gym, far_future));

        book.note_fresh_snapshot(101);
        assert!(book.is_ready(ActivityKind::Gym, far_future));
    }

    #[test]
    fn ceiling_escalates_any_failure_kind() {
        for kind in [FailureKind::Transient, FailureKind::Ambiguous] {
            let policy = RetryPolicy {
                ceiling: 3,
                ..Default::default()
            };
            let mut book = RetryBook::default();
            let mut last = Decision::Clear;
            for _ in 0..3 {
                last = policy.on_outcome(&mut book, &fail(kind, 0), 0);
            }
            assert_eq!(last, Decision::Escalate);
            assert!(!book.is_ready(ActivityKind::Gym, i64::MAX));
        }
    }

    #[test]
    fn fatal_escalates_on_first_failure() {
        let policy = RetryPolicy::default();
        let mut book = RetryBook::default();
        let d = policy.on_outcome(&mut book, &fail(FailureKind::AuthRejected, 0), 0);
        assert_eq!(d, Decision::Escalate);

        let mut book = RetryBook::default();
        let d = policy.on_outcome(&mut book, &fail(FailureKind::Fatal, 0), 0);
        assert_eq!(d, Decision::Escalate);
        assert!(book.state(ActivityKind::Gym).escalated);
        assert_eq!(book.earliest_pending(0), None);
    }

    #[test]
    fn skipped_leaves_counters_alone() {
        let policy = RetryPolicy::default();
        let mut book = RetryBook::default();
        policy.on_outcome(&mut book, &fail(FailureKind::Transient, 0), 0);
        let d = policy.on_outcome(
            &mut book,
            &ActionOutcome::skipped(ActivityKind::Gym, 0, "nothing to do"),
            0,
        );
        assert_eq!(d, Decision::DisableForCycle);
        assert_eq!(book.state(ActivityKind::Gym).consecutive_failures, 1);
    }
}
