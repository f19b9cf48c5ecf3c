use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{error, info, info_span, warn, Instrument};
use ulid::Ulid;

use tornbot_core::{
    now_ms, plan_attempts, probes_needed, until, ActionOutcome, ActionResult, ActivityKind,
    BotError, Decision, EducationStatus, EpochMs, ModuleSet, Probe, ProbeResults, ResourceSnapshot, RetryBook,
    RetryPolicy, RetryState,
};

use crate::api::StatusSource;
use crate::config::SchedulerSettings;
use crate::executor::ActionExecutor;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Refreshing,
    Evaluating,
    Dispatching,
    Sleeping,
    Stopped,
}

/// Why [`Scheduler::run`] returned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// The stop channel fired.
    Signal,
    /// The remote service rejected the credentials, or the setup is unusable.
    FatalAuth(BotError),
}

/// What happened during one cycle.
#[derive(Clone, Debug)]
pub struct CycleReport {
    /// Correlates log lines of one cycle.
    pub id: Ulid,
    pub number: u64,
    /// False when the refresh failed and the previous snapshot was reused.
    pub snapshot_fresh: bool,
    /// Modules that would be eligible but were held back (stale snapshot or agent unavailable).
    pub deferred: Vec<ActivityKind>,
    pub planned: Vec<ActivityKind>,
    pub outcomes: Vec<ActionOutcome>,
    pub decisions: Vec<(ActivityKind, Decision)>,
    pub next_delay: Duration,
    /// The stop signal cut the cycle short.
    pub interrupted: bool,
}

impl CycleReport {
    fn new(number: u64, next_delay: Duration) -> Self {
        Self {
            id: Ulid::new(),
            number,
            snapshot_fresh: false,
            deferred: Vec::new(),
            planned: Vec::new(),
            outcomes: Vec::new(),
            decisions: Vec::new(),
            next_delay,
            interrupted: false,
        }
    }
}

type Clock = Arc<dyn Fn() -> EpochMs + Send + Sync>;

/// Single-owner decision loop. Owns the current snapshot and all retry state.
pub struct Scheduler<S, E> {
    source: S,
    executor: E,
    modules: ModuleSet,
    policy: RetryPolicy,
    settings: SchedulerSettings,
    stop: watch::Receiver<bool>,
    clock: Clock,
    state: SchedulerState,
    snapshot: Option<ResourceSnapshot>,
    retry: RetryBook,
    cycles: u64,
}

impl<S: StatusSource, E: ActionExecutor> Scheduler<S, E> {
    pub fn new(
        source: S,
        executor: E,
        modules: ModuleSet,
        policy: RetryPolicy,
        settings: SchedulerSettings,
        stop: watch::Receiver<bool>,
    ) -> Self {
        Self {
            source,
            executor,
            modules,
            policy,
            settings,
            stop,
            clock: Arc::new(now_ms),
            state: SchedulerState::Idle,
            snapshot: None,
            retry: RetryBook::default(),
            cycles: 0,
        }
    }

    /// Replace the wall clock used for retry bookkeeping.
    pub fn with_clock(mut self, clock: impl Fn() -> EpochMs + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn snapshot(&self) -> Option<&ResourceSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn retry_state(&self, kind: ActivityKind) -> RetryState {
        self.retry.state(kind)
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Cycle until stopped or a fatal error ends the loop.
    pub async fn run(&mut self) -> StopReason {
        loop {
            if self.stop_requested() {
                self.state = SchedulerState::Stopped;
                return StopReason::Signal;
            }
            self.state = SchedulerState::Idle;

            let report = match self.run_cycle().await {
                Ok(report) => report,
                Err(e) => {
                    error!("stopping: {e}");
                    return StopReason::FatalAuth(e);
                }
            };
            if report.interrupted {
                return StopReason::Signal;
            }

            info!(
                "cycle {} done: {} attempted, {} deferred, next in {:?}",
                report.number,
                report.outcomes.len(),
                report.deferred.len(),
                report.next_delay
            );

            self.state = SchedulerState::Sleeping;
            let stopped = tokio::select! {
                _ = sleep(report.next_delay) => false,
                _ = wait_for_stop(&mut self.stop) => true,
            };
            if stopped {
                self.state = SchedulerState::Stopped;
                return StopReason::Signal;
            }
        }
    }

    /// One refresh, evaluate and dispatch pass.
    ///
    /// Errors are returned only when the loop must end: a fatal refresh, or
    /// credentials rejected by a probe or an attempt.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, BotError> {
        self.cycles += 1;
        let number = self.cycles;
        self.cycle(number).instrument(info_span!("cycle", n = number)).await
    }

    async fn cycle(&mut self, number: u64) -> Result<CycleReport, BotError> {
        let mut report = CycleReport::new(number, self.settings.cycle_interval);
        if self.halt_if_stopped(&mut report) {
            return Ok(report);
        }

        self.state = SchedulerState::Refreshing;
        report.snapshot_fresh = match self.source.refresh().await {
            Ok(snapshot) => {
                self.accept(snapshot);
                true
            }
            Err(e) if e.is_fatal() => {
                self.state = SchedulerState::Stopped;
                return Err(e);
            }
            Err(e) => {
                warn!("refresh failed, reusing previous snapshot: {e}");
                false
            }
        };
        if self.halt_if_stopped(&mut report) {
            return Ok(report);
        }

        self.state = SchedulerState::Evaluating;
        let now = (self.clock)();
        let Some(snapshot) = self.snapshot.clone() else {
            report.next_delay = self.next_delay(now);
            return Ok(report);
        };

        if !report.snapshot_fresh || !snapshot.status.is_available() {
            report.deferred = plan_attempts(
                &self.modules,
                &snapshot,
                &ProbeResults::default(),
                &self.retry,
                now,
            );
            if !report.deferred.is_empty() {
                info!(
                    "holding {:?} (fresh: {}, status: {:?})",
                    report.deferred, report.snapshot_fresh, snapshot.status
                );
            }
            report.next_delay = self.next_delay(now);
            return Ok(report);
        }

        let probes = match self.gather_probes(now).await {
            Ok(probes) => probes,
            Err(e) => {
                self.state = SchedulerState::Stopped;
                return Err(e);
            }
        };
        if self.halt_if_stopped(&mut report) {
            return Ok(report);
        }
        report.planned = plan_attempts(&self.modules, &snapshot, &probes, &self.retry, now);

        self.state = SchedulerState::Dispatching;
        let mut working = snapshot;
        for kind in report.planned.clone() {
            if self.halt_if_stopped(&mut report) {
                return Ok(report);
            }
            let outcome = self.executor.attempt(kind, &working).await;
            if let Some(delta) = &outcome.resource_delta {
                working = working.estimate_after(delta);
            }
            let decision = self.policy.on_outcome(&mut self.retry, &outcome, (self.clock)());
            self.log_decision(&outcome, &decision);
            let rejected = outcome.auth_rejection();
            report.decisions.push((kind, decision));
            report.outcomes.push(outcome);
            if let Some(e) = rejected {
                self.state = SchedulerState::Stopped;
                return Err(e);
            }
        }

        report.next_delay = self.next_delay((self.clock)());
        Ok(report)
    }

    fn stop_requested(&self) -> bool {
        *self.stop.borrow()
    }

    fn halt_if_stopped(&mut self, report: &mut CycleReport) -> bool {
        if self.stop_requested() {
            self.state = SchedulerState::Stopped;
            report.interrupted = true;
        }
        report.interrupted
    }

    /// Keep capture times strictly increasing and release ambiguous holds.
    fn accept(&mut self, snapshot: ResourceSnapshot) {
        let snapshot = match &self.snapshot {
            Some(prev) if snapshot.captured_at <= prev.captured_at => {
                let bumped = prev.captured_at + 1;
                snapshot.recaptured(bumped)
            }
            _ => snapshot,
        };
        info!(
            "energy {}/{} nerve {}/{} happy {}/{} status {:?}",
            snapshot.energy,
            snapshot.energy_max,
            snapshot.nerve,
            snapshot.nerve_max,
            snapshot.happiness,
            snapshot.happiness_max,
            snapshot.status
        );
        for (kind, at) in &snapshot.cooldowns {
            if *at > snapshot.captured_at {
                info!("{kind} cooldown: {:?} left", until(snapshot.captured_at, *at));
            }
        }
        self.retry.note_fresh_snapshot(snapshot.captured_at);
        self.snapshot = Some(snapshot);
    }

    /// A failed probe leaves its module ineligible; a rejected key ends the cycle.
    async fn gather_probes(&self, now: EpochMs) -> Result<ProbeResults, BotError> {
        let mut probes = ProbeResults::default();
        for probe in probes_needed(&self.modules, &self.retry, now) {
            match probe {
                Probe::UsableItem => match self.executor.probe_usable_item().await {
                    Ok(item) => probes.usable_item = item,
                    Err(e @ BotError::FatalAuth(_)) => return Err(e),
                    Err(e) => warn!("item probe failed: {e}"),
                },
                Probe::Education => match self.executor.probe_education().await {
                    Ok(status) => {
                        if let EducationStatus::Enrolled {
                            course_id,
                            seconds_left,
                        } = &status
                        {
                            info!("course {course_id} finishes in {seconds_left}s");
                        }
                        probes.education = Some(status);
                    }
                    Err(e @ BotError::FatalAuth(_)) => return Err(e),
                    Err(e) => warn!("education probe failed: {e}"),
                },
            }
        }
        Ok(probes)
    }

    fn next_delay(&self, now: EpochMs) -> Duration {
        let base = self.settings.cycle_interval;
        let delay = match self.retry.earliest_pending(now) {
            Some(at) => base.min(until(now, at)),
            None => base,
        };
        delay.max(self.settings.min_cycle_interval)
    }

    fn log_decision(&self, outcome: &ActionOutcome, decision: &Decision) {
        let kind = outcome.kind;
        let reason = match &outcome.result {
            ActionResult::Success => "",
            ActionResult::Failure { reason, .. } | ActionResult::Skipped { reason } => reason.as_str(),
        };
        match decision {
            Decision::Clear => info!("{kind} succeeded"),
            Decision::DisableForCycle => info!("{kind} skipped: {reason}"),
            Decision::RetryImmediately => warn!("{kind} failed, retrying next cycle: {reason}"),
            Decision::RetryAfter(d) => warn!("{kind} failed, retry in {d:?}: {reason}"),
            Decision::Escalate => error!(
                "{kind} disabled after {} consecutive failures: {reason}",
                self.retry.state(kind).consecutive_failures
            ),
        }
    }
}

/// Resolves once the stop flag is set. A dropped sender never resolves.
async fn wait_for_stop(stop: &mut watch::Receiver<bool>) {
    if stop.wait_for(|stopped| *stopped).await.is_err() {
        std::future::pending::<()>().await;
    }
}
