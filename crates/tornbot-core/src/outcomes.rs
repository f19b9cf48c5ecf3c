use serde::{Deserialize, Serialize};

use crate::{time::EpochMs, ActivityKind, BotError};

/// How a failed attempt should be treated by the retry policy.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The action was definitely not applied.
    Transient,
    /// The action may or may not have been applied remotely.
    Ambiguous,
    /// Retrying cannot help until the module is reconfigured.
    Fatal,
    /// The remote service rejected the credentials. Ends the loop, not just the module.
    AuthRejected,
}

impl FailureKind {
    /// Failures that escalate on the first occurrence.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FailureKind::Fatal | FailureKind::AuthRejected)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ActionResult {
    Success,
    Failure { kind: FailureKind, reason: String },
    Skipped { reason: String },
}

/// Estimated change to the bars caused by an action. Negative means consumed.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceDelta {
    pub energy: i64,
    pub nerve: i64,
    pub happiness: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionOutcome {
    pub kind: ActivityKind,
    pub attempted_at: EpochMs,
    pub result: ActionResult,
    pub resource_delta: Option<ResourceDelta>,
}

impl ActionOutcome {
    pub fn success(kind: ActivityKind, attempted_at: EpochMs, delta: Option<ResourceDelta>) -> Self {
        Self {
            kind,
            attempted_at,
            result: ActionResult::Success,
            resource_delta: delta,
        }
    }

    pub fn failure(
        kind: ActivityKind,
        attempted_at: EpochMs,
        failure: FailureKind,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            attempted_at,
            result: ActionResult::Failure {
                kind: failure,
                reason: reason.into(),
            },
            resource_delta: None,
        }
    }

    pub fn skipped(kind: ActivityKind, attempted_at: EpochMs, reason: impl Into<String>) -> Self {
        Self {
            kind,
            attempted_at,
            result: ActionResult::Skipped {
                reason: reason.into(),
            },
            resource_delta: None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.result, ActionResult::Success)
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.result, ActionResult::Skipped { .. })
    }

    /// The credential rejection behind this outcome, if that is why it failed.
    pub fn auth_rejection(&self) -> Option<BotError> {
        match &self.result {
            ActionResult::Failure {
                kind: FailureKind::AuthRejected,
                reason,
            } => Some(BotError::FatalAuth(format!("{}: {reason}", self.kind))),
            _ => None,
        }
    }
}
