use thiserror::Error;

use crate::FailureKind;

/// Error taxonomy shared by the scheduler and its collaborators.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BotError {
    /// Remote unreachable or returned malformed data. Retried with backoff.
    #[error("transient fetch error: {0}")]
    TransientFetch(String),
    /// An action request was sent but its effect is unknown.
    #[error("ambiguous action result: {0}")]
    AmbiguousAction(String),
    /// Credentials rejected. Stops the loop.
    #[error("credentials rejected: {0}")]
    FatalAuth(String),
    /// Invalid configuration detected at startup or on first use of a module.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl BotError {
    pub fn transient<E: std::fmt::Display>(e: E) -> Self {
        Self::TransientFetch(e.to_string())
    }
    pub fn ambiguous<E: std::fmt::Display>(e: E) -> Self {
        Self::AmbiguousAction(e.to_string())
    }
    pub fn fatal_auth<E: std::fmt::Display>(e: E) -> Self {
        Self::FatalAuth(e.to_string())
    }
    pub fn configuration<E: std::fmt::Display>(e: E) -> Self {
        Self::Configuration(e.to_string())
    }

    /// Errors that must halt the loop instead of being absorbed by a cycle.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BotError::FatalAuth(_) | BotError::Configuration(_))
    }

    /// Classification used when an action attempt fails with this error.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            BotError::TransientFetch(_) => FailureKind::Transient,
            BotError::AmbiguousAction(_) => FailureKind::Ambiguous,
            BotError::FatalAuth(_) => FailureKind::AuthRejected,
            BotError::Configuration(_) => FailureKind::Fatal,
        }
    }
}
