use thiserror::Error;

use crate::session::{SessionStatus, StopReasonCode};

/// Errors surfaced by the controller's public operations.
///
/// Tick-level failures never show up here: the pipeline folds them into a
/// `TickResult` so the scheduler keeps running.
#[derive(Debug, Error)]
pub enum TradingError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("malformed job key '{0}'")]
    MalformedJobKey(String),

    #[error("subscription required for user {user_id} ({code})")]
    SubscriptionRequired {
        user_id: String,
        code: StopReasonCode,
    },

    #[error("user {0} already has an active session")]
    SessionAlreadyActive(String),

    #[error("session is already running")]
    AlreadyRunning,

    #[error("invalid transition: cannot {action} a session in state {from}")]
    InvalidTransition {
        from: SessionStatus,
        action: &'static str,
    },

    #[error("persistence error: {0}")]
    Persistence(#[source] anyhow::Error),

    #[error("scheduler error: {0}")]
    Scheduler(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl TradingError {
    /// Stop-reason code carried by the error, if it maps to one.
    pub fn stop_code(&self) -> Option<StopReasonCode> {
        match self {
            TradingError::SubscriptionRequired { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<config::ConfigError> for TradingError {
    fn from(err: config::ConfigError) -> Self {
        TradingError::Config(err.to_string())
    }
}
