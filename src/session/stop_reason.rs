use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Why a session left the RUNNING state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StopReasonCode {
    UserRequested,
    SubscriptionRequired,
    DailyLossLimit,
    MaxTradesReached,
    RuntimeError,
    Orphaned,
}

impl StopReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReasonCode::UserRequested => "USER_REQUESTED",
            StopReasonCode::SubscriptionRequired => "SUBSCRIPTION_REQUIRED",
            StopReasonCode::DailyLossLimit => "DAILY_LOSS_LIMIT",
            StopReasonCode::MaxTradesReached => "MAX_TRADES_REACHED",
            StopReasonCode::RuntimeError => "RUNTIME_ERROR",
            StopReasonCode::Orphaned => "ORPHANED",
        }
    }
}

impl fmt::Display for StopReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StopReasonCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "USER_REQUESTED" => Ok(StopReasonCode::UserRequested),
            "SUBSCRIPTION_REQUIRED" => Ok(StopReasonCode::SubscriptionRequired),
            "DAILY_LOSS_LIMIT" => Ok(StopReasonCode::DailyLossLimit),
            "MAX_TRADES_REACHED" => Ok(StopReasonCode::MaxTradesReached),
            "RUNTIME_ERROR" => Ok(StopReasonCode::RuntimeError),
            "ORPHANED" => Ok(StopReasonCode::Orphaned),
            other => Err(format!("unknown stop reason code: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StopReason {
    pub code: StopReasonCode,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl StopReason {
    pub fn new(code: StopReasonCode, message: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            code,
            message: message.into(),
            at,
        }
    }

    pub fn user_requested(at: DateTime<Utc>) -> Self {
        Self::new(StopReasonCode::UserRequested, "Stopped by user", at)
    }
}
