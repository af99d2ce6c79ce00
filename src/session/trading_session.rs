use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::StopReason;
use crate::error::TradingError;
use crate::models::PnlSnapshot;
use crate::Result;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionStatus {
    Idle,
    Running,
    Stopped,
    Error,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "IDLE",
            SessionStatus::Running => "RUNNING",
            SessionStatus::Stopped => "STOPPED",
            SessionStatus::Error => "ERROR",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Stopped | SessionStatus::Error)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "IDLE" => Ok(SessionStatus::Idle),
            "RUNNING" => Ok(SessionStatus::Running),
            "STOPPED" => Ok(SessionStatus::Stopped),
            "ERROR" => Ok(SessionStatus::Error),
            other => Err(format!("unknown session status: {other}")),
        }
    }
}

/// One live trading run for a user.
///
/// Lifecycle: `IDLE -> RUNNING -> {STOPPED, ERROR}`. The terminal states are
/// final; trading again needs a fresh session with a new id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradingSession {
    id: Uuid,
    user_id: String,
    account_id: String,
    strategy_id: String,
    status: SessionStatus,
    started_at: Option<DateTime<Utc>>,
    stopped_at: Option<DateTime<Utc>>,
    stop_reason: Option<StopReason>,
    pnl: Option<PnlSnapshot>,
}

impl TradingSession {
    /// Create a fresh IDLE session
    pub fn new(
        user_id: impl Into<String>,
        account_id: impl Into<String>,
        strategy_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            account_id: account_id.into(),
            strategy_id: strategy_id.into(),
            status: SessionStatus::Idle,
            started_at: None,
            stopped_at: None,
            stop_reason: None,
            pnl: None,
        }
    }

    /// Rebuild a session from storage without running transition checks
    #[allow(clippy::too_many_arguments)]
    pub fn rehydrate(
        id: Uuid,
        user_id: String,
        account_id: String,
        strategy_id: String,
        status: SessionStatus,
        started_at: Option<DateTime<Utc>>,
        stopped_at: Option<DateTime<Utc>>,
        stop_reason: Option<StopReason>,
        pnl: Option<PnlSnapshot>,
    ) -> Self {
        Self {
            id,
            user_id,
            account_id,
            strategy_id,
            status,
            started_at,
            stopped_at,
            stop_reason,
            pnl,
        }
    }

    pub fn start(&mut self, at: DateTime<Utc>) -> Result<()> {
        match self.status {
            SessionStatus::Idle => {
                self.status = SessionStatus::Running;
                self.started_at = Some(at);
                tracing::info!(session = %self.id, user = %self.user_id, "Session started");
                Ok(())
            }
            SessionStatus::Running => Err(TradingError::AlreadyRunning),
            from => Err(TradingError::InvalidTransition {
                from,
                action: "start",
            }),
        }
    }

    pub fn request_stop(&mut self, reason: StopReason) -> Result<()> {
        if self.status != SessionStatus::Running {
            return Err(TradingError::InvalidTransition {
                from: self.status,
                action: "stop",
            });
        }

        tracing::info!(
            session = %self.id,
            user = %self.user_id,
            code = %reason.code,
            "Session stopped"
        );
        self.status = SessionStatus::Stopped;
        self.stopped_at = Some(reason.at);
        self.stop_reason = Some(reason);
        Ok(())
    }

    /// Move to ERROR from any state
    pub fn mark_error(&mut self, reason: StopReason) {
        tracing::warn!(
            session = %self.id,
            user = %self.user_id,
            from = %self.status,
            code = %reason.code,
            "Session marked as error: {}",
            reason.message
        );
        self.status = SessionStatus::Error;
        self.stopped_at = Some(reason.at);
        self.stop_reason = Some(reason);
    }

    pub fn update_pnl(&mut self, snapshot: PnlSnapshot) {
        self.pnl = Some(snapshot);
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Running
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn strategy_id(&self) -> &str {
        &self.strategy_id
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn stopped_at(&self) -> Option<DateTime<Utc>> {
        self.stopped_at
    }

    pub fn stop_reason(&self) -> Option<&StopReason> {
        self.stop_reason.as_ref()
    }

    pub fn pnl(&self) -> Option<&PnlSnapshot> {
        self.pnl.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::StopReasonCode;

    fn new_session() -> TradingSession {
        TradingSession::new("alice", "acct-1", "ema_cross")
    }

    #[test]
    fn test_start_from_idle() {
        let mut session = new_session();
        let now = Utc::now();

        session.start(now).unwrap();

        assert_eq!(session.status(), SessionStatus::Running);
        assert_eq!(session.started_at(), Some(now));
        assert!(session.is_active());
    }

    #[test]
    fn test_start_twice_is_already_running() {
        let mut session = new_session();
        session.start(Utc::now()).unwrap();

        let result = session.start(Utc::now());
        assert!(matches!(result, Err(TradingError::AlreadyRunning)));
        assert_eq!(session.status(), SessionStatus::Running);
    }

    #[test]
    fn test_cannot_restart_stopped_session() {
        let mut session = new_session();
        session.start(Utc::now()).unwrap();
        session
            .request_stop(StopReason::user_requested(Utc::now()))
            .unwrap();

        let result = session.start(Utc::now());
        assert!(matches!(
            result,
            Err(TradingError::InvalidTransition {
                from: SessionStatus::Stopped,
                ..
            })
        ));
    }

    #[test]
    fn test_cannot_restart_errored_session() {
        let mut session = new_session();
        session.mark_error(StopReason::new(
            StopReasonCode::RuntimeError,
            "boom",
            Utc::now(),
        ));

        assert!(session.start(Utc::now()).is_err());
        assert_eq!(session.status(), SessionStatus::Error);
    }

    #[test]
    fn test_stop_requires_running() {
        let mut session = new_session();

        let result = session.request_stop(StopReason::user_requested(Utc::now()));
        assert!(matches!(
            result,
            Err(TradingError::InvalidTransition {
                from: SessionStatus::Idle,
                action: "stop"
            })
        ));
        assert!(session.stop_reason().is_none());
    }

    #[test]
    fn test_stop_records_reason() {
        let mut session = new_session();
        session.start(Utc::now()).unwrap();

        let at = Utc::now();
        session.request_stop(StopReason::user_requested(at)).unwrap();

        assert_eq!(session.status(), SessionStatus::Stopped);
        assert_eq!(session.stopped_at(), Some(at));
        assert_eq!(
            session.stop_reason().map(|r| r.code),
            Some(StopReasonCode::UserRequested)
        );
        assert!(!session.is_active());
    }

    #[test]
    fn test_mark_error_from_any_state() {
        for status in [
            SessionStatus::Idle,
            SessionStatus::Running,
            SessionStatus::Stopped,
        ] {
            let mut session = TradingSession::rehydrate(
                Uuid::new_v4(),
                "bob".to_string(),
                "acct".to_string(),
                "ema_cross".to_string(),
                status,
                None,
                None,
                None,
                None,
            );
            session.mark_error(StopReason::new(
                StopReasonCode::RuntimeError,
                "fault",
                Utc::now(),
            ));
            assert_eq!(session.status(), SessionStatus::Error);
        }
    }

    #[test]
    fn test_update_pnl_replaces_snapshot() {
        let mut session = new_session();
        let first = PnlSnapshot {
            realized: 10.0,
            unrealized: 5.0,
            updated_at: Utc::now(),
        };
        let second = PnlSnapshot {
            realized: -2.0,
            unrealized: 0.0,
            updated_at: Utc::now(),
        };

        session.update_pnl(first);
        session.update_pnl(second.clone());

        assert_eq!(session.pnl(), Some(&second));
    }

    #[test]
    fn test_new_sessions_have_distinct_ids() {
        assert_ne!(new_session().id(), new_session().id());
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("RUNNING".parse::<SessionStatus>(), Ok(SessionStatus::Running));
        assert!("running".parse::<SessionStatus>().is_err());
    }
}
