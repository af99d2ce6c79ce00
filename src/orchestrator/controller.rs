use std::sync::Arc;

use super::permission::{TradePermissionGuard, UserIdentity};
use crate::clock::Clock;
use crate::config::JobSettings;
use crate::error::TradingError;
use crate::execution::ExecutionJob;
use crate::models::PnlSnapshot;
use crate::ports::SessionRepository;
use crate::service::SessionService;
use crate::session::{StopReason, StopReasonCode, TradingSession};
use crate::Result;

/// Entry point for starting and stopping a user's live trading.
///
/// Sessions are persisted through the repository; the running loop lives in
/// the [`SessionService`]. The two are kept consistent on a best-effort basis
/// and [`reconcile`](Self::reconcile) repairs drift after a restart.
pub struct CoreTradingOrchestrator {
    permission: TradePermissionGuard,
    repository: Arc<dyn SessionRepository>,
    sessions: Arc<SessionService>,
    defaults: JobSettings,
    clock: Arc<dyn Clock>,
}

impl CoreTradingOrchestrator {
    pub fn new(
        permission: TradePermissionGuard,
        repository: Arc<dyn SessionRepository>,
        sessions: Arc<SessionService>,
        defaults: JobSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            permission,
            repository,
            sessions,
            defaults,
            clock,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionService> {
        &self.sessions
    }

    pub async fn start_live(&self, user_id: &str, account_id: &str) -> Result<TradingSession> {
        let user = UserIdentity::parse(user_id)?;
        if account_id.trim().is_empty() {
            return Err(TradingError::Validation(
                "account_id must not be blank".to_string(),
            ));
        }

        self.permission.assert_can_trade(&user).await?;

        if self.find_active(&user).await?.is_some() {
            return Err(TradingError::SessionAlreadyActive(user.to_string()));
        }

        let job = self.job_for(&user, &self.defaults.strategy_id);
        job.validate()?;
        if self.sessions.is_running(&job.key()) {
            return Err(TradingError::SessionAlreadyActive(user.to_string()));
        }

        let mut session = TradingSession::new(
            user.as_str(),
            account_id.trim(),
            self.defaults.strategy_id.clone(),
        );
        session.start(self.clock.now())?;
        self.save(&session).await?;

        if let Err(e) = self.sessions.start(&job, self.defaults.period()) {
            tracing::error!(user = %user, "Failed to schedule trading job: {}", e);
            session.mark_error(StopReason::new(
                StopReasonCode::RuntimeError,
                format!("failed to schedule job: {e}"),
                self.clock.now(),
            ));
            if let Err(save_err) = self.save(&session).await {
                tracing::warn!(session = %session.id(), "Failed to persist error state: {}", save_err);
            }
            return Err(e);
        }

        tracing::info!(
            user = %user,
            session = %session.id(),
            key = %job.key(),
            "Live trading started"
        );
        Ok(session)
    }

    /// Stop the user's job and close the active session, if there is one.
    pub async fn stop_live(&self, user_id: &str) -> Result<Option<TradingSession>> {
        let user = UserIdentity::parse(user_id)?;

        // The scheduler goes first, even when no session was persisted
        self.sessions
            .stop(&self.job_for(&user, &self.defaults.strategy_id));

        let Some(mut session) = self.find_active(&user).await? else {
            tracing::info!(user = %user, "No active session to stop");
            return Ok(None);
        };

        if session.strategy_id() != self.defaults.strategy_id {
            self.sessions
                .stop(&self.job_for(&user, session.strategy_id()));
        }

        session.request_stop(StopReason::user_requested(self.clock.now()))?;
        self.save(&session).await?;
        Ok(Some(session))
    }

    /// Replace the active session's PnL. Returns false without a session.
    pub async fn record_pnl(&self, user_id: &str, snapshot: PnlSnapshot) -> Result<bool> {
        let user = UserIdentity::parse(user_id)?;

        match self.find_active(&user).await? {
            Some(mut session) => {
                session.update_pnl(snapshot);
                self.save(&session).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Mark RUNNING sessions that have no scheduled job as orphaned.
    pub async fn reconcile(&self) -> Result<usize> {
        let running = self
            .repository
            .find_running()
            .await
            .map_err(TradingError::Persistence)?;

        let mut reconciled = 0;
        for mut session in running {
            let job = ExecutionJob {
                user_id: session.user_id().to_string(),
                ..self.default_job(session.strategy_id())
            };
            if self.sessions.is_running(&job.key()) {
                continue;
            }

            session.mark_error(StopReason::new(
                StopReasonCode::Orphaned,
                "no scheduled job found for running session",
                self.clock.now(),
            ));
            self.save(&session).await?;
            reconciled += 1;
        }

        if reconciled > 0 {
            tracing::info!(count = reconciled, "Reconciled orphaned sessions");
        }
        Ok(reconciled)
    }

    fn job_for(&self, user: &UserIdentity, strategy_id: &str) -> ExecutionJob {
        ExecutionJob {
            user_id: user.to_string(),
            ..self.default_job(strategy_id)
        }
    }

    fn default_job(&self, strategy_id: &str) -> ExecutionJob {
        let defaults = &self.defaults;
        ExecutionJob {
            user_id: String::new(),
            strategy_id: strategy_id.to_string(),
            exchange: defaults.exchange.clone(),
            market_data_exchange: defaults.market_data_exchange.clone(),
            symbol: defaults.symbol.clone(),
            timeframe: defaults.timeframe.clone(),
            lookback: defaults.lookback,
        }
    }

    async fn find_active(&self, user: &UserIdentity) -> Result<Option<TradingSession>> {
        self.repository
            .find_active_by_user(user.as_str())
            .await
            .map_err(TradingError::Persistence)
    }

    async fn save(&self, session: &TradingSession) -> Result<()> {
        self.repository
            .save(session)
            .await
            .map_err(TradingError::Persistence)
    }
}
