use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

use crate::models::TradeRecord;
use crate::ports::{SessionRepository, TradeJournal};
use crate::session::TradingSession;

/// Process-local session store
#[derive(Default)]
pub struct InMemorySessionRepository {
    sessions: Mutex<HashMap<Uuid, TradingSession>>,
}

impl InMemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored session, oldest start first
    pub fn all(&self) -> Vec<TradingSession> {
        let sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<TradingSession> = sessions.values().cloned().collect();
        all.sort_by_key(|s| (s.started_at(), s.id()));
        all
    }
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<TradingSession>> {
        let sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(sessions.get(&id).cloned())
    }

    async fn find_active_by_user(&self, user_id: &str) -> anyhow::Result<Option<TradingSession>> {
        let sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(sessions
            .values()
            .find(|s| s.user_id() == user_id && s.is_active())
            .cloned())
    }

    async fn find_running(&self) -> anyhow::Result<Vec<TradingSession>> {
        Ok(self.all().into_iter().filter(|s| s.is_active()).collect())
    }

    async fn save(&self, session: &TradingSession) -> anyhow::Result<()> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);

        if session.is_active() {
            let clash = sessions
                .values()
                .any(|s| s.id() != session.id() && s.user_id() == session.user_id() && s.is_active());
            if clash {
                anyhow::bail!("user {} already has a running session", session.user_id());
            }
        }

        sessions.insert(session.id(), session.clone());
        Ok(())
    }
}

/// Trade journal kept in memory
#[derive(Default)]
pub struct InMemoryTradeJournal {
    trades: Mutex<Vec<TradeRecord>>,
}

impl InMemoryTradeJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trades(&self) -> Vec<TradeRecord> {
        self.trades
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl TradeJournal for InMemoryTradeJournal {
    async fn log_trade(&self, record: &TradeRecord) -> anyhow::Result<()> {
        tracing::debug!(
            job = %record.job_key,
            side = %record.side,
            quantity = record.quantity,
            price = record.price,
            "Trade journaled"
        );
        self.trades
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
        Ok(())
    }
}
