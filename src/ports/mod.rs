//! Contracts for the collaborators the controller drives.
//!
//! Adapters live in [`crate::adapters`] and [`crate::db`]; tests supply their
//! own fakes.

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{Candle, Fill, PortfolioSnapshot, TradeRecord};
use crate::session::TradingSession;

/// Market data and order routing for one exchange account
#[async_trait]
pub trait ExchangePort: Send + Sync {
    /// Oldest-first candles, at most `limit` of them
    async fn get_candles(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<Candle>>;

    /// Market buy; returns the executed price
    async fn market_buy(&self, symbol: &str, quantity: f64) -> anyhow::Result<f64>;

    /// Market sell; returns the executed price
    async fn market_sell(&self, symbol: &str, quantity: f64) -> anyhow::Result<f64>;
}

#[async_trait]
pub trait PortfolioPort: Send + Sync {
    async fn get_snapshot(&self) -> anyhow::Result<PortfolioSnapshot>;

    async fn get_position(&self, symbol: &str) -> anyhow::Result<f64>;

    /// Best-effort, not idempotent
    async fn apply_fill(&self, fill: &Fill) -> anyhow::Result<()>;
}

/// Entitlement lookup. Implementations answer `false` whenever they cannot
/// prove the user may trade.
#[async_trait]
pub trait SubscriptionPort: Send + Sync {
    async fn can_trade(&self, user_id: &str) -> bool;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str) -> anyhow::Result<()>;
}

#[async_trait]
pub trait TradeJournal: Send + Sync {
    async fn log_trade(&self, record: &TradeRecord) -> anyhow::Result<()>;
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<TradingSession>>;

    async fn find_active_by_user(&self, user_id: &str) -> anyhow::Result<Option<TradingSession>>;

    /// All sessions persisted as RUNNING
    async fn find_running(&self) -> anyhow::Result<Vec<TradingSession>>;

    async fn save(&self, session: &TradingSession) -> anyhow::Result<()>;
}

/// Send a notification, logging instead of failing.
pub async fn notify_best_effort(notifier: &dyn Notifier, text: &str) {
    if let Err(e) = notifier.send(text).await {
        tracing::warn!("Failed to send notification: {:#}", e);
    }
}
