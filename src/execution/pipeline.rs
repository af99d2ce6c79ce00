use anyhow::Context;
use std::sync::Arc;

use crate::clock::Clock;
use crate::models::{Action, Fill, TickResult, TradeRecord, TradeSide};
use crate::ports::{notify_best_effort, ExchangePort, Notifier, PortfolioPort, TradeJournal};
use crate::risk::{GuardBlock, GuardSet, RiskManager};
use crate::strategy::Strategy;

/// Fewer candles than this and the tick does nothing
pub const MIN_CANDLES: usize = 5;

/// External collaborators a pipeline talks to
#[derive(Clone)]
pub struct PipelinePorts {
    /// Candle source (the job's market-data exchange)
    pub market_data: Arc<dyn ExchangePort>,
    /// Order routing (the job's trading exchange)
    pub exchange: Arc<dyn ExchangePort>,
    pub portfolio: Arc<dyn PortfolioPort>,
    pub notifier: Arc<dyn Notifier>,
    pub journal: Arc<dyn TradeJournal>,
}

/// One job's decide-and-execute loop body.
///
/// Everything before the exchange call may fail and the tick degrades to
/// "no trade". Everything after it is best-effort and never masks the trade.
pub struct TradingPipeline {
    user_id: String,
    job_key: String,
    ports: PipelinePorts,
    strategy: Arc<dyn Strategy>,
    risk: RiskManager,
    guards: Option<GuardSet>,
    clock: Arc<dyn Clock>,
}

impl TradingPipeline {
    pub fn new(
        user_id: impl Into<String>,
        job_key: impl Into<String>,
        ports: PipelinePorts,
        strategy: Arc<dyn Strategy>,
        risk: RiskManager,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            job_key: job_key.into(),
            ports,
            strategy,
            risk,
            guards: None,
            clock,
        }
    }

    pub fn with_guards(mut self, guards: GuardSet) -> Self {
        self.guards = Some(guards);
        self
    }

    pub fn job_key(&self) -> &str {
        &self.job_key
    }

    pub fn guards(&self) -> Option<&GuardSet> {
        self.guards.as_ref()
    }

    /// Run one tick. Never fails; errors come back as a HOLD result whose
    /// message starts with `error:`.
    pub async fn tick(&self, symbol: &str, timeframe: &str, lookback: usize) -> TickResult {
        match self.try_tick(symbol, timeframe, lookback).await {
            Ok(result) => {
                tracing::debug!(
                    key = %self.job_key,
                    action = %result.action,
                    executed = result.executed,
                    "{}",
                    result.message
                );
                result
            }
            Err(e) => {
                tracing::error!(key = %self.job_key, "Tick failed: {:#}", e);
                notify_best_effort(
                    self.ports.notifier.as_ref(),
                    &format!("[{}] tick error: {:#}", self.job_key, e),
                )
                .await;
                TickResult::failed(symbol, &e)
            }
        }
    }

    async fn try_tick(
        &self,
        symbol: &str,
        timeframe: &str,
        lookback: usize,
    ) -> anyhow::Result<TickResult> {
        let candles = self
            .ports
            .market_data
            .get_candles(symbol, timeframe, lookback)
            .await
            .context("failed to fetch candles")?;

        let last_close = match candles.last() {
            Some(last) if candles.len() >= MIN_CANDLES => last.close,
            _ => return Ok(TickResult::hold(symbol, "Not enough candles")),
        };

        let snapshot = self
            .ports
            .portfolio
            .get_snapshot()
            .await
            .context("failed to read portfolio")?;
        let equity = snapshot.equity;

        if let Some(guards) = &self.guards {
            guards.daily_loss.on_equity(equity);
        }

        let action = self
            .strategy
            .decide(&candles)
            .with_context(|| format!("strategy {} failed", self.strategy.name()))?;

        let position = self
            .ports
            .portfolio
            .get_position(symbol)
            .await
            .context("failed to read position")?;

        match action {
            Action::Buy if position <= 0.0 => self.enter(symbol, last_close, equity).await,
            Action::Sell if position > 0.0 => self.exit(symbol, position, last_close).await,
            Action::Buy => Ok(TickResult::hold(symbol, "Already in position")),
            Action::Sell => Ok(TickResult::hold(symbol, "No position to sell")),
            Action::Hold => Ok(TickResult::hold(symbol, "Hold signal")),
        }
    }

    fn blocked(&self, symbol: &str, block: GuardBlock) -> TickResult {
        tracing::info!(
            key = %self.job_key,
            ?block,
            code = ?block.stop_code(),
            "Entry blocked by guard"
        );
        TickResult::hold(symbol, block.message())
    }

    async fn enter(&self, symbol: &str, price: f64, equity: f64) -> anyhow::Result<TickResult> {
        if let Some(guards) = &self.guards {
            if let Err(block) = guards.check_limits() {
                return Ok(self.blocked(symbol, block));
            }
        }

        let stop_price = self.risk.calc_stop_price(price);
        let quantity = self.risk.calc_position_size(price, stop_price, equity);

        if quantity <= 0.0 {
            return Ok(TickResult::hold(symbol, "Position size is zero"));
        }

        // Cooldown is consumed here, immediately before the order
        if let Some(guards) = &self.guards {
            if !guards.cooldown.allow(&self.job_key) {
                return Ok(self.blocked(symbol, GuardBlock::Cooldown));
            }
        }

        let fill_price = self
            .ports
            .exchange
            .market_buy(symbol, quantity)
            .await
            .context("market buy failed")?;

        // The order is live on the exchange from here on
        if let Some(guards) = &self.guards {
            guards.max_trades.on_trade_executed();
        }
        self.apply_fill(symbol, TradeSide::Buy, quantity, fill_price).await;

        let message = format!(
            "BUY {quantity:.6} {symbol} @ {fill_price:.4} (stop {stop_price:.4}, target {:.4})",
            self.risk.calc_take_profit_price(fill_price)
        );
        tracing::info!(key = %self.job_key, "{}", message);
        notify_best_effort(
            self.ports.notifier.as_ref(),
            &format!("[{}] {}", self.job_key, message),
        )
        .await;
        self.journal(symbol, TradeSide::Buy, quantity, fill_price, Some(stop_price))
            .await;

        Ok(TickResult::executed(symbol, Action::Buy, message))
    }

    async fn exit(&self, symbol: &str, quantity: f64, price: f64) -> anyhow::Result<TickResult> {
        let fill_price = self
            .ports
            .exchange
            .market_sell(symbol, quantity)
            .await
            .context("market sell failed")?;

        if let Some(guards) = &self.guards {
            guards.max_trades.on_trade_executed();
        }
        self.apply_fill(symbol, TradeSide::Sell, quantity, fill_price).await;

        let message = format!(
            "SELL {quantity:.6} {symbol} @ {fill_price:.4} (last close {price:.4})"
        );
        tracing::info!(key = %self.job_key, "{}", message);
        notify_best_effort(
            self.ports.notifier.as_ref(),
            &format!("[{}] {}", self.job_key, message),
        )
        .await;
        self.journal(symbol, TradeSide::Sell, quantity, fill_price, None)
            .await;

        Ok(TickResult::executed(symbol, Action::Sell, message))
    }

    async fn apply_fill(&self, symbol: &str, side: TradeSide, quantity: f64, price: f64) {
        let fill = Fill {
            symbol: symbol.to_string(),
            side,
            quantity,
            price,
            timestamp: self.clock.now(),
        };

        if let Err(e) = self.ports.portfolio.apply_fill(&fill).await {
            tracing::warn!(
                key = %self.job_key,
                "Executed {} but failed to update portfolio: {:#}",
                side,
                e
            );
        }
    }

    async fn journal(
        &self,
        symbol: &str,
        side: TradeSide,
        quantity: f64,
        price: f64,
        stop_price: Option<f64>,
    ) {
        let record = TradeRecord {
            user_id: self.user_id.clone(),
            job_key: self.job_key.clone(),
            symbol: symbol.to_string(),
            side,
            quantity,
            price,
            stop_price,
            timestamp: self.clock.now(),
        };

        if let Err(e) = self.ports.journal.log_trade(&record).await {
            tracing::warn!(key = %self.job_key, "Failed to journal {} trade: {:#}", side, e);
        }
    }
}
