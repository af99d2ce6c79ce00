use std::collections::HashMap;
use std::sync::Arc;

use crate::clock::Clock;
use crate::config::StrategySettings;
use crate::error::TradingError;
use crate::execution::{ExecutionJob, PipelinePorts, TradingPipeline};
use crate::ports::{ExchangePort, Notifier, PortfolioPort, TradeJournal};
use crate::risk::{GuardConfig, GuardSet, RiskManager};
use crate::service::PipelineFactory;
use crate::strategy::{EmaCrossStrategy, Strategy};
use crate::Result;

/// Wires a pipeline per job from named exchanges and shared ports.
///
/// Each job gets its own guard counters; the portfolio, journal and
/// notifier are shared.
pub struct PaperPipelineFactory {
    exchanges: HashMap<String, Arc<dyn ExchangePort>>,
    portfolio: Arc<dyn PortfolioPort>,
    notifier: Arc<dyn Notifier>,
    journal: Arc<dyn TradeJournal>,
    risk: RiskManager,
    guards: GuardConfig,
    strategy: StrategySettings,
    clock: Arc<dyn Clock>,
}

impl PaperPipelineFactory {
    pub fn new(
        portfolio: Arc<dyn PortfolioPort>,
        notifier: Arc<dyn Notifier>,
        journal: Arc<dyn TradeJournal>,
        risk: RiskManager,
        guards: GuardConfig,
        strategy: StrategySettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            exchanges: HashMap::new(),
            portfolio,
            notifier,
            journal,
            risk,
            guards,
            strategy,
            clock,
        }
    }

    pub fn with_exchange(mut self, name: impl Into<String>, exchange: Arc<dyn ExchangePort>) -> Self {
        self.exchanges.insert(name.into(), exchange);
        self
    }

    fn exchange(&self, name: &str) -> Result<Arc<dyn ExchangePort>> {
        self.exchanges
            .get(name)
            .cloned()
            .ok_or_else(|| TradingError::Validation(format!("unknown exchange '{name}'")))
    }

    fn strategy(&self, strategy_id: &str) -> Result<Arc<dyn Strategy>> {
        match strategy_id {
            EmaCrossStrategy::ID => {
                let strategy =
                    EmaCrossStrategy::new(self.strategy.fast_period, self.strategy.slow_period)
                        .map_err(|e| TradingError::Validation(e.to_string()))?;
                Ok(Arc::new(strategy))
            }
            other => Err(TradingError::Validation(format!(
                "unknown strategy '{other}'"
            ))),
        }
    }
}

impl PipelineFactory for PaperPipelineFactory {
    fn create(&self, job: &ExecutionJob) -> Result<Arc<TradingPipeline>> {
        let ports = PipelinePorts {
            market_data: self.exchange(&job.market_data_exchange)?,
            exchange: self.exchange(&job.exchange)?,
            portfolio: self.portfolio.clone(),
            notifier: self.notifier.clone(),
            journal: self.journal.clone(),
        };
        let strategy = self.strategy(&job.strategy_id)?;
        let guards = GuardSet::new(&self.guards, self.clock.clone())?;

        tracing::debug!(key = %job.key(), strategy = strategy.name(), "Pipeline created");

        let pipeline = TradingPipeline::new(
            job.user_id.clone(),
            job.key().to_string(),
            ports,
            strategy,
            self.risk.clone(),
            self.clock.clone(),
        )
        .with_guards(guards);

        Ok(Arc::new(pipeline))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemoryTradeJournal, LogNotifier, PaperExchange, PaperPortfolio};
    use crate::clock::SystemClock;
    use crate::config::PaperSettings;

    fn factory() -> PaperPipelineFactory {
        factory_with_guards(GuardConfig::default())
    }

    fn factory_with_guards(guards: GuardConfig) -> PaperPipelineFactory {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let exchange = Arc::new(PaperExchange::new(&PaperSettings::default(), clock.clone()));
        PaperPipelineFactory::new(
            Arc::new(PaperPortfolio::new(1_000.0)),
            Arc::new(LogNotifier),
            Arc::new(InMemoryTradeJournal::new()),
            RiskManager::default(),
            guards,
            StrategySettings::default(),
            clock,
        )
        .with_exchange("paper", exchange)
    }

    fn job() -> ExecutionJob {
        ExecutionJob {
            user_id: "alice".to_string(),
            strategy_id: "ema_cross".to_string(),
            exchange: "paper".to_string(),
            market_data_exchange: "paper".to_string(),
            symbol: "BTCUSDT".to_string(),
            timeframe: "1m".to_string(),
            lookback: 50,
        }
    }

    #[test]
    fn test_creates_guarded_pipeline() {
        let pipeline = factory().create(&job()).unwrap();
        assert_eq!(pipeline.job_key(), "alice:ema_cross:paper:BTCUSDT:1m");
        assert!(pipeline.guards().is_some());
    }

    #[test]
    fn test_each_job_gets_fresh_guards() {
        let factory = factory();
        let first = factory.create(&job()).unwrap();
        let second = factory.create(&job()).unwrap();

        first.guards().unwrap().max_trades.on_trade_executed();
        assert_eq!(first.guards().unwrap().max_trades.count(), 1);
        assert_eq!(second.guards().unwrap().max_trades.count(), 0);
    }

    #[test]
    fn test_unknown_names_are_rejected() {
        let factory = factory();

        let unknown_strategy = ExecutionJob {
            strategy_id: "martingale".to_string(),
            ..job()
        };
        assert!(matches!(
            factory.create(&unknown_strategy),
            Err(TradingError::Validation(_))
        ));

        let unknown_exchange = ExecutionJob {
            market_data_exchange: "binance".to_string(),
            ..job()
        };
        assert!(matches!(
            factory.create(&unknown_exchange),
            Err(TradingError::Validation(_))
        ));
    }

    #[test]
    fn test_out_of_range_cooldown_is_an_error() {
        let factory = factory_with_guards(GuardConfig {
            cooldown_seconds: 10_000_000_000_000_000,
            ..GuardConfig::default()
        });

        assert!(matches!(
            factory.create(&job()),
            Err(TradingError::Validation(_))
        ));
    }
}
