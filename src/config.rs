// Configuration management for the trading controller

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::time::Duration;

use crate::error::TradingError;
use crate::risk::guards::MAX_COOLDOWN_SECONDS;
use crate::risk::{GuardConfig, RiskManager};
use crate::Result;

/// Fixed job parameters applied to every live session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobSettings {
    pub strategy_id: String,
    pub exchange: String,
    pub market_data_exchange: String,
    pub symbol: String,
    pub timeframe: String,
    pub lookback: usize,
    pub period_ms: u64,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            strategy_id: "ema_cross".to_string(),
            exchange: "paper".to_string(),
            market_data_exchange: "paper".to_string(),
            symbol: "BTCUSDT".to_string(),
            timeframe: "1m".to_string(),
            lookback: 100,
            period_ms: 60_000,
        }
    }
}

impl JobSettings {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StrategySettings {
    pub fast_period: usize,
    pub slow_period: usize,
}

impl Default for StrategySettings {
    fn default() -> Self {
        Self {
            fast_period: 9,
            slow_period: 21,
        }
    }
}

/// Simulated exchange and portfolio
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaperSettings {
    pub initial_cash: f64,
    pub base_price: f64,
    /// Per-candle volatility of the random walk
    pub volatility: f64,
    pub seed: u64,
}

impl Default for PaperSettings {
    fn default() -> Self {
        Self {
            initial_cash: 10_000.0,
            base_price: 100.0,
            volatility: 0.01,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SubscriptionSettings {
    /// Users allowed to trade; everyone else is denied
    pub entitled_users: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    #[serde(default)]
    pub job: JobSettings,
    #[serde(default)]
    pub strategy: StrategySettings,
    #[serde(default)]
    pub risk: RiskManager,
    #[serde(default)]
    pub guards: GuardConfig,
    #[serde(default)]
    pub paper: PaperSettings,
    #[serde(default)]
    pub subscription: SubscriptionSettings,
    #[serde(default)]
    pub database_url: Option<String>,
}

impl Settings {
    pub const ENV_PREFIX: &'static str = "TRADECTL";

    /// Defaults, then the optional TOML file, then `TRADECTL__*` env vars.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Settings::default())?);

        builder = match path {
            Some(path) => builder.add_source(File::from(path).required(true)),
            None => builder.add_source(File::with_name("tradectl").required(false)),
        };

        let settings: Settings = builder
            .add_source(
                Environment::with_prefix(Self::ENV_PREFIX)
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("subscription.entitled_users")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        fn fraction(name: &str, value: f64) -> Result<()> {
            if value > 0.0 && value < 1.0 {
                Ok(())
            } else {
                Err(TradingError::Config(format!(
                    "{name} must be in (0, 1), got {value}"
                )))
            }
        }

        fraction("risk.stop_loss_pct", self.risk.stop_loss_pct)?;
        fraction("risk.take_profit_pct", self.risk.take_profit_pct)?;
        fraction("guards.daily_loss_pct", self.guards.daily_loss_pct)?;

        if self.guards.cooldown_seconds > MAX_COOLDOWN_SECONDS {
            return Err(TradingError::Config(format!(
                "guards.cooldown_seconds must be at most {MAX_COOLDOWN_SECONDS}, got {}",
                self.guards.cooldown_seconds
            )));
        }
        if self.risk.position_budget <= 0.0 {
            return Err(TradingError::Config(
                "risk.position_budget must be positive".to_string(),
            ));
        }
        if self.job.lookback == 0 {
            return Err(TradingError::Config("job.lookback must be positive".to_string()));
        }
        if self.job.period_ms == 0 {
            return Err(TradingError::Config("job.period_ms must be positive".to_string()));
        }
        if self.strategy.fast_period == 0 || self.strategy.fast_period >= self.strategy.slow_period
        {
            return Err(TradingError::Config(
                "strategy.fast_period must be non-zero and below strategy.slow_period".to_string(),
            ));
        }
        if self.paper.initial_cash < 0.0 || self.paper.base_price <= 0.0 {
            return Err(TradingError::Config(
                "paper.initial_cash must be >= 0 and paper.base_price > 0".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.paper.volatility) {
            return Err(TradingError::Config(
                "paper.volatility must be in [0, 1)".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.job.period(), Duration::from_secs(60));
        assert!(settings.subscription.entitled_users.is_empty());
    }

    #[test]
    fn test_validate_rejects_bad_fractions() {
        let mut settings = Settings::default();
        settings.guards.daily_loss_pct = 1.5;
        assert!(matches!(settings.validate(), Err(TradingError::Config(_))));

        let mut settings = Settings::default();
        settings.risk.position_budget = 0.0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.strategy.fast_period = 30;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unbounded_cooldown() {
        let mut settings = Settings::default();
        settings.guards.cooldown_seconds = 10_000_000_000_000_000;
        assert!(matches!(settings.validate(), Err(TradingError::Config(_))));

        settings.guards.cooldown_seconds = u64::MAX;
        assert!(settings.validate().is_err());

        settings.guards.cooldown_seconds = MAX_COOLDOWN_SECONDS;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let path = std::env::temp_dir().join(format!("tradectl-{}.toml", uuid::Uuid::new_v4()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[job]
symbol = "ETHUSDT"
period_ms = 5000

[subscription]
entitled_users = ["alice", "bob"]
"#
        )
        .unwrap();

        let settings = Settings::load(Some(path.as_path())).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(settings.job.symbol, "ETHUSDT");
        assert_eq!(settings.job.period_ms, 5000);
        // Untouched keys keep their defaults
        assert_eq!(settings.job.timeframe, "1m");
        assert_eq!(settings.subscription.entitled_users, vec!["alice", "bob"]);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let result = Settings::load(Some(Path::new("/nonexistent/tradectl.toml")));
        assert!(matches!(result, Err(TradingError::Config(_))));
    }
}
