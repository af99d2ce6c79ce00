use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TradingError;
use crate::Result;

/// Identity of a scheduled job: `user:strategy:exchange:symbol:timeframe`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobKey {
    pub user_id: String,
    pub strategy_id: String,
    pub exchange: String,
    pub symbol: String,
    pub timeframe: String,
}

impl JobKey {
    const SEPARATOR: char = ':';
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}",
            self.user_id, self.strategy_id, self.exchange, self.symbol, self.timeframe
        )
    }
}

impl FromStr for JobKey {
    type Err = TradingError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(Self::SEPARATOR).collect();
        if parts.len() != 5 || parts.iter().any(|p| p.trim().is_empty()) {
            return Err(TradingError::MalformedJobKey(s.to_string()));
        }

        Ok(Self {
            user_id: parts[0].to_string(),
            strategy_id: parts[1].to_string(),
            exchange: parts[2].to_string(),
            symbol: parts[3].to_string(),
            timeframe: parts[4].to_string(),
        })
    }
}

/// Everything needed to run one trading loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionJob {
    pub user_id: String,
    pub strategy_id: String,
    pub exchange: String,
    pub market_data_exchange: String,
    pub symbol: String,
    pub timeframe: String,
    pub lookback: usize,
}

impl ExecutionJob {
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("user_id", &self.user_id),
            ("strategy_id", &self.strategy_id),
            ("exchange", &self.exchange),
            ("market_data_exchange", &self.market_data_exchange),
            ("symbol", &self.symbol),
            ("timeframe", &self.timeframe),
        ];

        for (name, value) in fields {
            if value.trim().is_empty() {
                return Err(TradingError::Validation(format!("{name} must not be blank")));
            }
            if value.contains(JobKey::SEPARATOR) {
                return Err(TradingError::Validation(format!(
                    "{name} must not contain '{}'",
                    JobKey::SEPARATOR
                )));
            }
        }

        if self.lookback == 0 {
            return Err(TradingError::Validation(
                "lookback must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    pub fn key(&self) -> JobKey {
        JobKey {
            user_id: self.user_id.clone(),
            strategy_id: self.strategy_id.clone(),
            exchange: self.exchange.clone(),
            symbol: self.symbol.clone(),
            timeframe: self.timeframe.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> ExecutionJob {
        ExecutionJob {
            user_id: "alice".to_string(),
            strategy_id: "ema_cross".to_string(),
            exchange: "paper".to_string(),
            market_data_exchange: "paper".to_string(),
            symbol: "BTCUSDT".to_string(),
            timeframe: "1m".to_string(),
            lookback: 100,
        }
    }

    #[test]
    fn test_key_format() {
        assert_eq!(job().key().to_string(), "alice:ema_cross:paper:BTCUSDT:1m");
    }

    #[test]
    fn test_key_ignores_market_data_exchange_and_lookback() {
        let mut other = job();
        other.market_data_exchange = "binance".to_string();
        other.lookback = 5;

        assert_eq!(job().key(), other.key());
    }

    #[test]
    fn test_key_parses_back() {
        let key: JobKey = "alice:ema_cross:paper:BTCUSDT:1m".parse().unwrap();
        assert_eq!(key, job().key());
    }

    #[test]
    fn test_malformed_keys() {
        for bad in ["", "a:b:c:d", "a:b:c:d:e:f", "a::c:d:e", "a:b:c:d: "] {
            assert!(
                matches!(bad.parse::<JobKey>(), Err(TradingError::MalformedJobKey(_))),
                "{bad:?} should be malformed"
            );
        }
    }

    #[test]
    fn test_validate_blank_fields() {
        assert!(job().validate().is_ok());

        let mut blank = job();
        blank.symbol = "  ".to_string();
        assert!(matches!(blank.validate(), Err(TradingError::Validation(_))));

        let mut zero = job();
        zero.lookback = 0;
        assert!(zero.validate().is_err());

        let mut colon = job();
        colon.user_id = "a:b".to_string();
        assert!(colon.validate().is_err());
    }
}
