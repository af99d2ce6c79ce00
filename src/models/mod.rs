use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// OHLCV candlestick, ordered oldest-first when returned by an exchange
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Strategy decision for one tick
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::Buy => "BUY",
            Action::Sell => "SELL",
            Action::Hold => "HOLD",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "BUY",
            TradeSide::Sell => "SELL",
        }
    }
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Equity and open quantities as reported by the portfolio port
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PortfolioSnapshot {
    pub equity: f64,
    pub positions: HashMap<String, f64>,
}

impl PortfolioSnapshot {
    pub fn position(&self, symbol: &str) -> f64 {
        self.positions.get(symbol).copied().unwrap_or(0.0)
    }
}

/// Synthetic fill applied to the portfolio after an exchange execution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Fill {
    pub symbol: String,
    pub side: TradeSide,
    pub quantity: f64,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

/// Trade journal entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeRecord {
    pub user_id: String,
    pub job_key: String,
    pub symbol: String,
    pub side: TradeSide,
    pub quantity: f64,
    pub price: f64,
    pub stop_price: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Realized/unrealized PnL, always replaced as a whole
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PnlSnapshot {
    pub realized: f64,
    pub unrealized: f64,
    pub updated_at: DateTime<Utc>,
}

impl PnlSnapshot {
    pub fn zero(at: DateTime<Utc>) -> Self {
        Self {
            realized: 0.0,
            unrealized: 0.0,
            updated_at: at,
        }
    }

    pub fn total(&self) -> f64 {
        self.realized + self.unrealized
    }
}

/// Outcome of a single pipeline tick
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TickResult {
    pub symbol: String,
    pub action: Action,
    pub executed: bool,
    pub message: String,
}

impl TickResult {
    pub const ERROR_PREFIX: &'static str = "error:";

    pub fn hold(symbol: &str, message: impl Into<String>) -> Self {
        Self {
            symbol: symbol.to_string(),
            action: Action::Hold,
            executed: false,
            message: message.into(),
        }
    }

    pub fn executed(symbol: &str, action: Action, message: impl Into<String>) -> Self {
        Self {
            symbol: symbol.to_string(),
            action,
            executed: true,
            message: message.into(),
        }
    }

    /// HOLD result carrying the failure text
    pub fn failed(symbol: &str, err: &anyhow::Error) -> Self {
        Self::hold(symbol, format!("{} {:#}", Self::ERROR_PREFIX, err))
    }

    pub fn is_error(&self) -> bool {
        self.message.starts_with(Self::ERROR_PREFIX)
    }
}
