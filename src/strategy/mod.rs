// Trading strategy module
pub mod ema_cross;

pub use ema_cross::EmaCrossStrategy;

use crate::models::{Action, Candle};

/// Base trait for all trading strategies
pub trait Strategy: Send + Sync {
    /// Decide what to do given the full candle history (oldest first)
    fn decide(&self, candles: &[Candle]) -> anyhow::Result<Action>;

    /// Get strategy name
    fn name(&self) -> &str;
}
