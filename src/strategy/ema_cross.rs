use super::Strategy;
use crate::models::{Action, Candle};

/// Exponential moving average series; the first value is seeded with the SMA
/// of the first `period` prices. Returns an empty series when there's not
/// enough data.
pub fn ema_series(prices: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || prices.len() < period {
        return Vec::new();
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let seed = prices[..period].iter().sum::<f64>() / period as f64;

    let mut series = Vec::with_capacity(prices.len() - period + 1);
    series.push(seed);
    for price in &prices[period..] {
        let prev = series[series.len() - 1];
        series.push((price - prev) * multiplier + prev);
    }
    series
}

/// Fast/slow EMA crossover.
///
/// BUY when the fast EMA crosses above the slow one on the latest candle,
/// SELL on the opposite cross, HOLD otherwise (including warm-up).
#[derive(Debug, Clone)]
pub struct EmaCrossStrategy {
    fast_period: usize,
    slow_period: usize,
}

impl EmaCrossStrategy {
    pub const ID: &'static str = "ema_cross";

    pub fn new(fast_period: usize, slow_period: usize) -> anyhow::Result<Self> {
        if fast_period == 0 || fast_period >= slow_period {
            anyhow::bail!(
                "fast period ({}) must be non-zero and below slow period ({})",
                fast_period,
                slow_period
            );
        }

        Ok(Self {
            fast_period,
            slow_period,
        })
    }

    pub fn min_candles_required(&self) -> usize {
        // Two slow EMA points to detect a cross
        self.slow_period + 1
    }
}

impl Default for EmaCrossStrategy {
    fn default() -> Self {
        Self {
            fast_period: 9,
            slow_period: 21,
        }
    }
}

impl Strategy for EmaCrossStrategy {
    fn decide(&self, candles: &[Candle]) -> anyhow::Result<Action> {
        if candles.len() < self.min_candles_required() {
            return Ok(Action::Hold);
        }

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let fast = ema_series(&closes, self.fast_period);
        let slow = ema_series(&closes, self.slow_period);

        // Align the tails: both series end at the latest candle
        let (fast_now, fast_prev) = (fast[fast.len() - 1], fast[fast.len() - 2]);
        let (slow_now, slow_prev) = (slow[slow.len() - 1], slow[slow.len() - 2]);

        let action = if fast_prev <= slow_prev && fast_now > slow_now {
            Action::Buy
        } else if fast_prev >= slow_prev && fast_now < slow_now {
            Action::Sell
        } else {
            Action::Hold
        };

        tracing::debug!(fast_now, slow_now, %action, "EMA cross decision");
        Ok(action)
    }

    fn name(&self) -> &str {
        Self::ID
    }
}
