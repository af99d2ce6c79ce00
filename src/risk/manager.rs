use serde::{Deserialize, Serialize};

/// Stateless stop/target/size calculator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskManager {
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    /// Quote-currency amount committed per entry
    pub position_budget: f64,
}

impl Default for RiskManager {
    fn default() -> Self {
        Self {
            stop_loss_pct: 0.02,
            take_profit_pct: 0.04,
            position_budget: 100.0,
        }
    }
}

impl RiskManager {
    pub fn new(stop_loss_pct: f64, take_profit_pct: f64, position_budget: f64) -> Self {
        Self {
            stop_loss_pct,
            take_profit_pct,
            position_budget,
        }
    }

    pub fn calc_stop_price(&self, entry: f64) -> f64 {
        entry * (1.0 - self.stop_loss_pct)
    }

    pub fn calc_take_profit_price(&self, entry: f64) -> f64 {
        entry * (1.0 + self.take_profit_pct)
    }

    /// Quantity to buy at `entry`.
    ///
    /// NOTE: `_stop_price` does not influence the size; sizing is budget-based,
    /// not risk-per-trade.
    pub fn calc_position_size(&self, entry: f64, _stop_price: f64, equity: f64) -> f64 {
        if entry <= 0.0 || equity <= 0.0 {
            return 0.0;
        }

        self.position_budget.min(equity) / entry
    }
}
