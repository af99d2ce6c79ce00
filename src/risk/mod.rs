// Risk management module
pub mod guards;
pub mod manager;

pub use guards::{
    DailyLossGuard, GuardBlock, GuardConfig, GuardSet, MaxTradesGuard, OrderCooldownGuard,
};
pub use manager::RiskManager;
