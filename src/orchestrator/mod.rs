// User-facing start/stop of live trading
pub mod controller;
pub mod permission;

pub use controller::CoreTradingOrchestrator;
pub use permission::{TradePermissionGuard, UserIdentity};
