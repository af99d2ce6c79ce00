// Session lifecycle module
pub mod stop_reason;
pub mod trading_session;

pub use stop_reason::{StopReason, StopReasonCode};
pub use trading_session::{SessionStatus, TradingSession};
