// Core modules
pub mod adapters;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod execution;
pub mod models;
pub mod orchestrator;
pub mod ports;
pub mod risk;
pub mod service;
pub mod session;
pub mod strategy;

// Re-export commonly used types
pub use config::Settings;
pub use error::TradingError;
pub use models::*;
pub use orchestrator::CoreTradingOrchestrator;
pub use service::SessionService;
pub use strategy::Strategy;

// Error handling
pub type Result<T> = std::result::Result<T, TradingError>;
