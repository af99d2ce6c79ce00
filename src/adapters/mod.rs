//! Paper-mode implementations of the ports.
//!
//! Nothing here talks to a real venue: candles come from a seeded random
//! walk, fills go to an in-memory book, notifications go to the log.

pub mod factory;
pub mod memory;
pub mod notifier;
pub mod paper;
pub mod subscription;

pub use factory::PaperPipelineFactory;
pub use memory::{InMemorySessionRepository, InMemoryTradeJournal};
pub use notifier::LogNotifier;
pub use paper::{parse_timeframe, PaperExchange, PaperPortfolio};
pub use subscription::StaticSubscriptions;
