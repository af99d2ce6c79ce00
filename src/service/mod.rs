// Running-job registry
pub mod session_service;

pub use session_service::{PipelineFactory, SessionService, MIN_TICK_PERIOD};
