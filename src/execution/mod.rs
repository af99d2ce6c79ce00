// Job execution module: one tick, its runner, and the scheduler driving it
pub mod job;
pub mod pipeline;
pub mod runner;
pub mod scheduler;

pub use job::{ExecutionJob, JobKey};
pub use pipeline::{PipelinePorts, TradingPipeline, MIN_CANDLES};
pub use runner::{ExecutionRunner, TickObserver};
pub use scheduler::{JobScheduler, RunHandle, RunState, ScheduledTask};
