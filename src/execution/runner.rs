use async_trait::async_trait;
use std::sync::Arc;

use super::{ExecutionJob, ScheduledTask, TradingPipeline};
use crate::models::TickResult;
use crate::ports::{notify_best_effort, Notifier};

/// Callbacks fired after every tick
pub trait TickObserver: Send + Sync {
    fn on_tick_success(&self, result: &TickResult);

    fn on_tick_error(&self, error: &str);
}

/// Runs one pipeline tick per firing and keeps failures away from the
/// scheduler.
pub struct ExecutionRunner {
    job: ExecutionJob,
    key: String,
    pipeline: Arc<TradingPipeline>,
    observer: Arc<dyn TickObserver>,
    notifier: Arc<dyn Notifier>,
}

impl ExecutionRunner {
    pub fn new(
        job: ExecutionJob,
        pipeline: Arc<TradingPipeline>,
        observer: Arc<dyn TickObserver>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let key = job.key().to_string();
        Self {
            job,
            key,
            pipeline,
            observer,
            notifier,
        }
    }

    pub async fn run_once(&self) {
        let pipeline = self.pipeline.clone();
        let job = self.job.clone();

        // Separate task so a panic inside the tick surfaces as a JoinError
        let outcome = tokio::spawn(async move {
            pipeline
                .tick(&job.symbol, &job.timeframe, job.lookback)
                .await
        })
        .await;

        match outcome {
            Ok(result) => self.observer.on_tick_success(&result),
            Err(join_err) => {
                let error = if join_err.is_panic() {
                    format!("tick panicked: {}", panic_message(join_err.into_panic()))
                } else {
                    "tick cancelled".to_string()
                };

                tracing::error!(key = %self.key, "{}", error);
                self.observer.on_tick_error(&error);
                notify_best_effort(
                    self.notifier.as_ref(),
                    &format!("[{}] {}", self.key, error),
                )
                .await;
            }
        }
    }
}

#[async_trait]
impl ScheduledTask for ExecutionRunner {
    async fn run(&self) {
        self.run_once().await;
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
