use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::Duration;

use crate::clock::Clock;
use crate::execution::{
    ExecutionJob, ExecutionRunner, JobKey, JobScheduler, RunHandle, TickObserver, TradingPipeline,
};
use crate::models::TickResult;
use crate::ports::{notify_best_effort, Notifier};
use crate::Result;

/// Lower bound on the tick period
pub const MIN_TICK_PERIOD: Duration = Duration::from_millis(250);

/// Builds the pipeline a job will run
pub trait PipelineFactory: Send + Sync {
    fn create(&self, job: &ExecutionJob) -> Result<Arc<TradingPipeline>>;
}

impl<F> PipelineFactory for F
where
    F: Fn(&ExecutionJob) -> Result<Arc<TradingPipeline>> + Send + Sync,
{
    fn create(&self, job: &ExecutionJob) -> Result<Arc<TradingPipeline>> {
        self(job)
    }
}

#[derive(Default)]
struct Registry {
    handles: HashMap<JobKey, RunHandle>,
    last_tick: HashMap<JobKey, DateTime<Utc>>,
    last_error: HashMap<JobKey, String>,
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Records tick outcomes for health reporting
struct RegistryObserver {
    key: JobKey,
    registry: Arc<Mutex<Registry>>,
    clock: Arc<dyn Clock>,
}

impl RegistryObserver {
    fn record(&self, error: Option<String>) {
        let mut registry = lock(&self.registry);
        // A tick that outlived its job must not resurrect entries
        if !registry.handles.contains_key(&self.key) {
            return;
        }

        registry.last_tick.insert(self.key.clone(), self.clock.now());
        match error {
            Some(error) => {
                registry.last_error.insert(self.key.clone(), error);
            }
            None => {
                registry.last_error.remove(&self.key);
            }
        }
    }
}

impl TickObserver for RegistryObserver {
    fn on_tick_success(&self, result: &TickResult) {
        self.record(result.is_error().then(|| result.message.clone()));
    }

    fn on_tick_error(&self, error: &str) {
        self.record(Some(error.to_string()));
    }
}

/// Single source of truth for which jobs are running in this process
pub struct SessionService {
    scheduler: JobScheduler,
    factory: Arc<dyn PipelineFactory>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    registry: Arc<Mutex<Registry>>,
}

impl SessionService {
    pub fn new(
        scheduler: JobScheduler,
        factory: Arc<dyn PipelineFactory>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            scheduler,
            factory,
            notifier,
            clock,
            registry: Arc::new(Mutex::new(Registry::default())),
        }
    }

    /// Start ticking `job` every `period` (at least [`MIN_TICK_PERIOD`]).
    ///
    /// Returns `Ok(false)` when the job is already running.
    pub fn start(&self, job: &ExecutionJob, period: Duration) -> Result<bool> {
        job.validate()?;
        let key = job.key();

        let mut registry = lock(&self.registry);
        if registry.handles.get(&key).is_some_and(RunHandle::is_running) {
            tracing::debug!(%key, "Job already running, start ignored");
            return Ok(false);
        }

        let pipeline = self.factory.create(job)?;
        let observer = Arc::new(RegistryObserver {
            key: key.clone(),
            registry: self.registry.clone(),
            clock: self.clock.clone(),
        });
        let runner = ExecutionRunner::new(job.clone(), pipeline, observer, self.notifier.clone());

        let period = period.max(MIN_TICK_PERIOD);
        let handle = self.scheduler.schedule_at_fixed_rate(
            &key.to_string(),
            Arc::new(runner),
            Duration::ZERO,
            period,
        )?;

        registry.handles.insert(key.clone(), handle);
        registry.last_error.remove(&key);
        tracing::info!(%key, ?period, "Trading job started");
        Ok(true)
    }

    /// Returns false (and notifies) when nothing was running for the job
    pub fn stop(&self, job: &ExecutionJob) -> bool {
        let key = job.key();

        let handle = {
            let mut registry = lock(&self.registry);
            registry.last_tick.remove(&key);
            registry.last_error.remove(&key);
            registry.handles.remove(&key)
        };

        match handle {
            Some(handle) => {
                handle.stop();
                self.scheduler.cancel(&key.to_string());
                tracing::info!(%key, "Trading job stopped");
                true
            }
            None => {
                tracing::info!(%key, "Stop requested but no job was running");
                let notifier = self.notifier.clone();
                let text = format!("[{key}] stop requested, but no job was running");
                self.scheduler.runtime().spawn(async move {
                    notify_best_effort(notifier.as_ref(), &text).await;
                });
                false
            }
        }
    }

    pub fn pause(&self, job: &ExecutionJob) -> bool {
        let registry = lock(&self.registry);
        registry
            .handles
            .get(&job.key())
            .is_some_and(RunHandle::pause)
    }

    pub fn resume(&self, job: &ExecutionJob) -> bool {
        let registry = lock(&self.registry);
        registry
            .handles
            .get(&job.key())
            .is_some_and(RunHandle::resume)
    }

    pub fn is_running(&self, key: &JobKey) -> bool {
        lock(&self.registry)
            .handles
            .get(key)
            .is_some_and(RunHandle::is_running)
    }

    pub fn active_keys(&self) -> Vec<JobKey> {
        let registry = lock(&self.registry);
        let mut keys: Vec<JobKey> = registry
            .handles
            .iter()
            .filter(|(_, handle)| handle.is_running())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn status_text(&self) -> String {
        let mut states: Vec<(JobKey, String)> = {
            let registry = lock(&self.registry);
            registry
                .handles
                .iter()
                .map(|(key, handle)| (key.clone(), handle.state().to_string()))
                .collect()
        };

        if states.is_empty() {
            return "No trading jobs".to_string();
        }

        states.sort();
        let mut out = format!("{} trading job(s)", states.len());
        for (key, state) in states {
            let _ = write!(out, "\n  {key} [{state}]");
        }
        out
    }

    pub fn health_text(&self) -> String {
        let now = self.clock.now();
        let registry = lock(&self.registry);

        if registry.handles.is_empty() {
            return "No trading jobs".to_string();
        }

        let mut keys: Vec<&JobKey> = registry.handles.keys().collect();
        keys.sort();

        let mut out = String::from("Job health");
        for key in keys {
            let state = registry.handles[key].state();
            let last_tick = match registry.last_tick.get(key) {
                Some(at) => format!("{}s ago", (now - *at).num_seconds().max(0)),
                None => "never".to_string(),
            };
            let last_error = registry
                .last_error
                .get(key)
                .map(String::as_str)
                .unwrap_or("none");

            let _ = write!(
                out,
                "\n  {key} [{state}] last_tick={last_tick} last_error={last_error}"
            );
        }
        out
    }

    /// Stop every job (process shutdown)
    pub fn shutdown(&self) {
        let handles: Vec<RunHandle> = {
            let mut registry = lock(&self.registry);
            registry.last_tick.clear();
            registry.last_error.clear();
            registry.handles.drain().map(|(_, h)| h).collect()
        };

        tracing::info!(jobs = handles.len(), "Stopping all trading jobs");
        for handle in handles {
            handle.stop();
        }
        self.scheduler.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::error::TradingError;
    use crate::execution::PipelinePorts;
    use crate::models::{Action, Candle, Fill, PortfolioSnapshot, TradeRecord};
    use crate::ports::{ExchangePort, PortfolioPort, TradeJournal};
    use crate::risk::RiskManager;
    use crate::strategy::Strategy;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingExchange {
        fetches: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl ExchangePort for CountingExchange {
        async fn get_candles(&self, _: &str, _: &str, _: usize) -> anyhow::Result<Vec<Candle>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("feed down");
            }
            Ok(Vec::new())
        }

        async fn market_buy(&self, _: &str, _: f64) -> anyhow::Result<f64> {
            Ok(1.0)
        }

        async fn market_sell(&self, _: &str, _: f64) -> anyhow::Result<f64> {
            Ok(1.0)
        }
    }

    struct NullPorts;

    #[async_trait]
    impl PortfolioPort for NullPorts {
        async fn get_snapshot(&self) -> anyhow::Result<PortfolioSnapshot> {
            Ok(PortfolioSnapshot::default())
        }

        async fn get_position(&self, _: &str) -> anyhow::Result<f64> {
            Ok(0.0)
        }

        async fn apply_fill(&self, _: &Fill) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl Notifier for NullPorts {
        async fn send(&self, _: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl TradeJournal for NullPorts {
        async fn log_trade(&self, _: &TradeRecord) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct Hold;

    impl Strategy for Hold {
        fn decide(&self, _: &[Candle]) -> anyhow::Result<Action> {
            Ok(Action::Hold)
        }

        fn name(&self) -> &str {
            "hold"
        }
    }

    fn job(symbol: &str) -> ExecutionJob {
        ExecutionJob {
            user_id: "alice".to_string(),
            strategy_id: "hold".to_string(),
            exchange: "paper".to_string(),
            market_data_exchange: "paper".to_string(),
            symbol: symbol.to_string(),
            timeframe: "1m".to_string(),
            lookback: 10,
        }
    }

    fn service(exchange: Arc<CountingExchange>, built: Arc<AtomicUsize>) -> SessionService {
        let factory = move |job: &ExecutionJob| -> Result<Arc<TradingPipeline>> {
            built.fetch_add(1, Ordering::SeqCst);
            let ports = PipelinePorts {
                market_data: exchange.clone(),
                exchange: exchange.clone(),
                portfolio: Arc::new(NullPorts),
                notifier: Arc::new(NullPorts),
                journal: Arc::new(NullPorts),
            };
            Ok(Arc::new(TradingPipeline::new(
                job.user_id.clone(),
                job.key().to_string(),
                ports,
                Arc::new(Hold),
                RiskManager::default(),
                Arc::new(SystemClock),
            )))
        };

        SessionService::new(
            JobScheduler::current().unwrap(),
            Arc::new(factory),
            Arc::new(NullPorts),
            Arc::new(SystemClock),
        )
    }

    #[tokio::test]
    async fn test_second_start_is_noop() {
        let built = Arc::new(AtomicUsize::new(0));
        let svc = service(Arc::new(CountingExchange::default()), built.clone());

        assert!(svc.start(&job("BTCUSDT"), Duration::from_secs(1)).unwrap());
        assert!(!svc.start(&job("BTCUSDT"), Duration::from_secs(1)).unwrap());

        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert_eq!(svc.active_keys(), vec![job("BTCUSDT").key()]);
        svc.shutdown();
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_job() {
        let svc = service(
            Arc::new(CountingExchange::default()),
            Arc::new(AtomicUsize::new(0)),
        );

        let result = svc.start(&job(""), Duration::from_secs(1));
        assert!(matches!(result, Err(TradingError::Validation(_))));
        assert!(svc.active_keys().is_empty());
    }

    #[tokio::test]
    async fn test_period_is_clamped() {
        let exchange = Arc::new(CountingExchange::default());
        let svc = service(exchange.clone(), Arc::new(AtomicUsize::new(0)));

        svc.start(&job("BTCUSDT"), Duration::from_millis(1)).unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;
        svc.shutdown();

        // Immediate first tick plus one at 250ms; a 1ms period would give hundreds
        let fetches = exchange.fetches.load(Ordering::SeqCst);
        assert!((1..=3).contains(&fetches), "got {fetches} ticks");
    }

    #[tokio::test]
    async fn test_stop_then_start_again() {
        let built = Arc::new(AtomicUsize::new(0));
        let svc = service(Arc::new(CountingExchange::default()), built.clone());
        let j = job("ETHUSDT");

        svc.start(&j, Duration::from_secs(1)).unwrap();
        assert!(svc.stop(&j));
        assert!(!svc.is_running(&j.key()));
        assert!(!svc.stop(&j));

        assert!(svc.start(&j, Duration::from_secs(1)).unwrap());
        assert_eq!(built.load(Ordering::SeqCst), 2);
        svc.shutdown();
    }

    #[tokio::test]
    async fn test_pause_resume_forwarding() {
        let svc = service(
            Arc::new(CountingExchange::default()),
            Arc::new(AtomicUsize::new(0)),
        );
        let j = job("SOLUSDT");

        assert!(!svc.pause(&j));
        svc.start(&j, Duration::from_secs(1)).unwrap();

        assert!(svc.pause(&j));
        assert!(svc.status_text().contains("[PAUSED]"));
        // Paused still counts as running for idempotent start
        assert!(!svc.start(&j, Duration::from_secs(1)).unwrap());

        assert!(svc.resume(&j));
        assert!(svc.status_text().contains("[RUNNING]"));
        svc.shutdown();
    }

    #[tokio::test]
    async fn test_health_tracks_last_tick_and_error() {
        let exchange = Arc::new(CountingExchange {
            fail: true,
            ..Default::default()
        });
        let svc = service(exchange, Arc::new(AtomicUsize::new(0)));
        let j = job("BTCUSDT");

        assert_eq!(svc.health_text(), "No trading jobs");
        svc.start(&j, Duration::from_secs(10)).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let health = svc.health_text();
        assert!(health.contains("alice:hold:paper:BTCUSDT:1m"));
        assert!(health.contains("last_tick=0s ago"), "{health}");
        assert!(health.contains("feed down"), "{health}");
        svc.shutdown();
    }

    #[tokio::test]
    async fn test_status_text_lists_jobs_sorted() {
        let svc = service(
            Arc::new(CountingExchange::default()),
            Arc::new(AtomicUsize::new(0)),
        );
        svc.start(&job("ETHUSDT"), Duration::from_secs(1)).unwrap();
        svc.start(&job("BTCUSDT"), Duration::from_secs(1)).unwrap();

        let status = svc.status_text();
        assert!(status.starts_with("2 trading job(s)"));
        let btc = status.find("BTCUSDT").unwrap();
        let eth = status.find("ETHUSDT").unwrap();
        assert!(btc < eth);
        svc.shutdown();
    }
}
