use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};

use crate::error::TradingError;
use crate::Result;

/// Work executed on every firing of a scheduled job
#[async_trait]
pub trait ScheduledTask: Send + Sync + 'static {
    async fn run(&self);
}

/// Run state of a scheduled job. `Stopped` is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Paused,
    Stopped,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Running => "RUNNING",
            RunState::Paused => "PAUSED",
            RunState::Stopped => "STOPPED",
        };
        f.write_str(s)
    }
}

struct HandleInner {
    key: String,
    state: Mutex<RunState>,
    ticks_started: AtomicU64,
    shutdown: Notify,
}

/// Control surface for one scheduled job
#[derive(Clone)]
pub struct RunHandle {
    inner: Arc<HandleInner>,
}

impl RunHandle {
    fn new(key: &str) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                key: key.to_string(),
                state: Mutex::new(RunState::Running),
                ticks_started: AtomicU64::new(0),
                shutdown: Notify::new(),
            }),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, RunState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn key(&self) -> &str {
        &self.inner.key
    }

    pub fn state(&self) -> RunState {
        *self.lock_state()
    }

    /// True until the handle is stopped (paused handles are still running)
    pub fn is_running(&self) -> bool {
        self.state() != RunState::Stopped
    }

    pub fn is_paused(&self) -> bool {
        self.state() == RunState::Paused
    }

    /// Ticks admitted so far. Final once `stop()` has returned.
    pub fn ticks_started(&self) -> u64 {
        self.inner.ticks_started.load(Ordering::SeqCst)
    }

    /// Stop permanently. An in-flight tick may finish; no new tick starts
    /// once this returns.
    pub fn stop(&self) {
        let mut state = self.lock_state();
        if *state != RunState::Stopped {
            *state = RunState::Stopped;
            self.inner.shutdown.notify_one();
            tracing::info!(key = %self.inner.key, "Job stopped");
        }
    }

    /// Returns false if the job was not running
    pub fn pause(&self) -> bool {
        let mut state = self.lock_state();
        if *state == RunState::Running {
            *state = RunState::Paused;
            tracing::info!(key = %self.inner.key, "Job paused");
            true
        } else {
            false
        }
    }

    /// Returns false if the job was not paused
    pub fn resume(&self) -> bool {
        let mut state = self.lock_state();
        if *state == RunState::Paused {
            *state = RunState::Running;
            tracing::info!(key = %self.inner.key, "Job resumed");
            true
        } else {
            false
        }
    }
}

impl fmt::Debug for RunHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunHandle")
            .field("key", &self.inner.key)
            .field("state", &self.state())
            .finish()
    }
}

/// Marks the handle stopped when the worker exits, however it exits.
struct StopOnExit(RunHandle);

impl Drop for StopOnExit {
    fn drop(&mut self) {
        let mut state = self.0.lock_state();
        if *state != RunState::Stopped {
            *state = RunState::Stopped;
            tracing::warn!(key = %self.0.inner.key, "Job worker exited unexpectedly");
        }
    }
}

async fn drive(
    handle: RunHandle,
    task: Arc<dyn ScheduledTask>,
    initial_delay: Duration,
    period: Duration,
) {
    let _exit = StopOnExit(handle.clone());

    let mut ticker = interval_at(Instant::now() + initial_delay, period);
    // A slow tick delays the job; the firings it overlapped are dropped
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = handle.inner.shutdown.notified() => break,
        }

        let tick = {
            let state = handle.lock_state();
            match *state {
                RunState::Running => {
                    // Admitted and launched under the state lock, so a
                    // concurrent stop() either comes first or sees it in flight
                    handle.inner.ticks_started.fetch_add(1, Ordering::SeqCst);
                    let task = task.clone();
                    tokio::spawn(async move { task.run().await })
                }
                RunState::Paused => {
                    tracing::debug!(key = %handle.key(), "Paused, skipping tick");
                    continue;
                }
                RunState::Stopped => break,
            }
        };

        if let Err(e) = tick.await {
            if e.is_panic() {
                tracing::error!(key = %handle.key(), "Tick panicked, stopping job");
                break;
            }
        }
    }

    tracing::debug!(key = %handle.key(), "Job worker finished");
}

/// Fixed-rate scheduler on a shared tokio runtime, one worker task per key
pub struct JobScheduler {
    runtime: Handle,
    jobs: Mutex<HashMap<String, RunHandle>>,
}

impl JobScheduler {
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Scheduler bound to the runtime we're called from
    pub fn current() -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| TradingError::Scheduler(format!("no tokio runtime: {e}")))?;
        Ok(Self::new(runtime))
    }

    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    fn lock_jobs(&self) -> MutexGuard<'_, HashMap<String, RunHandle>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn schedule_at_fixed_rate(
        &self,
        key: &str,
        task: Arc<dyn ScheduledTask>,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<RunHandle> {
        if period.is_zero() {
            return Err(TradingError::Scheduler(format!(
                "period for {key} must be non-zero"
            )));
        }

        let handle = RunHandle::new(key);
        self.runtime
            .spawn(drive(handle.clone(), task, initial_delay, period));

        if let Some(previous) = self.lock_jobs().insert(key.to_string(), handle.clone()) {
            if previous.is_running() {
                tracing::warn!(%key, "Replacing a running job with the same key");
                previous.stop();
            }
        }

        tracing::info!(%key, ?period, ?initial_delay, "Job scheduled");
        Ok(handle)
    }

    /// Stop and forget the job for `key`; returns false if there was none
    pub fn cancel(&self, key: &str) -> bool {
        match self.lock_jobs().remove(key) {
            Some(handle) => {
                handle.stop();
                true
            }
            None => false,
        }
    }

    pub fn get(&self, key: &str) -> Option<RunHandle> {
        self.lock_jobs().get(key).cloned()
    }

    /// Keys whose handles are still running, sorted
    pub fn active_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .lock_jobs()
            .values()
            .filter(|h| h.is_running())
            .map(|h| h.key().to_string())
            .collect();
        keys.sort();
        keys
    }

    pub fn stop_all(&self) {
        let handles: Vec<RunHandle> = self.lock_jobs().drain().map(|(_, h)| h).collect();
        for handle in handles {
            handle.stop();
        }
    }
}
