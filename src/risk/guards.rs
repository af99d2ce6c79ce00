use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::clock::Clock;
use crate::error::TradingError;
use crate::session::StopReasonCode;
use crate::Result;

/// Largest cooldown a `chrono::Duration` can hold at millisecond precision
pub const MAX_COOLDOWN_SECONDS: u64 = i64::MAX as u64 / 1000;

/// Limits for the per-job circuit breakers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GuardConfig {
    pub daily_loss_pct: f64,
    pub max_trades_per_day: u32,
    pub cooldown_seconds: u64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            daily_loss_pct: 0.05,   // -5% daily
            max_trades_per_day: 10, // Max 10 trades per day
            cooldown_seconds: 300,  // One entry per 5 minutes per key
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
struct DailyLossState {
    day: Option<NaiveDate>,
    start_equity: Option<f64>,
    blocked: bool,
}

/// Blocks trading for the rest of the day once equity drops `limit_pct`
/// below the first equity seen that day.
pub struct DailyLossGuard {
    limit_pct: f64,
    clock: Arc<dyn Clock>,
    state: Mutex<DailyLossState>,
}

impl DailyLossGuard {
    pub fn new(limit_pct: f64, clock: Arc<dyn Clock>) -> Result<Self> {
        if !(limit_pct > 0.0 && limit_pct < 1.0) {
            return Err(TradingError::Validation(format!(
                "daily loss limit must be in (0, 1), got {limit_pct}"
            )));
        }

        Ok(Self {
            limit_pct,
            clock,
            state: Mutex::new(DailyLossState {
                day: None,
                start_equity: None,
                blocked: false,
            }),
        })
    }

    fn roll_over(&self, state: &mut DailyLossState) {
        let today = self.clock.today();
        if state.day != Some(today) {
            if state.day.is_some() {
                tracing::debug!(%today, "Daily loss guard rolled over");
            }
            state.day = Some(today);
            state.start_equity = None;
            state.blocked = false;
        }
    }

    /// Feed the latest equity; returns whether trading is blocked.
    pub fn on_equity(&self, equity: f64) -> bool {
        let mut state = lock(&self.state);
        self.roll_over(&mut state);

        let start = *state.start_equity.get_or_insert(equity);
        let floor = start * (1.0 - self.limit_pct);

        if !state.blocked && equity <= floor {
            state.blocked = true;
            tracing::warn!(
                equity,
                start_equity = start,
                limit_pct = self.limit_pct,
                "Daily loss limit hit, blocking entries until tomorrow"
            );
        }

        state.blocked
    }

    pub fn is_blocked(&self) -> bool {
        let mut state = lock(&self.state);
        self.roll_over(&mut state);
        state.blocked
    }

    pub fn day_start_equity(&self) -> Option<f64> {
        let mut state = lock(&self.state);
        self.roll_over(&mut state);
        state.start_equity
    }
}

#[derive(Debug)]
struct TradeCountState {
    day: Option<NaiveDate>,
    count: u32,
}

/// Caps confirmed executions per calendar day.
pub struct MaxTradesGuard {
    limit_per_day: u32,
    clock: Arc<dyn Clock>,
    state: Mutex<TradeCountState>,
}

impl MaxTradesGuard {
    pub fn new(limit_per_day: u32, clock: Arc<dyn Clock>) -> Self {
        Self {
            limit_per_day,
            clock,
            state: Mutex::new(TradeCountState {
                day: None,
                count: 0,
            }),
        }
    }

    fn roll_over(&self, state: &mut TradeCountState) {
        let today = self.clock.today();
        if state.day != Some(today) {
            state.day = Some(today);
            state.count = 0;
        }
    }

    pub fn is_blocked(&self) -> bool {
        let mut state = lock(&self.state);
        self.roll_over(&mut state);
        state.count >= self.limit_per_day
    }

    /// Call only after the exchange confirmed the order.
    pub fn on_trade_executed(&self) {
        let mut state = lock(&self.state);
        self.roll_over(&mut state);
        state.count = state.count.saturating_add(1);

        if state.count == self.limit_per_day {
            tracing::warn!(limit = self.limit_per_day, "Max trades per day reached");
        }
    }

    pub fn count(&self) -> u32 {
        let mut state = lock(&self.state);
        self.roll_over(&mut state);
        state.count
    }
}

/// Minimum spacing between entries for the same key.
///
/// `allow` consumes the window when it returns true, so call it right before
/// placing the order, never as a dry run.
pub struct OrderCooldownGuard {
    cooldown: chrono::Duration,
    clock: Arc<dyn Clock>,
    last: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl OrderCooldownGuard {
    pub fn new(cooldown_seconds: u64, clock: Arc<dyn Clock>) -> Result<Self> {
        let out_of_range = || {
            TradingError::Validation(format!(
                "cooldown must be at most {MAX_COOLDOWN_SECONDS}s, got {cooldown_seconds}s"
            ))
        };
        if cooldown_seconds > MAX_COOLDOWN_SECONDS {
            return Err(out_of_range());
        }
        let cooldown = i64::try_from(cooldown_seconds)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .ok_or_else(out_of_range)?;

        Ok(Self {
            cooldown,
            clock,
            last: Mutex::new(HashMap::new()),
        })
    }

    pub fn allow(&self, key: &str) -> bool {
        let now = self.clock.now();
        let mut last = lock(&self.last);

        if let Some(&previous) = last.get(key) {
            if now - previous < self.cooldown {
                return false;
            }
        }

        last.insert(key.to_string(), now);
        true
    }
}

/// Reason an entry was refused by a guard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardBlock {
    DailyLoss,
    MaxTrades,
    Cooldown,
}

impl GuardBlock {
    pub fn message(&self) -> &'static str {
        match self {
            GuardBlock::DailyLoss => "Blocked: daily loss limit reached",
            GuardBlock::MaxTrades => "Blocked: max trades per day reached",
            GuardBlock::Cooldown => "Blocked: order cooldown active",
        }
    }

    /// Session stop code for the day-long blocks
    pub fn stop_code(&self) -> Option<StopReasonCode> {
        match self {
            GuardBlock::DailyLoss => Some(StopReasonCode::DailyLossLimit),
            GuardBlock::MaxTrades => Some(StopReasonCode::MaxTradesReached),
            GuardBlock::Cooldown => None,
        }
    }
}

/// The three guards as handed to one pipeline
pub struct GuardSet {
    pub daily_loss: DailyLossGuard,
    pub max_trades: MaxTradesGuard,
    pub cooldown: OrderCooldownGuard,
}

impl GuardSet {
    pub fn new(config: &GuardConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        Ok(Self {
            daily_loss: DailyLossGuard::new(config.daily_loss_pct, clock.clone())?,
            max_trades: MaxTradesGuard::new(config.max_trades_per_day, clock.clone()),
            cooldown: OrderCooldownGuard::new(config.cooldown_seconds, clock)?,
        })
    }

    /// Daily-loss and max-trades checks. Never touches the cooldown, which
    /// the caller consults separately right before ordering.
    pub fn check_limits(&self) -> std::result::Result<(), GuardBlock> {
        if self.daily_loss.is_blocked() {
            return Err(GuardBlock::DailyLoss);
        }
        if self.max_trades.is_blocked() {
            return Err(GuardBlock::MaxTrades);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use chrono::{Duration, TimeZone};

    fn clock_at(hour: u32) -> Arc<FakeClock> {
        Arc::new(FakeClock::new(
            Utc.with_ymd_and_hms(2024, 5, 10, hour, 0, 0).unwrap(),
        ))
    }

    #[test]
    fn test_daily_loss_rejects_bad_limit() {
        let clock = clock_at(9);
        assert!(DailyLossGuard::new(0.0, clock.clone()).is_err());
        assert!(DailyLossGuard::new(1.0, clock.clone()).is_err());
        assert!(DailyLossGuard::new(0.05, clock).is_ok());
    }

    #[test]
    fn test_daily_loss_records_first_equity() {
        let guard = DailyLossGuard::new(0.05, clock_at(9)).unwrap();

        assert!(!guard.on_equity(10_000.0));
        assert!(!guard.on_equity(10_500.0));
        assert_eq!(guard.day_start_equity(), Some(10_000.0));
    }

    #[test]
    fn test_daily_loss_blocks_at_limit_and_stays_blocked() {
        let clock = clock_at(9);
        let guard = DailyLossGuard::new(0.05, clock.clone()).unwrap();

        guard.on_equity(10_000.0);
        assert!(!guard.on_equity(9_501.0));
        assert!(guard.on_equity(9_500.0));

        // Recovery within the same day does not unblock
        clock.advance(Duration::hours(5));
        assert!(guard.on_equity(11_000.0));
        assert!(guard.is_blocked());
    }

    #[test]
    fn test_daily_loss_resets_at_rollover() {
        let clock = clock_at(20);
        let guard = DailyLossGuard::new(0.05, clock.clone()).unwrap();

        guard.on_equity(10_000.0);
        assert!(guard.on_equity(9_000.0));

        clock.advance(Duration::hours(3)); // 23:00 same day
        assert!(guard.is_blocked());

        clock.advance(Duration::hours(1)); // next day 00:00
        assert!(!guard.is_blocked());
        assert_eq!(guard.day_start_equity(), None);

        // New day's baseline is the first equity seen
        assert!(!guard.on_equity(9_000.0));
        assert_eq!(guard.day_start_equity(), Some(9_000.0));
    }

    #[test]
    fn test_max_trades_blocks_at_limit() {
        let guard = MaxTradesGuard::new(2, clock_at(9));

        assert!(!guard.is_blocked());
        guard.on_trade_executed();
        assert!(!guard.is_blocked());
        guard.on_trade_executed();
        assert!(guard.is_blocked());
        assert_eq!(guard.count(), 2);
    }

    #[test]
    fn test_max_trades_zero_limit_always_blocked() {
        let guard = MaxTradesGuard::new(0, clock_at(9));
        assert!(guard.is_blocked());
    }

    #[test]
    fn test_max_trades_resets_next_day() {
        let clock = clock_at(12);
        let guard = MaxTradesGuard::new(1, clock.clone());

        guard.on_trade_executed();
        assert!(guard.is_blocked());

        clock.advance(Duration::hours(12));
        assert_eq!(guard.count(), 0);
        assert!(!guard.is_blocked());
    }

    #[test]
    fn test_cooldown_consumes_on_check() {
        let clock = clock_at(9);
        let guard = OrderCooldownGuard::new(60, clock.clone()).unwrap();

        assert!(guard.allow("job-a"));
        assert!(!guard.allow("job-a"));
        assert!(guard.allow("job-b"));

        clock.advance(Duration::seconds(59));
        assert!(!guard.allow("job-a"));

        clock.advance(Duration::seconds(1));
        assert!(guard.allow("job-a"));
        // The successful check started a new window
        assert!(!guard.allow("job-a"));
    }

    #[test]
    fn test_cooldown_rejects_out_of_range_seconds() {
        let clock = clock_at(9);

        assert!(OrderCooldownGuard::new(MAX_COOLDOWN_SECONDS, clock.clone()).is_ok());
        for seconds in [MAX_COOLDOWN_SECONDS + 1, 10_000_000_000_000_000, u64::MAX] {
            let result = OrderCooldownGuard::new(seconds, clock.clone());
            assert!(matches!(result, Err(TradingError::Validation(_))), "{seconds}");
        }

        let config = GuardConfig {
            cooldown_seconds: u64::MAX,
            ..GuardConfig::default()
        };
        assert!(GuardSet::new(&config, clock).is_err());
    }

    #[test]
    fn test_long_cooldown_blocks_repeat_entry() {
        let clock = clock_at(9);
        let guard = OrderCooldownGuard::new(MAX_COOLDOWN_SECONDS, clock.clone()).unwrap();

        assert!(guard.allow("k"));
        clock.advance(Duration::days(365));
        assert!(!guard.allow("k"));
    }

    #[test]
    fn test_blocks_map_to_stop_codes() {
        assert_eq!(
            GuardBlock::DailyLoss.stop_code(),
            Some(StopReasonCode::DailyLossLimit)
        );
        assert_eq!(
            GuardBlock::MaxTrades.stop_code(),
            Some(StopReasonCode::MaxTradesReached)
        );
        assert_eq!(GuardBlock::Cooldown.stop_code(), None);
    }

    #[test]
    fn test_check_limits_leaves_cooldown_untouched() {
        let guards = GuardSet::new(&GuardConfig::default(), clock_at(9)).unwrap();

        assert_eq!(guards.check_limits(), Ok(()));
        assert_eq!(guards.check_limits(), Ok(()));
        assert!(guards.cooldown.allow("k"));
        assert!(!guards.cooldown.allow("k"));
    }

    #[test]
    fn test_max_trades_block_clears_next_day() {
        let clock = clock_at(9);
        let config = GuardConfig {
            daily_loss_pct: 0.1,
            max_trades_per_day: 1,
            cooldown_seconds: 60,
        };
        let guards = GuardSet::new(&config, clock.clone()).unwrap();

        guards.max_trades.on_trade_executed();
        assert_eq!(guards.check_limits(), Err(GuardBlock::MaxTrades));

        clock.advance(Duration::days(1));
        assert_eq!(guards.check_limits(), Ok(()));
        assert!(guards.cooldown.allow("k"));
        assert!(!guards.cooldown.allow("k"));
    }

    #[test]
    fn test_guards_serialize_concurrent_calls() {
        let guard = Arc::new(MaxTradesGuard::new(1_000, clock_at(9)));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let guard = guard.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        guard.on_trade_executed();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(guard.count(), 800);
    }
}
