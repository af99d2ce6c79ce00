use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::clock::Clock;
use crate::config::PaperSettings;
use crate::models::{Candle, Fill, PnlSnapshot, PortfolioSnapshot, TradeSide};
use crate::ports::{ExchangePort, PortfolioPort};

/// Candles kept per symbol
const MAX_HISTORY: usize = 1_000;

/// Candle interval for a timeframe string such as `1m`, `15m`, `4h` or `1d`
pub fn parse_timeframe(timeframe: &str) -> Result<Duration> {
    let timeframe = timeframe.trim();
    let split = timeframe
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| anyhow!("timeframe '{timeframe}' has no unit"))?;
    let (amount, unit) = timeframe.split_at(split);
    let amount: i64 = amount
        .parse()
        .with_context(|| format!("timeframe '{timeframe}' has no amount"))?;
    if amount <= 0 {
        bail!("timeframe '{timeframe}' must be positive");
    }

    match unit {
        "s" => Ok(Duration::seconds(amount)),
        "m" => Ok(Duration::minutes(amount)),
        "h" => Ok(Duration::hours(amount)),
        "d" => Ok(Duration::days(amount)),
        _ => bail!("unsupported timeframe unit '{unit}' in '{timeframe}'"),
    }
}

struct Market {
    rng: StdRng,
    history: HashMap<String, Vec<Candle>>,
}

/// Simulated exchange: a seeded random walk per symbol.
///
/// Every candle request appends one fresh candle, so a polling loop sees the
/// market move. Orders fill at the latest close.
pub struct PaperExchange {
    base_price: f64,
    volatility: f64,
    clock: Arc<dyn Clock>,
    market: Mutex<Market>,
}

impl PaperExchange {
    pub fn new(settings: &PaperSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            base_price: settings.base_price,
            volatility: settings.volatility,
            clock,
            market: Mutex::new(Market {
                rng: StdRng::seed_from_u64(settings.seed),
                history: HashMap::new(),
            }),
        }
    }

    fn market(&self) -> MutexGuard<'_, Market> {
        self.market.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_candle(
        &self,
        rng: &mut StdRng,
        symbol: &str,
        prev_close: f64,
        timestamp: DateTime<Utc>,
    ) -> Candle {
        let open = prev_close;
        let change = rng.gen_range(-self.volatility..=self.volatility);
        let close = (open * (1.0 + change)).max(0.01);
        let wick = rng.gen_range(0.0..=self.volatility / 2.0);

        Candle {
            symbol: symbol.to_string(),
            timestamp,
            open,
            high: open.max(close) * (1.0 + wick),
            low: open.min(close) * (1.0 - wick),
            close,
            volume: rng.gen_range(100.0..1_000.0),
        }
    }

    /// Extend the symbol's history by `count` candles ending at `now`.
    fn extend(&self, market: &mut Market, symbol: &str, count: usize, interval: Duration) {
        let now = self.clock.now();
        let Market { rng, history } = market;
        let candles = history.entry(symbol.to_string()).or_default();

        let mut prev_close = candles.last().map_or(self.base_price, |c| c.close);
        let mut timestamp = match candles.last() {
            Some(last) => last.timestamp.max(now - interval * count as i32),
            None => now - interval * count as i32,
        };

        for _ in 0..count {
            timestamp += interval;
            let candle = self.next_candle(rng, symbol, prev_close, timestamp);
            prev_close = candle.close;
            candles.push(candle);
        }

        if candles.len() > MAX_HISTORY {
            let excess = candles.len() - MAX_HISTORY;
            candles.drain(..excess);
        }
    }

    pub fn last_price(&self, symbol: &str) -> Option<f64> {
        self.market()
            .history
            .get(symbol)
            .and_then(|c| c.last())
            .map(|c| c.close)
    }

    fn fill_price(&self, symbol: &str, quantity: f64) -> Result<f64> {
        if quantity <= 0.0 || !quantity.is_finite() {
            bail!("invalid order quantity {quantity} for {symbol}");
        }
        self.last_price(symbol)
            .ok_or_else(|| anyhow!("no market data for {symbol}"))
    }
}

#[async_trait]
impl ExchangePort for PaperExchange {
    async fn get_candles(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let interval = parse_timeframe(timeframe)?;
        let limit = limit.min(MAX_HISTORY);

        let mut market = self.market();
        let have = market.history.get(symbol).map_or(0, Vec::len);
        let missing = limit.saturating_sub(have).max(1);
        self.extend(&mut market, symbol, missing, interval);

        let candles = &market.history[symbol];
        let start = candles.len().saturating_sub(limit);
        Ok(candles[start..].to_vec())
    }

    async fn market_buy(&self, symbol: &str, quantity: f64) -> Result<f64> {
        let price = self.fill_price(symbol, quantity)?;
        tracing::info!(symbol, quantity, price, "Paper BUY filled");
        Ok(price)
    }

    async fn market_sell(&self, symbol: &str, quantity: f64) -> Result<f64> {
        let price = self.fill_price(symbol, quantity)?;
        tracing::info!(symbol, quantity, price, "Paper SELL filled");
        Ok(price)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Holding {
    quantity: f64,
    avg_cost: f64,
    last_price: f64,
}

#[derive(Debug, Default)]
struct Book {
    cash: f64,
    holdings: HashMap<String, Holding>,
    realized: f64,
}

/// In-memory cash and positions fed by fills
pub struct PaperPortfolio {
    book: Mutex<Book>,
}

impl PaperPortfolio {
    pub fn new(initial_cash: f64) -> Self {
        Self {
            book: Mutex::new(Book {
                cash: initial_cash,
                ..Book::default()
            }),
        }
    }

    fn book(&self) -> MutexGuard<'_, Book> {
        self.book.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn cash(&self) -> f64 {
        self.book().cash
    }

    /// Realized and mark-to-last-fill unrealized PnL
    pub fn pnl(&self, at: DateTime<Utc>) -> PnlSnapshot {
        let book = self.book();
        let unrealized = book
            .holdings
            .values()
            .map(|h| (h.last_price - h.avg_cost) * h.quantity)
            .sum();

        PnlSnapshot {
            realized: book.realized,
            unrealized,
            updated_at: at,
        }
    }
}

#[async_trait]
impl PortfolioPort for PaperPortfolio {
    async fn get_snapshot(&self) -> Result<PortfolioSnapshot> {
        let book = self.book();
        let mut equity = book.cash;
        let mut positions = HashMap::new();

        for (symbol, holding) in &book.holdings {
            equity += holding.quantity * holding.last_price;
            positions.insert(symbol.clone(), holding.quantity);
        }

        Ok(PortfolioSnapshot { equity, positions })
    }

    async fn get_position(&self, symbol: &str) -> Result<f64> {
        Ok(self
            .book()
            .holdings
            .get(symbol)
            .map_or(0.0, |h| h.quantity))
    }

    async fn apply_fill(&self, fill: &Fill) -> Result<()> {
        if fill.quantity <= 0.0 || fill.price <= 0.0 {
            bail!(
                "invalid fill for {}: qty={} price={}",
                fill.symbol,
                fill.quantity,
                fill.price
            );
        }

        let mut book = self.book();
        let notional = fill.quantity * fill.price;

        match fill.side {
            TradeSide::Buy => {
                let holding = book.holdings.entry(fill.symbol.clone()).or_default();
                let total = holding.quantity + fill.quantity;
                holding.avg_cost =
                    (holding.avg_cost * holding.quantity + notional) / total;
                holding.quantity = total;
                holding.last_price = fill.price;
                book.cash -= notional;
            }
            TradeSide::Sell => {
                let holding = book
                    .holdings
                    .get_mut(&fill.symbol)
                    .filter(|h| h.quantity > 0.0)
                    .ok_or_else(|| anyhow!("no position in {} to sell", fill.symbol))?;

                let quantity = fill.quantity.min(holding.quantity);
                let realized = (fill.price - holding.avg_cost) * quantity;
                holding.quantity -= quantity;
                holding.last_price = fill.price;
                if holding.quantity <= f64::EPSILON {
                    book.holdings.remove(&fill.symbol);
                }
                book.realized += realized;
                book.cash += quantity * fill.price;
            }
        }

        Ok(())
    }
}
