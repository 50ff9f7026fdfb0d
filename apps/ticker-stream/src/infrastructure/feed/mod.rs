//! Synthetic Price Feed
//!
//! A random-walk [`PriceFeed`] used when no real market data source is
//! configured. Each started ticker gets its own generator task that
//! publishes into the injected [`PriceSink`].
//!
//! # Generation
//!
//! - Starts from a known base price, or a random one in `[10, 1010)`
//! - Publishes once immediately, then once per tick period
//! - The tick period is drawn once per ticker from the configured range
//! - Each tick moves the price uniformly within `±max_change_pct`,
//!   floored at `0.001`

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{FeedError, PriceFeed, PriceSink};
use crate::domain::ticker::{PriceUpdate, Ticker};
use crate::infrastructure::config::FeedSettings;

const BASE_PRICES: [(&str, f64); 10] = [
    ("BTCUSD", 45_000.0),
    ("ETHUSD", 2_800.0),
    ("SOLUSD", 105.0),
    ("ADAUSD", 0.45),
    ("DOTUSD", 6.5),
    ("XRPUSD", 0.62),
    ("LINKUSD", 15.2),
    ("AVAXUSD", 38.5),
    ("MATICUSD", 0.85),
    ("UNIUSD", 7.2),
];

const MIN_PRICE: f64 = 0.001;

/// Known starting price for a ticker, if any.
#[must_use]
pub fn base_price(ticker: &Ticker) -> Option<f64> {
    BASE_PRICES
        .iter()
        .find(|(symbol, _)| *symbol == ticker.as_str())
        .map(|(_, price)| *price)
}

/// Random-walk feed producing one generator task per ticker.
pub struct SyntheticFeed {
    sink: Arc<dyn PriceSink>,
    settings: FeedSettings,
    generators: Mutex<HashMap<Ticker, CancellationToken>>,
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl SyntheticFeed {
    /// Create a feed publishing into `sink`.
    #[must_use]
    pub fn new(sink: Arc<dyn PriceSink>, settings: FeedSettings) -> Self {
        Self {
            sink,
            settings,
            generators: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Stop every generator. Later `start` calls fail with [`FeedError::Closed`].
    pub fn close(&self) {
        let stopped = {
            let mut generators = self.generators.lock();
            // Set under the generators lock so `start` cannot insert after the clear.
            self.closed.store(true, Ordering::Release);
            self.shutdown.cancel();
            let count = generators.len();
            generators.clear();
            count
        };
        tracing::info!(generators = stopped, "Synthetic feed closed");
    }

    fn tick_period(&self) -> Duration {
        let min = u64::try_from(self.settings.min_interval.as_millis()).unwrap_or(u64::MAX);
        let max = u64::try_from(self.settings.max_interval.as_millis()).unwrap_or(u64::MAX);
        if min >= max {
            return Duration::from_millis(max.max(1));
        }
        Duration::from_millis(rand::rng().random_range(min..=max).max(1))
    }
}

#[async_trait]
impl PriceFeed for SyntheticFeed {
    async fn start(&self, ticker: &Ticker) -> Result<(), FeedError> {
        let cancel = {
            let mut generators = self.generators.lock();
            if self.closed.load(Ordering::Acquire) {
                return Err(FeedError::Closed);
            }
            if generators.contains_key(ticker) {
                return Err(FeedError::AlreadyRunning(ticker.to_string()));
            }
            let cancel = self.shutdown.child_token();
            generators.insert(ticker.clone(), cancel.clone());
            cancel
        };

        let walk = RandomWalk::new(
            ticker.clone(),
            base_price(ticker).unwrap_or_else(|| rand::rng().random_range(10.0..1010.0)),
            self.settings.max_change_pct,
            self.settings.exchange.clone(),
        );
        let period = self.tick_period();

        tracing::info!(
            ticker = %ticker,
            start_price = walk.price,
            period_ms = u64::try_from(period.as_millis()).unwrap_or(u64::MAX),
            "Starting price generation"
        );

        tokio::spawn(run_generator(walk, period, Arc::clone(&self.sink), cancel));
        Ok(())
    }

    async fn stop(&self, ticker: &Ticker) -> Result<(), FeedError> {
        let removed = self.generators.lock().remove(ticker);
        match removed {
            Some(cancel) => {
                cancel.cancel();
                tracing::info!(ticker = %ticker, "Stopped price generation");
            }
            None => {
                tracing::debug!(ticker = %ticker, "Stop for ticker with no generator");
            }
        }
        Ok(())
    }

    fn active_tickers(&self) -> Vec<Ticker> {
        let mut tickers: Vec<Ticker> = self.generators.lock().keys().cloned().collect();
        tickers.sort();
        tickers
    }
}

impl std::fmt::Debug for SyntheticFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyntheticFeed")
            .field("settings", &self.settings)
            .field("generators", &self.generators.lock().len())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Generator
// =============================================================================

struct RandomWalk {
    ticker: Ticker,
    price: f64,
    max_change_pct: f64,
    exchange: String,
    last_timestamp: i64,
}

impl RandomWalk {
    const fn new(ticker: Ticker, price: f64, max_change_pct: f64, exchange: String) -> Self {
        Self {
            ticker,
            price,
            max_change_pct,
            exchange,
            last_timestamp: i64::MIN,
        }
    }

    fn step(&mut self) {
        let change = if self.max_change_pct > 0.0 {
            rand::rng().random_range(-self.max_change_pct..=self.max_change_pct)
        } else {
            0.0
        };
        self.price = (self.price * (1.0 + change)).max(MIN_PRICE);
    }

    fn observe(&mut self) -> PriceUpdate {
        let timestamp = chrono::Utc::now()
            .timestamp_millis()
            .max(self.last_timestamp);
        self.last_timestamp = timestamp;
        PriceUpdate::new(self.ticker.clone(), self.price, timestamp, self.exchange.clone())
    }
}

async fn run_generator(
    mut walk: RandomWalk,
    period: Duration,
    sink: Arc<dyn PriceSink>,
    cancel: CancellationToken,
) {
    let mut ticks = tokio::time::interval(period);
    ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    // The first tick completes immediately.
    ticks.tick().await;
    sink.publish(walk.observe());

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticks.tick() => {
                walk.step();
                tracing::trace!(ticker = %walk.ticker, price = walk.price, "Synthetic tick");
                sink.publish(walk.observe());
            }
        }
    }

    tracing::debug!(ticker = %walk.ticker, "Price generator exited");
}

// =============================================================================
// Tests
// =============================================================================
