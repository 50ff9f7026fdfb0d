//! Ticker Registry
//!
//! Owns the add/remove transitions of the active ticker set and drives the
//! injected [`PriceFeed`] so that exactly one `start` or `stop` is issued per
//! transition.
//!
//! # Serialization
//!
//! Calls for the same ticker are serialized by a per-ticker async lock held
//! across the feed call. Calls for different tickers never wait on each
//! other. Lock entries are dropped once nobody holds or waits on them.
//!
//! # Cancellation
//!
//! Each transition runs on its own task. Dropping the caller's future (a
//! disconnected HTTP client, a timeout) does not abandon a transition
//! between the set mutation and the feed call.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;
use tokio::task::JoinHandle;

use crate::application::ports::{FeedError, PriceFeed};
use crate::domain::registry::TickerSet;
use crate::domain::ticker::{Ticker, TickerError};
use crate::infrastructure::metrics::{self, FeedOperation};

/// Registry operation error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The symbol is empty or malformed. Nothing changed.
    #[error(transparent)]
    InvalidSymbol(#[from] TickerError),

    /// The feed refused to start. The insertion was rolled back.
    #[error("failed to start feed for {ticker}: {source}")]
    FeedStart {
        /// Ticker whose addition was rolled back.
        ticker: Ticker,
        /// Feed error.
        #[source]
        source: FeedError,
    },

    /// The transition task was cancelled by runtime shutdown.
    #[error("transition for {ticker} was interrupted")]
    Interrupted {
        /// Ticker whose transition did not report back.
        ticker: Ticker,
    },
}

type TickerLock = Arc<tokio::sync::Mutex<()>>;

/// System of record for tracked tickers.
pub struct TickerRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    tickers: TickerSet,
    feed: Arc<dyn PriceFeed>,
    locks: Mutex<HashMap<Ticker, TickerLock>>,
}

impl TickerRegistry {
    /// Create a registry over `tickers`, driving `feed`.
    ///
    /// `tickers` should be the same set the publish gate reads, so removals
    /// silence the ticker immediately.
    #[must_use]
    pub fn new(tickers: TickerSet, feed: Arc<dyn PriceFeed>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                tickers,
                feed,
                locks: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Track a ticker and start its feed.
    ///
    /// Returns `Ok(false)` if the ticker is already tracked. The transition
    /// completes even if the returned future is dropped.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::InvalidSymbol`] if `raw` does not canonicalize
    /// - [`RegistryError::FeedStart`] if the feed failed to start; the ticker
    ///   is not tracked afterwards
    /// - [`RegistryError::Interrupted`] if the runtime shut down mid-transition
    pub async fn add_ticker(&self, raw: &str) -> Result<bool, RegistryError> {
        let ticker = Ticker::parse(raw)?;
        let inner = Arc::clone(&self.inner);
        let task_ticker = ticker.clone();
        join_transition(ticker, tokio::spawn(async move { inner.add(task_ticker).await })).await
    }

    /// Stop tracking a ticker and stop its feed.
    ///
    /// Returns `Ok(false)` if the ticker was not tracked. A feed stop
    /// failure is logged and the removal still succeeds. The transition
    /// completes even if the returned future is dropped.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::InvalidSymbol`] if `raw` does not canonicalize
    /// - [`RegistryError::Interrupted`] if the runtime shut down mid-transition
    pub async fn remove_ticker(&self, raw: &str) -> Result<bool, RegistryError> {
        let ticker = Ticker::parse(raw)?;
        let inner = Arc::clone(&self.inner);
        let task_ticker = ticker.clone();
        join_transition(ticker, tokio::spawn(async move { inner.remove(task_ticker).await })).await
    }

    /// Sorted snapshot of tracked tickers.
    #[must_use]
    pub fn list_tickers(&self) -> Vec<Ticker> {
        self.inner.tickers.snapshot()
    }

    /// The feed's own view of tickers in production.
    #[must_use]
    pub fn feed_tickers(&self) -> Vec<Ticker> {
        self.inner.feed.active_tickers()
    }

    /// Shared handle to the active ticker set.
    #[must_use]
    pub fn tickers(&self) -> &TickerSet {
        &self.inner.tickers
    }
}

impl RegistryInner {
    async fn add(&self, ticker: Ticker) -> Result<bool, RegistryError> {
        let _guard = self.lock_ticker(&ticker).await;

        if !self.tickers.insert(ticker.clone()) {
            tracing::debug!(ticker = %ticker, "Ticker already tracked");
            return Ok(false);
        }

        if let Err(source) = self.feed.start(&ticker).await {
            self.tickers.remove(&ticker);
            metrics::record_feed_failure(FeedOperation::Start);
            tracing::warn!(ticker = %ticker, error = %source, "Feed start failed, rolled back");
            return Err(RegistryError::FeedStart { ticker, source });
        }

        metrics::set_active_tickers(self.tickers.len());
        tracing::info!(ticker = %ticker, active = self.tickers.len(), "Ticker added");
        Ok(true)
    }

    async fn remove(&self, ticker: Ticker) -> Result<bool, RegistryError> {
        let _guard = self.lock_ticker(&ticker).await;

        if !self.tickers.remove(&ticker) {
            tracing::debug!(ticker = %ticker, "Ticker not tracked");
            return Ok(false);
        }

        if let Err(e) = self.feed.stop(&ticker).await {
            metrics::record_feed_failure(FeedOperation::Stop);
            tracing::warn!(ticker = %ticker, error = %e, "Feed stop failed, ticker removed anyway");
        }

        metrics::set_active_tickers(self.tickers.len());
        tracing::info!(ticker = %ticker, active = self.tickers.len(), "Ticker removed");
        Ok(true)
    }

    async fn lock_ticker(&self, ticker: &Ticker) -> TickerGuard<'_> {
        let lock = Arc::clone(self.locks.lock().entry(ticker.clone()).or_default());
        let guard = lock.lock_owned().await;
        TickerGuard {
            locks: &self.locks,
            ticker: ticker.clone(),
            guard: Some(guard),
        }
    }
}

/// Wait for a transition task, re-raising its panic if it had one.
async fn join_transition(
    ticker: Ticker,
    transition: JoinHandle<Result<bool, RegistryError>>,
) -> Result<bool, RegistryError> {
    match transition.await {
        Ok(result) => result,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => {
            tracing::error!(ticker = %ticker, error = %e, "Ticker transition interrupted");
            Err(RegistryError::Interrupted { ticker })
        }
    }
}

impl std::fmt::Debug for TickerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickerRegistry")
            .field("tickers", &self.inner.tickers)
            .field("locks", &self.inner.locks.lock().len())
            .finish_non_exhaustive()
    }
}

/// Holds one ticker's lock and prunes its entry on release.
struct TickerGuard<'a> {
    locks: &'a Mutex<HashMap<Ticker, TickerLock>>,
    ticker: Ticker,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for TickerGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock();
        // Waiters clone the lock under this map lock, so a count of one
        // means the map holds the only reference.
        if locks
            .get(&self.ticker)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.ticker);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use mockall::predicate::eq;
    use tokio::time::timeout;

    use super::*;
    use crate::application::ports::MockPriceFeed;

    fn ticker(s: &str) -> Ticker {
        Ticker::parse(s).unwrap()
    }

    fn registry(feed: MockPriceFeed) -> TickerRegistry {
        TickerRegistry::new(TickerSet::new(), Arc::new(feed))
    }

    #[tokio::test]
    async fn add_starts_feed_exactly_once() {
        let mut feed = MockPriceFeed::new();
        feed.expect_start()
            .with(eq(ticker("BTCUSD")))
            .times(1)
            .returning(|_| Ok(()));
        let registry = registry(feed);

        assert_eq!(registry.add_ticker("btcusd").await, Ok(true));
        assert_eq!(registry.add_ticker("BTCUSD").await, Ok(false));
        assert_eq!(registry.list_tickers(), vec![ticker("BTCUSD")]);
    }

    #[tokio::test]
    async fn invalid_symbol_touches_nothing() {
        let mut feed = MockPriceFeed::new();
        feed.expect_start().times(0);
        feed.expect_stop().times(0);
        let registry = registry(feed);

        assert!(matches!(
            registry.add_ticker("   ").await,
            Err(RegistryError::InvalidSymbol(_))
        ));
        assert!(matches!(
            registry.remove_ticker("").await,
            Err(RegistryError::InvalidSymbol(_))
        ));
        assert!(registry.list_tickers().is_empty());
    }

    #[tokio::test]
    async fn failed_start_rolls_back() {
        let mut feed = MockPriceFeed::new();
        feed.expect_start()
            .times(1)
            .returning(|t| Err(FeedError::UnknownSymbol(t.to_string())));
        let registry = registry(feed);

        let result = registry.add_ticker("NOPE").await;
        assert_eq!(
            result,
            Err(RegistryError::FeedStart {
                ticker: ticker("NOPE"),
                source: FeedError::UnknownSymbol("NOPE".to_string()),
            })
        );
        assert!(registry.list_tickers().is_empty());
        assert!(!registry.tickers().contains(&ticker("NOPE")));
    }

    #[tokio::test]
    async fn remove_stops_feed_exactly_once() {
        let mut feed = MockPriceFeed::new();
        feed.expect_start().times(1).returning(|_| Ok(()));
        feed.expect_stop()
            .with(eq(ticker("ETHUSD")))
            .times(1)
            .returning(|_| Ok(()));
        let registry = registry(feed);

        registry.add_ticker("ETHUSD").await.unwrap();
        assert_eq!(registry.remove_ticker("ethusd").await, Ok(true));
        assert_eq!(registry.remove_ticker("ETHUSD").await, Ok(false));
        assert!(registry.list_tickers().is_empty());
    }

    #[tokio::test]
    async fn remove_absent_does_not_call_feed() {
        let mut feed = MockPriceFeed::new();
        feed.expect_stop().times(0);
        let registry = registry(feed);

        assert_eq!(registry.remove_ticker("SOLUSD").await, Ok(false));
    }

    #[tokio::test]
    async fn failed_stop_still_removes() {
        let mut feed = MockPriceFeed::new();
        feed.expect_start().times(1).returning(|_| Ok(()));
        feed.expect_stop()
            .times(1)
            .returning(|_| Err(FeedError::Unavailable("upstream gone".to_string())));
        let registry = registry(feed);

        registry.add_ticker("ADAUSD").await.unwrap();
        assert_eq!(registry.remove_ticker("ADAUSD").await, Ok(true));
        assert!(registry.list_tickers().is_empty());
    }

    #[tokio::test]
    async fn concurrent_adds_of_same_ticker_start_once() {
        let mut feed = MockPriceFeed::new();
        feed.expect_start().times(1).returning(|_| Ok(()));
        let registry = Arc::new(registry(feed));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.add_ticker("XRPUSD").await })
            })
            .collect();

        let mut added = 0;
        for task in tasks {
            if task.await.unwrap().unwrap() {
                added += 1;
            }
        }
        assert_eq!(added, 1);
        assert_eq!(registry.list_tickers(), vec![ticker("XRPUSD")]);
    }

    #[tokio::test]
    async fn concurrent_adds_of_different_tickers_both_succeed() {
        let mut feed = MockPriceFeed::new();
        feed.expect_start().times(2).returning(|_| Ok(()));
        let registry = registry(feed);

        let (eth, sol) = tokio::join!(registry.add_ticker("ETHUSD"), registry.add_ticker("SOLUSD"));
        assert_eq!(eth, Ok(true));
        assert_eq!(sol, Ok(true));
        assert_eq!(registry.list_tickers(), vec![ticker("ETHUSD"), ticker("SOLUSD")]);
    }

    #[tokio::test]
    async fn lock_entries_are_pruned() {
        let mut feed = MockPriceFeed::new();
        feed.expect_start().returning(|_| Ok(()));
        feed.expect_stop().returning(|_| Ok(()));
        let registry = registry(feed);

        registry.add_ticker("LINKUSD").await.unwrap();
        registry.remove_ticker("LINKUSD").await.unwrap();
        assert!(registry.inner.locks.lock().is_empty());
    }

    /// Feed whose calls take `delay`, counting completions and overlaps.
    struct SlowFeed {
        delay: Duration,
        in_flight: AtomicUsize,
        overlapped: AtomicBool,
        starts: AtomicUsize,
        stops: AtomicUsize,
    }

    impl SlowFeed {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay,
                in_flight: AtomicUsize::new(0),
                overlapped: AtomicBool::new(false),
                starts: AtomicUsize::new(0),
                stops: AtomicUsize::new(0),
            })
        }

        async fn enter(&self) {
            if self.in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
                self.overlapped.store(true, Ordering::SeqCst);
            }
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait::async_trait]
    impl PriceFeed for SlowFeed {
        async fn start(&self, _: &Ticker) -> Result<(), FeedError> {
            self.enter().await;
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn stop(&self, _: &Ticker) -> Result<(), FeedError> {
            self.enter().await;
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn active_tickers(&self) -> Vec<Ticker> {
            Vec::new()
        }
    }

    #[tokio::test]
    async fn same_ticker_calls_are_serialized() {
        let feed = SlowFeed::new(Duration::from_millis(5));
        let registry = Arc::new(TickerRegistry::new(TickerSet::new(), feed.clone()));

        let mut tasks = Vec::new();
        for i in 0..10 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                if i % 2 == 0 {
                    registry.add_ticker("DOTUSD").await.map(|_| ())
                } else {
                    registry.remove_ticker("DOTUSD").await.map(|_| ())
                }
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert!(!feed.overlapped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn dropped_caller_does_not_abandon_transition() {
        let feed = SlowFeed::new(Duration::from_millis(50));
        let registry = TickerRegistry::new(TickerSet::new(), feed.clone());

        let abandoned = timeout(Duration::from_millis(5), registry.add_ticker("BTCUSD")).await;
        assert!(abandoned.is_err());

        // Waits on the ticker lock, so it observes the finished add.
        assert_eq!(registry.add_ticker("BTCUSD").await, Ok(false));
        assert_eq!(feed.starts.load(Ordering::SeqCst), 1);
        assert_eq!(registry.list_tickers(), vec![ticker("BTCUSD")]);

        let abandoned = timeout(Duration::from_millis(5), registry.remove_ticker("BTCUSD")).await;
        assert!(abandoned.is_err());

        assert_eq!(registry.remove_ticker("BTCUSD").await, Ok(false));
        assert_eq!(feed.stops.load(Ordering::SeqCst), 1);
        assert!(registry.list_tickers().is_empty());
        assert!(registry.inner.locks.lock().is_empty());
    }
}
