//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`PriceFeed`]: Producer of price updates for tracked tickers
//!
//! ## Driver Ports (Inbound)
//!
//! - [`PriceSink`]: Entry point a feed publishes its updates into

use async_trait::async_trait;

use crate::domain::ticker::{PriceUpdate, Ticker};

// =============================================================================
// Price Feed
// =============================================================================

/// External producer of price updates.
///
/// A feed is constructed once with the [`PriceSink`] it publishes into and
/// is then injected into the ticker registry, which drives `start`/`stop`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Begin producing updates for `ticker`.
    ///
    /// # Errors
    ///
    /// Returns a [`FeedError`] if production cannot be started (unknown
    /// symbol, upstream unavailable, resource exhaustion).
    async fn start(&self, ticker: &Ticker) -> Result<(), FeedError>;

    /// Stop producing updates for `ticker`.
    ///
    /// Stopping a ticker that was never started is a no-op, not an error.
    ///
    /// # Errors
    ///
    /// Returns a [`FeedError`] if the feed could not confirm the stop.
    async fn stop(&self, ticker: &Ticker) -> Result<(), FeedError>;

    /// The feed's own view of tickers in production.
    ///
    /// Informational only; the registry is the system of record.
    fn active_tickers(&self) -> Vec<Ticker>;
}

/// Feed operation error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedError {
    /// The feed does not know how to price this symbol.
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),

    /// The upstream source is unreachable or refused the request.
    #[error("upstream unavailable: {0}")]
    Unavailable(String),

    /// Production is already running for this ticker.
    #[error("already producing prices for {0}")]
    AlreadyRunning(String),

    /// The feed has been shut down.
    #[error("feed is closed")]
    Closed,
}

// =============================================================================
// Price Sink
// =============================================================================

/// Publish entry point for price updates.
///
/// Implementations must not block for long: feeds call this from their
/// producer tasks for every update.
pub trait PriceSink: Send + Sync {
    /// Publish one update.
    fn publish(&self, update: PriceUpdate);
}
