//! Price Service
//!
//! The outward operations a transport layer exposes: ticker management
//! with structured results, and per-client price streams.

use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::registry::{RegistryError, TickerRegistry};
use crate::domain::ticker::{Ticker, TickerError};
use crate::infrastructure::broadcast::{SharedBroadcastHub, StreamSession};

/// Result of `AddTicker` / `RemoveTicker`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickerResponse {
    /// Whether the requested state change happened.
    pub success: bool,
    /// Human-readable outcome.
    pub message: String,
    /// Tracked tickers after the call, sorted.
    pub active_tickers: Vec<Ticker>,
}

/// Result of `GetTickers`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GetTickersResponse {
    /// Tracked tickers, sorted.
    pub tickers: Vec<Ticker>,
}

/// Errors surfaced by [`PriceService`] instead of a response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    /// The symbol is empty or malformed.
    #[error(transparent)]
    InvalidSymbol(#[from] TickerError),
}

/// Ticker management and price streaming for remote callers.
#[derive(Debug, Clone)]
pub struct PriceService {
    registry: Arc<TickerRegistry>,
    hub: SharedBroadcastHub,
}

impl PriceService {
    /// Create the service over an assembled registry and hub.
    #[must_use]
    pub const fn new(registry: Arc<TickerRegistry>, hub: SharedBroadcastHub) -> Self {
        Self { registry, hub }
    }

    /// Track a ticker.
    ///
    /// A feed start failure is reported as `success: false` with the cause
    /// in `message`.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::InvalidSymbol`] if `raw` does not canonicalize.
    pub async fn add_ticker(&self, raw: &str) -> Result<TickerResponse, ServiceError> {
        tracing::debug!(ticker = raw, "Request to add ticker");

        let (success, message) = match self.registry.add_ticker(raw).await {
            Ok(true) => (true, format!("Successfully added ticker {}", display(raw))),
            Ok(false) => (false, format!("Ticker {} is already tracked", display(raw))),
            Err(RegistryError::InvalidSymbol(e)) => return Err(e.into()),
            Err(e) => (false, format!("Failed to add ticker {}: {e}", display(raw))),
        };

        Ok(self.respond(success, message))
    }

    /// Stop tracking a ticker.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::InvalidSymbol`] if `raw` does not canonicalize.
    pub async fn remove_ticker(&self, raw: &str) -> Result<TickerResponse, ServiceError> {
        tracing::debug!(ticker = raw, "Request to remove ticker");

        let (success, message) = match self.registry.remove_ticker(raw).await {
            Ok(true) => (true, format!("Successfully removed ticker {}", display(raw))),
            Ok(false) => (false, format!("Ticker {} is not tracked", display(raw))),
            Err(RegistryError::InvalidSymbol(e)) => return Err(e.into()),
            Err(e) => (false, format!("Failed to remove ticker {}: {e}", display(raw))),
        };

        Ok(self.respond(success, message))
    }

    /// List tracked tickers.
    #[must_use]
    pub fn get_tickers(&self) -> GetTickersResponse {
        GetTickersResponse {
            tickers: self.registry.list_tickers(),
        }
    }

    /// Open a price stream that ends on hub shutdown or when dropped.
    #[must_use]
    pub fn stream_prices(&self) -> StreamSession {
        let session = self.hub.subscribe();
        tracing::info!(session_id = %session.id(), "Client connected to price stream");
        session
    }

    /// Open a price stream that also ends when `cancel` fires.
    #[must_use]
    pub fn stream_prices_until(&self, cancel: &CancellationToken) -> StreamSession {
        let token = cancel.child_token();
        let session = self.hub.subscribe_with_cancel(token);
        tracing::info!(session_id = %session.id(), "Client connected to price stream");
        session
    }

    /// The underlying registry.
    #[must_use]
    pub fn registry(&self) -> &TickerRegistry {
        &self.registry
    }

    /// The underlying hub.
    #[must_use]
    pub const fn hub(&self) -> &SharedBroadcastHub {
        &self.hub
    }

    fn respond(&self, success: bool, message: String) -> TickerResponse {
        TickerResponse {
            success,
            message,
            active_tickers: self.registry.list_tickers(),
        }
    }
}

fn display(raw: &str) -> String {
    Ticker::parse(raw).map_or_else(|_| raw.to_string(), Ticker::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{FeedError, MockPriceFeed};
    use crate::domain::registry::TickerSet;
    use crate::infrastructure::broadcast::BroadcastHub;

    fn service(feed: MockPriceFeed) -> PriceService {
        let hub = Arc::new(BroadcastHub::with_defaults());
        let registry = Arc::new(TickerRegistry::new(TickerSet::new(), Arc::new(feed)));
        PriceService::new(registry, hub)
    }

    fn names(tickers: &[Ticker]) -> Vec<&str> {
        tickers.iter().map(Ticker::as_str).collect()
    }

    #[tokio::test]
    async fn add_reports_success_and_active_set() {
        let mut feed = MockPriceFeed::new();
        feed.expect_start().returning(|_| Ok(()));
        let service = service(feed);

        let response = service.add_ticker("btcusd").await.unwrap();
        assert!(response.success);
        assert_eq!(response.message, "Successfully added ticker BTCUSD");
        assert_eq!(names(&response.active_tickers), vec!["BTCUSD"]);

        let again = service.add_ticker("BTCUSD").await.unwrap();
        assert!(!again.success);
        assert_eq!(names(&again.active_tickers), vec!["BTCUSD"]);
    }

    #[tokio::test]
    async fn add_feed_failure_is_a_failed_response() {
        let mut feed = MockPriceFeed::new();
        feed.expect_start()
            .returning(|_| Err(FeedError::Unavailable("page did not load".to_string())));
        let service = service(feed);

        let response = service.add_ticker("ETHUSD").await.unwrap();
        assert!(!response.success);
        assert!(response.message.contains("page did not load"));
        assert!(response.active_tickers.is_empty());
    }

    #[tokio::test]
    async fn invalid_symbol_is_an_error() {
        let service = service(MockPriceFeed::new());
        assert!(matches!(
            service.add_ticker("").await,
            Err(ServiceError::InvalidSymbol(_))
        ));
        assert!(service.get_tickers().tickers.is_empty());
    }

    #[tokio::test]
    async fn remove_reports_success_then_not_tracked() {
        let mut feed = MockPriceFeed::new();
        feed.expect_start().returning(|_| Ok(()));
        feed.expect_stop().times(1).returning(|_| Ok(()));
        let service = service(feed);

        service.add_ticker("SOLUSD").await.unwrap();
        let removed = service.remove_ticker("SOLUSD").await.unwrap();
        assert!(removed.success);
        assert_eq!(removed.message, "Successfully removed ticker SOLUSD");
        assert!(removed.active_tickers.is_empty());

        let missing = service.remove_ticker("SOLUSD").await.unwrap();
        assert!(!missing.success);
        assert_eq!(missing.message, "Ticker SOLUSD is not tracked");
    }

    #[tokio::test]
    async fn remove_with_failing_stop_is_still_a_success() {
        let mut feed = MockPriceFeed::new();
        feed.expect_start().returning(|_| Ok(()));
        feed.expect_stop()
            .times(1)
            .returning(|_| Err(FeedError::Unavailable("scraper crashed".to_string())));
        let service = service(feed);

        service.add_ticker("DOTUSD").await.unwrap();
        let removed = service.remove_ticker("DOTUSD").await.unwrap();
        assert!(removed.success);
        assert_eq!(removed.message, "Successfully removed ticker DOTUSD");
        assert!(removed.active_tickers.is_empty());
    }

    #[test]
    fn response_serializes_camel_case() {
        let response = TickerResponse {
            success: true,
            message: "ok".to_string(),
            active_tickers: vec![Ticker::parse("BTCUSD").unwrap()],
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["activeTickers"][0], "BTCUSD");
    }

    #[tokio::test]
    async fn stream_prices_until_ends_on_parent_cancel() {
        let service = service(MockPriceFeed::new());
        let cancel = CancellationToken::new();
        let mut session = service.stream_prices_until(&cancel);
        assert_eq!(service.hub().subscriber_count(), 1);

        cancel.cancel();
        assert!(session.next().await.is_none());
        assert_eq!(service.hub().subscriber_count(), 0);
    }
}
